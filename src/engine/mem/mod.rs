//! In-process reference engine
//!
//! An engine in the spirit of GDAL's `Memory` driver: data sources live in a
//! thread-local registry keyed by name, and every [`MemEngine`] opened on the same name
//! shares the same tables. It implements the complete engine contract (predicates,
//! spatial filters, well-known encodings, transactions, layer algebra on polygonal
//! geometries) so that layers can be used without a GDAL installation.
//!
//! ```
//! use gdal_vector::engine::mem::MemEngine;
//! use gdal_vector::vector::{FieldDefn, FieldType, GeomFieldDefn, VectorLayer};
//!
//! # fn main() -> gdal_vector::errors::Result<()> {
//! let mut ds = MemEngine::create("doc-example")?;
//! ds.create_layer(
//!     "parcels",
//!     vec![FieldDefn::new("owner", FieldType::String)],
//!     vec![GeomFieldDefn::new("", "Polygon")],
//! )?;
//!
//! let mut layer = VectorLayer::<MemEngine>::open("doc-example", "parcels")?;
//! assert_eq!(layer.feature_count()?, 0);
//! # MemEngine::remove("doc-example");
//! # Ok(())
//! # }
//! ```

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use log::debug;

use crate::cpl::CslStringList;
use crate::engine::{DatasetCaps, Engine, EngineLayer, LayerCaps, NativeFeature};
use crate::errors::{GdalError, OgrErr, Result};
use crate::options::Access;
use crate::vector::{FieldDefn, FieldDomain, GeomFieldDefn};

mod algebra;
mod geometry;
mod layer;
mod predicate;

pub use geometry::MemGeometry;
pub use layer::MemLayer;

thread_local! {
    static REGISTRY: RefCell<HashMap<String, Rc<RefCell<MemDataset>>>> =
        RefCell::new(HashMap::new());
}

/// Transaction behavior of a memory data source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TransactionSupport {
    /// Transactions are refused.
    #[default]
    None,
    /// Only forced transactions are accepted (`EmulatedTransactions`).
    Emulated,
    /// Native transactions (`Transactions`).
    Native,
}

/// Capabilities of layers created through [`MemEngine::create_layer`].
pub const DEFAULT_LAYER_CAPS: LayerCaps = LayerCaps::RANDOM_READ
    .union(LayerCaps::SEQUENTIAL_WRITE)
    .union(LayerCaps::RANDOM_WRITE)
    .union(LayerCaps::UPSERT_FEATURE)
    .union(LayerCaps::FAST_FEATURE_COUNT)
    .union(LayerCaps::FAST_GET_EXTENT)
    .union(LayerCaps::FAST_SET_NEXT_BY_INDEX)
    .union(LayerCaps::CREATE_FIELD)
    .union(LayerCaps::DELETE_FIELD)
    .union(LayerCaps::REORDER_FIELDS)
    .union(LayerCaps::ALTER_FIELD_DEFN)
    .union(LayerCaps::IGNORE_FIELDS)
    .union(LayerCaps::DELETE_FEATURE)
    .union(LayerCaps::STRINGS_AS_UTF8);

pub(crate) const WRITE_CAPS: LayerCaps = LayerCaps::SEQUENTIAL_WRITE
    .union(LayerCaps::RANDOM_WRITE)
    .union(LayerCaps::UPSERT_FEATURE)
    .union(LayerCaps::DELETE_FEATURE)
    .union(LayerCaps::CREATE_FIELD)
    .union(LayerCaps::DELETE_FIELD)
    .union(LayerCaps::REORDER_FIELDS)
    .union(LayerCaps::ALTER_FIELD_DEFN)
    .union(LayerCaps::RENAME);

#[derive(Debug)]
pub(crate) struct MemTable {
    pub(crate) name: String,
    pub(crate) fid_column: String,
    pub(crate) fields: Vec<FieldDefn>,
    pub(crate) geom_fields: Vec<GeomFieldDefn>,
    pub(crate) features: BTreeMap<i64, NativeFeature<MemGeometry>>,
    pub(crate) next_fid: i64,
    pub(crate) caps: LayerCaps,
    /// Overrides the feature count the layer reports.
    pub(crate) reported_count: Option<i64>,
    pub(crate) metadata: BTreeMap<String, CslStringList>,
}

impl MemTable {
    pub(crate) fn new(name: &str, fields: Vec<FieldDefn>, geom_fields: Vec<GeomFieldDefn>) -> Self {
        MemTable {
            name: name.to_string(),
            fid_column: String::new(),
            fields,
            geom_fields,
            features: BTreeMap::new(),
            next_fid: 1,
            caps: DEFAULT_LAYER_CAPS,
            reported_count: None,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
struct TableSnapshot {
    features: BTreeMap<i64, NativeFeature<MemGeometry>>,
    next_fid: i64,
}

#[derive(Debug, Default)]
pub(crate) struct MemDataset {
    tables: Vec<Rc<RefCell<MemTable>>>,
    domains: Vec<FieldDomain>,
    transactions: TransactionSupport,
    /// Table count and table contents at the start of the active transaction.
    snapshot: Option<(usize, Vec<TableSnapshot>)>,
    result_sets: usize,
}

impl MemDataset {
    pub(crate) fn in_transaction(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// A data source of the memory engine.
#[derive(Debug)]
pub struct MemEngine {
    dsn: String,
    dataset: Rc<RefCell<MemDataset>>,
    access: Access,
    last_error: String,
}

impl MemEngine {
    /// Creates an empty data source registered under `dsn`, opened for update.
    pub fn create(dsn: &str) -> Result<Self> {
        REGISTRY.with(|registry| {
            let mut registry = registry.borrow_mut();
            if registry.contains_key(dsn) {
                return Err(GdalError::OpenFailure {
                    dsn: dsn.to_string(),
                    msg: "data source already exists".to_string(),
                });
            }
            let dataset = Rc::new(RefCell::new(MemDataset::default()));
            registry.insert(dsn.to_string(), dataset.clone());
            debug!("Created memory data source '{dsn}'");
            Ok(MemEngine {
                dsn: dsn.to_string(),
                dataset,
                access: Access::ReadWrite,
                last_error: String::new(),
            })
        })
    }

    /// Unregisters `dsn`. Open handles keep their tables alive.
    pub fn remove(dsn: &str) -> bool {
        REGISTRY.with(|registry| registry.borrow_mut().remove(dsn).is_some())
    }

    /// Number of open handles on `dsn`, not counting the registry itself.
    pub fn handle_count(dsn: &str) -> usize {
        REGISTRY.with(|registry| {
            registry
                .borrow()
                .get(dsn)
                .map_or(0, |ds| Rc::strong_count(ds) - 1)
        })
    }

    /// Number of result sets obtained with [`Engine::execute_sql`] and not released yet.
    pub fn result_set_count(dsn: &str) -> usize {
        REGISTRY.with(|registry| {
            registry
                .borrow()
                .get(dsn)
                .map_or(0, |ds| ds.borrow().result_sets)
        })
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    pub fn create_layer(
        &mut self,
        name: &str,
        fields: Vec<FieldDefn>,
        geom_fields: Vec<GeomFieldDefn>,
    ) -> Result<MemLayer> {
        if !self.access.is_update() {
            return Err(GdalError::OgrError {
                err: OgrErr::UnsupportedOperation,
                method_name: "GDALDatasetCreateLayer",
                msg: "data source is opened read-only".to_string(),
            });
        }
        let mut dataset = self.dataset.borrow_mut();
        if dataset
            .tables
            .iter()
            .any(|t| t.borrow().name.eq_ignore_ascii_case(name))
        {
            return Err(GdalError::OgrError {
                err: OgrErr::Failure,
                method_name: "GDALDatasetCreateLayer",
                msg: format!("layer '{name}' already exists"),
            });
        }
        let table = Rc::new(RefCell::new(MemTable::new(name, fields, geom_fields)));
        dataset.tables.push(table.clone());
        drop(dataset);
        Ok(MemLayer::new(table, self.dataset.clone(), true, false))
    }

    pub fn set_transaction_support(&mut self, support: TransactionSupport) {
        self.dataset.borrow_mut().transactions = support;
    }

    pub fn add_field_domain(&mut self, domain: FieldDomain) {
        let mut dataset = self.dataset.borrow_mut();
        dataset.domains.retain(|d| d.name != domain.name);
        dataset.domains.push(domain);
    }

    fn fail(&mut self, err: OgrErr, method_name: &'static str, msg: String) -> GdalError {
        self.last_error = msg.clone();
        GdalError::OgrError {
            err,
            method_name,
            msg,
        }
    }
}

/// Splits `SELECT * FROM <table> [WHERE <predicate>]`.
fn parse_select(query: &str) -> Option<(String, Option<String>)> {
    let mut words = query.trim().trim_end_matches(';').splitn(4, char::is_whitespace);
    let select = words.next()?;
    let star = words.next()?;
    let from = words.next()?;
    if !select.eq_ignore_ascii_case("SELECT") || star != "*" || !from.eq_ignore_ascii_case("FROM") {
        return None;
    }
    let rest = words.next()?.trim();
    let (table, predicate) = match rest.find(char::is_whitespace) {
        Some(pos) => {
            let (table, tail) = rest.split_at(pos);
            let tail = tail.trim_start();
            let keyword = tail.get(..5)?;
            if !keyword.eq_ignore_ascii_case("WHERE") {
                return None;
            }
            (table, Some(tail[5..].trim().to_string()))
        }
        None => (rest, None),
    };
    Some((table.trim_matches('"').to_string(), predicate))
}

impl Engine for MemEngine {
    type Geometry = MemGeometry;
    type Layer = MemLayer;

    fn open(dsn: &str, access: Access, open_options: &CslStringList) -> Result<Self> {
        let dataset = REGISTRY.with(|registry| registry.borrow().get(dsn).cloned());
        let dataset = dataset.ok_or_else(|| GdalError::OpenFailure {
            dsn: dsn.to_string(),
            msg: "no such memory data source".to_string(),
        })?;
        for (key, _) in open_options.iter() {
            debug!("Memory data source '{dsn}' ignores open option {key}");
        }
        Ok(MemEngine {
            dsn: dsn.to_string(),
            dataset,
            access,
            last_error: String::new(),
        })
    }

    fn layer_count(&self) -> usize {
        self.dataset.borrow().tables.len()
    }

    fn layer_by_name(&mut self, name: &str) -> Result<MemLayer> {
        let table = {
            let dataset = self.dataset.borrow();
            dataset
                .tables
                .iter()
                .find(|t| t.borrow().name == name)
                .or_else(|| {
                    dataset
                        .tables
                        .iter()
                        .find(|t| t.borrow().name.eq_ignore_ascii_case(name))
                })
                .cloned()
        };
        match table {
            Some(table) => Ok(MemLayer::new(
                table,
                self.dataset.clone(),
                self.access.is_update(),
                false,
            )),
            None => Err(GdalError::OpenFailure {
                dsn: self.dsn.clone(),
                msg: format!("layer '{name}' not found"),
            }),
        }
    }

    fn execute_sql(
        &mut self,
        query: &str,
        spatial_filter: Option<&MemGeometry>,
        dialect: Option<&str>,
    ) -> Result<Option<MemLayer>> {
        if let Some(dialect) = dialect {
            if !dialect.is_empty()
                && !dialect.eq_ignore_ascii_case("OGRSQL")
                && !dialect.eq_ignore_ascii_case("SQLITE")
            {
                return Err(self.fail(
                    OgrErr::UnsupportedOperation,
                    "GDALDatasetExecuteSQL",
                    format!("unsupported SQL dialect '{dialect}'"),
                ));
            }
        }
        let Some((table_name, predicate)) = parse_select(query) else {
            return Err(self.fail(
                OgrErr::CorruptData,
                "GDALDatasetExecuteSQL",
                format!("unsupported statement '{query}'"),
            ));
        };
        let mut source = match self.layer_by_name(&table_name) {
            Ok(source) => source,
            Err(_) => {
                return Err(self.fail(
                    OgrErr::Failure,
                    "GDALDatasetExecuteSQL",
                    format!("table '{table_name}' not found"),
                ))
            }
        };
        if let Some(predicate) = predicate.as_deref() {
            if let Err(e) = source.set_attribute_filter(Some(predicate)) {
                let msg = e.to_string();
                return Err(self.fail(OgrErr::CorruptData, "GDALDatasetExecuteSQL", msg));
            }
        }
        let mut result = source.snapshot_result_set();
        if let Some(geometry) = spatial_filter {
            result.set_spatial_filter(Some(geometry));
        }
        self.dataset.borrow_mut().result_sets += 1;
        debug!("Opened result set for '{query}'");
        Ok(Some(result))
    }

    fn release_result_set(&mut self, layer: MemLayer) {
        let mut dataset = self.dataset.borrow_mut();
        dataset.result_sets = dataset.result_sets.saturating_sub(1);
        drop(layer);
    }

    fn test_capability(&self, capability: &str) -> bool {
        let dataset = self.dataset.borrow();
        let Some(cap) = DatasetCaps::named()
            .find(|(_, name)| name.eq_ignore_ascii_case(capability))
            .map(|(flag, _)| flag)
        else {
            return false;
        };
        match cap {
            DatasetCaps::CREATE_LAYER => self.access.is_update(),
            DatasetCaps::TRANSACTIONS => dataset.transactions == TransactionSupport::Native,
            DatasetCaps::EMULATED_TRANSACTIONS => {
                dataset.transactions == TransactionSupport::Emulated
            }
            _ => false,
        }
    }

    fn field_domain(&self, name: &str) -> Option<FieldDomain> {
        self.dataset
            .borrow()
            .domains
            .iter()
            .find(|d| d.name == name)
            .cloned()
    }

    fn start_transaction(&mut self, force: bool) -> Result<()> {
        let support = self.dataset.borrow().transactions;
        let allowed = match support {
            TransactionSupport::Native => true,
            TransactionSupport::Emulated => force,
            TransactionSupport::None => false,
        };
        if !allowed {
            return Err(self.fail(
                OgrErr::UnsupportedOperation,
                "GDALDatasetStartTransaction",
                "transactions are not supported".to_string(),
            ));
        }
        let mut dataset = self.dataset.borrow_mut();
        if dataset.in_transaction() {
            drop(dataset);
            return Err(self.fail(
                OgrErr::Failure,
                "GDALDatasetStartTransaction",
                "a transaction is already active".to_string(),
            ));
        }
        let tables = dataset
            .tables
            .iter()
            .map(|t| {
                let t = t.borrow();
                TableSnapshot {
                    features: t.features.clone(),
                    next_fid: t.next_fid,
                }
            })
            .collect::<Vec<_>>();
        dataset.snapshot = Some((tables.len(), tables));
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<()> {
        let snapshot = self.dataset.borrow_mut().snapshot.take();
        match snapshot {
            Some(_) => Ok(()),
            None => Err(self.fail(
                OgrErr::Failure,
                "GDALDatasetCommitTransaction",
                "no transaction is active".to_string(),
            )),
        }
    }

    fn rollback_transaction(&mut self) -> Result<()> {
        let mut dataset = self.dataset.borrow_mut();
        let Some((table_count, tables)) = dataset.snapshot.take() else {
            drop(dataset);
            return Err(self.fail(
                OgrErr::Failure,
                "GDALDatasetRollbackTransaction",
                "no transaction is active".to_string(),
            ));
        };
        dataset.tables.truncate(table_count);
        for (table, snapshot) in dataset.tables.iter().zip(tables) {
            let mut table = table.borrow_mut();
            table.features = snapshot.features;
            table.next_fid = snapshot.next_fid;
        }
        Ok(())
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}
