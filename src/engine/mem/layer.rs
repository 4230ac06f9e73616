use std::cell::RefCell;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::rc::Rc;

use geo::Intersects;

use super::predicate::{self, Expr};
use super::{algebra, MemDataset, MemGeometry, MemTable, WRITE_CAPS};
use crate::cpl::CslStringList;
use crate::engine::{
    AlgebraOp, EngineGeometry, EngineLayer, Envelope, LayerCaps, NativeFeature, NativeField,
    ProgressFn, NULL_FID, OGR_GEOMETRY,
};
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::{FieldDefn, FieldType, GeomFieldDefn};

#[derive(Clone, Debug)]
enum SpatialFilter {
    Rect(Envelope),
    Geometry(MemGeometry, Envelope),
}

/// A layer of the memory engine.
///
/// Each handle has its own filters, ignored fields and read position; the features
/// are shared with every other handle on the same table.
#[derive(Debug)]
pub struct MemLayer {
    table: Rc<RefCell<MemTable>>,
    dataset: Rc<RefCell<MemDataset>>,
    writable: bool,
    is_result_set: bool,
    attribute_filter: Option<Expr>,
    spatial_filter: Option<SpatialFilter>,
    ignored_fields: Vec<usize>,
    ignored_geom_fields: Vec<usize>,
    position: Bound<i64>,
    last_error: String,
}

impl MemLayer {
    pub(crate) fn new(
        table: Rc<RefCell<MemTable>>,
        dataset: Rc<RefCell<MemDataset>>,
        writable: bool,
        is_result_set: bool,
    ) -> Self {
        MemLayer {
            table,
            dataset,
            writable,
            is_result_set,
            attribute_filter: None,
            spatial_filter: None,
            ignored_fields: Vec::new(),
            ignored_geom_fields: Vec::new(),
            position: Bound::Unbounded,
            last_error: String::new(),
        }
    }

    /// Replaces the capabilities of the underlying table.
    pub fn set_capabilities(&mut self, caps: LayerCaps) {
        self.table.borrow_mut().caps = caps;
    }

    /// Makes the layer report `count` as its feature count regardless of its content,
    /// like drivers whose counts are estimates.
    pub fn set_reported_count(&mut self, count: Option<i64>) {
        self.table.borrow_mut().reported_count = count;
    }

    /// Names the identifier column, e.g. `fid` for GeoPackage-like layers.
    pub fn set_fid_column(&mut self, name: &str) {
        self.table.borrow_mut().fid_column = name.to_string();
    }

    pub fn is_result_set(&self) -> bool {
        self.is_result_set
    }

    pub(crate) fn table(&self) -> &Rc<RefCell<MemTable>> {
        &self.table
    }

    fn fail(&mut self, err: OgrErr, method_name: &'static str, msg: String) -> GdalError {
        self.last_error = msg.clone();
        GdalError::OgrError {
            err,
            method_name,
            msg,
        }
    }

    fn caps(&self) -> LayerCaps {
        let caps = self.table.borrow().caps;
        if self.writable {
            caps
        } else {
            caps.difference(WRITE_CAPS)
        }
    }

    fn passes_filters(&self, feature: &NativeFeature<MemGeometry>) -> bool {
        if let Some(expr) = &self.attribute_filter {
            if !expr.matches(feature.fid, &feature.fields) {
                return false;
            }
        }
        match &self.spatial_filter {
            None => true,
            Some(filter) => {
                let Some(Some(geometry)) = feature.geometries.first() else {
                    return false;
                };
                let envelope = geometry.envelope();
                match filter {
                    SpatialFilter::Rect(rect) => !geometry.is_empty() && rect.intersects(&envelope),
                    SpatialFilter::Geometry(filter, rect) => {
                        !geometry.is_empty()
                            && rect.intersects(&envelope)
                            && filter.geo().intersects(geometry.geo())
                    }
                }
            }
        }
    }

    /// A copy of `feature` with ignored fields unset and ignored geometries dropped.
    fn project(&self, feature: &NativeFeature<MemGeometry>) -> NativeFeature<MemGeometry> {
        let mut projected = feature.clone();
        for idx in &self.ignored_fields {
            if let Some(field) = projected.fields.get_mut(*idx) {
                *field = NativeField::Unset;
            }
        }
        for idx in &self.ignored_geom_fields {
            if let Some(geometry) = projected.geometries.get_mut(*idx) {
                *geometry = None;
            }
        }
        projected
    }

    /// Identifiers of the features passing the current filters, in read order.
    fn matching_fids(&self) -> Vec<i64> {
        self.table
            .borrow()
            .features
            .values()
            .filter(|f| self.passes_filters(f))
            .map(|f| f.fid)
            .collect()
    }

    /// Every feature passing the current filters, in read order.
    pub(crate) fn matching_features(&self) -> Vec<NativeFeature<MemGeometry>> {
        self.table
            .borrow()
            .features
            .values()
            .filter(|f| self.passes_filters(f))
            .cloned()
            .collect()
    }

    /// Materializes the features passing the current filters into a read-only layer.
    pub(crate) fn snapshot_result_set(&self) -> MemLayer {
        let (name, fields, geom_fields, fid_column) = {
            let table = self.table.borrow();
            (
                table.name.clone(),
                table.fields.clone(),
                table.geom_fields.clone(),
                table.fid_column.clone(),
            )
        };
        let mut result = MemTable::new(&name, fields, geom_fields);
        result.fid_column = fid_column;
        result.caps = LayerCaps::RANDOM_READ
            | LayerCaps::FAST_FEATURE_COUNT
            | LayerCaps::FAST_GET_EXTENT
            | LayerCaps::FAST_SET_NEXT_BY_INDEX
            | LayerCaps::IGNORE_FIELDS
            | LayerCaps::STRINGS_AS_UTF8;
        result.features = self
            .matching_features()
            .into_iter()
            .map(|f| (f.fid, f))
            .collect::<BTreeMap<_, _>>();
        MemLayer::new(
            Rc::new(RefCell::new(result)),
            self.dataset.clone(),
            false,
            true,
        )
    }

    fn check_writable(&mut self, cap: LayerCaps, method_name: &'static str) -> Result<()> {
        if !self.writable {
            return Err(self.fail(
                OgrErr::UnsupportedOperation,
                method_name,
                "layer is opened read-only".to_string(),
            ));
        }
        if !self.table.borrow().caps.contains(cap) {
            return Err(self.fail(
                OgrErr::UnsupportedOperation,
                method_name,
                format!("layer does not support {}", cap.ogr_name().unwrap_or("writing")),
            ));
        }
        Ok(())
    }

    /// Fills defaults and enforces NOT NULL and UNIQUE constraints.
    fn prepare(
        &mut self,
        feature: &NativeFeature<MemGeometry>,
        method_name: &'static str,
    ) -> Result<NativeFeature<MemGeometry>> {
        let (fields, geom_fields) = {
            let table = self.table.borrow();
            (table.fields.clone(), table.geom_fields.clone())
        };
        if feature.fields.len() != fields.len() || feature.geometries.len() != geom_fields.len() {
            return Err(self.fail(
                OgrErr::Failure,
                method_name,
                "feature does not match the layer definition".to_string(),
            ));
        }
        let mut prepared = feature.clone();
        for (defn, value) in fields.iter().zip(prepared.fields.iter_mut()) {
            if *value == NativeField::Unset {
                if let Some(default) = defn.default.as_deref().and_then(|d| parse_default(defn, d)) {
                    *value = default;
                }
            }
        }
        for (defn, value) in fields.iter().zip(prepared.fields.iter()) {
            if !defn.nullable && value.is_absent() {
                let msg = format!("NOT NULL constraint failed: {}", defn.name);
                return Err(self.fail(OgrErr::Failure, method_name, msg));
            }
        }
        for (defn, geometry) in geom_fields.iter().zip(prepared.geometries.iter()) {
            if !defn.nullable && geometry.is_none() {
                let msg = format!("NOT NULL constraint failed: {}", defn.name);
                return Err(self.fail(OgrErr::Failure, method_name, msg));
            }
        }
        let conflict = {
            let table = self.table.borrow();
            fields.iter().enumerate().find_map(|(idx, defn)| {
                let value = &prepared.fields[idx];
                (defn.unique
                    && !value.is_absent()
                    && table
                        .features
                        .values()
                        .any(|other| other.fid != prepared.fid && other.fields[idx] == *value))
                .then(|| defn.name.clone())
            })
        };
        if let Some(name) = conflict {
            return Err(self.fail(
                OgrErr::Failure,
                method_name,
                format!("UNIQUE constraint failed: {name}"),
            ));
        }
        Ok(prepared)
    }

    fn insert(&mut self, feature: &mut NativeFeature<MemGeometry>, method_name: &'static str) -> Result<()> {
        let mut prepared = self.prepare(feature, method_name)?;
        let mut table = self.table.borrow_mut();
        if prepared.fid == NULL_FID {
            prepared.fid = table.next_fid;
        } else if table.features.contains_key(&prepared.fid) {
            let msg = format!("feature {} already exists", prepared.fid);
            drop(table);
            return Err(self.fail(OgrErr::Failure, method_name, msg));
        }
        let Some(following) = prepared.fid.checked_add(1) else {
            drop(table);
            let msg = "feature id out of range".to_string();
            return Err(self.fail(OgrErr::Failure, method_name, msg));
        };
        table.next_fid = table.next_fid.max(following);
        feature.fid = prepared.fid;
        table.features.insert(prepared.fid, prepared);
        Ok(())
    }
}

fn parse_default(defn: &FieldDefn, literal: &str) -> Option<NativeField> {
    let literal = literal.trim();
    match defn.field_type {
        FieldType::Integer => literal.parse().ok().map(NativeField::Integer),
        FieldType::Integer64 => literal.parse().ok().map(NativeField::Integer64),
        FieldType::Real => literal.parse().ok().map(NativeField::Real),
        FieldType::String => literal
            .strip_prefix('\'')
            .and_then(|s| s.strip_suffix('\''))
            .map(|s| NativeField::String(s.replace("''", "'"))),
        _ => None,
    }
}

impl EngineLayer for MemLayer {
    type Geometry = MemGeometry;

    fn name(&self) -> String {
        self.table.borrow().name.clone()
    }

    fn geometry_type(&self) -> String {
        self.table
            .borrow()
            .geom_fields
            .first()
            .map_or_else(|| "None".to_string(), |g| g.geom_type.clone())
    }

    fn geometry_column(&self) -> String {
        self.table
            .borrow()
            .geom_fields
            .first()
            .map(|g| g.name.clone())
            .unwrap_or_default()
    }

    fn fid_column(&self) -> String {
        self.table.borrow().fid_column.clone()
    }

    fn spatial_ref(&self) -> Result<String> {
        self.geom_field_spatial_ref(0)
    }

    fn extent(&mut self, force: bool) -> Result<Envelope> {
        if !force && !self.caps().contains(LayerCaps::FAST_GET_EXTENT) {
            return Err(self.fail(
                OgrErr::Failure,
                "OGR_L_GetExtent",
                "extent is not available without a scan".to_string(),
            ));
        }
        let extent = self
            .table
            .borrow()
            .features
            .values()
            .filter_map(|f| f.geometries.first().cloned().flatten())
            .filter(|g| !g.is_empty())
            .map(|g| g.envelope())
            .reduce(|a, b| {
                Envelope::new(
                    a.min_x.min(b.min_x),
                    a.min_y.min(b.min_y),
                    a.max_x.max(b.max_x),
                    a.max_y.max(b.max_y),
                )
            });
        match extent {
            Some(extent) => Ok(extent),
            None => Err(self.fail(
                OgrErr::Failure,
                "OGR_L_GetExtent",
                "layer has no geometries".to_string(),
            )),
        }
    }

    fn feature_count(&mut self, force: bool) -> i64 {
        if let Some(count) = self.table.borrow().reported_count {
            return count;
        }
        if !force && !self.caps().contains(LayerCaps::FAST_FEATURE_COUNT) {
            return -1;
        }
        self.matching_fids().len() as i64
    }

    fn test_capability(&self, capability: &str) -> bool {
        if capability.eq_ignore_ascii_case("Transactions") {
            return self.dataset.borrow().transactions == super::TransactionSupport::Native;
        }
        LayerCaps::from_ogr_name(capability).is_some_and(|cap| self.caps().contains(cap))
    }

    fn fields(&self) -> Vec<FieldDefn> {
        let mut fields = self.table.borrow().fields.clone();
        for idx in &self.ignored_fields {
            if let Some(field) = fields.get_mut(*idx) {
                field.ignored = true;
            }
        }
        fields
    }

    fn geom_fields(&self) -> Vec<GeomFieldDefn> {
        let mut geom_fields = self.table.borrow().geom_fields.clone();
        for (idx, field) in geom_fields.iter_mut().enumerate() {
            field.srs = None;
            field.ignored = self.ignored_geom_fields.contains(&idx);
        }
        geom_fields
    }

    fn geom_field_spatial_ref(&self, index: usize) -> Result<String> {
        let table = self.table.borrow();
        match table.geom_fields.get(index) {
            Some(GeomFieldDefn { srs: Some(srs), .. }) => Ok(srs.clone()),
            Some(_) => Err(GdalError::OgrError {
                err: OgrErr::UnsupportedSrs,
                method_name: "OGR_GFld_GetSpatialRef",
                msg: "geometry field has no spatial reference".to_string(),
            }),
            None => Err(GdalError::BadArgument(format!(
                "geometry field index {index} out of range"
            ))),
        }
    }

    fn set_attribute_filter(&mut self, predicate: Option<&str>) -> Result<()> {
        self.position = Bound::Unbounded;
        let expr = match predicate {
            None => None,
            Some(text) if text.trim().is_empty() => None,
            Some(text) => {
                let parsed = {
                    let table = self.table.borrow();
                    predicate::parse(text, &table.fields, &table.fid_column)
                };
                match parsed {
                    Ok(expr) => Some(expr),
                    Err(e) => {
                        self.last_error = e.to_string();
                        return Err(e);
                    }
                }
            }
        };
        self.attribute_filter = expr;
        Ok(())
    }

    fn set_spatial_filter(&mut self, geometry: Option<&MemGeometry>) {
        self.position = Bound::Unbounded;
        self.spatial_filter =
            geometry.map(|g| SpatialFilter::Geometry(g.clone(), g.envelope()));
    }

    fn set_spatial_filter_rect(&mut self, envelope: &Envelope) {
        self.position = Bound::Unbounded;
        self.spatial_filter = Some(SpatialFilter::Rect(*envelope));
    }

    fn set_ignored_fields(&mut self, names: &[&str]) -> Result<()> {
        let mut ignored_fields = Vec::new();
        let mut ignored_geom_fields = Vec::new();
        let unknown = {
            let table = self.table.borrow();
            let mut unknown = None;
            for name in names {
                if name.eq_ignore_ascii_case("OGR_STYLE") {
                    continue;
                }
                if name.eq_ignore_ascii_case(OGR_GEOMETRY) && !table.geom_fields.is_empty() {
                    ignored_geom_fields.push(0);
                } else if let Some(idx) = table.fields.iter().position(|f| f.name == *name) {
                    ignored_fields.push(idx);
                } else if let Some(idx) = table
                    .geom_fields
                    .iter()
                    .position(|g| !g.name.is_empty() && g.name == *name)
                {
                    ignored_geom_fields.push(idx);
                } else {
                    unknown = Some(name.to_string());
                    break;
                }
            }
            unknown
        };
        if let Some(name) = unknown {
            return Err(self.fail(
                OgrErr::Failure,
                "OGR_L_SetIgnoredFields",
                format!("no such field '{name}'"),
            ));
        }
        self.ignored_fields = ignored_fields;
        self.ignored_geom_fields = ignored_geom_fields;
        Ok(())
    }

    fn reset_reading(&mut self) {
        self.position = Bound::Unbounded;
    }

    fn next_feature(&mut self) -> Option<NativeFeature<MemGeometry>> {
        let table = self.table.clone();
        let table = table.borrow();
        for (fid, feature) in table.features.range((self.position, Bound::Unbounded)) {
            self.position = Bound::Excluded(*fid);
            if self.passes_filters(feature) {
                return Some(self.project(feature));
            }
        }
        if let Some((fid, _)) = table.features.last_key_value() {
            self.position = Bound::Excluded(*fid);
        }
        None
    }

    fn set_next_by_index(&mut self, index: i64) -> Result<()> {
        if index < 0 {
            return Err(self.fail(
                OgrErr::NonExistingFeature,
                "OGR_L_SetNextByIndex",
                format!("invalid index {index}"),
            ));
        }
        let fids = self.matching_fids();
        let index = index as usize;
        self.position = if index == 0 {
            Bound::Unbounded
        } else if index <= fids.len() {
            Bound::Excluded(fids[index - 1])
        } else {
            Bound::Excluded(i64::MAX)
        };
        Ok(())
    }

    fn feature(&mut self, fid: i64) -> Option<NativeFeature<MemGeometry>> {
        let table = self.table.borrow();
        table.features.get(&fid).map(|f| self.project(f))
    }

    fn create_feature(&mut self, feature: &mut NativeFeature<MemGeometry>) -> Result<()> {
        self.check_writable(LayerCaps::SEQUENTIAL_WRITE, "OGR_L_CreateFeature")?;
        self.insert(feature, "OGR_L_CreateFeature")
    }

    fn set_feature(&mut self, feature: &NativeFeature<MemGeometry>) -> Result<()> {
        self.check_writable(LayerCaps::RANDOM_WRITE, "OGR_L_SetFeature")?;
        if !self.table.borrow().features.contains_key(&feature.fid) {
            return Err(self.fail(
                OgrErr::NonExistingFeature,
                "OGR_L_SetFeature",
                format!("feature {} does not exist", feature.fid),
            ));
        }
        let prepared = self.prepare(feature, "OGR_L_SetFeature")?;
        self.table
            .borrow_mut()
            .features
            .insert(prepared.fid, prepared);
        Ok(())
    }

    fn upsert_feature(&mut self, feature: &mut NativeFeature<MemGeometry>) -> Result<()> {
        self.check_writable(LayerCaps::UPSERT_FEATURE, "OGR_L_UpsertFeature")?;
        let exists = self.table.borrow().features.contains_key(&feature.fid);
        if exists {
            let prepared = self.prepare(feature, "OGR_L_UpsertFeature")?;
            self.table
                .borrow_mut()
                .features
                .insert(prepared.fid, prepared);
            Ok(())
        } else {
            self.insert(feature, "OGR_L_UpsertFeature")
        }
    }

    fn delete_feature(&mut self, fid: i64) -> Result<()> {
        self.check_writable(LayerCaps::DELETE_FEATURE, "OGR_L_DeleteFeature")?;
        if self.table.borrow_mut().features.remove(&fid).is_none() {
            return Err(self.fail(
                OgrErr::NonExistingFeature,
                "OGR_L_DeleteFeature",
                format!("feature {fid} does not exist"),
            ));
        }
        Ok(())
    }

    fn sync_to_disk(&mut self) -> Result<()> {
        Ok(())
    }

    fn metadata(&self, domain: &str) -> CslStringList {
        self.table
            .borrow()
            .metadata
            .get(domain)
            .cloned()
            .unwrap_or_default()
    }

    fn set_metadata(&mut self, metadata: &CslStringList, domain: &str) -> Result<()> {
        self.table
            .borrow_mut()
            .metadata
            .insert(domain.to_string(), metadata.clone());
        Ok(())
    }

    fn metadata_item(&self, key: &str, domain: &str) -> Option<String> {
        self.table
            .borrow()
            .metadata
            .get(domain)
            .and_then(|m| m.fetch_name_value(key))
            .map(str::to_string)
    }

    fn algebra(
        &mut self,
        op: AlgebraOp,
        method: &mut Self,
        result: &mut Self,
        options: &CslStringList,
        progress: Option<&mut ProgressFn<'_>>,
    ) -> Result<()> {
        if !result.writable {
            return Err(self.fail(
                OgrErr::UnsupportedOperation,
                op.method_name(),
                "result layer is opened read-only".to_string(),
            ));
        }
        match algebra::run(op, self, method, result, options, progress) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.last_error = match &e {
                    GdalError::OgrError { msg, .. } => msg.clone(),
                    other => other.to_string(),
                };
                Err(e)
            }
        }
    }

    fn last_error_msg(&self) -> String {
        self.last_error.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mem::MemEngine;
    use crate::engine::Engine;
    use crate::options::Access;

    fn layer(dsn: &str) -> MemLayer {
        let mut ds = MemEngine::create(dsn).unwrap();
        let mut layer = ds
            .create_layer(
                "points",
                vec![
                    FieldDefn::new("name", FieldType::String).not_null(),
                    FieldDefn::new("code", FieldType::Integer).unique(),
                    FieldDefn::new("score", FieldType::Real).with_default("1.5"),
                ],
                vec![GeomFieldDefn::new("", "Point")],
            )
            .unwrap();
        for (i, name) in ["a", "b", "c", "d"].iter().enumerate() {
            let mut f = NativeFeature::new(3, 1);
            f.fields[0] = NativeField::String(name.to_string());
            f.fields[1] = NativeField::Integer(i as i32);
            f.geometries[0] =
                Some(MemGeometry::from_wkt(&format!("POINT ({i} {i})")).unwrap());
            layer.create_feature(&mut f).unwrap();
            assert_eq!(f.fid, i as i64 + 1);
        }
        layer
    }

    #[test]
    fn test_sequential_read_with_filters() {
        let mut layer = layer("memlayer-read");
        assert_eq!(layer.feature_count(true), 4);
        layer.set_attribute_filter(Some("code >= 1")).unwrap();
        layer.set_spatial_filter_rect(&Envelope::new(0.5, 0.5, 2.5, 2.5));
        let names: Vec<_> = std::iter::from_fn(|| layer.next_feature())
            .map(|f| f.fields[0].clone())
            .collect();
        assert_eq!(
            names,
            vec![NativeField::String("b".into()), NativeField::String("c".into())]
        );
        assert!(layer.next_feature().is_none());
        layer.reset_reading();
        assert_eq!(layer.next_feature().map(|f| f.fid), Some(2));
        assert!(layer.set_attribute_filter(Some("code >")).is_err());
        MemEngine::remove("memlayer-read");
    }

    #[test]
    fn test_set_next_by_index() {
        let mut layer = layer("memlayer-index");
        layer.set_next_by_index(2).unwrap();
        assert_eq!(layer.next_feature().map(|f| f.fid), Some(3));
        layer.set_next_by_index(10).unwrap();
        assert!(layer.next_feature().is_none());
        assert!(layer.set_next_by_index(-1).is_err());
        MemEngine::remove("memlayer-index");
    }

    #[test]
    fn test_constraints_and_defaults() {
        let mut layer = layer("memlayer-constraints");
        let mut f = NativeFeature::new(3, 1);
        f.fields[1] = NativeField::Integer(9);
        assert!(layer.create_feature(&mut f).is_err());
        assert!(layer.last_error_msg().contains("NOT NULL"));

        f.fields[0] = NativeField::String("e".into());
        f.fields[1] = NativeField::Integer(0);
        assert!(layer.create_feature(&mut f).is_err());
        assert!(layer.last_error_msg().contains("UNIQUE"));

        f.fields[1] = NativeField::Integer(9);
        layer.create_feature(&mut f).unwrap();
        assert_eq!(
            layer.feature(f.fid).unwrap().fields[2],
            NativeField::Real(1.5)
        );
        MemEngine::remove("memlayer-constraints");
    }

    #[test]
    fn test_ignored_fields() {
        let mut layer = layer("memlayer-ignored");
        layer.set_ignored_fields(&["code", OGR_GEOMETRY]).unwrap();
        let f = layer.next_feature().unwrap();
        assert_eq!(f.fields[1], NativeField::Unset);
        assert_eq!(f.geometries[0], None);
        assert!(layer.fields()[1].ignored);
        assert!(layer.geom_fields()[0].ignored);
        assert!(layer.set_ignored_fields(&["nope"]).is_err());
        MemEngine::remove("memlayer-ignored");
    }

    #[test]
    fn test_read_only_handle() {
        let _layer = layer("memlayer-ro");
        let mut ds =
            MemEngine::open("memlayer-ro", Access::ReadOnly, &CslStringList::new()).unwrap();
        let mut ro = ds.layer_by_name("POINTS").unwrap();
        assert!(!ro.test_capability("SequentialWrite"));
        assert!(ro.test_capability("RandomRead"));
        assert!(ro.delete_feature(1).is_err());
        assert_eq!(ro.feature_count(true), 4);
        MemEngine::remove("memlayer-ro");
    }
}
