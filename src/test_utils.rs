#[cfg(feature = "gdal")]
use std::path::{Path, PathBuf};

use crate::cpl::CslStringList;
use crate::engine::mem::{MemEngine, MemGeometry, MemLayer};
use crate::engine::{Engine, EngineGeometry, EngineLayer, NativeFeature, NativeField, OgrDateTime};
use crate::options::{Access, LayerOptions};
use crate::vector::{FieldDefn, FieldType, GeomFieldDefn, VectorLayer};

/// A memory data source registered under a unique name for the duration of a test.
///
/// The data source is unregistered when the value is dropped; handles opened from it
/// keep working until they are closed.
pub struct MemFixture {
    dsn: String,
    layer_name: String,
}

impl MemFixture {
    /// Creates an empty data source. `dsn` must be unique across the test suite.
    pub fn new(dsn: &str) -> Self {
        MemEngine::create(dsn).unwrap();
        MemFixture {
            dsn: dsn.to_string(),
            layer_name: String::new(),
        }
    }

    pub fn dsn(&self) -> &str {
        &self.dsn
    }

    /// A fresh update handle on the data source.
    pub fn engine(&self) -> MemEngine {
        MemEngine::open(&self.dsn, Access::ReadWrite, &CslStringList::new()).unwrap()
    }

    /// An engine handle on the fixture layer, for tweaking what the engine reports.
    pub fn layer(&self) -> MemLayer {
        self.engine().layer_by_name(&self.layer_name).unwrap()
    }

    /// The fixture layer, opened read-only.
    pub fn open(&self) -> VectorLayer<MemEngine> {
        VectorLayer::open(&self.dsn, self.layer_name.as_str()).unwrap()
    }

    /// The fixture layer, opened for update.
    pub fn open_rw(&self) -> VectorLayer<MemEngine> {
        VectorLayer::open_with_options(
            &self.dsn,
            self.layer_name.as_str(),
            LayerOptions::read_write(),
        )
        .unwrap()
    }
}

impl Drop for MemFixture {
    fn drop(&mut self) {
        MemEngine::remove(&self.dsn);
    }
}

fn date(year: i32, month: u32, day: u32) -> NativeField {
    NativeField::Date(OgrDateTime {
        year,
        month,
        day,
        ..OgrDateTime::default()
    })
}

/// Three adjacent 10x10 parcels along the x axis:
///
/// | FID | owner | area  | zoned      |
/// |-----|-------|-------|------------|
/// | 1   | Ames  | 100.0 | 2001-05-04 |
/// | 2   | Baker | 100.0 | null       |
/// | 3   | Cole  | 150.5 | 2020-01-01 |
///
/// `owner` is NOT NULL; the geometry field is unnamed.
pub fn parcels_fixture(dsn: &str) -> MemFixture {
    let mut fixture = MemFixture::new(dsn);
    fixture.layer_name = "parcels".to_string();
    let mut layer = fixture
        .engine()
        .create_layer(
            "parcels",
            vec![
                FieldDefn::new("owner", FieldType::String).not_null(),
                FieldDefn::new("area", FieldType::Real),
                FieldDefn::new("zoned", FieldType::Date),
            ],
            vec![GeomFieldDefn::new("", "Polygon")],
        )
        .unwrap();
    let parcels = [
        ("Ames", 100.0, date(2001, 5, 4)),
        ("Baker", 100.0, NativeField::Null),
        ("Cole", 150.5, date(2020, 1, 1)),
    ];
    for (i, (owner, area, zoned)) in parcels.into_iter().enumerate() {
        let x = i as f64 * 10.0;
        let wkt = format!(
            "POLYGON (({x} 0, {} 0, {} 10, {x} 10, {x} 0))",
            x + 10.0,
            x + 10.0
        );
        let mut feature = NativeFeature::new(3, 1);
        feature.fields = vec![
            NativeField::String(owner.to_string()),
            NativeField::Real(area),
            zoned,
        ];
        feature.geometries[0] = Some(MemGeometry::from_wkt(&wkt).unwrap());
        layer.create_feature(&mut feature).unwrap();
    }
    fixture
}

/// 61 points, one per year from 1960 to 2020, with identifiers 1 to 61.
pub fn year_fixture(dsn: &str) -> MemFixture {
    let mut fixture = MemFixture::new(dsn);
    fixture.layer_name = "years".to_string();
    let mut layer = fixture
        .engine()
        .create_layer(
            "years",
            vec![
                FieldDefn::new("ig_year", FieldType::Integer),
                FieldDefn::new("label", FieldType::String),
            ],
            vec![GeomFieldDefn::new("", "Point")],
        )
        .unwrap();
    for year in 1960..=2020 {
        let mut feature = NativeFeature::new(2, 1);
        feature.fields = vec![
            NativeField::Integer(year),
            NativeField::String(format!("year {year}")),
        ];
        let point = format!("POINT ({} {})", year - 1960, (year - 1960) % 7);
        feature.geometries[0] = Some(MemGeometry::from_wkt(&point).unwrap());
        layer.create_feature(&mut feature).unwrap();
    }
    fixture
}

/// A temporary directory and a path to a file in that directory.
#[cfg(feature = "gdal")]
pub struct TempFixture {
    _temp_dir: tempfile::TempDir,
    temp_path: PathBuf,
}

#[cfg(feature = "gdal")]
impl TempFixture {
    /// Creates a temporary directory and path to a non-existent file with given `name`.
    pub fn empty(name: &str) -> Self {
        let _temp_dir = tempfile::tempdir().unwrap();
        let temp_path = _temp_dir.path().join(name);
        Self {
            _temp_dir,
            temp_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.temp_path
    }
}

/// Assert numerical difference between two expressions is less than
/// 64-bit machine epsilon or a specified epsilon.
macro_rules! assert_near {
    ($left:expr, $right:expr) => {
        assert_near!($left, $right, epsilon = f64::EPSILON)
    };
    ($left:expr, $right:expr, epsilon = $ep:expr) => {
        assert!(
            ($left - $right).abs() < $ep,
            "|{} - {}| = {} is greater than epsilon {:.4e}",
            $left,
            $right,
            ($left - $right).abs(),
            $ep
        )
    };
}
pub(crate) use assert_near;
