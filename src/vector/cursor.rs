use log::debug;

use crate::engine::{Engine, EngineLayer};
use crate::errors::{GdalError, Result, Warning};
use crate::vector::filter::FilterGuard;
use crate::vector::layer::{engine_msg, report, VectorLayer};
use crate::vector::table::{ColumnPlan, ResultTable, TableBuilder};
use crate::vector::value::{Row, FID_KEY};

/// Where a layer stands in its sequential read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorState {
    Closed,
    /// The next read starts with the first feature passing the filters.
    Idle,
    /// A read is in progress.
    Scanning,
}

/// How many features [`VectorLayer::fetch`] reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchSize {
    /// Up to this many features from the current position.
    Rows(usize),
    /// Every feature, starting over from the first.
    All,
}

/// `name` can be used unquoted in OGR SQL.
fn is_plain_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<E: Engine> VectorLayer<E> {
    pub fn cursor_state(&self) -> CursorState {
        self.state
            .as_ref()
            .map_or(CursorState::Closed, |open| open.cursor)
    }

    /// Rewinds to the first feature passing the current filters.
    pub fn reset_reading(&mut self) -> Result<()> {
        let open = self.open_mut()?;
        open.layer.reset_reading();
        open.cursor = CursorState::Idle;
        Ok(())
    }

    /// Reads the next feature, `None` at the end of the layer.
    pub fn next_feature(&mut self) -> Result<Option<Row>> {
        let VectorLayer { state, config, .. } = self;
        let open = state.as_mut().ok_or(GdalError::LayerClosed)?;
        open.cursor = CursorState::Scanning;
        let Some(feature) = open.layer.next_feature() else {
            return Ok(None);
        };
        let plan = ColumnPlan::new(&open.schema, &open.ignored, config);
        plan.decode_row(feature, config).map(Some)
    }

    /// Reads features into a [`ResultTable`].
    ///
    /// [`FetchSize::Rows`] continues from the current position and returns fewer rows
    /// at the end of the layer. [`FetchSize::All`] rewinds first and sizes the table from
    /// the feature count of the engine; when more features turn up than counted they
    /// are read too and the table carries a [`Warning::CountMismatch`].
    ///
    /// The interrupt handler, if any, is polled every
    /// [`interrupt_check_interval`](crate::config::ReadConfig::interrupt_check_interval)
    /// rows.
    pub fn fetch(&mut self, size: FetchSize) -> Result<ResultTable> {
        let VectorLayer {
            state,
            config,
            interrupt,
            ..
        } = self;
        let open = state.as_mut().ok_or(GdalError::LayerClosed)?;
        let plan = ColumnPlan::new(&open.schema, &open.ignored, config);

        let (capacity, expected) = match size {
            FetchSize::Rows(n) => (n, None),
            FetchSize::All => {
                open.layer.reset_reading();
                let count = open.layer.feature_count(true);
                (usize::try_from(count).unwrap_or(0), Some(count))
            }
        };
        let mut builder = TableBuilder::allocate(&plan, capacity)?;
        open.cursor = CursorState::Scanning;

        while expected.is_some() || builder.rows() < capacity {
            let Some(feature) = open.layer.next_feature() else {
                break;
            };
            if builder.is_full() {
                builder.grow((builder.rows() / 2).max(64))?;
            }
            builder.push(plan.decode(feature, config)?);

            let interval = config.interrupt_check_interval;
            if let Some(handler) = interrupt.as_mut() {
                if interval > 0 && builder.rows() % interval == 0 && handler() {
                    debug!("Fetch interrupted after {} rows", builder.rows());
                    return Err(GdalError::Interrupted {
                        rows: builder.rows(),
                    });
                }
            }
        }

        let mut warnings = Vec::new();
        if let Some(expected) = expected {
            if expected >= 0 && builder.rows() as i64 > expected {
                let warning = Warning::CountMismatch {
                    expected,
                    actual: builder.rows(),
                };
                report(config, &warning);
                warnings.push(warning);
            }
        }
        Ok(builder.finish(warnings))
    }

    /// Positions the cursor so that the next read returns the feature at `index`
    /// (0-based) among those passing the current filters.
    pub fn set_next_by_index(&mut self, index: i64) -> Result<()> {
        if index < 0 {
            return Err(GdalError::Range {
                method_name: "OGR_L_SetNextByIndex",
                msg: format!("index must be non-negative, got {index}"),
            });
        }
        let open = self.open_mut()?;
        open.layer.set_next_by_index(index).map_err(|e| GdalError::Range {
            method_name: "OGR_L_SetNextByIndex",
            msg: engine_msg(&e),
        })?;
        open.cursor = CursorState::Scanning;
        Ok(())
    }

    /// Reads the feature with identifier `fid`, `None` when there is none.
    ///
    /// The lookup runs under a temporary `<fid column> = fid` attribute filter without
    /// spatial filter. The filters are restored afterwards, even on error, and the
    /// cursor is rewound.
    pub fn feature(&mut self, fid: i64) -> Result<Option<Row>> {
        let fid_column = self.fid_column()?;
        let column = match fid_column.as_str() {
            "" => FID_KEY.to_string(),
            name if is_plain_identifier(name) => name.to_string(),
            name => format!("\"{}\"", name.replace('"', "\"\"")),
        };
        let predicate = format!("{column} = {fid}");
        let mut guard = FilterGuard::attribute_only(self, &predicate)?;
        let table = guard.fetch(FetchSize::Rows(1))?;
        Ok(table.row(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{parcels_fixture, year_fixture};
    use crate::vector::value::FieldValue;

    #[test]
    fn test_next_feature() {
        let fixture = parcels_fixture("cursor-next");
        let mut layer = fixture.open();
        assert_eq!(layer.cursor_state(), CursorState::Idle);
        let first = layer.next_feature().unwrap().unwrap();
        assert_eq!(layer.cursor_state(), CursorState::Scanning);
        assert_eq!(first.fid(), Some(1));
        assert_eq!(
            first.get("owner"),
            Some(&FieldValue::StringValue("Ames".to_string()))
        );
        layer.next_feature().unwrap();
        layer.next_feature().unwrap();
        assert!(layer.next_feature().unwrap().is_none());
        layer.reset_reading().unwrap();
        assert_eq!(layer.cursor_state(), CursorState::Idle);
        assert_eq!(layer.next_feature().unwrap().unwrap().fid(), Some(1));
        layer.close();
        assert_eq!(layer.cursor_state(), CursorState::Closed);
    }

    #[test]
    fn test_fetch_pages() {
        let fixture = year_fixture("cursor-pages");
        let mut layer = fixture.open();
        let mut total = 0;
        loop {
            let page = layer.fetch(FetchSize::Rows(25)).unwrap();
            for (_, column) in page.columns() {
                assert_eq!(column.len(), page.num_rows());
            }
            total += page.num_rows();
            if page.num_rows() < 25 {
                break;
            }
        }
        assert_eq!(total, 61);
        assert_eq!(layer.fetch(FetchSize::Rows(25)).unwrap().num_rows(), 0);
    }

    #[test]
    fn test_fetch_zero_rows_keeps_columns() {
        let fixture = parcels_fixture("cursor-zero");
        let mut layer = fixture.open();
        let table = layer.fetch(FetchSize::Rows(0)).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.num_columns(), 5);
    }

    #[test]
    fn test_fetch_all_rewinds() {
        let fixture = year_fixture("cursor-all");
        let mut layer = fixture.open();
        layer.fetch(FetchSize::Rows(10)).unwrap();
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.num_rows(), 61);
        assert!(table.warnings().is_empty());
    }

    #[test]
    fn test_fetch_all_with_undercount() {
        let fixture = year_fixture("cursor-undercount");
        fixture.layer().set_reported_count(Some(50));
        let mut layer = fixture.open();
        layer.config_mut().quiet = true;
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.num_rows(), 61);
        assert_eq!(
            table.warnings(),
            [Warning::CountMismatch {
                expected: 50,
                actual: 61
            }]
        );
    }

    #[test]
    fn test_fetch_all_with_unknown_count() {
        let fixture = year_fixture("cursor-unknown");
        fixture.layer().set_reported_count(Some(-1));
        let mut layer = fixture.open();
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.num_rows(), 61);
        assert!(table.warnings().is_empty());
    }

    #[test]
    fn test_fetch_too_many_rows() {
        let fixture = parcels_fixture("cursor-alloc");
        let mut layer = fixture.open();
        assert!(matches!(
            layer.fetch(FetchSize::Rows(usize::MAX / 2)),
            Err(GdalError::Allocation { .. })
        ));
        assert_eq!(layer.fetch(FetchSize::All).unwrap().num_rows(), 3);
    }

    #[test]
    fn test_interrupt() {
        let fixture = year_fixture("cursor-interrupt");
        let mut layer = fixture.open();
        layer.config_mut().interrupt_check_interval = 10;
        let mut polls = 0;
        layer.set_interrupt_handler(move || {
            polls += 1;
            polls == 2
        });
        assert!(matches!(
            layer.fetch(FetchSize::All),
            Err(GdalError::Interrupted { rows: 20 })
        ));
    }

    #[test]
    fn test_set_next_by_index() {
        let fixture = year_fixture("cursor-seek");
        let mut layer = fixture.open();
        layer.set_next_by_index(5).unwrap();
        assert_eq!(layer.next_feature().unwrap().unwrap().fid(), Some(6));
        assert!(matches!(
            layer.set_next_by_index(-1),
            Err(GdalError::Range { .. })
        ));
    }

    #[test]
    fn test_feature_by_fid_restores_filters() {
        let fixture = parcels_fixture("cursor-fid");
        let mut layer = fixture.open();
        layer.set_attribute_filter("area >= 100").unwrap();
        layer.set_spatial_filter_wkt("POINT (5 5)").unwrap();
        assert_eq!(layer.feature_count().unwrap(), 1);

        let row = layer.feature(3).unwrap().unwrap();
        assert_eq!(row.fid(), Some(3));
        assert_eq!(
            row.get("owner"),
            Some(&FieldValue::StringValue("Cole".to_string()))
        );
        assert!(layer.feature(99).unwrap().is_none());

        assert_eq!(layer.attribute_filter().unwrap(), "area >= 100");
        assert!(layer.spatial_filter().unwrap().is_some());
        assert_eq!(layer.feature_count().unwrap(), 1);
        assert_eq!(layer.cursor_state(), CursorState::Idle);
    }

    #[test]
    fn test_feature_restores_filters_on_error() {
        let fixture = parcels_fixture("cursor-fid-error");
        let mut layer = fixture.open();
        layer.set_attribute_filter("owner = 'Baker'").unwrap();
        layer.config_mut().interrupt_check_interval = 1;
        layer.set_interrupt_handler(|| true);
        assert!(matches!(
            layer.feature(1),
            Err(GdalError::Interrupted { rows: 1 })
        ));
        assert_eq!(layer.attribute_filter().unwrap(), "owner = 'Baker'");

        layer.clear_interrupt_handler();
        let table = layer.fetch(FetchSize::All).unwrap();
        assert_eq!(table.num_rows(), 1);
        assert_eq!(table.row(0).unwrap().fid(), Some(2));
    }

    #[test]
    fn test_feature_with_named_fid_column() {
        let fixture = parcels_fixture("cursor-fid-column");
        fixture.layer().set_fid_column("fid");
        let mut layer = fixture.open();
        assert_eq!(layer.fid_column().unwrap(), "fid");
        assert_eq!(layer.feature(2).unwrap().unwrap().fid(), Some(2));
    }

    #[test]
    fn test_plain_identifier() {
        assert!(is_plain_identifier("ogc_fid"));
        assert!(!is_plain_identifier("my fid"));
        assert!(!is_plain_identifier("1fid"));
        assert!(!is_plain_identifier(""));
    }
}
