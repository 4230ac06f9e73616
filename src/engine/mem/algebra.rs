//! Layer algebra of the memory engine
//!
//! Set operations between the features of two layers, written into a third. Only
//! polygonal geometries take part; other geometries fail the operation unless
//! `SKIP_FAILURES=YES`. Recognized options: `SKIP_FAILURES`, `PROMOTE_TO_MULTI`,
//! `INPUT_PREFIX` and `METHOD_PREFIX`.
//!
//! When the result layer has no attribute fields yet, they are created from the input
//! fields (and, for intersection, union, symmetric difference and identity, the method
//! fields), prefixed as requested. A method field whose name is already taken is
//! skipped.

use geo::BooleanOps;
use geo_types::{Geometry, MultiPolygon};
use log::debug;

use super::{MemGeometry, MemLayer};
use crate::cpl::CslStringList;
use crate::engine::{AlgebraOp, EngineLayer, NativeFeature, NativeField, ProgressFn};
use crate::errors::{GdalError, OgrErr, Result};
use crate::vector::{FieldDefn, GeomFieldDefn};

struct Source {
    fields: Vec<NativeField>,
    polygons: MultiPolygon<f64>,
}

struct Piece<'a> {
    input: Option<&'a Source>,
    method: Option<&'a Source>,
    geometry: MultiPolygon<f64>,
}

fn uses_method_fields(op: AlgebraOp) -> bool {
    matches!(
        op,
        AlgebraOp::Intersection | AlgebraOp::Union | AlgebraOp::SymDifference | AlgebraOp::Identity
    )
}

fn collect(
    layer: &MemLayer,
    op: AlgebraOp,
    skip_failures: bool,
) -> Result<Vec<Source>> {
    let mut sources = Vec::new();
    for feature in layer.matching_features() {
        let Some(Some(geometry)) = feature.geometries.first() else {
            continue;
        };
        match geometry.to_multi_polygon() {
            Some(polygons) => sources.push(Source {
                fields: feature.fields,
                polygons,
            }),
            None if skip_failures => {
                debug!("Skipping non-polygonal feature {} in {}", feature.fid, op.method_name());
            }
            None => {
                return Err(GdalError::OgrError {
                    err: OgrErr::UnsupportedGeometryType,
                    method_name: op.method_name(),
                    msg: format!("feature {} is not polygonal", feature.fid),
                })
            }
        }
    }
    Ok(sources)
}

fn union_all(sources: &[Source]) -> MultiPolygon<f64> {
    sources
        .iter()
        .fold(MultiPolygon::new(Vec::new()), |acc, s| acc.union(&s.polygons))
}

/// Maps each source field to its result field index.
fn map_fields(source: &[FieldDefn], prefix: &str, result: &[FieldDefn]) -> Vec<Option<usize>> {
    source
        .iter()
        .map(|f| {
            let name = format!("{prefix}{}", f.name);
            result.iter().position(|r| r.name.eq_ignore_ascii_case(&name))
        })
        .collect()
}

fn prepare_schema(
    op: AlgebraOp,
    input_fields: &[FieldDefn],
    method_fields: &[FieldDefn],
    input_prefix: &str,
    method_prefix: &str,
    result: &MemLayer,
) {
    let mut table = result.table().borrow_mut();
    if table.fields.is_empty() {
        let mut fields: Vec<FieldDefn> = input_fields
            .iter()
            .map(|f| FieldDefn {
                name: format!("{input_prefix}{}", f.name),
                nullable: true,
                unique: false,
                ignored: false,
                ..f.clone()
            })
            .collect();
        if uses_method_fields(op) {
            for f in method_fields {
                let name = format!("{method_prefix}{}", f.name);
                if fields.iter().any(|r| r.name.eq_ignore_ascii_case(&name)) {
                    continue;
                }
                fields.push(FieldDefn {
                    name,
                    nullable: true,
                    unique: false,
                    ignored: false,
                    ..f.clone()
                });
            }
        }
        table.fields = fields;
    }
    if table.geom_fields.is_empty() {
        table.geom_fields.push(GeomFieldDefn::new("", "Unknown"));
    }
}

pub(super) fn run(
    op: AlgebraOp,
    input: &MemLayer,
    method: &MemLayer,
    result: &mut MemLayer,
    options: &CslStringList,
    mut progress: Option<&mut ProgressFn<'_>>,
) -> Result<()> {
    let skip_failures = options.fetch_bool("SKIP_FAILURES", false);
    let promote = options.fetch_bool("PROMOTE_TO_MULTI", false);
    let input_prefix = options.fetch_name_value("INPUT_PREFIX").unwrap_or("");
    let method_prefix = options.fetch_name_value("METHOD_PREFIX").unwrap_or("");

    let input_fields = input.table().borrow().fields.clone();
    let method_fields = method.table().borrow().fields.clone();
    let inputs = collect(input, op, skip_failures)?;
    let methods = collect(method, op, skip_failures)?;

    prepare_schema(op, &input_fields, &method_fields, input_prefix, method_prefix, result);
    let (result_fields, result_geom_count) = {
        let table = result.table().borrow();
        (table.fields.clone(), table.geom_fields.len())
    };
    let input_map = map_fields(&input_fields, input_prefix, &result_fields);
    let method_map = if op == AlgebraOp::Update {
        map_fields(&method_fields, "", &result_fields)
    } else if uses_method_fields(op) {
        map_fields(&method_fields, method_prefix, &result_fields)
    } else {
        vec![None; method_fields.len()]
    };

    let method_union = union_all(&methods);
    let input_union = match op {
        AlgebraOp::Union | AlgebraOp::SymDifference => union_all(&inputs),
        _ => MultiPolygon::new(Vec::new()),
    };

    let total = inputs.len()
        + match op {
            AlgebraOp::Union | AlgebraOp::SymDifference | AlgebraOp::Update => methods.len(),
            _ => 0,
        };
    let mut done = 0;
    let mut report = |done: usize| -> Result<()> {
        if let Some(progress) = progress.as_mut() {
            let fraction = if total == 0 { 1.0 } else { done as f64 / total as f64 };
            if !progress(fraction, "") {
                return Err(GdalError::OgrError {
                    err: OgrErr::Failure,
                    method_name: op.method_name(),
                    msg: "User terminated".to_string(),
                });
            }
        }
        Ok(())
    };

    let mut pieces = Vec::new();
    for i in &inputs {
        match op {
            AlgebraOp::Intersection | AlgebraOp::Union | AlgebraOp::Identity => {
                for m in &methods {
                    let geometry = i.polygons.intersection(&m.polygons);
                    pieces.push(Piece {
                        input: Some(i),
                        method: Some(m),
                        geometry,
                    });
                }
                if op != AlgebraOp::Intersection {
                    pieces.push(Piece {
                        input: Some(i),
                        method: None,
                        geometry: i.polygons.difference(&method_union),
                    });
                }
            }
            AlgebraOp::SymDifference | AlgebraOp::Erase | AlgebraOp::Update => pieces.push(Piece {
                input: Some(i),
                method: None,
                geometry: i.polygons.difference(&method_union),
            }),
            AlgebraOp::Clip => pieces.push(Piece {
                input: Some(i),
                method: None,
                geometry: i.polygons.intersection(&method_union),
            }),
        }
        done += 1;
        report(done)?;
    }
    if matches!(
        op,
        AlgebraOp::Union | AlgebraOp::SymDifference | AlgebraOp::Update
    ) {
        for m in &methods {
            let geometry = if op == AlgebraOp::Update {
                m.polygons.clone()
            } else {
                m.polygons.difference(&input_union)
            };
            pieces.push(Piece {
                input: None,
                method: Some(m),
                geometry,
            });
            done += 1;
            report(done)?;
        }
    }
    report(total)?;

    let mut written = 0;
    for piece in pieces.into_iter().filter(|p| !p.geometry.0.is_empty()) {
        let mut feature = NativeFeature::new(result_fields.len(), result_geom_count);
        let sources = [(piece.input, &input_map), (piece.method, &method_map)];
        for (source, map) in sources {
            let Some(source) = source else { continue };
            for (value, target) in source.fields.iter().zip(map.iter()) {
                if let Some(target) = target {
                    feature.fields[*target] = value.clone();
                }
            }
        }
        let geometry = if !promote && piece.geometry.0.len() == 1 {
            Geometry::Polygon(piece.geometry.0[0].clone())
        } else {
            Geometry::MultiPolygon(piece.geometry)
        };
        if let Some(slot) = feature.geometries.first_mut() {
            *slot = Some(MemGeometry::new(geometry));
        }
        result.create_feature(&mut feature)?;
        written += 1;
    }
    debug!("{} wrote {written} features", op.method_name());
    Ok(())
}
