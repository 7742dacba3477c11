//! Turning query rows into CityObjects.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value as Json};

use crate::cityjson::{
    Boundaries, CityModel, CityObject, Geometry, SemanticSurface, Surface, SurfaceIndex,
};
use crate::config::{Config, GeometryType, LodGeometry, TableMapping};
use crate::error::{CjdbError, Result};
use crate::export::fetch::TableExport;
use crate::lod::{lod_float, lod_to_string, parse_lod_value};
use crate::query::{COID_ALIAS, PK_ALIAS};
use crate::store::{Record, Value};

/// Decimal digits kept for floating point attributes.
pub const ATTRIBUTE_DIGITS: i32 = 4;

/// Merge the rows of every table into one city model.
pub fn convert(exports: &[TableExport], cfg: &Config) -> Result<CityModel> {
    log::info!(
        "Floating point attributes are rounded to {} decimal digits",
        ATTRIBUTE_DIGITS
    );
    let mut model = CityModel::new(cfg.epsg);
    for export in exports {
        for object in table_to_cityobjects(export, &cfg.semantics_mapping) {
            model.objects.push(object?);
        }
    }
    log::info!("Exported CityModel with {} CityObjects", model.len());
    Ok(model)
}

/// The CityObjects of one table, converted as they are pulled.
pub fn table_to_cityobjects<'a>(
    export: &'a TableExport,
    semantics_mapping: &'a BTreeMap<i64, String>,
) -> impl Iterator<Item = Result<CityObject>> + 'a {
    export
        .records
        .iter()
        .map(move |record| record_to_cityobject(record, &export.mapping, semantics_mapping))
}

fn is_special(mapping: &TableMapping, column: &str) -> bool {
    column == PK_ALIAS
        || column == COID_ALIAS
        || mapping.geometries.iter().any(|g| g.alias() == column)
        || [&mapping.lod, &mapping.semantics, &mapping.tile]
            .into_iter()
            .flatten()
            .any(|c| c == column)
}

fn record_to_cityobject(
    record: &Record,
    mapping: &TableMapping,
    semantics_mapping: &BTreeMap<i64, String>,
) -> Result<CityObject> {
    let id = record
        .get(COID_ALIAS)
        .and_then(Value::to_text)
        .ok_or_else(|| {
            CjdbError::InvalidInput(format!(
                "a row of {} has no CityObject ID",
                mapping.qualified_name()
            ))
        })?;

    let attributes: Map<String, Json> = record
        .iter()
        .filter(|(column, _)| !is_special(mapping, column))
        .map(|(column, value)| (column.to_string(), attribute_value(value)))
        .collect();

    let mut geometry = Vec::with_capacity(mapping.geometries.len());
    for lod_geometry in &mapping.geometries {
        if let Some(g) = record_to_geometry(record, mapping, lod_geometry, semantics_mapping, &id)? {
            geometry.push(g);
        }
    }

    Ok(CityObject {
        id,
        cityobject_type: mapping.cityobject_type.clone(),
        attributes,
        geometry,
    })
}

fn round(value: f64) -> f64 {
    let factor = 10f64.powi(ATTRIBUTE_DIGITS);
    (value * factor).round() / factor
}

/// JSON form of an attribute value.
pub fn attribute_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::from(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) => Json::from(round(*f)),
        Value::Text(s) => Json::from(s.as_str()),
        Value::Date(d) => Json::from(d.format("%Y-%m-%d").to_string()),
        Value::Time(t) => Json::from(t.format("%H:%M:%S%.f").to_string()),
        Value::Timestamp(ts) => Json::from(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
        Value::TimestampTz(ts) => Json::from(ts.to_rfc3339()),
        Value::Json(j) => j.clone(),
        Value::TextArray(a) => Json::from(a.clone()),
        Value::IntArray(a) => Json::from(a.clone()),
        Value::FloatArray(a) => a.iter().map(|f| f.map(round)).collect(),
    }
}

fn lod_of_row(record: &Record, mapping: &TableMapping, lod_geometry: &LodGeometry) -> String {
    let Some(column) = &mapping.lod else {
        return parse_lod_value(&lod_geometry.key);
    };
    match record.get(column) {
        Some(Value::Int(i)) => lod_to_string(*i),
        Some(Value::Float(f)) => lod_to_string(*f),
        Some(Value::Text(s)) => s.trim().to_string(),
        _ => {
            log::warn!(
                "Column {} has no LoD, using {} from the mapping",
                column,
                lod_geometry.key
            );
            parse_lod_value(&lod_geometry.key)
        }
    }
}

fn parse_surfaces(value: &Value, id: &str) -> Result<Option<Vec<Surface>>> {
    let json = match value {
        Value::Null => return Ok(None),
        Value::Json(j) => j.clone(),
        Value::Text(s) => serde_json::from_str(s)?,
        other => {
            return Err(CjdbError::InvalidInput(format!(
                "geometry of {id} is not a boundary array: {other:?}"
            )));
        }
    };
    serde_json::from_value(json).map(Some).map_err(|e| {
        CjdbError::InvalidInput(format!("geometry of {id} is not a boundary array: {e}"))
    })
}

fn labels_of(value: Option<&Value>) -> Vec<Option<i64>> {
    match value {
        Some(Value::IntArray(labels)) => labels.clone(),
        Some(Value::Json(Json::Array(labels))) => labels.iter().map(Json::as_i64).collect(),
        _ => Vec::new(),
    }
}

fn record_to_geometry(
    record: &Record,
    mapping: &TableMapping,
    lod_geometry: &LodGeometry,
    semantics_mapping: &BTreeMap<i64, String>,
    id: &str,
) -> Result<Option<Geometry>> {
    let Some(surfaces) = record
        .get(&lod_geometry.alias())
        .map(|v| parse_surfaces(v, id))
        .transpose()?
        .flatten()
    else {
        log::debug!("{} has no {} geometry", id, lod_geometry.key);
        return Ok(None);
    };

    let lod = lod_of_row(record, mapping, lod_geometry);
    let boundaries = match lod_geometry.shape {
        GeometryType::Solid => Boundaries::Solid(vec![surfaces]),
        GeometryType::MultiSurface => Boundaries::MultiSurface(surfaces),
    };

    let semantics = match &mapping.semantics {
        Some(column) if lod_float(&lod).is_some_and(|l| l >= 2.0) => record_to_surfaces(
            &boundaries,
            &labels_of(record.get(column)),
            semantics_mapping,
        ),
        _ => Vec::new(),
    };

    Ok(Some(Geometry {
        lod,
        boundaries,
        semantics,
    }))
}

/// Group surfaces by their semantic label.
///
/// Solids are labelled through their exterior shell and get nothing when the
/// shell and the labels differ in length. Groups without surfaces are left out,
/// and labels missing from `semantics_mapping` are skipped with a warning.
pub fn record_to_surfaces(
    boundaries: &Boundaries,
    labels: &[Option<i64>],
    semantics_mapping: &BTreeMap<i64, String>,
) -> Vec<SemanticSurface> {
    let indexed: Vec<(Option<i64>, SurfaceIndex)> = match boundaries {
        Boundaries::Solid(shells) => {
            if shells.len() > 1 {
                log::warn!("Cannot assign semantics to Solids with inner shell(s)");
            }
            let shell_len = shells.first().map_or(0, Vec::len);
            if shell_len != labels.len() {
                log::warn!("Encountered unequal sized geometry shell and semantics arrays");
                return Vec::new();
            }
            labels
                .iter()
                .enumerate()
                .map(|(i, label)| (*label, SurfaceIndex::Shell(0, i)))
                .collect()
        }
        Boundaries::MultiSurface(surfaces) => {
            if surfaces.len() != labels.len() {
                log::warn!("Encountered unequal sized geometry and semantics arrays");
            }
            labels
                .iter()
                .take(surfaces.len())
                .enumerate()
                .map(|(i, label)| (*label, SurfaceIndex::Surface(i)))
                .collect()
        }
    };

    let mut groups: BTreeMap<i64, Vec<SurfaceIndex>> = BTreeMap::new();
    let mut unknown = BTreeSet::new();
    for (label, index) in indexed {
        let Some(label) = label else { continue };
        if semantics_mapping.contains_key(&label) {
            groups.entry(label).or_default().push(index);
        } else {
            unknown.insert(label);
        }
    }
    if !unknown.is_empty() {
        log::warn!(
            "Semantic labels {:?} are not in the semantics mapping, they are skipped",
            unknown
        );
    }

    groups
        .into_iter()
        .filter_map(|(label, surfaces)| {
            semantics_mapping.get(&label).map(|surface_type| SemanticSurface {
                label,
                surface_type: surface_type.clone(),
                surfaces,
            })
        })
        .collect()
}
