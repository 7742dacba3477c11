//! SQL for selecting the CityObjects of one mapped table.
//!
//! Every query has the same shape. An `attr_in_extent` CTE selects the primary
//! key, the CityObject ID and the attribute columns, a `polygons` CTE converts
//! each LoD geometry to nested surface arrays, and the two are joined on the
//! primary key. The spatial filter restricts both CTEs and always evaluates the
//! first mapped geometry column.
//!
//! Result rows have the columns `pk`, `coid`, the attributes, and one
//! `geom_<lod key>` column per mapped geometry.

use std::collections::HashSet;

use cjdb_types::BoundingBox;
use cjdb_types::polygon::to_ewkt;
use geo::Polygon;

use crate::config::{TableMapping, TileIndexConfig};
use crate::error::{CjdbError, Result};
use crate::store::sql::{Ident, Statement};
use crate::store::{MULTISURFACE_FUNCTION, SpatialStore, TableColumn, Value};

/// Column alias of the primary key in query results.
pub const PK_ALIAS: &str = "pk";
/// Column alias of the CityObject ID in query results.
pub const COID_ALIAS: &str = "coid";

/// Which objects of a table to select.
#[derive(Debug, Clone, PartialEq)]
pub enum SpatialFilter {
    /// The whole table
    All,
    /// Objects intersecting a 2D box
    BBox(BoundingBox),
    /// Objects intersecting a polygon
    Extent(Polygon),
    /// Objects in any of the listed tiles.
    ///
    /// When `strict` is set every object is assigned to at most one tile, the
    /// one that contains the centroid of its geometry.
    Tiles { ids: Vec<String>, strict: bool },
}

/// Attribute columns of a table: everything except the primary key, the
/// CityObject ID, the mapped geometries and the excluded columns.
pub fn attribute_columns<'a>(
    mapping: &TableMapping,
    table_columns: &'a [TableColumn],
) -> Vec<&'a TableColumn> {
    table_columns
        .iter()
        .filter(|col| {
            let name = col.name.as_str();
            name != mapping.pk
                && name != mapping.cityobject_id
                && !mapping.is_geometry_column(name)
                && !mapping.exclude.iter().any(|e| e == name)
        })
        .collect()
}

/// Select expression of an attribute column.
///
/// `numeric` has no decoder and is read as `float8`. `interval` and `uuid`
/// are read as their text form.
fn attribute_expr(column: &TableColumn) -> String {
    let ident = Ident::new(&column.name);
    match column.data_type.as_str() {
        "numeric" => format!("a.{ident}::float8 AS {ident}"),
        "interval" | "uuid" => format!("a.{ident}::text AS {ident}"),
        _ => format!("a.{ident}"),
    }
}

/// Filter pieces shared by both CTEs.
struct Predicate {
    /// CTEs placed before `attr_in_extent`
    prelude: String,
    /// Extra `FROM` items and the `WHERE` clause of `attr_in_extent`
    attr_where: String,
    /// Source relation of `polygons`
    polygons_from: String,
    /// `WHERE` clause of `polygons`
    polygons_where: String,
}

fn predicate(
    stmt: &mut Statement,
    mapping: &TableMapping,
    tile_index: &TileIndexConfig,
    filter: &SpatialFilter,
    epsg: i32,
) -> Predicate {
    let table = mapping.ident();
    let geom0 = Ident::new(&mapping.primary_geometry().column);

    match filter {
        SpatialFilter::All => Predicate {
            prelude: String::new(),
            attr_where: String::new(),
            polygons_from: format!("{table} b"),
            polygons_where: String::new(),
        },
        SpatialFilter::BBox(bbox) => {
            let (xmin, ymin, xmax, ymax) = bbox.as_tuple();
            let envelope = format!(
                "ST_MakeEnvelope({}, {}, {}, {}, {})",
                stmt.bind(xmin),
                stmt.bind(ymin),
                stmt.bind(xmax),
                stmt.bind(ymax),
                stmt.bind(epsg)
            );
            Predicate {
                prelude: String::new(),
                attr_where: format!(" WHERE ST_3DIntersects(a.{geom0}, {envelope})"),
                polygons_from: format!("{table} b"),
                polygons_where: format!(" WHERE ST_3DIntersects(b.{geom0}, {envelope})"),
            }
        }
        SpatialFilter::Extent(polygon) => {
            let poly = format!("ST_GeomFromEWKT({})", stmt.bind(to_ewkt(polygon, epsg)));
            Predicate {
                prelude: String::new(),
                attr_where: format!(" WHERE ST_3DIntersects(a.{geom0}, {poly})"),
                polygons_from: format!("{table} b"),
                polygons_where: format!(" WHERE ST_3DIntersects(b.{geom0}, {poly})"),
            }
        }
        SpatialFilter::Tiles { ids, .. } if mapping.tile.is_some() => {
            let tile = Ident::new(mapping.tile.as_deref().unwrap_or_default());
            let list = stmt.bind(ids.clone());
            Predicate {
                prelude: String::new(),
                attr_where: format!(" WHERE a.{tile}::text = ANY({list})"),
                polygons_from: format!("{table} b"),
                polygons_where: format!(" WHERE b.{tile}::text = ANY({list})"),
            }
        }
        SpatialFilter::Tiles { ids, strict } => {
            let list = stmt.bind(ids.clone());
            let tx = tile_index.ident();
            let tx_pk = tile_index.pk();
            let tx_geom = tile_index.geometry();
            let (union, test) = if *strict {
                (
                    format!(
                        "SELECT ST_Union(t.{tx_geom}) AS geom, ST_Union(t.{}) AS geom_sw",
                        tile_index.geometry_sw()
                    ),
                    format!(
                        "ST_ContainsProperly(t.geom, ST_Centroid(a.{geom0})) \
                         OR ST_3DIntersects(t.geom_sw, ST_Centroid(a.{geom0}))"
                    ),
                )
            } else {
                (
                    format!("SELECT ST_Union(t.{tx_geom}) AS geom"),
                    format!("ST_3DIntersects(t.geom, a.{geom0})"),
                )
            };
            Predicate {
                prelude: format!(
                    "extent AS ({union} FROM {tx} t WHERE t.{tx_pk}::text = ANY({list})), \
                     geom_in_extent AS (SELECT a.* FROM {table} a, extent t WHERE {test}), "
                ),
                attr_where: format!(", extent t WHERE {test}"),
                polygons_from: "geom_in_extent b".to_string(),
                polygons_where: String::new(),
            }
        }
    }
}

/// Build the select statement for one table.
///
/// `table_columns` is the column list of the table in declaration order, see
/// [`SpatialStore::table_columns`].
pub fn build_query(
    mapping: &TableMapping,
    tile_index: &TileIndexConfig,
    table_columns: &[TableColumn],
    filter: &SpatialFilter,
    epsg: i32,
) -> Statement {
    let mut stmt = Statement::new("WITH ");
    let pred = predicate(&mut stmt, mapping, tile_index, filter, epsg);

    let table = mapping.ident();
    let pk = Ident::new(&mapping.pk);
    let coid = Ident::new(&mapping.cityobject_id);

    let mut attr_select = format!("a.{pk} AS {PK_ALIAS}, a.{coid} AS {COID_ALIAS}");
    for col in attribute_columns(mapping, table_columns) {
        attr_select.push_str(", ");
        attr_select.push_str(&attribute_expr(col));
    }

    let casts: Vec<String> = mapping
        .geometries
        .iter()
        .map(|g| {
            format!(
                "{MULTISURFACE_FUNCTION}(b.{}) AS {}",
                Ident::new(&g.column),
                Ident::new(g.alias())
            )
        })
        .collect();
    let geom_select: Vec<String> = mapping
        .geometries
        .iter()
        .map(|g| format!("b.{}", Ident::new(g.alias())))
        .collect();

    stmt.push(&pred.prelude)
        .push(&format!(
            "attr_in_extent AS (SELECT {attr_select} FROM {table} a{}), ",
            pred.attr_where
        ))
        .push(&format!(
            "polygons AS (SELECT b.{pk} AS {PK_ALIAS}, {} FROM {}{}) ",
            casts.join(", "),
            pred.polygons_from,
            pred.polygons_where
        ))
        .push(&format!(
            "SELECT a.*, {} FROM polygons b INNER JOIN attr_in_extent a ON b.{PK_ALIAS} = a.{PK_ALIAS}",
            geom_select.join(", ")
        ));
    stmt
}

/// Build the query of a table, discovering its columns through the store.
pub async fn query_for_table(
    store: &dyn SpatialStore,
    mapping: &TableMapping,
    tile_index: &TileIndexConfig,
    filter: &SpatialFilter,
    epsg: i32,
) -> Result<Statement> {
    let columns = store.table_columns(&mapping.schema, &mapping.table).await?;
    let stmt = build_query(mapping, tile_index, &columns, filter, epsg);
    log::debug!("{}", stmt);
    Ok(stmt)
}

fn tile_ids(rows: Vec<crate::store::Record>) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.get("tile").and_then(Value::to_text))
        .collect()
}

/// Turn tile arguments into tile IDs that exist in the index.
///
/// The single token `all` selects every tile of the index. Otherwise the IDs
/// that are not in the index are dropped with a warning.
///
/// # Errors
///
/// [`CjdbError::NoTiles`] when none of the tiles exist.
pub async fn resolve_tiles(
    store: &dyn SpatialStore,
    tile_index: &TileIndexConfig,
    tokens: &[String],
) -> Result<Vec<String>> {
    let table = tile_index.ident();
    let pk = tile_index.pk();

    let tiles = if tokens.first().is_some_and(|t| t.eq_ignore_ascii_case("all")) {
        log::info!("Getting all tiles from the index.");
        let stmt = Statement::new(format!(
            "SELECT DISTINCT {pk}::text AS tile FROM {table} ORDER BY 1"
        ));
        tile_ids(store.fetch(&stmt).await?)
    } else {
        log::info!("Verifying if the provided tiles are in the index.");
        let mut stmt = Statement::new(format!(
            "SELECT DISTINCT {pk}::text AS tile FROM {table} WHERE {pk}::text = ANY("
        ));
        stmt.push_bind(tokens.to_vec()).push(")");
        let found = tile_ids(store.fetch(&stmt).await?);

        let (known, unknown): (Vec<&String>, Vec<&String>) =
            tokens.iter().partition(|t| found.contains(*t));
        if !unknown.is_empty() {
            log::warn!(
                "The provided tile IDs {:?} are not in the index, they are skipped.",
                unknown
            );
        }
        let mut seen = HashSet::new();
        known
            .into_iter()
            .filter(|t| seen.insert(t.as_str()))
            .cloned()
            .collect()
    };

    if tiles.is_empty() {
        return Err(CjdbError::NoTiles);
    }
    log::info!("Found {} tiles in the tile index.", tiles.len());
    Ok(tiles)
}
