//! Configuration of the database connection, the tile index and the table mappings.
//!
//! The configuration is a TOML document. It is deserialized into a loose layer
//! first, because geometry mappings can be a plain column name or a table of LoD
//! keys, and then validated into the typed [`Config`]. The order of LoD keys in
//! the document is preserved: the first LoD of a table drives its spatial
//! filters.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{CjdbError, Result};
use crate::lod::{Lod, lod_key, lod_to_string};
use crate::store::sql::Ident;

/// CityObject types that can be exported on their own.
pub const FIRST_LEVEL_TYPES: [&str; 13] = [
    "Building",
    "Road",
    "Railway",
    "TransportSquare",
    "TINRelief",
    "WaterBody",
    "LandUse",
    "PlantCover",
    "SolitaryVegetationObject",
    "CityFurniture",
    "GenericCityObject",
    "Bridge",
    "Tunnel",
];

/// CityObject types that need their parent type in the same configuration.
pub const SECOND_LEVEL_TYPES: [&str; 7] = [
    "BuildingPart",
    "BuildingInstallation",
    "BridgePart",
    "BridgeInstallation",
    "BridgeConstructionElement",
    "TunnelPart",
    "TunnelInstallation",
];

/// Geometry type of a mapped column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeometryType {
    Solid,
    #[default]
    MultiSurface,
}

impl std::fmt::Display for GeometryType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeometryType::Solid => f.write_str("Solid"),
            GeometryType::MultiSurface => f.write_str("MultiSurface"),
        }
    }
}

impl std::str::FromStr for GeometryType {
    type Err = CjdbError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Solid" => Ok(GeometryType::Solid),
            "MultiSurface" => Ok(GeometryType::MultiSurface),
            other => Err(CjdbError::Config(format!(
                "geometry type {other} is not supported, use Solid or MultiSurface"
            ))),
        }
    }
}

/// Connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub dbname: String,
    #[serde(default = "DatabaseConfig::default_host")]
    pub host: String,
    #[serde(default = "DatabaseConfig::default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl DatabaseConfig {
    fn default_host() -> String {
        "localhost".to_string()
    }

    const fn default_port() -> u16 {
        5432
    }
}

/// Column names of the tile index relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TileIndexFields {
    pub pk: String,
    pub geometry: String,
    #[serde(default = "TileIndexFields::default_sw_boundary")]
    pub geometry_sw_boundary: String,
}

impl TileIndexFields {
    fn default_sw_boundary() -> String {
        "geom_sw".to_string()
    }
}

/// Where the tile index is stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TileIndexConfig {
    pub schema: String,
    pub table: String,
    pub srid: i32,
    pub field: TileIndexFields,
}

impl TileIndexConfig {
    pub fn ident(&self) -> Ident {
        Ident::qualified(&self.schema, &self.table)
    }

    pub fn pk(&self) -> Ident {
        Ident::new(&self.field.pk)
    }

    pub fn geometry(&self) -> Ident {
        Ident::new(&self.field.geometry)
    }

    pub fn geometry_sw(&self) -> Ident {
        Ident::new(&self.field.geometry_sw_boundary)
    }
}

/// One mapped geometry column.
#[derive(Debug, Clone, PartialEq)]
pub struct LodGeometry {
    /// Mapping key, for example `lod12`
    pub key: String,
    pub column: String,
    pub shape: GeometryType,
}

impl LodGeometry {
    /// Name of the converted geometry in query results.
    pub fn alias(&self) -> String {
        format!("geom_{}", self.key)
    }
}

/// How the rows of one table become CityObjects.
#[derive(Debug, Clone, PartialEq)]
pub struct TableMapping {
    pub cityobject_type: String,
    pub schema: String,
    pub table: String,
    pub pk: String,
    pub cityobject_id: String,
    /// In declaration order, never empty
    pub geometries: Vec<LodGeometry>,
    pub semantics: Option<String>,
    /// Column with a per-row LoD that overrides the mapping key
    pub lod: Option<String>,
    /// Column with the tile ID of each row
    pub tile: Option<String>,
    pub exclude: Vec<String>,
}

impl TableMapping {
    pub fn ident(&self) -> Ident {
        Ident::qualified(&self.schema, &self.table)
    }

    /// The geometry that spatial filters are evaluated on.
    pub fn primary_geometry(&self) -> &LodGeometry {
        &self.geometries[0]
    }

    pub fn is_geometry_column(&self, column: &str) -> bool {
        self.geometries.iter().any(|g| g.column == column)
    }

    /// `schema.table`, for messages.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Default LoD and geometry type for mappings that leave them out.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryDefaults {
    /// Needed by mappings that name a single geometry column
    pub lod: Option<String>,
    pub shape: GeometryType,
}

/// Validated configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub epsg: i32,
    pub geometries: GeometryDefaults,
    pub database: DatabaseConfig,
    pub tile_index: TileIndexConfig,
    /// Table mappings grouped by CityObject type, in declaration order
    pub cityobject_types: Vec<(String, Vec<TableMapping>)>,
    pub semantics_mapping: BTreeMap<i64, String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawGeometries {
    #[serde(default)]
    lod: Option<toml::Value>,
    #[serde(rename = "type", default)]
    shape: GeometryType,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawFields {
    pk: String,
    cityobject_id: String,
    geometry: toml::Value,
    #[serde(default)]
    semantics: Option<String>,
    #[serde(default)]
    lod: Option<String>,
    #[serde(default)]
    tile: Option<String>,
    #[serde(default)]
    exclude: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawTable {
    schema: String,
    table: String,
    field: RawFields,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default = "Config::default_epsg")]
    epsg: i32,
    geometries: RawGeometries,
    database: DatabaseConfig,
    tile_index: TileIndexConfig,
    cityobject_type: toml::Table,
    #[serde(default)]
    semantics_mapping: BTreeMap<String, String>,
}

fn parse_lod(value: &toml::Value) -> Result<String> {
    let lod = match value {
        toml::Value::Integer(i) => Lod::Int(*i),
        toml::Value::Float(f) => Lod::Float(*f),
        toml::Value::String(s) => match s.trim().parse::<i64>() {
            Ok(i) => Lod::Int(i),
            Err(_) => Lod::Float(s.trim().parse::<f64>().map_err(|_| {
                CjdbError::Config(format!("geometries.lod = {s:?} is not a number"))
            })?),
        },
        other => {
            return Err(CjdbError::Config(format!(
                "geometries.lod must be a number, got {other}"
            )));
        }
    };
    let v = lod.as_f64();
    if !v.is_finite() || !(0.0..5.0).contains(&v) {
        return Err(CjdbError::Config(format!(
            "geometries.lod = {v} is outside the LoD range 0 to 4"
        )));
    }
    Ok(lod_to_string(lod))
}

fn parse_geometries(
    value: &toml::Value,
    defaults: &GeometryDefaults,
    table: &str,
) -> Result<Vec<LodGeometry>> {
    match value {
        toml::Value::String(column) => {
            let lod = defaults.lod.as_deref().ok_or_else(|| {
                CjdbError::Config(format!(
                    "geometry {column:?} of {table} has no LoD, set geometries.lod \
                     or map the geometry per LoD"
                ))
            })?;
            Ok(vec![LodGeometry {
                key: lod_key(lod),
                column: column.clone(),
                shape: defaults.shape,
            }])
        }
        toml::Value::Table(lods) => {
            let mut geometries = Vec::with_capacity(lods.len());
            for (key, mapping) in lods {
                if !key.starts_with("lod") {
                    return Err(CjdbError::Config(format!(
                        "incorrect geometry mapping in {table}: LoD key {key} must begin with 'lod'"
                    )));
                }
                let mapping = mapping.as_table().ok_or_else(|| {
                    CjdbError::Config(format!(
                        "incorrect geometry mapping in {table}: {key} must be a table"
                    ))
                })?;
                let column = mapping
                    .get("name")
                    .and_then(toml::Value::as_str)
                    .ok_or_else(|| {
                        CjdbError::Config(format!(
                            "incorrect geometry mapping in {table}: {key} is missing 'name'"
                        ))
                    })?;
                let shape = match mapping.get("type") {
                    Some(toml::Value::String(s)) => s.parse()?,
                    Some(other) => {
                        return Err(CjdbError::Config(format!(
                            "incorrect geometry mapping in {table}: {key}.type = {other}"
                        )));
                    }
                    None => defaults.shape,
                };
                geometries.push(LodGeometry {
                    key: key.clone(),
                    column: column.to_string(),
                    shape,
                });
            }
            if geometries.is_empty() {
                return Err(CjdbError::Config(format!(
                    "no geometry column is mapped in {table}"
                )));
            }
            Ok(geometries)
        }
        _ => Err(CjdbError::Config(format!(
            "the geometry mapping in {table} must be a column name or a table of LoD keys"
        ))),
    }
}

fn check_cityobject_types(types: &[String]) -> Result<()> {
    let has = |name: &str| types.iter().any(|t| t.eq_ignore_ascii_case(name));
    for cotype in types {
        if cotype.eq_ignore_ascii_case("CityObjectGroup") {
            return Err(CjdbError::Config(
                "CityObjectGroup type is not supported".to_string(),
            ));
        }
        if let Some(second) = SECOND_LEVEL_TYPES
            .iter()
            .find(|t| t.eq_ignore_ascii_case(cotype))
        {
            let parent = second
                .replace("ConstructionElement", "")
                .replace("Installation", "")
                .replace("Part", "");
            if !has(&parent) {
                return Err(CjdbError::Config(format!(
                    "cannot declare 2nd-level CityObject {cotype} by itself, it needs a \
                     {parent} mapping as parent"
                )));
            }
        } else if !FIRST_LEVEL_TYPES.iter().any(|t| t.eq_ignore_ascii_case(cotype)) {
            return Err(CjdbError::Config(format!(
                "{cotype} is not a valid CityObject type"
            )));
        }
    }
    Ok(())
}

/// Canonical spelling of a CityObject type name.
fn canonical_type(name: &str) -> String {
    FIRST_LEVEL_TYPES
        .iter()
        .chain(SECOND_LEVEL_TYPES.iter())
        .find(|t| t.eq_ignore_ascii_case(name))
        .map(|t| t.to_string())
        .unwrap_or_else(|| name.to_string())
}

impl Config {
    const fn default_epsg() -> i32 {
        7415
    }

    /// Parse and validate a TOML document.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(toml_str)?;

        let geometries = GeometryDefaults {
            lod: raw.geometries.lod.as_ref().map(parse_lod).transpose()?,
            shape: raw.geometries.shape,
        };

        let type_names: Vec<String> = raw.cityobject_type.keys().cloned().collect();
        check_cityobject_types(&type_names)?;

        let mut cityobject_types = Vec::with_capacity(raw.cityobject_type.len());
        for (name, tables) in raw.cityobject_type {
            let cotype = canonical_type(&name);
            let tables: Vec<RawTable> = tables.try_into().map_err(|e: toml::de::Error| {
                CjdbError::Config(format!("invalid table mapping of {name}: {e}"))
            })?;
            let mut mappings = Vec::with_capacity(tables.len());
            for t in tables {
                let qualified = format!("{}.{}", t.schema, t.table);
                mappings.push(TableMapping {
                    cityobject_type: cotype.clone(),
                    geometries: parse_geometries(&t.field.geometry, &geometries, &qualified)?,
                    schema: t.schema,
                    table: t.table,
                    pk: t.field.pk,
                    cityobject_id: t.field.cityobject_id,
                    semantics: t.field.semantics,
                    lod: t.field.lod,
                    tile: t.field.tile,
                    exclude: t.field.exclude,
                });
            }
            cityobject_types.push((cotype, mappings));
        }

        let semantics_mapping = raw
            .semantics_mapping
            .into_iter()
            .map(|(label, surface)| {
                label
                    .trim()
                    .parse::<i64>()
                    .map(|l| (l, surface))
                    .map_err(|_| {
                        CjdbError::Config(format!(
                            "semantics_mapping key {label:?} is not an integer label"
                        ))
                    })
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        let config = Config {
            epsg: raw.epsg,
            geometries,
            database: raw.database,
            tile_index: raw.tile_index,
            cityobject_types,
            semantics_mapping,
        };
        config.validate()?;
        log::debug!("{:?}", config);
        Ok(config)
    }

    /// Read, parse and validate a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tile_index.srid <= 0 {
            return Err(CjdbError::Config(format!(
                "SRID={} is not valid. Set it in the configuration file at tile_index.srid",
                self.tile_index.srid
            )));
        }
        if self.epsg <= 0 {
            return Err(CjdbError::Config(format!("EPSG={} is not valid", self.epsg)));
        }
        if self.table_count() == 0 {
            return Err(CjdbError::Config(
                "The configuration file must map at least one table in cityobject_type"
                    .to_string(),
            ));
        }
        for mapping in self.tables() {
            if mapping.geometries.is_empty() {
                return Err(CjdbError::Config(format!(
                    "no geometry column is mapped in {}",
                    mapping.qualified_name()
                )));
            }
        }
        Ok(())
    }

    pub fn with_epsg(mut self, epsg: i32) -> Self {
        self.epsg = epsg;
        self
    }

    pub fn with_database(mut self, database: DatabaseConfig) -> Self {
        self.database = database;
        self
    }

    pub fn with_tile_index(mut self, tile_index: TileIndexConfig) -> Self {
        self.tile_index = tile_index;
        self
    }

    /// All table mappings in declaration order.
    pub fn tables(&self) -> impl Iterator<Item = &TableMapping> + '_ {
        self.cityobject_types
            .iter()
            .flat_map(|(_, tables)| tables.iter())
    }

    pub fn table_count(&self) -> usize {
        self.cityobject_types.iter().map(|(_, t)| t.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = r#"
[geometries]
lod = 1.2
type = "MultiSurface"

[database]
dbname = "db3dnl"
user = "cjdb"

[tile_index]
schema = "tile_index"
table = "tiles"
srid = 7415
[tile_index.field]
pk = "id"
geometry = "geom"

[semantics_mapping]
0 = "GroundSurface"
1 = "RoofSurface"
2 = "WallSurface"
"#;

    fn with_types(types: &str) -> String {
        format!("{BASE}\n{types}")
    }

    const BUILDING: &str = r#"
[[cityobject_type.Building]]
schema = "public"
table = "building"
[cityobject_type.Building.field]
pk = "ogc_fid"
cityobject_id = "identificatie"
semantics = "labels"
exclude = ["xml"]
[cityobject_type.Building.field.geometry]
lod22 = { name = "geometry_lod22", type = "Solid" }
lod12 = { name = "geometry_lod12" }
"#;

    #[test]
    fn test_full_config() {
        let cfg = Config::from_toml(&with_types(BUILDING)).unwrap();
        assert_eq!(cfg.epsg, 7415);
        assert_eq!(cfg.geometries.lod.as_deref(), Some("1.2"));
        assert_eq!(cfg.database.host, "localhost");
        assert_eq!(cfg.database.port, 5432);
        assert_eq!(cfg.tile_index.field.geometry_sw_boundary, "geom_sw");
        assert_eq!(cfg.table_count(), 1);

        let building = cfg.tables().next().unwrap();
        assert_eq!(building.cityobject_type, "Building");
        let keys: Vec<&str> = building.geometries.iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["lod22", "lod12"]);
        assert_eq!(building.primary_geometry().shape, GeometryType::Solid);
        assert_eq!(building.geometries[1].shape, GeometryType::MultiSurface);
        assert_eq!(building.exclude, vec!["xml"]);
        assert_eq!(cfg.semantics_mapping.get(&1).map(String::as_str), Some("RoofSurface"));
    }

    #[test]
    fn test_string_geometry_uses_global_lod() {
        let cfg = Config::from_toml(&with_types(
            r#"
[[cityobject_type.WaterBody]]
schema = "public"
table = "water"
[cityobject_type.WaterBody.field]
pk = "fid"
cityobject_id = "id"
geometry = "wkb_geometry"
"#,
        ))
        .unwrap();
        let water = cfg.tables().next().unwrap();
        assert_eq!(
            water.geometries,
            vec![LodGeometry {
                key: "lod12".to_string(),
                column: "wkb_geometry".to_string(),
                shape: GeometryType::MultiSurface,
            }]
        );
        assert_eq!(water.geometries[0].alias(), "geom_lod12");
    }

    #[test]
    fn test_second_level_type_needs_parent() {
        let part = r#"
[[cityobject_type.BuildingPart]]
schema = "public"
table = "part"
[cityobject_type.BuildingPart.field]
pk = "fid"
cityobject_id = "id"
geometry = "geom"
"#;
        let err = Config::from_toml(&with_types(part)).unwrap_err();
        assert!(matches!(err, CjdbError::Config(_)));
        assert!(Config::from_toml(&with_types(&format!("{BUILDING}{part}"))).is_ok());
    }

    #[test]
    fn test_unknown_and_group_types() {
        let group = BUILDING.replace("Building", "CityObjectGroup");
        assert!(Config::from_toml(&with_types(&group)).is_err());
        let unknown = BUILDING.replace("Building", "Castle");
        assert!(Config::from_toml(&with_types(&unknown)).is_err());
        let lowercase = BUILDING.replace("Building", "building");
        let cfg = Config::from_toml(&with_types(&lowercase)).unwrap();
        assert_eq!(cfg.cityobject_types[0].0, "Building");
    }

    #[test]
    fn test_lod_key_must_start_with_lod() {
        let bad = BUILDING.replace("lod22 =", "l22 =");
        let err = Config::from_toml(&with_types(&bad)).unwrap_err();
        assert!(err.to_string().contains("must begin with 'lod'"));
    }

    #[test]
    fn test_geometry_mapping_needs_name() {
        let bad = BUILDING.replace("{ name = \"geometry_lod12\" }", "{ type = \"Solid\" }");
        let err = Config::from_toml(&with_types(&bad)).unwrap_err();
        assert!(err.to_string().contains("missing 'name'"));
    }

    #[test]
    fn test_invalid_shape() {
        let bad = BUILDING.replace("type = \"Solid\"", "type = \"CompositeSolid\"");
        assert!(Config::from_toml(&with_types(&bad)).is_err());
    }

    #[test]
    fn test_invalid_srid() {
        let bad = with_types(BUILDING).replace("srid = 7415", "srid = 0");
        assert!(matches!(
            Config::from_toml(&bad),
            Err(CjdbError::Config(_))
        ));
    }

    #[test]
    fn test_missing_lod_names_the_table() {
        let water = r#"
[[cityobject_type.WaterBody]]
schema = "public"
table = "water"
[cityobject_type.WaterBody.field]
pk = "fid"
cityobject_id = "id"
geometry = "wkb_geometry"
"#;
        let bad = with_types(water).replace("lod = 1.2\n", "");
        let err = Config::from_toml(&bad).unwrap_err();
        assert!(matches!(err, CjdbError::Config(_)));
        assert!(err.to_string().contains("public.water"));

        // per-LoD mappings carry their own LoD
        let cfg = Config::from_toml(&with_types(BUILDING).replace("lod = 1.2\n", "")).unwrap();
        assert_eq!(cfg.geometries.lod, None);
    }

    #[test]
    fn test_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cjdb.toml");
        std::fs::write(&path, with_types(BUILDING)).unwrap();
        let cfg = Config::from_path(&path).unwrap().with_epsg(28992);
        assert_eq!(cfg.epsg, 28992);
    }
}
