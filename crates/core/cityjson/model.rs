//! In-memory CityJSON model.
//!
//! Vertices are shared across objects and stored once. Documents are written
//! with a transform that quantizes them to [`IMPORTANT_DIGITS`] decimals.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::config::GeometryType;

/// CityJSON version written by [`CityModel::to_cityjson`].
pub const CITYJSON_VERSION: &str = "2.0";

/// Decimal digits kept for vertex coordinates.
pub const IMPORTANT_DIGITS: i32 = 4;

/// A vertex in real-world coordinates.
pub type Point3 = [f64; 3];
/// A closed ring without its repeated first vertex.
pub type Ring = Vec<Point3>;
/// An exterior ring followed by interior rings.
pub type Surface = Vec<Ring>;
/// Surfaces of a closed shell.
pub type Shell = Vec<Surface>;

/// Geometry boundaries with real coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum Boundaries {
    MultiSurface(Vec<Surface>),
    /// The exterior shell followed by interior shells
    Solid(Vec<Shell>),
}

impl Boundaries {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Boundaries::MultiSurface(_) => GeometryType::MultiSurface,
            Boundaries::Solid(_) => GeometryType::Solid,
        }
    }

    fn points(&self) -> impl Iterator<Item = &Point3> + '_ {
        let surfaces: Box<dyn Iterator<Item = &Surface> + '_> = match self {
            Boundaries::MultiSurface(surfaces) => Box::new(surfaces.iter()),
            Boundaries::Solid(shells) => Box::new(shells.iter().flatten()),
        };
        surfaces.flatten().flatten()
    }
}

/// Position of a surface within a geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceIndex {
    /// Index into a MultiSurface
    Surface(usize),
    /// Shell and surface index into a Solid
    Shell(usize, usize),
}

/// Surfaces that share one semantic type.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticSurface {
    /// Label the surfaces had in the database
    pub label: i64,
    /// CityJSON semantic surface type, for example `RoofSurface`
    pub surface_type: String,
    pub surfaces: Vec<SurfaceIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Geometry {
    pub lod: String,
    pub boundaries: Boundaries,
    /// Ordered by label
    pub semantics: Vec<SemanticSurface>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CityObject {
    pub id: String,
    pub cityobject_type: String,
    pub attributes: Map<String, Value>,
    pub geometry: Vec<Geometry>,
}

/// Vertex quantization shared by a model and its features.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub scale: [f64; 3],
    pub translate: [f64; 3],
}

impl Transform {
    pub fn new(translate: [f64; 3]) -> Self {
        let s = 1.0 / 10f64.powi(IMPORTANT_DIGITS);
        Self {
            scale: [s, s, s],
            translate,
        }
    }

    fn quantize(&self, p: &Point3) -> [i64; 3] {
        [0, 1, 2].map(|i| ((p[i] - self.translate[i]) / self.scale[i]).round() as i64)
    }

    fn to_json(self) -> Value {
        json!({ "scale": self.scale, "translate": self.translate })
    }
}

/// Deduplicated integer vertices and the boundaries that reference them.
#[derive(Default)]
struct VertexPool {
    vertices: Vec<[i64; 3]>,
    index: HashMap<[i64; 3], usize>,
}

impl VertexPool {
    fn add(&mut self, transform: &Transform, p: &Point3) -> usize {
        let q = transform.quantize(p);
        *self.index.entry(q).or_insert_with(|| {
            self.vertices.push(q);
            self.vertices.len() - 1
        })
    }

    fn surface(&mut self, transform: &Transform, surface: &Surface) -> Value {
        Value::Array(
            surface
                .iter()
                .map(|ring| {
                    Value::Array(
                        ring.iter()
                            .map(|p| Value::from(self.add(transform, p)))
                            .collect(),
                    )
                })
                .collect(),
        )
    }

    fn boundaries(&mut self, transform: &Transform, boundaries: &Boundaries) -> Value {
        match boundaries {
            Boundaries::MultiSurface(surfaces) => Value::Array(
                surfaces.iter().map(|s| self.surface(transform, s)).collect(),
            ),
            Boundaries::Solid(shells) => Value::Array(
                shells
                    .iter()
                    .map(|shell| {
                        Value::Array(shell.iter().map(|s| self.surface(transform, s)).collect())
                    })
                    .collect(),
            ),
        }
    }

    fn to_json(&self) -> Value {
        json!(self.vertices)
    }
}

fn semantics_to_json(geometry: &Geometry) -> Option<Value> {
    if geometry.semantics.is_empty() {
        return None;
    }
    let surfaces: Vec<Value> = geometry
        .semantics
        .iter()
        .map(|s| json!({ "type": s.surface_type }))
        .collect();

    let values = match &geometry.boundaries {
        Boundaries::MultiSurface(srfs) => {
            let mut values = vec![Value::Null; srfs.len()];
            for (i, semantic) in geometry.semantics.iter().enumerate() {
                for idx in &semantic.surfaces {
                    if let SurfaceIndex::Surface(s) = idx
                        && let Some(slot) = values.get_mut(*s)
                    {
                        *slot = Value::from(i);
                    }
                }
            }
            Value::Array(values)
        }
        Boundaries::Solid(shells) => {
            let mut values: Vec<Vec<Value>> =
                shells.iter().map(|shell| vec![Value::Null; shell.len()]).collect();
            for (i, semantic) in geometry.semantics.iter().enumerate() {
                for idx in &semantic.surfaces {
                    if let SurfaceIndex::Shell(sh, s) = idx
                        && let Some(slot) = values.get_mut(*sh).and_then(|v| v.get_mut(*s))
                    {
                        *slot = Value::from(i);
                    }
                }
            }
            json!(values)
        }
    };
    Some(json!({ "surfaces": surfaces, "values": values }))
}

fn cityobject_to_json(
    object: &CityObject,
    transform: &Transform,
    pool: &mut VertexPool,
) -> Value {
    let geometry: Vec<Value> = object
        .geometry
        .iter()
        .map(|g| {
            let mut geom = Map::new();
            geom.insert("type".into(), Value::from(g.boundaries.geometry_type().to_string()));
            geom.insert("lod".into(), Value::from(g.lod.clone()));
            geom.insert("boundaries".into(), pool.boundaries(transform, &g.boundaries));
            if let Some(semantics) = semantics_to_json(g) {
                geom.insert("semantics".into(), semantics);
            }
            Value::Object(geom)
        })
        .collect();

    let mut co = Map::new();
    co.insert("type".into(), Value::from(object.cityobject_type.clone()));
    if !object.attributes.is_empty() {
        co.insert("attributes".into(), Value::Object(object.attributes.clone()));
    }
    co.insert("geometry".into(), Value::Array(geometry));
    Value::Object(co)
}

/// An in-memory city model with real-world coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct CityModel {
    pub epsg: i32,
    pub objects: Vec<CityObject>,
    pub file_identifier: Option<String>,
}

impl CityModel {
    pub fn new(epsg: i32) -> Self {
        Self {
            epsg,
            objects: Vec::new(),
            file_identifier: None,
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    fn reference_system(&self) -> String {
        format!("https://www.opengis.net/def/crs/EPSG/0/{}", self.epsg)
    }

    /// `[minx, miny, minz, maxx, maxy, maxz]` of all vertices.
    pub fn geographical_extent(&self) -> Option<[f64; 6]> {
        let mut points = self
            .objects
            .iter()
            .flat_map(|o| o.geometry.iter())
            .flat_map(|g| g.boundaries.points());
        let first = points.next()?;
        let mut extent = [first[0], first[1], first[2], first[0], first[1], first[2]];
        for p in points {
            for i in 0..3 {
                extent[i] = extent[i].min(p[i]);
                extent[i + 3] = extent[i + 3].max(p[i]);
            }
        }
        Some(extent)
    }

    /// The transform used when no translation is given: the minimum corner.
    pub fn default_transform(&self) -> Transform {
        let translate = self
            .geographical_extent()
            .map(|e| [e[0], e[1], e[2]])
            .unwrap_or([0.0; 3]);
        Transform::new(translate)
    }

    fn metadata(&self) -> Value {
        let mut metadata = Map::new();
        metadata.insert("referenceSystem".into(), Value::from(self.reference_system()));
        if let Some(extent) = self.geographical_extent() {
            metadata.insert("geographicalExtent".into(), json!(extent));
        }
        if let Some(id) = &self.file_identifier {
            metadata.insert("fileIdentifier".into(), Value::from(id.clone()));
        }
        Value::Object(metadata)
    }

    /// The model as one CityJSON document with deduplicated, quantized vertices.
    pub fn to_cityjson(&self, translate: Option<[f64; 3]>) -> Value {
        let transform = translate
            .map(Transform::new)
            .unwrap_or_else(|| self.default_transform());
        let mut pool = VertexPool::default();
        let mut cityobjects = Map::new();
        for object in &self.objects {
            let co = cityobject_to_json(object, &transform, &mut pool);
            cityobjects.insert(object.id.clone(), co);
        }
        json!({
            "type": "CityJSON",
            "version": CITYJSON_VERSION,
            "transform": transform.to_json(),
            "metadata": self.metadata(),
            "CityObjects": cityobjects,
            "vertices": pool.to_json(),
        })
    }

    /// The first document of a CityJSON Text Sequence: no objects, only the
    /// transform and the reference system.
    pub fn metadata_document(epsg: i32, translate: [f64; 3]) -> Value {
        json!({
            "type": "CityJSON",
            "version": CITYJSON_VERSION,
            "transform": Transform::new(translate).to_json(),
            "metadata": { "referenceSystem": CityModel::new(epsg).reference_system() },
            "CityObjects": {},
            "vertices": [],
        })
    }

    /// One CityJSONFeature per object, each with its own vertex list. All
    /// features share the given translation.
    pub fn features(&self, translate: [f64; 3]) -> impl Iterator<Item = (String, Value)> + '_ {
        let transform = Transform::new(translate);
        self.objects.iter().map(move |object| {
            let mut pool = VertexPool::default();
            let mut cityobjects = Map::new();
            cityobjects.insert(
                object.id.clone(),
                cityobject_to_json(object, &transform, &mut pool),
            );
            let feature = json!({
                "type": "CityJSONFeature",
                "id": object.id,
                "CityObjects": cityobjects,
                "vertices": pool.to_json(),
            });
            (object.id.clone(), feature)
        })
    }
}
