//! Level of Detail values and the keys derived from them.
//!
//! A LoD is written as a number, `2` or `1.3`. Geometry columns are mapped under
//! keys made of `lod` and the digits of the value (`lod2`, `lod13`), and the
//! exported geometries carry the value back as text.

/// A LoD as it appears in configuration or in a LoD column.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lod {
    Int(i64),
    Float(f64),
}

impl From<i64> for Lod {
    fn from(v: i64) -> Self {
        Lod::Int(v)
    }
}

impl From<i32> for Lod {
    fn from(v: i32) -> Self {
        Lod::Int(v.into())
    }
}

impl From<f64> for Lod {
    fn from(v: f64) -> Self {
        Lod::Float(v)
    }
}

impl Lod {
    pub fn as_f64(&self) -> f64 {
        match self {
            Lod::Int(i) => *i as f64,
            Lod::Float(f) => *f,
        }
    }
}

/// Text form of a LoD. Integers stay integers and floats keep a decimal.
///
/// # Examples
///
/// ```
/// use cjdb::lod::lod_to_string;
///
/// assert_eq!(lod_to_string(0), "0");
/// assert_eq!(lod_to_string(1.0), "1.0");
/// assert_eq!(lod_to_string(1.3), "1.3");
/// ```
pub fn lod_to_string(lod: impl Into<Lod>) -> String {
    match lod.into() {
        Lod::Int(i) => i.to_string(),
        Lod::Float(f) => format!("{f:?}"),
    }
}

/// Mapping key of a LoD given as text: `"1.3"` becomes `"lod13"`.
pub fn lod_key(lod: &str) -> String {
    let digits: String = lod.chars().filter(|c| *c != '.').collect();
    format!("lod{digits}")
}

/// LoD value of a mapping key: `"lod13"` becomes `"1.3"` and `"lod2"` stays `"2"`.
///
/// # Examples
///
/// ```
/// use cjdb::lod::parse_lod_value;
///
/// assert_eq!(parse_lod_value("lod13"), "1.3");
/// assert_eq!(parse_lod_value("lod2"), "2");
/// ```
pub fn parse_lod_value(key: &str) -> String {
    let value = key.strip_prefix("lod").unwrap_or(key);
    if value.contains('.') || value.chars().count() < 2 {
        return value.to_string();
    }
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => format!("{first}.{}", chars.as_str()),
        None => String::new(),
    }
}

/// LoD rounded to one decimal, the precision semantics are checked against.
pub fn lod_float(lod: &str) -> Option<f64> {
    lod.trim()
        .parse::<f64>()
        .ok()
        .map(|v| (v * 10.0).round() / 10.0)
}
