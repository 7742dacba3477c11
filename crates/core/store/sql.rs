//! Composing SQL from quoted identifiers and bind parameters.
//!
//! Schema, table and column names come from configuration and are never
//! interpolated as raw text: they go through [`Ident`], which double-quotes every
//! part. Values never appear in the SQL text at all, they are added as [`Param`]s
//! and referenced through positional `$n` placeholders.

use std::fmt;

/// A possibly schema-qualified SQL identifier.
///
/// # Examples
///
/// ```
/// use cjdb::store::sql::Ident;
///
/// let table = Ident::qualified("tile_index", "tiles");
/// assert_eq!(table.to_string(), r#""tile_index"."tiles""#);
/// assert_eq!(Ident::new(r#"we"ird"#).to_string(), r#""we""ird""#);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Ident {
    parts: Vec<String>,
}

impl Ident {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            parts: vec![name.into()],
        }
    }

    pub fn qualified(schema: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            parts: vec![schema.into(), name.into()],
        }
    }

    /// The unqualified name, unquoted.
    pub fn name(&self) -> &str {
        self.parts.last().map(String::as_str).unwrap_or_default()
    }

    /// A new identifier named `<unqualified name><suffix>`, without the schema.
    /// Used for names of indexes that belong to a table.
    pub fn derived(&self, suffix: &str) -> Ident {
        Ident::new(format!("{}{}", self.name(), suffix))
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "\"{}\"", part.replace('"', "\"\""))?;
        }
        Ok(())
    }
}

/// A value bound to a statement placeholder.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Float(f64),
    Int(i64),
    Text(String),
    TextArray(Vec<String>),
}

impl From<f64> for Param {
    fn from(v: f64) -> Self {
        Param::Float(v)
    }
}

impl From<i64> for Param {
    fn from(v: i64) -> Self {
        Param::Int(v)
    }
}

impl From<i32> for Param {
    fn from(v: i32) -> Self {
        Param::Int(v as i64)
    }
}

impl From<String> for Param {
    fn from(v: String) -> Self {
        Param::Text(v)
    }
}

impl From<&str> for Param {
    fn from(v: &str) -> Self {
        Param::Text(v.to_string())
    }
}

impl From<Vec<String>> for Param {
    fn from(v: Vec<String>) -> Self {
        Param::TextArray(v)
    }
}

/// SQL text with its bind parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statement {
    sql: String,
    params: Vec<Param>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// Append raw SQL text.
    pub fn push(&mut self, sql: &str) -> &mut Self {
        self.sql.push_str(sql);
        self
    }

    pub fn push_ident(&mut self, ident: &Ident) -> &mut Self {
        self.sql.push_str(&ident.to_string());
        self
    }

    /// Add a parameter and return its placeholder. The placeholder can be
    /// pushed more than once to reuse the value.
    pub fn bind(&mut self, param: impl Into<Param>) -> String {
        self.params.push(param.into());
        format!("${}", self.params.len())
    }

    /// Add a parameter and append its placeholder.
    pub fn push_bind(&mut self, param: impl Into<Param>) -> &mut Self {
        let placeholder = self.bind(param);
        self.push(&placeholder)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[Param] {
        &self.params
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.sql)?;
        if !self.params.is_empty() {
            write!(f, " -- {:?}", self.params)?;
        }
        Ok(())
    }
}
