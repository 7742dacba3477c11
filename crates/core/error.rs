//! Error types for the tile index and the exporter.

use thiserror::Error;

/// What went wrong at the storage boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// Could not open or keep a connection
    Connection,
    /// `CREATE TABLE` on a relation that already exists
    DuplicateTable,
    /// Any other statement failure
    Query,
    /// A returned value could not be decoded
    Decode,
}

impl std::fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::DuplicateTable => "duplicate table",
            Self::Query => "query",
            Self::Decode => "decode",
        };
        f.write_str(s)
    }
}

/// Errors raised by cjdb.
#[derive(Error, Debug)]
pub enum CjdbError {
    /// Invalid configuration, raised while loading and never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An argument that the operation cannot work with.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The grid is not a full quadtree or a tile ID was generated twice.
    #[error("Quadtree invariant violated: {0}")]
    QuadtreeInvariant(String),

    /// Error reported by the spatial database.
    #[error("Database {kind} error: {message}")]
    Database { kind: DbErrorKind, message: String },

    /// Querying one of the mapped tables failed.
    #[error("Could not query {table}. Check the logs for details.")]
    TableQuery { table: String },

    /// None of the requested tiles exist in the tile index.
    #[error("None of the provided tiles are present in the index.")]
    NoTiles,

    /// A spawned export task panicked or was cancelled.
    #[error("Task did not finish: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("GeoJSON error: {0}")]
    GeoJson(#[from] cjdb_types::GeoJsonError),
}

impl CjdbError {
    pub(crate) fn database(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self::Database {
            kind,
            message: message.into(),
        }
    }

    /// Whether this is a database error of the given kind.
    pub fn is_db(&self, kind: DbErrorKind) -> bool {
        matches!(self, Self::Database { kind: k, .. } if *k == kind)
    }
}

/// Result type for cjdb operations.
pub type Result<T> = std::result::Result<T, CjdbError>;
