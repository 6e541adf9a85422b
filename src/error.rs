use thiserror::Error;

/// Crate-wide error type. Subsystem errors (GTFS parsing, AVL parsing)
/// convert in via `#[from]`, matching the layered error design of the
/// modules that read external data.
#[derive(Error, Debug)]
pub enum Error {
    #[error("{0}")]
    Error(String),
    #[error("path-match seed not found for shape {0}")]
    SeedNotFound(String),
    #[error("Cannot read file")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
    #[error(transparent)]
    Bincode(#[from] bincode::Error),
    #[error(transparent)]
    GtfsError(#[from] crate::gtfs::error::Error),
    #[error(transparent)]
    AvlError(#[from] crate::avl::error::Error),
    #[error(transparent)]
    SqliteError(#[from] rusqlite::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
}
