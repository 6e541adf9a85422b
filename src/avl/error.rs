use thiserror::Error;

/// Errors from reading an AVL CSV feed.
#[derive(Error, Debug)]
pub enum Error {
    #[error("impossible to read file")]
    IO(#[from] std::io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("AVL CSV file is missing one of the expected header columns")]
    MissingHeader,
    #[error("could not parse timestamp '{0}'")]
    BadTimestamp(String),
}
