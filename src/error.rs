use thiserror::Error;

#[derive(Error, Debug)]
pub enum TomeError {
    /// A variable a merx requires was not found in any configuration source.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Resolution error: {0}")]
    Resolution(String),

    #[error("Merx '{merx}' failed for {tome} with code {code}")]
    Action {
        merx: String,
        tome: String,
        code: i32,
    },

    #[error("Catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Path error: {0}")]
    Path(String),

    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Unexpected failure: {0}")]
    Unexpected(String),
}

pub type Result<T> = std::result::Result<T, TomeError>;
