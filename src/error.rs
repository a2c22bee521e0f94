use thiserror::Error;

/// Main error type for wikidigest operations
#[derive(Error, Debug)]
pub enum DigestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Content source error: {0}")]
    Fetch(String),

    #[error("Text generation error: {0}")]
    Generation(String),

    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    #[error("Unknown persona: {0}")]
    UnknownPersona(String),

    #[error("Malformed summary export: {0}")]
    MalformedExport(String),

    #[error("No documents found for scope '{0}'")]
    NoDocuments(String),

    #[error("Run cancelled before stage '{0}'")]
    Cancelled(String),
}

pub type Result<T> = std::result::Result<T, DigestError>;
