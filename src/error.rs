use thiserror::Error;

/// Engine error taxonomy. Every public operation returns either a success
/// payload or one of these kinds; `kind()` is the stable machine-readable
/// discriminator that external adapters (RPC/CLI/IDE) serialize.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Scoring weights must sum to 1.0, got {sum}")]
    WeightSum { sum: f64 },

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Duplicate id in index: {0}")]
    DuplicateId(String),

    #[error("File read failed: {path}: {message}")]
    FileRead { path: String, message: String },

    #[error("File exceeds size limit ({size} > {limit} bytes): {path}")]
    OversizeFile { path: String, size: u64, limit: u64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Persisted state corrupted: {0}")]
    Corrupted(String),

    #[error("Embedding failed: {0}")]
    Embedding(String),

    #[error("Embedding timed out after {attempts} attempt(s)")]
    EmbeddingTimeout { attempts: u32 },

    #[error("Search error: {0}")]
    Search(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl Error {
    /// Stable machine-readable kind for wire formats.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::WeightSum { .. } => "config.weight_sum",
            Error::DimensionMismatch { .. } => "store.dimension_mismatch",
            Error::DuplicateId(_) => "store.duplicate_id",
            Error::FileRead { .. } => "index.file_read",
            Error::OversizeFile { .. } => "index.oversize_file",
            Error::Storage(_) => "store.storage",
            Error::Corrupted(_) => "store.corrupted",
            Error::Embedding(_) => "embedding.failed",
            Error::EmbeddingTimeout { .. } => "embedding.timeout",
            Error::Search(_) => "search",
            Error::Cancelled => "cancelled",
            Error::Io(_) => "io",
            Error::Serde(_) => "serde",
            Error::Internal(_) => "internal",
        }
    }

    /// Cancellation is a distinct category, not a failure; callers
    /// discriminate with this instead of matching the variant.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
