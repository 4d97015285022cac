use spx_storage::StorageError;

pub type Result<T> = std::result::Result<T, CacheError>;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("GET {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("fetch is not available in this context")]
    Unavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("network failure: {0}")]
    Network(#[from] FetchError),

    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),

    #[error("no URL configured for asset {0:?}")]
    UnknownAsset(String),

    #[error("no known-good hash for asset {0:?}")]
    MissingHash(String),
}
