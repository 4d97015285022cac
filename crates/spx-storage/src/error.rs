pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("persistent storage is not available in this context")]
    Unavailable,

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("database {0:?} is blocked by another open connection")]
    Blocked(String),

    #[error("object store {store:?} not found in database {database:?}")]
    MissingObjectStore { database: String, store: String },

    #[error("stored value for {key:?} is corrupt: {reason}")]
    Corrupt { key: String, reason: &'static str },

    #[error("invalid key {0:?}")]
    InvalidKey(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Failure reported by a browser storage API. Stored as a string so the error stays `Send`.
    #[error("indexeddb operation failed: {0}")]
    Js(String),
}

#[cfg(target_arch = "wasm32")]
impl StorageError {
    pub(crate) fn from_dom_exception(ex: &web_sys::DomException) -> Self {
        // https://webidl.spec.whatwg.org/#idl-DOMException-error-names
        match ex.name().as_str() {
            "QuotaExceededError" => StorageError::QuotaExceeded,
            _ => StorageError::Js(format!("{}: {}", ex.name(), ex.message())),
        }
    }
}

#[cfg(target_arch = "wasm32")]
impl From<wasm_bindgen::JsValue> for StorageError {
    fn from(value: wasm_bindgen::JsValue) -> Self {
        StorageError::Js(format!("{value:?}"))
    }
}
