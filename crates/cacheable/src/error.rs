use thiserror::Error;

/// Error types for cache operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// A call argument could not be turned into a stable cache key.
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),

    /// A backend could not be reached or answered with an error.
    #[error("Cache backend '{backend}' unavailable: {message}")]
    BackendUnavailable {
        backend: &'static str,
        message: String,
    },

    /// An annotated method ran before its instance was bound to a cache.
    #[error("Cache binding missing for '{class}'. Bind a cache during construction")]
    Unbound { class: String },

    #[error("Cache binding for '{class}' is already set")]
    AlreadyBound { class: String },

    #[error("Method '{method}' is not declared on '{class}'")]
    UndeclaredMethod { class: String, method: String },

    #[error("Cache payload codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new KeyDerivation error
    pub fn key_derivation(message: impl Into<String>) -> Self {
        Self::KeyDerivation(message.into())
    }

    /// Create a new BackendUnavailable error
    pub fn backend_unavailable(backend: &'static str, message: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            message: message.into(),
        }
    }

    /// Create a new Unbound error
    pub fn unbound(class: impl Into<String>) -> Self {
        Self::Unbound {
            class: class.into(),
        }
    }

    /// Create a new Codec error
    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// Whether the error came from a backend that could not serve the request.
    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, Self::BackendUnavailable { .. })
    }

    /// Errors raised by the caller's own usage rather than by I/O.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            Self::KeyDerivation(_)
                | Self::Unbound { .. }
                | Self::AlreadyBound { .. }
                | Self::UndeclaredMethod { .. }
                | Self::Configuration(_)
        )
    }
}

/// Result type alias for cache operations
pub type Result<T> = std::result::Result<T, CacheError>;
