//! Error types for the Coastie operator

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// HTTP client could not be built or a request failed outright
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// The Coastie spec is not usable as written
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Operator configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// An object is missing a field the operator relies on
    #[error("Object is missing {0}")]
    MissingObjectKey(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// True when the API server answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 404)
    }

    /// True when the API server answered 409 (AlreadyExists or a write conflict)
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::KubeError(kube::Error::Api(e)) if e.code == 409)
    }

    /// Whether retrying soon is likely to help
    pub fn is_retriable(&self) -> bool {
        match self {
            Error::KubeError(kube::Error::Api(e)) => e.code == 409 || e.code == 429 || e.code >= 500,
            Error::KubeError(_) | Error::HttpError(_) => true,
            Error::SerializationError(_)
            | Error::ValidationError(_)
            | Error::ConfigError(_)
            | Error::MissingObjectKey(_) => false,
        }
    }
}
