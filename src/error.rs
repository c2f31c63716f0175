//! Error types
//!
//! One error enum for the whole engine. Connector plumbing works in
//! `anyhow` and is folded into [`Error::Connector`] or
//! [`Error::NotConfigured`] at the framework boundary.

use crate::auth::ProfileError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Definition problem: missing binding, unknown cloud, bad pagination setup
    #[error("configuration error: {0}")]
    Config(String),

    /// Credentials for the target cloud are not wired up in this environment
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// No listor or baseline with the requested id
    #[error("not found: {0}")]
    NotFound(String),

    /// Hash mismatch or shape mismatch between supplied data and definitions
    #[error("integrity error: {0}")]
    Integrity(String),

    /// A raw document could not be turned into a property
    #[error("extraction error: {0}")]
    Extraction(String),

    /// A page response did not have the configured shape
    #[error("invalid response: {0}")]
    Response(String),

    /// Version constraint of the target is not satisfied
    #[error("constraint not satisfied, need {required}, got {actual}")]
    Constraint { required: String, actual: String },

    #[error("failed to retrieve data from {cloud}: {message}")]
    Connector { cloud: String, message: String },

    #[error("failed to get data of page (offset {offset}/limit {limit}): {source}")]
    Page {
        offset: i64,
        limit: i64,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid JSONPath {path:?}: {message}")]
    JsonPath { path: String, message: String },

    #[error("failed to create jsonschema: {0}")]
    Schema(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fold a connector failure into the engine taxonomy.
    ///
    /// A missing profile anywhere in the chain means the cloud is simply not
    /// set up here, which callers treat as "no data".
    pub fn from_connector(cloud: &str, err: anyhow::Error) -> Self {
        let not_defined = err.chain().any(|cause| {
            matches!(
                cause.downcast_ref::<ProfileError>(),
                Some(ProfileError::NotDefined(_))
            )
        });

        if not_defined {
            Error::NotConfigured(format!("{:#}", err))
        } else {
            Error::Connector {
                cloud: cloud.to_string(),
                message: format!("{:#}", err),
            }
        }
    }

    pub fn is_not_configured(&self) -> bool {
        matches!(self, Error::NotConfigured(_))
    }
}
