//! Cloud compliance benchmark engine
//!
//! Enumerates cloud resources through pluggable connectors, extracts
//! properties with JSONPath or follow-up calls, and judges them against
//! JSON schema rules. See [`framework`] for the pipeline and [`service`]
//! for the orchestration surface.

pub mod auth;
pub mod cache;
pub mod config;
pub mod connector;
pub mod definition;
pub mod error;
pub mod framework;
pub mod jsonpath;
pub mod service;

pub use config::ConfFile;
pub use connector::{Connector, ConnectorRegistry};
pub use error::{Error, Result};
pub use service::{BaselineData, Engine, Finding, ScanReport};

/// Version injected at compile time via CLOUDBENCH_VERSION env var (set by
/// CI/CD), or "dev" for local builds.
pub const VERSION: &str = match option_env!("CLOUDBENCH_VERSION") {
    Some(v) => v,
    None => "dev",
};
