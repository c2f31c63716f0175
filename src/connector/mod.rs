//! Cloud connectors
//!
//! A connector is the only place that talks to a cloud. It turns a call
//! template plus request parameters into one JSON document, paces itself
//! with its own rate limiter and caches API clients per credential profile.
//!
//! Connectors are registered by cloud tag in a [`ConnectorRegistry`]. Listors
//! and checkers look them up by the tag of their definition, so a new cloud
//! is added by registering a connector, never by editing the framework.
//!
//! Connector code works in `anyhow`; the framework folds failures into
//! [`crate::Error`].

pub mod azure;
pub mod http;
pub mod k8s;
pub mod ratelimit;

pub use azure::AzureConnector;
pub use k8s::K8sConnector;
pub use ratelimit::RateLimiter;

use crate::auth::AuthProvider;
use crate::definition::{CloudType, ConfCallCmd, ConfPaginator, PaginationType, ParamType};
use crate::error::{Error, Result};
use crate::framework::ParamMap;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Marker parameter of Azure list calls, also the key of the next page link
pub const AZURE_NEXT_MARKER: &str = "nextLink";

/// Marker parameter of Aliyun OSS bucket listing
pub const ALIYUN_OSS_MARKER_KEY: &str = "marker";

/// How an extracted id reaches a property fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdBinding {
    /// Inserted as the configured `id_param_name` parameter
    Parameter,
    /// Used as the target resource itself
    Target,
}

/// Which operation a call template is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallUsage {
    List,
    Extract,
}

/// Target of a property fetch
#[derive(Debug, Clone)]
pub enum FetchTarget<'a> {
    Params(ParamMap),
    Resource(&'a str),
}

#[async_trait]
pub trait Connector: Send + Sync {
    /// Tag of the cloud this connector serves
    fn cloud_type(&self) -> CloudType;

    fn id_binding(&self) -> IdBinding {
        IdBinding::Parameter
    }

    /// Pagination applied to listors that do not configure one
    fn default_paginator(&self) -> ConfPaginator {
        default_paginator(&self.cloud_type())
    }

    /// Path of the data list inside a page response
    fn default_data_path(&self) -> Option<&'static str> {
        default_data_path(&self.cloud_type())
    }

    /// Reject a call template this connector cannot serve
    fn validate_cmd(&self, cmd: &ConfCallCmd, usage: CallUsage) -> anyhow::Result<()>;

    /// Fetch one page of a resource list
    async fn list(
        &self,
        auth: &dyn AuthProvider,
        cmd: &ConfCallCmd,
        params: ParamMap,
    ) -> anyhow::Result<Value>;

    /// Fetch the property document of one resource
    async fn fetch(
        &self,
        auth: &dyn AuthProvider,
        cmd: &ConfCallCmd,
        target: FetchTarget<'_>,
    ) -> anyhow::Result<Value>;

    /// Version reported by the target, when the cloud has one
    async fn server_version(&self, _auth: &dyn AuthProvider) -> anyhow::Result<Option<String>> {
        Ok(None)
    }
}

/// Built-in pagination defaults per cloud
///
/// Aliyun has none since its APIs differ from action to action.
pub fn default_paginator(cloud_type: &CloudType) -> ConfPaginator {
    match cloud_type.as_str() {
        CloudType::TENCENT_CLOUD => ConfPaginator {
            pagination_type: PaginationType::OffsetLimit,
            offset_type: Some(ParamType::Int),
            offset_name: "Offset".to_string(),
            limit_type: Some(ParamType::Int),
            limit_name: "Limit".to_string(),
            resp_total_name: "TotalCount".to_string(),
            ..Default::default()
        },
        CloudType::TENCENT_COS | CloudType::K8S => ConfPaginator {
            pagination_type: PaginationType::NoPagination,
            ..Default::default()
        },
        CloudType::ALIYUN_OSS => ConfPaginator {
            pagination_type: PaginationType::Marker,
            marker_name: ALIYUN_OSS_MARKER_KEY.to_string(),
            next_marker_name: "NextMarker".to_string(),
            truncated_name: "IsTruncated".to_string(),
            ..Default::default()
        },
        CloudType::AZURE => ConfPaginator {
            pagination_type: PaginationType::Marker,
            marker_name: AZURE_NEXT_MARKER.to_string(),
            next_marker_name: AZURE_NEXT_MARKER.to_string(),
            ..Default::default()
        },
        _ => ConfPaginator::default(),
    }
}

/// Built-in data list paths per cloud
pub fn default_data_path(cloud_type: &CloudType) -> Option<&'static str> {
    match cloud_type.as_str() {
        CloudType::TENCENT_COS | CloudType::ALIYUN_OSS => Some("$.Buckets"),
        CloudType::K8S => Some("$.items"),
        CloudType::AZURE => Some("$.value"),
        _ => None,
    }
}

/// Connectors keyed by cloud tag
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    connectors: BTreeMap<CloudType, Arc<dyn Connector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the connectors shipped in this crate
    pub fn with_defaults(request_timeout: Duration) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(K8sConnector::new(request_timeout)));
        registry.register(Arc::new(AzureConnector::new(request_timeout)));
        registry
    }

    /// Register a connector, replacing any previous one for the same tag
    pub fn register(&mut self, connector: Arc<dyn Connector>) {
        let cloud_type = connector.cloud_type();
        if self.connectors.insert(cloud_type.clone(), connector).is_some() {
            tracing::debug!("Replaced connector for {}", cloud_type);
        }
    }

    pub fn get(&self, cloud_type: &CloudType) -> Result<Arc<dyn Connector>> {
        self.connectors
            .get(cloud_type)
            .cloned()
            .ok_or_else(|| Error::Config(format!("invalid cloud type of {}", cloud_type)))
    }

    pub fn contains(&self, cloud_type: &CloudType) -> bool {
        self.connectors.contains_key(cloud_type)
    }

    pub fn cloud_types(&self) -> impl Iterator<Item = &CloudType> {
        self.connectors.keys()
    }
}
