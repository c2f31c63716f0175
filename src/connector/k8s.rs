//! Kubernetes REST connector
//!
//! Lists resources straight from the API server:
//! `/api/{version}` for the core group, `/apis/{group}/{version}` otherwise,
//! optionally scoped to a namespace. Call template `extra_param` entries are
//! sent as list options (`labelSelector`, `fieldSelector`, `limit`, ...).
//!
//! Profile keys:
//! - `K8S_API_SERVER`: base URL of the API server (required)
//! - `K8S_TOKEN`: bearer token
//! - `K8S_CA_FILE`: PEM bundle trusted in addition to the system roots
//! - `K8S_INSECURE_SKIP_TLS_VERIFY`: `true` to skip certificate checks

use super::http::{add_query_params, RestClient};
use super::{CallUsage, Connector, FetchTarget, RateLimiter};
use crate::auth::{AuthProvider, Profile};
use crate::cache::InstanceCache;
use crate::definition::{CloudType, ConfCallCmd};
use crate::framework::ParamMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

pub const K8S_API_SERVER: &str = "K8S_API_SERVER";
pub const K8S_TOKEN: &str = "K8S_TOKEN";
pub const K8S_CA_FILE: &str = "K8S_CA_FILE";
pub const K8S_INSECURE_SKIP_TLS_VERIFY: &str = "K8S_INSECURE_SKIP_TLS_VERIFY";

struct K8sClient {
    rest: RestClient,
    api_server: String,
    token: Option<String>,
}

pub struct K8sConnector {
    request_timeout: Duration,
    clients: InstanceCache<String, K8sClient>,
    limiter: RateLimiter,
}

impl K8sConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            clients: InstanceCache::new(),
            limiter: RateLimiter::default(),
        }
    }

    fn client(&self, auth: &dyn AuthProvider) -> Result<Arc<K8sClient>> {
        let profile = auth.profile(&CloudType::from(CloudType::K8S))?;
        self.clients
            .get_or_try_insert_with(profile.fingerprint().to_string(), || {
                self.create_client(&profile)
            })
            .context("failed to create k8s client")
    }

    fn create_client(&self, profile: &Profile) -> Result<K8sClient> {
        let api_server = profile.require(K8S_API_SERVER)?.trim_end_matches('/').to_string();

        let mut builder = reqwest::Client::builder().timeout(self.request_timeout);
        if let Some(ca_file) = profile.get(K8S_CA_FILE).filter(|v| !v.is_empty()) {
            let pem = std::fs::read(ca_file)
                .with_context(|| format!("failed to read CA file {}", ca_file))?;
            let cert = reqwest::Certificate::from_pem(&pem).context("invalid CA certificate")?;
            builder = builder.add_root_certificate(cert);
        }
        if profile
            .get(K8S_INSECURE_SKIP_TLS_VERIFY)
            .is_some_and(|v| v.eq_ignore_ascii_case("true"))
        {
            tracing::warn!("TLS verification disabled for {}", api_server);
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(K8sClient {
            rest: RestClient::from_builder(builder)?,
            api_server,
            token: profile
                .get(K8S_TOKEN)
                .filter(|v| !v.is_empty())
                .map(str::to_string),
        })
    }
}

/// Path of a resource collection
fn resource_path(cmd: &ConfCallCmd) -> String {
    let mut path = if cmd.group.is_empty() {
        format!("/api/{}", cmd.version)
    } else {
        format!("/apis/{}/{}", cmd.group, cmd.version)
    };
    if !cmd.namespace.is_empty() {
        path.push_str(&format!("/namespaces/{}", cmd.namespace));
    }
    path.push_str(&format!("/{}", cmd.resource));
    path
}

#[async_trait]
impl Connector for K8sConnector {
    fn cloud_type(&self) -> CloudType {
        CloudType::from(CloudType::K8S)
    }

    fn validate_cmd(&self, cmd: &ConfCallCmd, usage: CallUsage) -> Result<()> {
        match usage {
            CallUsage::List => {
                if cmd.resource.is_empty() {
                    anyhow::bail!("resource of k8s list is empty");
                }
                if cmd.version.is_empty() {
                    anyhow::bail!("version of k8s resource {} is empty", cmd.resource);
                }
                Ok(())
            }
            CallUsage::Extract => {
                anyhow::bail!("k8s properties must be taken with extract_jsonpath")
            }
        }
    }

    async fn list(
        &self,
        auth: &dyn AuthProvider,
        cmd: &ConfCallCmd,
        params: ParamMap,
    ) -> Result<Value> {
        let client = self.client(auth)?;
        let url = add_query_params(
            &format!("{}{}", client.api_server, resource_path(cmd)),
            &params,
        );

        self.limiter.take().await;
        client
            .rest
            .get(&url, client.token.as_deref())
            .await
            .with_context(|| format!("failed to list k8s resource \"{}\"", cmd.resource))
    }

    async fn fetch(
        &self,
        _auth: &dyn AuthProvider,
        _cmd: &ConfCallCmd,
        _target: FetchTarget<'_>,
    ) -> Result<Value> {
        anyhow::bail!("k8s properties must be taken with extract_jsonpath")
    }

    async fn server_version(&self, auth: &dyn AuthProvider) -> Result<Option<String>> {
        let client = self.client(auth)?;
        let url = format!("{}/version", client.api_server);

        self.limiter.take().await;
        let info = client
            .rest
            .get(&url, client.token.as_deref())
            .await
            .context("failed to get k8s version")?;

        info.get("gitVersion")
            .and_then(|v| v.as_str())
            .map(|v| Some(v.to_string()))
            .context("k8s version response has no gitVersion")
    }
}
