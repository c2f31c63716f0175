//! Azure Resource Manager connector
//!
//! Lists `/subscriptions/{id}/providers/Microsoft.{provider}/{rs_type}` and
//! follows `nextLink` between pages. Property fetches address a resource by
//! its full ARM id, optionally with a sub-action appended.
//!
//! Profile keys:
//! - `AZURE_SUBSCRIPTION_ID` (required)
//! - `AZURE_ACCESS_TOKEN`, or `AZURE_TENANT_ID` + `AZURE_CLIENT_ID` +
//!   `AZURE_CLIENT_SECRET` for the client credentials flow
//! - `AZURE_ENDPOINT`, `AZURE_AUTHORITY_HOST` to target other clouds

use super::http::{param_str, set_query_param, RestClient};
use super::{CallUsage, Connector, FetchTarget, IdBinding, RateLimiter, AZURE_NEXT_MARKER};
use crate::auth::{AuthProvider, Profile};
use crate::cache::InstanceCache;
use crate::definition::{CloudType, ConfCallCmd};
use crate::framework::ParamMap;
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

pub const AZURE_SUBSCRIPTION_ID: &str = "AZURE_SUBSCRIPTION_ID";
pub const AZURE_ACCESS_TOKEN: &str = "AZURE_ACCESS_TOKEN";
pub const AZURE_TENANT_ID: &str = "AZURE_TENANT_ID";
pub const AZURE_CLIENT_ID: &str = "AZURE_CLIENT_ID";
pub const AZURE_CLIENT_SECRET: &str = "AZURE_CLIENT_SECRET";
pub const AZURE_ENDPOINT: &str = "AZURE_ENDPOINT";
pub const AZURE_AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

const DEFAULT_ENDPOINT: &str = "https://management.azure.com";
const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

/// Refresh tokens this much before they actually expire
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Used when the token response carries no lifetime
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

enum Credential {
    Static(String),
    ClientSecret {
        token_url: String,
        client_id: String,
        client_secret: String,
        scope: String,
        cache: RwLock<Option<CachedToken>>,
    },
}

struct AzureClient {
    rest: RestClient,
    endpoint: String,
    subscription_id: String,
    credential: Credential,
}

impl AzureClient {
    async fn token(&self) -> Result<String> {
        let (token_url, client_id, client_secret, scope, cache) = match &self.credential {
            Credential::Static(token) => return Ok(token.clone()),
            Credential::ClientSecret {
                token_url,
                client_id,
                client_secret,
                scope,
                cache,
            } => (token_url, client_id, client_secret, scope, cache),
        };

        {
            let cached = cache.read().await;
            if let Some(cached) = cached.as_ref().filter(|c| c.is_valid()) {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .rest
            .post_form(
                token_url,
                &[
                    ("grant_type", "client_credentials"),
                    ("client_id", client_id.as_str()),
                    ("client_secret", client_secret.as_str()),
                    ("scope", scope.as_str()),
                ],
            )
            .await
            .context("Failed to get access token")?;

        let token = response
            .get("access_token")
            .and_then(|v| v.as_str())
            .context("token response has no access_token")?
            .to_string();
        let ttl = response
            .get("expires_in")
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_TTL);

        *cache.write().await = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + ttl.saturating_sub(TOKEN_EXPIRY_BUFFER),
        });
        tracing::debug!("New Azure token cached, expires in ~{} minutes", ttl.as_secs() / 60);

        Ok(token)
    }
}

pub struct AzureConnector {
    request_timeout: Duration,
    clients: InstanceCache<String, AzureClient>,
    limiter: RateLimiter,
}

impl AzureConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self {
            request_timeout,
            clients: InstanceCache::new(),
            limiter: RateLimiter::default(),
        }
    }

    fn client(&self, auth: &dyn AuthProvider) -> Result<Arc<AzureClient>> {
        let profile = auth.profile(&CloudType::from(CloudType::AZURE))?;
        self.clients
            .get_or_try_insert_with(profile.fingerprint().to_string(), || {
                self.create_client(&profile)
            })
            .context("failed to create Azure client")
    }

    fn create_client(&self, profile: &Profile) -> Result<AzureClient> {
        let endpoint = profile
            .get(AZURE_ENDPOINT)
            .filter(|v| !v.is_empty())
            .unwrap_or(DEFAULT_ENDPOINT)
            .trim_end_matches('/')
            .to_string();
        let subscription_id = profile.require(AZURE_SUBSCRIPTION_ID)?.to_string();

        let credential = match profile.get(AZURE_ACCESS_TOKEN).filter(|v| !v.is_empty()) {
            Some(token) => Credential::Static(token.to_string()),
            None => {
                let authority = profile
                    .get(AZURE_AUTHORITY_HOST)
                    .filter(|v| !v.is_empty())
                    .unwrap_or(DEFAULT_AUTHORITY_HOST)
                    .trim_end_matches('/');
                Credential::ClientSecret {
                    token_url: format!(
                        "{}/{}/oauth2/v2.0/token",
                        authority,
                        profile.require(AZURE_TENANT_ID)?
                    ),
                    client_id: profile.require(AZURE_CLIENT_ID)?.to_string(),
                    client_secret: profile.require(AZURE_CLIENT_SECRET)?.to_string(),
                    scope: format!("{}/.default", endpoint),
                    cache: RwLock::new(None),
                }
            }
        };

        Ok(AzureClient {
            rest: RestClient::new(self.request_timeout)?,
            endpoint,
            subscription_id,
            credential,
        })
    }

    /// GET an ARM path or absolute URL with the given api-version
    async fn call(
        &self,
        client: &AzureClient,
        version: &str,
        endpoint: &str,
        action: &str,
    ) -> Result<Value> {
        if endpoint.is_empty() {
            anyhow::bail!("endpoint for Azure is empty");
        }

        let mut target = endpoint.to_string();
        if !action.is_empty() {
            target = format!("{}/{}", target.trim_end_matches('/'), action);
        }
        if Url::parse(&target).is_ok() {
            check_origin(&client.endpoint, &target)?;
        } else {
            target = format!("{}/{}", client.endpoint, target.trim_start_matches('/'));
        }
        let url = set_query_param(&target, "api-version", version)?;

        let token = client.token().await?;
        self.limiter.take().await;
        let response = client
            .rest
            .get(&url, Some(&token))
            .await
            .context("failed to invoke api")?;

        if !response.is_object() {
            anyhow::bail!("failed to unmarshal response as json object");
        }
        Ok(response)
    }
}

/// Absolute targets (next links, resource ids from supplied data) must stay
/// on the management endpoint; the bearer token is sent along
fn check_origin(endpoint: &str, target: &str) -> Result<()> {
    let expected =
        Url::parse(endpoint).with_context(|| format!("Invalid endpoint: {}", endpoint))?;
    let actual = Url::parse(target).with_context(|| format!("Invalid URL: {}", target))?;
    if actual.origin() != expected.origin() {
        anyhow::bail!(
            "refusing to send credentials to {} outside of {}",
            actual.origin().ascii_serialization(),
            expected.origin().ascii_serialization()
        );
    }
    Ok(())
}

fn provider_namespace(provider: &str) -> String {
    if provider.starts_with("Microsoft.") {
        provider.to_string()
    } else {
        format!("Microsoft.{}", provider)
    }
}

#[async_trait]
impl Connector for AzureConnector {
    fn cloud_type(&self) -> CloudType {
        CloudType::from(CloudType::AZURE)
    }

    fn id_binding(&self) -> IdBinding {
        IdBinding::Target
    }

    fn validate_cmd(&self, cmd: &ConfCallCmd, usage: CallUsage) -> Result<()> {
        if cmd.version.is_empty() {
            anyhow::bail!("api version of Azure call is empty");
        }
        if usage == CallUsage::List && (cmd.provider.is_empty() || cmd.rs_type.is_empty()) {
            anyhow::bail!("provider and rs_type are required for Azure listing");
        }
        Ok(())
    }

    async fn list(
        &self,
        auth: &dyn AuthProvider,
        cmd: &ConfCallCmd,
        params: ParamMap,
    ) -> Result<Value> {
        let client = self.client(auth)?;

        let endpoint = match param_str(&params, AZURE_NEXT_MARKER).filter(|v| !v.is_empty()) {
            Some(next_link) => next_link,
            None => format!(
                "/subscriptions/{}/providers/{}/{}",
                client.subscription_id,
                provider_namespace(&cmd.provider),
                cmd.rs_type
            ),
        };

        self.call(&client, &cmd.version, &endpoint, "").await
    }

    async fn fetch(
        &self,
        auth: &dyn AuthProvider,
        cmd: &ConfCallCmd,
        target: FetchTarget<'_>,
    ) -> Result<Value> {
        let FetchTarget::Resource(resource_id) = target else {
            anyhow::bail!("Azure properties are fetched by resource id");
        };

        let client = self.client(auth)?;
        self.call(&client, &cmd.version, resource_id, &cmd.action).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_namespace() {
        assert_eq!(provider_namespace("Storage"), "Microsoft.Storage");
        assert_eq!(provider_namespace("Microsoft.Compute"), "Microsoft.Compute");
    }

    #[test]
    fn test_check_origin() {
        let endpoint = "https://management.azure.com";
        assert!(check_origin(endpoint, "https://management.azure.com/subscriptions/s?x=1").is_ok());
        assert!(check_origin(endpoint, "http://management.azure.com/subscriptions/s").is_err());
        assert!(check_origin(endpoint, "https://management.azure.com.evil.io/x").is_err());
        assert!(check_origin(endpoint, "https://management.azure.com:8443/x").is_err());
        assert!(check_origin(endpoint, "file:///etc/passwd").is_err());
    }

    #[test]
    fn test_validate_cmd() {
        let connector = AzureConnector::new(Duration::from_secs(1));
        let list = ConfCallCmd {
            provider: "Storage".to_string(),
            rs_type: "storageAccounts".to_string(),
            version: "2023-01-01".to_string(),
            ..Default::default()
        };
        assert!(connector.validate_cmd(&list, CallUsage::List).is_ok());

        let extract = ConfCallCmd {
            version: "2023-01-01".to_string(),
            action: "blobServices/default".to_string(),
            ..Default::default()
        };
        assert!(connector.validate_cmd(&extract, CallUsage::Extract).is_ok());
        assert!(connector.validate_cmd(&extract, CallUsage::List).is_err());
        assert!(connector
            .validate_cmd(&ConfCallCmd::default(), CallUsage::Extract)
            .is_err());
    }
}
