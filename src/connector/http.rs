//! HTTP utilities shared by the REST connectors

use crate::framework::ParamMap;
use anyhow::{Context, Result};
use reqwest::{Client, Url};
use serde_json::Value;
use std::time::Duration;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Truncate a response body and drop control characters before logging it
pub(crate) fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut cut = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..cut], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Thin JSON client over reqwest
#[derive(Clone)]
pub struct RestClient {
    client: Client,
}

impl RestClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::from_builder(Client::builder().timeout(timeout))
    }

    pub fn from_builder(builder: reqwest::ClientBuilder) -> Result<Self> {
        let client = builder
            .user_agent(concat!("cloudbench/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// GET a JSON document, optionally with a bearer token
    pub async fn get(&self, url: &str, token: Option<&str>) -> Result<Value> {
        tracing::debug!("GET {}", url);

        let mut request = self.client.get(url).header("Accept", "application/json");
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.context("Failed to send request")?;
        Self::read_json(response).await
    }

    /// POST a form and read a JSON document back
    pub async fn post_form(&self, url: &str, form: &[(&str, &str)]) -> Result<Value> {
        tracing::debug!("POST {}", url);

        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .context("Failed to send request")?;
        Self::read_json(response).await
    }

    async fn read_json(response: reqwest::Response) -> Result<Value> {
        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            tracing::error!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(anyhow::anyhow!("API request failed: {}", status));
        }

        serde_json::from_str(&body).context("Failed to parse response JSON")
    }
}

/// Append request parameters as a query string
///
/// Scalars are rendered as text; lists repeat the key once per item.
pub fn add_query_params(url: &str, params: &ParamMap) -> String {
    let mut query_parts: Vec<String> = Vec::new();

    for (key, value) in params {
        match value {
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = scalar_to_string(item) {
                        query_parts.push(format!("{}={}", key, urlencoding::encode(&s)));
                    }
                }
            }
            other => {
                if let Some(s) = scalar_to_string(other) {
                    query_parts.push(format!("{}={}", key, urlencoding::encode(&s)));
                }
            }
        }
    }

    if query_parts.is_empty() {
        url.to_string()
    } else if url.contains('?') {
        format!("{}&{}", url, query_parts.join("&"))
    } else {
        format!("{}?{}", url, query_parts.join("&"))
    }
}

/// Set one query parameter, replacing any existing value
pub fn set_query_param(url: &str, key: &str, value: &str) -> Result<String> {
    let mut parsed = Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    {
        let mut pairs = parsed.query_pairs_mut();
        pairs.clear();
        for (k, v) in &kept {
            pairs.append_pair(k, v);
        }
        pairs.append_pair(key, value);
    }

    Ok(parsed.to_string())
}

/// Read a string parameter; a one-element list counts as its element
pub fn param_str(params: &ParamMap, key: &str) -> Option<String> {
    params
        .get(key)
        .and_then(|v| {
            if let Value::Array(arr) = v {
                arr.first().and_then(|v| v.as_str())
            } else {
                v.as_str()
            }
        })
        .map(|s| s.to_string())
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}
