//! Credential profiles
//!
//! A profile is a flat key/value set (secret ids, endpoints, tokens) for one
//! cloud. Benchmarks name the profiles they want per cloud family; a cloud
//! with no profile named is "not wired up" in this environment, which the
//! engine treats as an empty result rather than a failure.

use crate::cache::InstanceCache;
use crate::config::ConfProfile;
use crate::definition::CloudType;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Profile name that reads values from the process environment
pub const PROFILE_ENV: &str = "$ENV";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("no profile defined for cloud: {0}")]
    NotDefined(String),

    #[error("invalid profile name {0:?}, should only contain filename without directory")]
    InvalidName(String),

    #[error("failed to read key from profile {profile}: {key}")]
    MissingKey { profile: String, key: String },

    #[error("failed to read profile {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Loaded credential values
#[derive(Debug, Clone)]
pub struct Profile {
    pub name: String,
    values: HashMap<String, String>,
    fingerprint: String,
}

impl Default for Profile {
    fn default() -> Self {
        Self::new("", HashMap::new())
    }
}

impl Profile {
    pub fn new(name: impl Into<String>, values: HashMap<String, String>) -> Self {
        let name = name.into();
        let fingerprint = fingerprint(&name, &values);
        Self {
            name,
            values,
            fingerprint,
        }
    }

    pub fn from_pairs(name: &str, pairs: &[(&str, &str)]) -> Self {
        let values = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::new(name, values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|v| v.as_str())
    }

    /// Digest of the name and every value
    ///
    /// Two profiles share a fingerprint only when they hold the same
    /// credentials, so connector clients are cached by it rather than by name.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Fetch a key that must be present
    pub fn require(&self, key: &str) -> Result<&str, ProfileError> {
        self.get(key).ok_or_else(|| ProfileError::MissingKey {
            profile: self.name.clone(),
            key: key.to_string(),
        })
    }
}

/// Source of credential profiles
///
/// Implementations must be safe to share between concurrent checkers.
pub trait AuthProvider: Send + Sync {
    fn profile(&self, cloud_type: &CloudType) -> Result<Arc<Profile>, ProfileError>;
}

/// Profile key of a cloud type; related clouds share one profile
pub fn profile_key(cloud_type: &CloudType) -> &str {
    match cloud_type.as_str() {
        CloudType::TENCENT_CLOUD | CloudType::TENCENT_COS => "tencent",
        CloudType::ALIYUN_CLOUD | CloudType::ALIYUN_OSS => "aliyun",
        other => other,
    }
}

/// Profiles named by the benchmark file, read from the environment or from
/// `key=value` files in an auth directory
pub struct ProfileAuthProvider {
    profile: ConfProfile,
    auth_dir: PathBuf,
    loaded: InstanceCache<String, Profile>,
}

impl ProfileAuthProvider {
    pub fn new(profile: ConfProfile, auth_dir: impl Into<PathBuf>) -> Self {
        Self {
            profile,
            auth_dir: auth_dir.into(),
            loaded: InstanceCache::new(),
        }
    }

    fn read_profile(&self, profile_name: &str) -> Result<Profile, ProfileError> {
        if profile_name == PROFILE_ENV {
            return Ok(Profile::new(PROFILE_ENV, std::env::vars().collect()));
        }

        let file_name = Path::new(profile_name);
        if file_name.components().count() != 1 || file_name.file_name().is_none() {
            return Err(ProfileError::InvalidName(profile_name.to_string()));
        }

        let path = self.auth_dir.join(file_name);
        let content = std::fs::read_to_string(&path).map_err(|source| ProfileError::Io {
            path: path.clone(),
            source,
        })?;

        Ok(Profile::new(profile_name, parse_properties(&content)))
    }
}

impl AuthProvider for ProfileAuthProvider {
    fn profile(&self, cloud_type: &CloudType) -> Result<Arc<Profile>, ProfileError> {
        let key = profile_key(cloud_type);
        let Some(profile_name) = self.profile.get(key) else {
            return Err(ProfileError::NotDefined(key.to_string()));
        };

        self.loaded
            .get_or_try_insert_with(profile_name.clone(), || self.read_profile(profile_name))
    }
}

/// In-memory profiles keyed by profile key
#[derive(Default)]
pub struct StaticAuthProvider {
    profiles: HashMap<String, Arc<Profile>>,
}

impl StaticAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, key: &str, profile: Profile) -> Self {
        self.profiles.insert(key.to_string(), Arc::new(profile));
        self
    }
}

impl AuthProvider for StaticAuthProvider {
    fn profile(&self, cloud_type: &CloudType) -> Result<Arc<Profile>, ProfileError> {
        let key = profile_key(cloud_type);
        self.profiles
            .get(key)
            .cloned()
            .ok_or_else(|| ProfileError::NotDefined(key.to_string()))
    }
}

fn fingerprint(name: &str, values: &HashMap<String, String>) -> String {
    let sorted: BTreeMap<&str, &str> = values
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    let fields = std::iter::once(name).chain(sorted.into_iter().flat_map(|(k, v)| [k, v]));

    let mut hasher = Sha256::new();
    for field in fields {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    hex::encode(hasher.finalize())
}

/// Parse a properties file: `key=value` or `key: value`, `#`/`;`/`!` comments
fn parse_properties(content: &str) -> HashMap<String, String> {
    let mut values = HashMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') || line.starts_with('!')
        {
            continue;
        }

        let Some(split_at) = line.find(['=', ':']) else {
            continue;
        };
        let key = line[..split_at].trim();
        let value = line[split_at + 1..].trim();
        if !key.is_empty() {
            values.insert(key.to_string(), value.to_string());
        }
    }
    values
}
