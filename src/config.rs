//! Configuration Management
//!
//! Loads the benchmark file: options, credential profiles, listors and
//! baselines, all in one YAML document.

use crate::definition::{ConfBaseline, ConfListor, ListorId};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Default per-request timeout for connector HTTP calls
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Run options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfOption {
    /// Page size used by the pagination loop (values below 10 are ignored)
    pub page_size: i64,
    /// Only report resources in risk
    pub output_risk_only: bool,
    /// Baseline metadata keys copied onto each finding
    pub output_metadata: Vec<String>,
    /// Timeout of every connector request
    pub request_timeout_secs: u64,
}

impl Default for ConfOption {
    fn default() -> Self {
        Self {
            page_size: 0,
            output_risk_only: false,
            output_metadata: Vec::new(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }
}

/// Profile key (e.g. `tencent`, `k8s`) to profile name
pub type ConfProfile = BTreeMap<String, String>;

/// Root structure of a benchmark file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfFile {
    pub option: ConfOption,
    pub profile: ConfProfile,
    pub listor: Vec<ConfListor>,
    pub baseline: Vec<ConfBaseline>,
}

impl ConfFile {
    /// Load configuration from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let conf: ConfFile = serde_yaml::from_str(content)?;

        for id in conf.duplicate_listor_ids() {
            tracing::warn!(
                "Found duplicate id of listor {}, the latter one will be omitted",
                id
            );
        }

        Ok(conf)
    }

    /// Find a listor definition; the first one wins on duplicate ids
    pub fn find_listor(&self, id: ListorId) -> Option<&ConfListor> {
        self.listor.iter().find(|l| l.id == id)
    }

    /// Ids defined more than once, in order of their second appearance
    pub fn duplicate_listor_ids(&self) -> Vec<ListorId> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for listor in &self.listor {
            if !seen.insert(listor.id) && !duplicates.contains(&listor.id) {
                duplicates.push(listor.id);
            }
        }
        duplicates
    }
}
