//! Benchmark definitions
//!
//! Immutable configuration loaded once from YAML: how to enumerate a kind of
//! resource (listor), how to extract and judge a property (checker), and how
//! checkers group into a benchmark recommendation (baseline).
//!
//! Call templates are keyed by cloud tag so that a connector registered for
//! a new cloud picks up its own section without changes here.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Identifier of a listor definition, unique within one config file
pub type ListorId = i64;

/// Cloud type tag, aka connector type
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CloudType(String);

impl CloudType {
    pub const TENCENT_CLOUD: &'static str = "tencent_cloud";
    pub const TENCENT_COS: &'static str = "tencent_cos";
    pub const ALIYUN_CLOUD: &'static str = "aliyun";
    pub const ALIYUN_OSS: &'static str = "aliyun_oss";
    pub const K8S: &'static str = "k8s";
    pub const AZURE: &'static str = "azure";

    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for CloudType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CloudType {
    fn from(tag: &str) -> Self {
        Self(tag.to_string())
    }
}

impl From<String> for CloudType {
    fn from(tag: String) -> Self {
        Self(tag)
    }
}

impl PartialEq<str> for CloudType {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for CloudType {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// How a value is inserted into request parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Int,
    String,
    StringList,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaginationType {
    /// Not configured; a listor fills it from the per-cloud default table
    #[default]
    Unset,
    /// `[offset, offset + limit)`, offset starts at 0
    OffsetLimit,
    /// `[(page - 1) * size, page * size)`, page starts at 1
    PageSize,
    /// One call returns the whole list
    NoPagination,
    /// Empty marker on the first page, then the returned next marker
    Marker,
}

/// Pagination strategy and the field names it binds to
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfPaginator {
    pub pagination_type: PaginationType,

    pub offset_type: Option<ParamType>,
    pub offset_name: String,
    pub limit_type: Option<ParamType>,
    pub limit_name: String,
    pub resp_total_name: String,

    pub marker_name: String,
    pub next_marker_name: String,
    pub truncated_name: String,
}

/// Connector call template
///
/// Which fields matter depends on the connector; unused ones stay empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfCallCmd {
    pub service: String,
    pub version: String,
    pub action: String,
    pub endpoint: String,
    pub endpoint_with_region: bool,
    pub provider: String,
    pub rs_type: String,
    pub namespace: String,
    pub group: String,
    pub resource: String,
    #[serde(alias = "list_options")]
    pub extra_param: Map<String, Value>,
}

/// How to list one kind of resource
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfListCmd {
    #[serde(default)]
    pub data_list_json_path: String,
    #[serde(default)]
    pub convert_object_to_list: bool,
    /// Call template per cloud tag
    #[serde(flatten)]
    pub targets: BTreeMap<String, ConfCallCmd>,
}

impl ConfListCmd {
    pub fn call(&self, cloud_type: &CloudType) -> ConfCallCmd {
        self.targets
            .get(cloud_type.as_str())
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfVersionConstraint {
    /// Semver requirement, e.g. `">= 1.24"`
    pub version: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfConstraint {
    #[serde(flatten)]
    pub by_cloud: BTreeMap<String, ConfVersionConstraint>,
}

impl ConfConstraint {
    pub fn version_for(&self, cloud_type: &CloudType) -> Option<&str> {
        self.by_cloud
            .get(cloud_type.as_str())
            .map(|c| c.version.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Resource enumeration definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfListor {
    pub id: ListorId,
    pub cloud_type: CloudType,
    /// Human readable resource type
    #[serde(default)]
    pub rs_type: String,
    #[serde(default)]
    pub list_cmd: ConfListCmd,
    #[serde(default)]
    pub paginator: ConfPaginator,
    #[serde(default)]
    pub constraint: ConfConstraint,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfJsonPathCmd {
    pub path: String,
}

/// Extraction chain of a checker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfExtractCmd {
    #[serde(default)]
    pub id_jsonpath: String,
    #[serde(default)]
    pub name_jsonpath: String,
    #[serde(default)]
    pub id_const: String,
    /// Keep only the part of the id after its last `/`
    #[serde(default)]
    pub normalize_id: bool,

    /// Parameter carrying the id when the property comes from a follow-up call
    #[serde(default)]
    pub id_param_name: String,
    #[serde(default)]
    pub id_param_type: Option<ParamType>,

    /// Property taken from the raw document itself; when absent, a follow-up
    /// call to the cloud is made instead
    #[serde(default)]
    pub extract_jsonpath: Option<ConfJsonPathCmd>,
    #[serde(flatten)]
    pub targets: BTreeMap<String, ConfCallCmd>,
}

impl ConfExtractCmd {
    pub fn call(&self, cloud_type: &CloudType) -> ConfCallCmd {
        self.targets
            .get(cloud_type.as_str())
            .cloned()
            .unwrap_or_default()
    }

    /// Path used to take the property from the document, if configured
    pub fn extract_path(&self) -> Option<&str> {
        self.extract_jsonpath
            .as_ref()
            .map(|cmd| cmd.path.as_str())
            .filter(|path| !path.is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfValidator {
    /// JSON schema describing the non-compliant shape
    pub validate_schema: String,
    /// Replacements for `%name%` placeholders in the schema
    pub dyn_validate_value: BTreeMap<String, String>,
    /// Path of the value shown next to a finding
    pub value_jsonpath: String,
}

/// Extraction and validation definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfChecker {
    pub cloud_type: CloudType,
    #[serde(default)]
    pub listor: Vec<ListorId>,
    #[serde(default)]
    pub extract_cmd: ConfExtractCmd,
    #[serde(default)]
    pub validator: ConfValidator,
}

/// Benchmark group
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfBaseline {
    pub tag: Vec<String>,
    /// Labels for output only
    pub metadata: BTreeMap<String, String>,
    pub checker: Vec<ConfChecker>,
}
