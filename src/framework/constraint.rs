//! Version constraints of listing targets
//!
//! A listor may require a minimum (or bounded) version of the target, e.g.
//! a k8s API server new enough to serve a resource. `||` separates
//! alternatives; within one, comparators are separated by commas or spaces,
//! `a - b` is an inclusive range and a bare version means equality.

use crate::auth::AuthProvider;
use crate::connector::Connector;
use crate::definition::ConfConstraint;
use crate::error::{Error, Result};
use semver::{Version, VersionReq};

pub struct ConstraintChecker<'a> {
    conf: &'a ConfConstraint,
}

impl<'a> ConstraintChecker<'a> {
    pub fn new(conf: &'a ConfConstraint) -> Self {
        Self { conf }
    }

    /// Fail with [`Error::Constraint`] when the target's version is outside
    /// the configured requirement
    ///
    /// Clouds without a configured requirement, or without a notion of
    /// version, always pass.
    pub async fn check(&self, connector: &dyn Connector, auth: &dyn AuthProvider) -> Result<()> {
        let cloud_type = connector.cloud_type();
        let Some(required) = self.conf.version_for(&cloud_type) else {
            return Ok(());
        };

        let actual = connector
            .server_version(auth)
            .await
            .map_err(|e| Error::from_connector(cloud_type.as_str(), e))?;
        let Some(actual) = actual else {
            tracing::debug!("{} reports no version, constraint {} skipped", cloud_type, required);
            return Ok(());
        };

        if version_satisfies(required, &actual)? {
            Ok(())
        } else {
            Err(Error::Constraint {
                required: required.to_string(),
                actual,
            })
        }
    }
}

/// Whether `actual` satisfies `required`
pub fn version_satisfies(required: &str, actual: &str) -> Result<bool> {
    let version = parse_version(actual)?;

    for alternative in required.split("||") {
        let req = VersionReq::parse(&to_semver_req(alternative)).map_err(|e| {
            Error::Config(format!(
                "failed to parse version constraint {:?}: {}",
                required, e
            ))
        })?;
        if req.matches(&version) {
            return Ok(true);
        }
    }
    Ok(false)
}

fn is_op_char(c: char) -> bool {
    matches!(c, '<' | '>' | '=' | '!' | '~' | '^')
}

fn is_wildcard(part: &str) -> bool {
    matches!(part, "x" | "X" | "*")
}

/// Rewrite one alternative into the comma separated form `VersionReq` reads
fn to_semver_req(alternative: &str) -> String {
    let mut words = Vec::new();
    let mut pending_op = String::new();
    for token in alternative.split([' ', '\t', ',']).filter(|t| !t.is_empty()) {
        if token.chars().all(is_op_char) {
            pending_op.push_str(token);
        } else {
            words.push(format!("{}{}", std::mem::take(&mut pending_op), token));
        }
    }
    if !pending_op.is_empty() {
        words.push(pending_op);
    }

    let mut comparators = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        if words.get(i + 1).map(String::as_str) == Some("-") && i + 2 < words.len() {
            comparators.push(comparator(&format!(">={}", words[i])));
            comparators.push(comparator(&format!("<={}", words[i + 2])));
            i += 3;
        } else {
            comparators.push(comparator(&words[i]));
            i += 1;
        }
    }
    comparators.join(", ")
}

fn comparator(word: &str) -> String {
    let split = word.find(|c| !is_op_char(c)).unwrap_or(word.len());
    let (op, version) = word.split_at(split);
    let version = version.trim_start_matches(['v', 'V']);

    if op.is_empty() {
        return if version.split('.').any(is_wildcard) {
            version.to_string()
        } else {
            format!("={}", version)
        };
    }

    // `~1.x` reads as `~1`
    let kept: Vec<&str> = version.split('.').take_while(|p| !is_wildcard(p)).collect();
    if kept.is_empty() {
        "*".to_string()
    } else {
        format!("{}{}", op, kept.join("."))
    }
}

/// Parse a loose version such as `v1.27.3+k3s1` or `1.24`
///
/// A leading `v` and any pre-release or build suffix are ignored; missing
/// minor or patch parts are zero.
fn parse_version(raw: &str) -> Result<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    let core = trimmed
        .split(['-', '+'])
        .next()
        .unwrap_or_default();

    let mut parts = [0u64; 3];
    for (i, part) in core.split('.').enumerate() {
        if i >= parts.len() {
            break;
        }
        parts[i] = part
            .parse()
            .map_err(|_| Error::Config(format!("failed to parse version {:?}", raw)))?;
    }

    Ok(Version::new(parts[0], parts[1], parts[2]))
}
