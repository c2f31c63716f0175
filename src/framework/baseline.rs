//! Baseline: one benchmark recommendation made of ordered checkers
//!
//! Usage is three steps:
//! 1. (optional) [`Baseline::listor_ids`] to prepare raw data in advance
//! 2. [`Baseline::get_prop`] to extract properties, one list per checker
//! 3. [`Baseline::validate`] to judge them
//!
//! Property lists are positional: the n-th list always belongs to the n-th
//! checker of the definition.

use super::checker::{Checker, CheckerProp, GetPropOptions, ValidateResult};
use super::dataprovider::DataProvider;
use super::hash::{calc_hash, to_hex, HashType};
use crate::auth::AuthProvider;
use crate::connector::ConnectorRegistry;
use crate::definition::{ConfBaseline, ListorId};
use crate::error::{Error, Result};
use futures::future::join_all;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct Baseline {
    conf: ConfBaseline,
    checkers: Vec<Arc<Checker>>,
}

impl Baseline {
    pub fn new(
        conf: ConfBaseline,
        auth: Option<Arc<dyn AuthProvider>>,
        data: Option<Arc<dyn DataProvider>>,
        registry: Arc<ConnectorRegistry>,
    ) -> Self {
        let checkers = conf
            .checker
            .iter()
            .map(|c| {
                Arc::new(Checker::new(
                    c.clone(),
                    auth.clone(),
                    data.clone(),
                    Arc::clone(&registry),
                ))
            })
            .collect();

        Self { conf, checkers }
    }

    pub fn conf(&self) -> &ConfBaseline {
        &self.conf
    }

    pub fn checkers(&self) -> &[Arc<Checker>] {
        &self.checkers
    }

    pub fn tags(&self) -> &[String] {
        &self.conf.tag
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.conf.metadata
    }

    /// Listors referenced by any checker, first-seen order, no duplicates
    pub fn listor_ids(&self) -> Vec<ListorId> {
        let mut ids = Vec::new();
        for checker in &self.conf.checker {
            for id in &checker.listor {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
        }
        ids
    }

    /// Check every checker's extraction chain
    pub fn validate_definition(&self) -> Result<()> {
        for (i, checker) in self.checkers.iter().enumerate() {
            checker
                .validate_definition()
                .map_err(|e| Error::Config(format!("checker #{}: {}", i, e)))?;
        }
        Ok(())
    }

    /// Extract properties with every checker concurrently
    ///
    /// The result has exactly one slot per checker. A failing checker is
    /// logged and leaves its slot empty; siblings are not affected.
    pub async fn get_prop(&self, opts: &GetPropOptions) -> Vec<Vec<CheckerProp>> {
        let tasks = self.checkers.iter().map(|checker| {
            let checker = Arc::clone(checker);
            let opts = opts.clone();
            tokio::spawn(async move { checker.get_prop(&opts).await })
        });

        join_all(tasks)
            .await
            .into_iter()
            .enumerate()
            .map(|(i, joined)| match joined {
                Ok(Ok(props)) => props,
                Ok(Err(e)) => {
                    tracing::warn!("Checker #{} failed to get prop: {}", i, e);
                    Vec::new()
                }
                Err(e) => {
                    tracing::error!("Checker #{} task failed: {}", i, e);
                    Vec::new()
                }
            })
            .collect()
    }

    /// Judge positional property lists
    ///
    /// Fails when the number of lists differs from the number of checkers.
    /// A checker whose validation fails is logged and contributes nothing.
    pub fn validate(&self, data: &[Vec<CheckerProp>]) -> Result<Vec<ValidateResult>> {
        if data.len() != self.checkers.len() {
            return Err(Error::Integrity(format!(
                "size mismatch between given CheckerProp {} and Checker {}",
                data.len(),
                self.checkers.len()
            )));
        }

        let mut results = Vec::new();
        for (i, (checker, props)) in self.checkers.iter().zip(data).enumerate() {
            match checker.validate(props) {
                Ok(found) => results.extend(found),
                Err(e) => tracing::warn!("Checker #{} failed to validate: {}", i, e),
            }
        }
        Ok(results)
    }

    /// Digest binding the baseline to the listors it reads
    ///
    /// `listor_hashes[i][j]` is the hash of the j-th listor of the i-th
    /// checker. Listor ids are replaced by those hashes so that renumbered
    /// listors hash the same, and validators are left out so that the
    /// collecting side never needs the rules.
    pub fn get_hash(&self, hash_type: HashType, listor_hashes: &[Vec<Vec<u8>>]) -> Result<Vec<u8>> {
        if listor_hashes.len() != self.conf.checker.len() {
            return Err(Error::Integrity(format!(
                "size mismatch between Checker {} and given hash list {}",
                self.conf.checker.len(),
                listor_hashes.len()
            )));
        }
        for (i, (checker, hashes)) in self.conf.checker.iter().zip(listor_hashes).enumerate() {
            if checker.listor.len() != hashes.len() {
                return Err(Error::Integrity(format!(
                    "size mismatch between Checker and given hash list of #{}",
                    i
                )));
            }
        }

        let mut value = serde_json::to_value(&self.conf)?;
        let checkers = value
            .get_mut("checker")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| Error::Config("baseline has no checker list".to_string()))?;

        for (item, hashes) in checkers.iter_mut().zip(listor_hashes) {
            let fields = item
                .as_object_mut()
                .ok_or_else(|| Error::Config("checker is not an object".to_string()))?;
            fields.remove("listor");
            fields.remove("validator");
            fields.insert(
                "listor_hash".to_string(),
                Value::Array(hashes.iter().map(|h| Value::String(to_hex(h))).collect()),
            );
        }

        calc_hash(hash_type, &value)
    }
}
