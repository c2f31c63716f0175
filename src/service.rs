//! Benchmark engine
//!
//! Owns a loaded benchmark file and serves it two ways:
//!
//! - [`Engine::scan`] runs everything in one process: list, extract, judge.
//! - The split operations let a collecting service and a judging service
//!   cooperate without sharing credentials or rules. The collector answers
//!   [`Engine::list_data`] and [`Engine::baseline_get_prop`]; the judge
//!   answers [`Engine::baseline_validate`]. Both sides prove they run the
//!   same definitions by comparing listor and baseline hashes.
//!
//! Baseline ids are 1-based positions in the file. Listor ids are the ids
//! declared in the file.

use crate::auth::AuthProvider;
use crate::cache::InstanceCache;
use crate::config::ConfFile;
use crate::connector::ConnectorRegistry;
use crate::definition::{CloudType, ListorId};
use crate::error::{Error, Result};
use crate::framework::{
    Baseline, CheckerProp, GetPropOptions, HashType, ItemHash, ListOptions, Listor, ListorData,
    ListorDataProvider, MapDataProvider, ValidateResult,
};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Extracted properties of one baseline, as handed to the judging side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineData {
    pub id: i64,
    pub baseline_hash: ItemHash,
    /// One list per checker, in checker order
    pub checker_prop: Vec<Vec<CheckerProp>>,
}

/// Finding labelled for output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub cloud_type: CloudType,
    pub resource_id: String,
    pub resource_name: String,
    pub resource_in_risk: bool,
    pub actual_value: String,
    /// Requested baseline metadata; missing keys map to ""
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineReport {
    pub baseline_id: i64,
    pub findings: Vec<Finding>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Listors that returned at least one resource
    pub listed: usize,
    pub baselines: Vec<BaselineReport>,
}

pub struct Engine {
    conf: ConfFile,
    registry: Arc<ConnectorRegistry>,
    listors: InstanceCache<ListorId, Listor>,
    baselines: InstanceCache<usize, Baseline>,
    listor_hashes: InstanceCache<ListorId, Vec<u8>>,
    baseline_hashes: InstanceCache<usize, Vec<u8>>,
}

impl Engine {
    /// Load definitions and check every call template against its connector
    pub fn new(conf: ConfFile, registry: Arc<ConnectorRegistry>) -> Result<Self> {
        let engine = Self {
            conf,
            registry,
            listors: InstanceCache::new(),
            baselines: InstanceCache::new(),
            listor_hashes: InstanceCache::new(),
            baseline_hashes: InstanceCache::new(),
        };

        for id in engine.listor_ids(None) {
            engine.listor(id)?.validate()?;
        }
        for id in 1..=engine.conf.baseline.len() as i64 {
            engine.baseline(id)?.validate_definition().map_err(|e| {
                tracing::error!("Baseline {} is invalid: {}", id, e);
                e
            })?;
        }

        tracing::info!(
            "Loaded {} listors and {} baselines",
            engine.listors.len(),
            engine.baselines.len()
        );
        Ok(engine)
    }

    pub fn conf(&self) -> &ConfFile {
        &self.conf
    }

    /// Declared listor ids, optionally of one cloud, without duplicates
    pub fn listor_ids(&self, cloud_type: Option<&CloudType>) -> Vec<ListorId> {
        let mut ids = Vec::new();
        for listor in &self.conf.listor {
            if cloud_type.is_some_and(|c| *c != listor.cloud_type) {
                continue;
            }
            if !ids.contains(&listor.id) {
                ids.push(listor.id);
            }
        }
        ids
    }

    /// Ids of baselines carrying any of `tags`, or every tagged baseline
    /// when `tags` is empty
    pub fn baseline_ids(&self, tags: &[String]) -> Vec<i64> {
        self.conf
            .baseline
            .iter()
            .enumerate()
            .filter(|(_, b)| b.tag.iter().any(|t| tags.is_empty() || tags.contains(t)))
            .map(|(i, _)| i as i64 + 1)
            .collect()
    }

    pub fn listor(&self, id: ListorId) -> Result<Arc<Listor>> {
        self.listors.get_or_try_insert_with(id, || {
            let conf = self
                .conf
                .find_listor(id)
                .ok_or_else(|| Error::NotFound(format!("listor not found with id: {}", id)))?;
            Ok(Listor::new(conf.clone(), None, Arc::clone(&self.registry)))
        })
    }

    fn baseline_index(&self, id: i64) -> Result<usize> {
        if id <= 0 || id > self.conf.baseline.len() as i64 {
            return Err(Error::NotFound(format!("baseline not found with id: {}", id)));
        }
        Ok((id - 1) as usize)
    }

    pub fn baseline(&self, id: i64) -> Result<Arc<Baseline>> {
        let index = self.baseline_index(id)?;
        Ok(self.baselines.get_or_insert_with(index, || {
            Baseline::new(
                self.conf.baseline[index].clone(),
                None,
                None,
                Arc::clone(&self.registry),
            )
        }))
    }

    fn listor_digest(&self, id: ListorId) -> Result<Arc<Vec<u8>>> {
        self.listor_hashes
            .get_or_try_insert_with(id, || self.listor(id)?.get_hash(HashType::Sha256))
    }

    fn baseline_digest(&self, id: i64) -> Result<Arc<Vec<u8>>> {
        let index = self.baseline_index(id)?;
        self.baseline_hashes.get_or_try_insert_with(index, || {
            let listor_hashes = self.conf.baseline[index]
                .checker
                .iter()
                .map(|checker| {
                    checker
                        .listor
                        .iter()
                        .map(|&listor_id| self.listor_digest(listor_id).map(|h| h.to_vec()))
                        .collect::<Result<Vec<_>>>()
                })
                .collect::<Result<Vec<_>>>()?;

            self.baseline(id)?.get_hash(HashType::Sha256, &listor_hashes)
        })
    }

    pub fn listor_hash(&self, id: ListorId) -> Result<ItemHash> {
        Ok(ItemHash::from_digest(&self.listor_digest(id)?))
    }

    pub fn baseline_hash(&self, id: i64) -> Result<ItemHash> {
        Ok(ItemHash::from_digest(&self.baseline_digest(id)?))
    }

    /// List one listor's resources, tagged with its hash
    pub async fn list_data(&self, id: ListorId, auth: Arc<dyn AuthProvider>) -> Result<ListorData> {
        let listor = self.listor(id)?;
        let listor_hash = self.listor_hash(id)?;
        let data = listor
            .list_data(&ListOptions::new().with_auth(auth))
            .await?;

        Ok(ListorData {
            listor_id: id,
            listor_hash,
            cloud_type: listor.cloud_type().clone(),
            data,
        })
    }

    /// Extract a baseline's properties from supplied listor data
    ///
    /// Every listor the baseline references must be supplied with the
    /// expected cloud type and hash, otherwise nothing is extracted.
    pub async fn baseline_get_prop(
        &self,
        id: i64,
        data: Vec<ListorData>,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<BaselineData> {
        let baseline = self.baseline(id)?;
        let provider = ListorDataProvider::new(data);

        for checker in &baseline.conf().checker {
            for &listor_id in &checker.listor {
                provider.listor_hash(listor_id)?;
                let expected = self.listor_hash(listor_id)?;
                provider.verify(listor_id, &checker.cloud_type, &expected)?;
            }
        }

        let opts = GetPropOptions::new()
            .with_auth(auth)
            .with_data(Arc::new(provider));
        let checker_prop = baseline.get_prop(&opts).await;
        if checker_prop.len() != baseline.checkers().len() {
            return Err(Error::Integrity(
                "size mismatch between CheckerProp and Checker".to_string(),
            ));
        }

        Ok(BaselineData {
            id,
            baseline_hash: self.baseline_hash(id)?,
            checker_prop,
        })
    }

    /// Judge properties extracted by [`Engine::baseline_get_prop`]
    pub fn baseline_validate(
        &self,
        id: i64,
        data: &BaselineData,
        risk_only: bool,
        metadata_keys: &[String],
    ) -> Result<Vec<Finding>> {
        let baseline = self.baseline(id)?;
        if data.id != id {
            return Err(Error::Integrity(format!(
                "Baseline id mismatch between {} and {}",
                id, data.id
            )));
        }
        if data.baseline_hash != self.baseline_hash(id)? {
            return Err(Error::Integrity(format!("baseline hash mismatch for id {}", id)));
        }
        if data.checker_prop.len() != baseline.checkers().len() {
            return Err(Error::Integrity(format!(
                "size mismatch between given CheckerProp {} and Checker {}",
                data.checker_prop.len(),
                baseline.checkers().len()
            )));
        }

        let results = baseline.validate(&data.checker_prop)?;
        Ok(label(&baseline, results, risk_only, metadata_keys))
    }

    /// Run the selected baselines end to end in this process
    ///
    /// Every referenced listor is listed once, concurrently. Listors that
    /// fail or return nothing are left out of the data provider, so their
    /// checkers simply find nothing.
    pub async fn scan(&self, tags: &[String], auth: Arc<dyn AuthProvider>) -> Result<ScanReport> {
        let started_at = Utc::now();

        let ids = self.baseline_ids(tags);
        let baselines = ids
            .iter()
            .map(|&id| self.baseline(id))
            .collect::<Result<Vec<_>>>()?;

        let mut listor_ids = Vec::new();
        for baseline in &baselines {
            for id in baseline.listor_ids() {
                if !listor_ids.contains(&id) {
                    listor_ids.push(id);
                }
            }
        }
        tracing::info!(
            "Scanning {} baselines over {} listors",
            baselines.len(),
            listor_ids.len()
        );

        let data = Arc::new(MapDataProvider::new());
        let list_opts = ListOptions::new().with_auth(Arc::clone(&auth));
        join_all(listor_ids.iter().map(|&id| {
            let data = Arc::clone(&data);
            let list_opts = &list_opts;
            async move {
                let listor = match self.listor(id) {
                    Ok(listor) => listor,
                    Err(e) => {
                        tracing::warn!("Failed to find listor with id of {}: {}", id, e);
                        return;
                    }
                };
                match listor.list_data(list_opts).await {
                    Ok(items) if !items.is_empty() => {
                        data.insert(id, listor.cloud_type().clone(), items)
                    }
                    Ok(_) => tracing::debug!("Listor {} returned no resources", id),
                    Err(e) => tracing::warn!("Listor {} failed: {}", id, e),
                }
            }
        }))
        .await;

        let listed = data.len();
        let prop_opts = GetPropOptions::new().with_auth(auth).with_data(data);
        let props = join_all(baselines.iter().map(|b| b.get_prop(&prop_opts))).await;

        let risk_only = self.conf.option.output_risk_only;
        let metadata_keys = &self.conf.option.output_metadata;
        let mut reports = Vec::new();
        for ((id, baseline), props) in ids.iter().zip(&baselines).zip(props) {
            match baseline.validate(&props) {
                Ok(results) if !results.is_empty() => reports.push(BaselineReport {
                    baseline_id: *id,
                    findings: label(baseline, results, risk_only, metadata_keys),
                }),
                Ok(_) => {}
                Err(e) => tracing::warn!("Baseline {} failed to validate: {}", id, e),
            }
        }

        Ok(ScanReport {
            started_at,
            finished_at: Utc::now(),
            listed,
            baselines: reports,
        })
    }
}

fn label(
    baseline: &Baseline,
    results: Vec<ValidateResult>,
    risk_only: bool,
    metadata_keys: &[String],
) -> Vec<Finding> {
    results
        .into_iter()
        .filter(|r| r.in_risk || !risk_only)
        .map(|r| Finding {
            cloud_type: r.cloud_type,
            resource_id: r.id,
            resource_name: r.name,
            resource_in_risk: r.in_risk,
            actual_value: r.value,
            metadata: metadata_keys
                .iter()
                .map(|key| {
                    let value = baseline.metadata().get(key).cloned().unwrap_or_default();
                    (key.clone(), value)
                })
                .collect(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{Profile, StaticAuthProvider};
    use crate::connector::mock::MockConnector;
    use serde_json::json;

    const CONF_YAML: &str = r#"
option:
  output_metadata: [title, missing]
listor:
  - id: 1
    cloud_type: k8s
    rs_type: Pods
    list_cmd:
      k8s:
        version: v1
        resource: pods
  - id: 2
    cloud_type: azure
    rs_type: Storage accounts
    list_cmd:
      azure:
        provider: Storage
        rs_type: storageAccounts
        version: "2023-01-01"
  - id: 1
    cloud_type: k8s
    rs_type: Duplicate
baseline:
  - tag: [cis, pods]
    metadata:
      title: Pods must not run privileged
    checker:
      - cloud_type: k8s
        listor: [1]
        extract_cmd:
          id_jsonpath: $.metadata.uid
          name_jsonpath: $.metadata.name
          extract_jsonpath:
            path: $.spec.privileged
        validator:
          validate_schema: '{"const": %expected%}'
          dyn_validate_value:
            expected: "true"
          value_jsonpath: $
  - tag: [azure]
    checker:
      - cloud_type: azure
        listor: [2]
        extract_cmd:
          id_jsonpath: $.id
          extract_jsonpath:
            path: $.properties
  - checker: []
"#;

    fn pods() -> serde_json::Value {
        json!({"items": [
            {"metadata": {"uid": "u-1", "name": "web"}, "spec": {"privileged": true}},
            {"metadata": {"uid": "u-2", "name": "db"}, "spec": {"privileged": false}}
        ]})
    }

    fn engine() -> Engine {
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("k8s").with_list(|_| Ok(pods()))));
        registry.register(Arc::new(MockConnector::new("azure")));
        let conf = ConfFile::from_yaml_str(CONF_YAML).unwrap();
        Engine::new(conf, Arc::new(registry)).unwrap()
    }

    fn k8s_auth() -> Arc<dyn AuthProvider> {
        Arc::new(StaticAuthProvider::new().with_profile("k8s", Profile::default()))
    }

    #[test]
    fn test_ids() {
        let engine = engine();
        assert_eq!(engine.listor_ids(None), vec![1, 2]);
        assert_eq!(engine.listor_ids(Some(&CloudType::from("azure"))), vec![2]);

        assert_eq!(engine.baseline_ids(&[]), vec![1, 2]);
        assert_eq!(engine.baseline_ids(&["azure".to_string()]), vec![2]);
        assert!(engine.baseline_ids(&["nope".to_string()]).is_empty());
    }

    #[test]
    fn test_lookup_bounds() {
        let engine = engine();
        assert!(matches!(engine.baseline(0), Err(Error::NotFound(_))));
        assert!(matches!(engine.baseline(4), Err(Error::NotFound(_))));
        assert!(engine.baseline(3).is_ok());
        assert!(matches!(engine.listor(9), Err(Error::NotFound(_))));
        assert_eq!(engine.listor(1).unwrap().conf().rs_type, "Pods");
    }

    #[test]
    fn test_hashes_are_stable_hex() {
        let engine = engine();
        let hash = engine.baseline_hash(1).unwrap();
        assert_eq!(hash.sha256.len(), 64);
        assert_eq!(hash, engine.baseline_hash(1).unwrap());
        assert_ne!(hash, engine.baseline_hash(2).unwrap());
        assert_ne!(engine.listor_hash(1).unwrap(), engine.listor_hash(2).unwrap());
    }

    #[test]
    fn test_invalid_call_template_fails_at_load() {
        let yaml = CONF_YAML.replace("resource: pods", "resource: pods\n        action: Invalid");
        let mut registry = ConnectorRegistry::new();
        registry.register(Arc::new(MockConnector::new("k8s")));
        let conf = ConfFile::from_yaml_str(&yaml).unwrap();
        assert!(matches!(
            Engine::new(conf, Arc::new(registry)),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_split_flow() {
        let collector = engine();
        let judge = engine();

        let listed = collector.list_data(1, k8s_auth()).await.unwrap();
        assert_eq!(listed.data.len(), 2);
        assert_eq!(listed.listor_hash, judge.listor_hash(1).unwrap());

        let props = collector
            .baseline_get_prop(1, vec![listed], k8s_auth())
            .await
            .unwrap();
        assert_eq!(props.checker_prop.len(), 1);
        assert_eq!(props.checker_prop[0][0].id, "u-1");

        let keys = vec!["title".to_string(), "missing".to_string()];
        let findings = judge.baseline_validate(1, &props, false, &keys).unwrap();
        assert_eq!(findings.len(), 2);
        assert!(findings[0].resource_in_risk);
        assert_eq!(findings[0].resource_name, "web");
        assert_eq!(findings[0].actual_value, "true");
        assert_eq!(findings[0].metadata["title"], "Pods must not run privileged");
        assert_eq!(findings[0].metadata["missing"], "");

        let risky = judge.baseline_validate(1, &props, true, &[]).unwrap();
        assert_eq!(risky.len(), 1);
        assert_eq!(risky[0].resource_id, "u-1");
    }

    #[tokio::test]
    async fn test_get_prop_rejects_bad_payloads() {
        let engine = engine();
        let listed = engine.list_data(1, k8s_auth()).await.unwrap();

        let missing = engine.baseline_get_prop(1, vec![], k8s_auth()).await;
        assert!(matches!(missing, Err(Error::Integrity(_))));

        let mut tampered = listed.clone();
        tampered.listor_hash.sha256 = "00".repeat(32);
        let err = engine
            .baseline_get_prop(1, vec![tampered], k8s_auth())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("listor hash mismatch"));

        let mut wrong_cloud = listed;
        wrong_cloud.cloud_type = CloudType::from("azure");
        let err = engine
            .baseline_get_prop(1, vec![wrong_cloud], k8s_auth())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cloud type mismatch"));
    }

    #[tokio::test]
    async fn test_validate_rejects_bad_payloads() {
        let engine = engine();
        let listed = engine.list_data(1, k8s_auth()).await.unwrap();
        let props = engine
            .baseline_get_prop(1, vec![listed], k8s_auth())
            .await
            .unwrap();

        let err = engine.baseline_validate(2, &props, false, &[]).unwrap_err();
        assert!(err.to_string().contains("Baseline id mismatch between 2 and 1"));

        let mut tampered = props.clone();
        tampered.baseline_hash = ItemHash::default();
        assert!(matches!(
            engine.baseline_validate(1, &tampered, false, &[]),
            Err(Error::Integrity(_))
        ));

        let mut short = props;
        short.checker_prop.clear();
        let err = engine.baseline_validate(1, &short, false, &[]).unwrap_err();
        assert!(err
            .to_string()
            .contains("size mismatch between given CheckerProp 0 and Checker 1"));
    }

    #[tokio::test]
    async fn test_scan_skips_unconfigured_clouds() {
        let engine = engine();
        let report = engine.scan(&[], k8s_auth()).await.unwrap();

        assert_eq!(report.listed, 1);
        assert_eq!(report.baselines.len(), 1);
        assert_eq!(report.baselines[0].baseline_id, 1);
        assert_eq!(report.baselines[0].findings.len(), 2);
        assert!(report.finished_at >= report.started_at);
    }
}
