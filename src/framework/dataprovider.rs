//! Sources of checker input
//!
//! A checker never lists resources itself; it asks a [`DataProvider`] for
//! the raw documents of each listor it references. Providers are shared by
//! every checker of every baseline in a run and must be safe under
//! concurrent callers.

use super::hash::to_hex;
use crate::definition::{CloudType, ListorId};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

pub trait DataProvider: Send + Sync {
    /// Raw documents of a listor, `None` when this deployment has none
    fn raw_data_by_listor_id(&self, listor_id: ListorId) -> Result<Option<Arc<Vec<Value>>>>;

    /// Cloud type of a listor's data, `None` when this deployment has none
    fn cloud_type_by_listor_id(&self, listor_id: ListorId) -> Result<Option<CloudType>>;
}

/// Provider filled once by an orchestrator before fan-out
#[derive(Default)]
pub struct MapDataProvider {
    entries: RwLock<HashMap<ListorId, (CloudType, Arc<Vec<Value>>)>>,
}

impl MapDataProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, listor_id: ListorId, cloud_type: CloudType, data: Vec<Value>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(listor_id, (cloud_type, Arc::new(data)));
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataProvider for MapDataProvider {
    fn raw_data_by_listor_id(&self, listor_id: ListorId) -> Result<Option<Arc<Vec<Value>>>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&listor_id)
            .map(|(_, data)| Arc::clone(data)))
    }

    fn cloud_type_by_listor_id(&self, listor_id: ListorId) -> Result<Option<CloudType>> {
        Ok(self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&listor_id)
            .map(|(cloud_type, _)| cloud_type.clone()))
    }
}

/// Digest as transported between services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemHash {
    /// Lowercase hex SHA-256
    pub sha256: String,
}

impl ItemHash {
    pub fn from_digest(digest: &[u8]) -> Self {
        Self {
            sha256: to_hex(digest),
        }
    }
}

/// Listed documents of one listor, tagged with the listor's hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListorData {
    pub listor_id: ListorId,
    pub listor_hash: ItemHash,
    pub cloud_type: CloudType,
    pub data: Vec<Value>,
}

/// Provider over payloads supplied by a remote caller
///
/// Every id a checker asks for must have been supplied; the caller is
/// expected to have listed all of them. Use [`ListorDataProvider::verify`]
/// before trusting the data.
pub struct ListorDataProvider {
    entries: HashMap<ListorId, (CloudType, ItemHash, Arc<Vec<Value>>)>,
}

impl ListorDataProvider {
    /// On duplicate ids the first payload wins
    pub fn new(payloads: Vec<ListorData>) -> Self {
        let mut entries = HashMap::new();
        for payload in payloads {
            if entries.contains_key(&payload.listor_id) {
                tracing::warn!("Duplicate data supplied for listor {}", payload.listor_id);
                continue;
            }
            entries.insert(
                payload.listor_id,
                (payload.cloud_type, payload.listor_hash, Arc::new(payload.data)),
            );
        }
        Self { entries }
    }

    fn entry(&self, listor_id: ListorId) -> Result<&(CloudType, ItemHash, Arc<Vec<Value>>)> {
        self.entries.get(&listor_id).ok_or_else(|| {
            Error::Integrity(format!("no data provided with id of: {}", listor_id))
        })
    }

    pub fn listor_hash(&self, listor_id: ListorId) -> Result<&ItemHash> {
        self.entry(listor_id).map(|(_, hash, _)| hash)
    }

    /// Check a payload against the locally computed cloud type and hash
    pub fn verify(
        &self,
        listor_id: ListorId,
        cloud_type: &CloudType,
        expected_hash: &ItemHash,
    ) -> Result<()> {
        let (provided_cloud, provided_hash, _) = self.entry(listor_id)?;
        if provided_cloud != cloud_type {
            return Err(Error::Integrity(format!(
                "cloud type mismatch between {} and {}",
                provided_cloud, cloud_type
            )));
        }
        if provided_hash.sha256 != expected_hash.sha256 {
            return Err(Error::Integrity(format!(
                "listor hash mismatch for id {}",
                listor_id
            )));
        }
        Ok(())
    }
}

impl DataProvider for ListorDataProvider {
    fn raw_data_by_listor_id(&self, listor_id: ListorId) -> Result<Option<Arc<Vec<Value>>>> {
        self.entry(listor_id)
            .map(|(_, _, data)| Some(Arc::clone(data)))
    }

    fn cloud_type_by_listor_id(&self, listor_id: ListorId) -> Result<Option<CloudType>> {
        self.entry(listor_id)
            .map(|(cloud_type, _, _)| Some(cloud_type.clone()))
    }
}
