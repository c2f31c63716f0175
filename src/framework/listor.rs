//! Listor: enumerates every resource of one kind
//!
//! A listor binds a [`ConfListor`] to the connector registered for its
//! cloud. It serves pages to the pagination engine and parses each response
//! into a data list.

use super::constraint::ConstraintChecker;
use super::hash::{calc_hash, HashType};
use super::pagination::{get_entire_list, result_data_parse, NextCondition, Paginator};
use super::params::ParamMap;
use crate::auth::AuthProvider;
use crate::connector::{self, CallUsage, ConnectorRegistry};
use crate::definition::{CloudType, ConfListor, ListorId, PaginationType};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Per-call overrides of a listor's defaults
#[derive(Clone, Default)]
pub struct ListOptions {
    pub auth: Option<Arc<dyn AuthProvider>>,
}

impl ListOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }
}

pub struct Listor {
    conf: ConfListor,
    auth: Option<Arc<dyn AuthProvider>>,
    registry: Arc<ConnectorRegistry>,
}

impl Listor {
    /// Fill in the cloud's default pagination when none is configured
    pub fn new(
        conf: ConfListor,
        auth: Option<Arc<dyn AuthProvider>>,
        registry: Arc<ConnectorRegistry>,
    ) -> Self {
        let mut conf = conf;
        if conf.paginator.pagination_type == PaginationType::Unset {
            conf.paginator = match registry.get(&conf.cloud_type) {
                Ok(connector) => connector.default_paginator(),
                Err(_) => connector::default_paginator(&conf.cloud_type),
            };
        }

        Self {
            conf,
            auth,
            registry,
        }
    }

    pub fn id(&self) -> ListorId {
        self.conf.id
    }

    pub fn cloud_type(&self) -> &CloudType {
        &self.conf.cloud_type
    }

    /// Definition with defaults applied
    pub fn conf(&self) -> &ConfListor {
        &self.conf
    }

    pub fn set_auth_provider(&mut self, auth: Arc<dyn AuthProvider>) {
        self.auth = Some(auth);
    }

    /// Check the definition against its connector
    ///
    /// Clouds without a registered connector are only reported at call time.
    pub fn validate(&self) -> Result<()> {
        if self.conf.paginator.pagination_type == PaginationType::Unset {
            return Err(Error::Config(format!(
                "listor {}: no pagination configured and no default for {}",
                self.conf.id, self.conf.cloud_type
            )));
        }

        let Ok(connector) = self.registry.get(&self.conf.cloud_type) else {
            tracing::warn!(
                "Listor {}: no connector registered for {}",
                self.conf.id,
                self.conf.cloud_type
            );
            return Ok(());
        };

        connector
            .validate_cmd(&self.conf.list_cmd.call(&self.conf.cloud_type), CallUsage::List)
            .map_err(|e| Error::Config(format!("listor {}: {:#}", self.conf.id, e)))
    }

    fn resolve_auth(&self, opts: &ListOptions) -> Result<Arc<dyn AuthProvider>> {
        opts.auth
            .clone()
            .or_else(|| self.auth.clone())
            .ok_or_else(|| Error::Config(format!("listor {}: no auth provider", self.conf.id)))
    }

    /// List every resource, running the version constraint check first
    pub async fn list_data(&self, opts: &ListOptions) -> Result<Vec<Value>> {
        let auth = self.resolve_auth(opts)?;
        let connector = self.registry.get(&self.conf.cloud_type)?;

        match ConstraintChecker::new(&self.conf.constraint)
            .check(connector.as_ref(), auth.as_ref())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_configured() => {
                tracing::debug!("Bypass listor {}: {}", self.conf.id, e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        }

        let pages = ListorPages {
            listor: self,
            opts: ListOptions { auth: Some(auth) },
        };
        let data = get_entire_list(&pages, &self.conf.paginator).await?;

        tracing::debug!(
            "Listor {} ({}) listed {} items",
            self.conf.id,
            self.conf.rs_type,
            data.len()
        );
        Ok(data)
    }

    /// Fetch and parse one page
    ///
    /// Static `extra_param` entries are applied after the pagination
    /// parameters and win on key collision.
    pub async fn get_one_page(
        &self,
        params: ParamMap,
        opts: &ListOptions,
    ) -> Result<(Vec<Value>, NextCondition)> {
        let auth = self.resolve_auth(opts)?;
        let connector = self.registry.get(&self.conf.cloud_type)?;
        let cmd = self.conf.list_cmd.call(&self.conf.cloud_type);

        let mut params = params;
        for (key, value) in &cmd.extra_param {
            if params.insert(key.clone(), value.clone()).is_some() {
                tracing::debug!(
                    "Listor {}: extra param {} overrides pagination param",
                    self.conf.id,
                    key
                );
            }
        }

        let response = connector
            .list(auth.as_ref(), &cmd, params)
            .await
            .map_err(|e| Error::from_connector(self.conf.cloud_type.as_str(), e))?;

        let data_list_json_path = match self.conf.list_cmd.data_list_json_path.as_str() {
            "" => connector.default_data_path().ok_or_else(|| {
                Error::Config(format!(
                    "listor {}: data_list_json_path is not set",
                    self.conf.id
                ))
            })?,
            path => path,
        };

        result_data_parse(
            &response,
            &self.conf.paginator,
            data_list_json_path,
            self.conf.list_cmd.convert_object_to_list,
        )
    }

    /// Digest of the definition without its id, so that the same listor
    /// hashes the same under different numbering
    pub fn get_hash(&self, hash_type: HashType) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(&self.conf)?;
        if let Some(fields) = value.as_object_mut() {
            fields.remove("id");
        }
        calc_hash(hash_type, &value)
    }
}

struct ListorPages<'a> {
    listor: &'a Listor,
    opts: ListOptions,
}

#[async_trait]
impl Paginator for ListorPages<'_> {
    async fn get_one_page(&self, params: ParamMap) -> Result<(Vec<Value>, NextCondition)> {
        self.listor.get_one_page(params, &self.opts).await
    }
}
