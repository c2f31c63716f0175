//! Checker: extracts a property from every listed resource and judges it
//!
//! Extraction per raw document:
//! 1. id from `id_const`, else from `id_jsonpath` (must not be empty)
//! 2. optional name from `name_jsonpath`
//! 3. property from `extract_jsonpath`, else from a follow-up connector call
//!    addressed by the id
//! 4. optional id normalization to the part after the last `/`
//!
//! The validator schema describes the non-compliant shape: a property that
//! matches it is in risk.

use super::dataprovider::DataProvider;
use super::params::add_param_string;
use crate::auth::AuthProvider;
use crate::connector::{CallUsage, ConnectorRegistry, FetchTarget, IdBinding};
use crate::definition::{CloudType, ConfChecker, ListorId};
use crate::error::{Error, Result};
use crate::jsonpath;
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Identified property of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CheckerProp {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub prop: Value,
}

/// Finding for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidateResult {
    pub cloud_type: CloudType,
    pub id: String,
    pub name: String,
    pub in_risk: bool,
    /// Display value taken with `value_jsonpath`
    pub value: String,
}

/// Per-call overrides of a checker's providers
#[derive(Clone, Default)]
pub struct GetPropOptions {
    pub auth: Option<Arc<dyn AuthProvider>>,
    pub data: Option<Arc<dyn DataProvider>>,
}

impl GetPropOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_auth(mut self, auth: Arc<dyn AuthProvider>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_data(mut self, data: Arc<dyn DataProvider>) -> Self {
        self.data = Some(data);
        self
    }
}

/// Compiled schema, or the message of the compile failure
type CompiledValidator = std::result::Result<Arc<JSONSchema>, String>;

pub struct Checker {
    conf: ConfChecker,
    auth: Option<Arc<dyn AuthProvider>>,
    data: Option<Arc<dyn DataProvider>>,
    registry: Arc<ConnectorRegistry>,
    validator: OnceLock<CompiledValidator>,
}

impl Checker {
    pub fn new(
        conf: ConfChecker,
        auth: Option<Arc<dyn AuthProvider>>,
        data: Option<Arc<dyn DataProvider>>,
        registry: Arc<ConnectorRegistry>,
    ) -> Self {
        Self {
            conf,
            auth,
            data,
            registry,
            validator: OnceLock::new(),
        }
    }

    pub fn conf(&self) -> &ConfChecker {
        &self.conf
    }

    pub fn cloud_type(&self) -> &CloudType {
        &self.conf.cloud_type
    }

    pub fn listor_ids(&self) -> &[ListorId] {
        &self.conf.listor
    }

    pub fn set_auth_provider(&mut self, auth: Arc<dyn AuthProvider>) {
        self.auth = Some(auth);
    }

    pub fn set_data_provider(&mut self, data: Arc<dyn DataProvider>) {
        self.data = Some(data);
    }

    /// Check the extraction chain against the cloud's connector
    pub fn validate_definition(&self) -> Result<()> {
        let extract = &self.conf.extract_cmd;
        if extract.extract_path().is_some() {
            return Ok(());
        }

        let Ok(connector) = self.registry.get(&self.conf.cloud_type) else {
            tracing::warn!("Checker: no connector registered for {}", self.conf.cloud_type);
            return Ok(());
        };

        if connector.id_binding() == IdBinding::Parameter && extract.id_param_name.is_empty() {
            return Err(Error::Config(format!(
                "missing id_param_name for getting prop from {}",
                self.conf.cloud_type
            )));
        }

        connector
            .validate_cmd(&extract.call(&self.conf.cloud_type), CallUsage::Extract)
            .map_err(|e| Error::Config(format!("{:#}", e)))
    }

    /// Extract the property of every document of every referenced listor
    ///
    /// Listors the provider knows nothing about are skipped. Any failing
    /// document fails the whole call.
    pub async fn get_prop(&self, opts: &GetPropOptions) -> Result<Vec<CheckerProp>> {
        let auth = opts.auth.clone().or_else(|| self.auth.clone());
        let data = opts
            .data
            .clone()
            .or_else(|| self.data.clone())
            .ok_or_else(|| Error::Config("failed to get raw data, provider is not set".to_string()))?;

        let mut props = Vec::new();
        for &listor_id in &self.conf.listor {
            match data.cloud_type_by_listor_id(listor_id)? {
                None => continue,
                Some(cloud_type) if cloud_type != self.conf.cloud_type => {
                    return Err(Error::Integrity(format!(
                        "cloud type of data \"{}\" mismatch cloud type of checker \"{}\"",
                        cloud_type, self.conf.cloud_type
                    )));
                }
                Some(_) => {}
            }

            let Some(documents) = data.raw_data_by_listor_id(listor_id)? else {
                continue;
            };

            for document in documents.iter() {
                props.push(self.extract(auth.as_deref(), document).await?);
            }
        }

        Ok(props)
    }

    async fn extract(&self, auth: Option<&dyn AuthProvider>, document: &Value) -> Result<CheckerProp> {
        let extract = &self.conf.extract_cmd;

        let mut id = if !extract.id_const.is_empty() {
            extract.id_const.clone()
        } else if !extract.id_jsonpath.is_empty() {
            jsonpath::query_str(document, &extract.id_jsonpath)
                .map_err(|e| Error::Extraction(format!("failed to get id: {}", e)))?
        } else {
            String::new()
        };
        if id.is_empty() {
            return Err(Error::Extraction("invalid property, id is empty".to_string()));
        }

        let name = if extract.name_jsonpath.is_empty() {
            String::new()
        } else {
            jsonpath::query_str(document, &extract.name_jsonpath)
                .map_err(|e| Error::Extraction(format!("failed to get name: {}", e)))?
        };

        let prop = match extract.extract_path() {
            Some(path) => jsonpath::query(document, path)
                .map_err(|e| Error::Extraction(format!("failed to parse JsonPath: {}", e)))?
                .unwrap_or(Value::Null),
            None => self.fetch_prop(auth, &id).await?,
        };

        if extract.normalize_id {
            if let Some((_, last)) = id.rsplit_once('/') {
                id = last.to_string();
            }
            if id.is_empty() {
                return Err(Error::Extraction(
                    "invalid property, id is empty after normalization".to_string(),
                ));
            }
        }

        Ok(CheckerProp { id, name, prop })
    }

    /// Property from a follow-up connector call
    async fn fetch_prop(&self, auth: Option<&dyn AuthProvider>, id: &str) -> Result<Value> {
        let auth = auth.ok_or_else(|| Error::Config("checker has no auth provider".to_string()))?;
        let cloud_type = &self.conf.cloud_type;
        let connector = self.registry.get(cloud_type)?;
        let extract = &self.conf.extract_cmd;
        let cmd = extract.call(cloud_type);

        let target = match connector.id_binding() {
            IdBinding::Parameter => {
                if extract.id_param_name.is_empty() {
                    return Err(Error::Config(format!(
                        "missing id_param_name for getting prop from {}",
                        cloud_type
                    )));
                }
                let mut params = cmd.extra_param.clone();
                add_param_string(&mut params, &extract.id_param_name, id, extract.id_param_type)?;
                FetchTarget::Params(params)
            }
            IdBinding::Target => FetchTarget::Resource(id),
        };

        connector
            .fetch(auth, &cmd, target)
            .await
            .map_err(|e| Error::from_connector(cloud_type.as_str(), e))
    }

    fn compile_validator(&self) -> CompiledValidator {
        let mut schema = self.conf.validator.validate_schema.clone();
        for (key, value) in &self.conf.validator.dyn_validate_value {
            schema = schema.replace(&format!("%{}%", key), value);
        }

        let schema: Value = serde_json::from_str(&schema).map_err(|e| e.to_string())?;
        JSONSchema::compile(&schema)
            .map(Arc::new)
            .map_err(|e| e.to_string())
    }

    /// Judge every property against the validator schema
    ///
    /// A schema that fails to compile is reported once; later calls return
    /// no findings without retrying. Properties whose display value cannot
    /// be extracted are logged and skipped.
    pub fn validate(&self, data: &[CheckerProp]) -> Result<Vec<ValidateResult>> {
        let mut first_attempt = false;
        let validator = self.validator.get_or_init(|| {
            first_attempt = true;
            self.compile_validator()
        });

        let validator = match validator {
            Ok(validator) => validator,
            Err(message) if first_attempt => return Err(Error::Schema(message.clone())),
            Err(_) => return Ok(Vec::new()),
        };

        let value_jsonpath = &self.conf.validator.value_jsonpath;
        let mut results = Vec::with_capacity(data.len());
        for prop in data {
            let value = if value_jsonpath.is_empty() {
                String::new()
            } else {
                match jsonpath::query_str(&prop.prop, value_jsonpath) {
                    Ok(value) => value,
                    Err(e) => {
                        tracing::warn!("Failed to get actual value of {}: {}", prop.id, e);
                        continue;
                    }
                }
            };

            results.push(ValidateResult {
                cloud_type: self.conf.cloud_type.clone(),
                id: prop.id.clone(),
                name: prop.name.clone(),
                in_risk: validator.is_valid(&prop.prop),
                value,
            });
        }

        Ok(results)
    }
}
