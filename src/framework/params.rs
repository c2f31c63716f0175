//! Typed insertion of pagination values and extracted ids into request
//! parameters

use crate::definition::ParamType;
use crate::error::{Error, Result};
use serde_json::{Map, Value};

/// Request parameters handed to a connector call
pub type ParamMap = Map<String, Value>;

/// Insert an integer as `param_type`
pub fn add_param_int(
    params: &mut ParamMap,
    key: &str,
    value: i64,
    param_type: Option<ParamType>,
) -> Result<()> {
    let value = match param_type {
        Some(ParamType::Int) => Value::from(value),
        Some(ParamType::String) => Value::String(value.to_string()),
        Some(ParamType::StringList) => Value::Array(vec![Value::String(value.to_string())]),
        None => return Err(missing_type(key)),
    };
    params.insert(key.to_string(), value);
    Ok(())
}

/// Insert a string as `param_type`; ints must parse
pub fn add_param_string(
    params: &mut ParamMap,
    key: &str,
    value: &str,
    param_type: Option<ParamType>,
) -> Result<()> {
    let value = match param_type {
        Some(ParamType::Int) => {
            let parsed: i64 = value.parse().map_err(|e| {
                Error::Config(format!(
                    "failed to convert {:?} to int for param {}: {}",
                    value, key, e
                ))
            })?;
            Value::from(parsed)
        }
        Some(ParamType::String) => Value::String(value.to_string()),
        Some(ParamType::StringList) => Value::Array(vec![Value::String(value.to_string())]),
        None => return Err(missing_type(key)),
    };
    params.insert(key.to_string(), value);
    Ok(())
}

fn missing_type(key: &str) -> Error {
    Error::Config(format!("invalid param type for {}: not set", key))
}
