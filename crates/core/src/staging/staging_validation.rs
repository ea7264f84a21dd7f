//! Structural validation of staging payloads.
//!
//! Runs before any store access. Referential checks need the store and live
//! in the command service.

use serde_json::{json, Map, Value};
use uuid::Uuid;

use super::staging_model::{NewManifest, NewMetric, NewStats};
use crate::constants::MAX_ID_LENGTH;
use crate::errors::ValidationError;

type Result<T> = std::result::Result<T, ValidationError>;

/// Checks an id against the accepted alphabet: ASCII alphanumerics plus
/// `-`, `_`, `.` and `:`, at most `MAX_ID_LENGTH` bytes.
pub fn validate_id(field: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(ValidationError::MissingField(field.to_string()));
    }
    let well_formed = id.len() <= MAX_ID_LENGTH
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'));
    if !well_formed {
        return Err(ValidationError::MalformedId(id.to_string()));
    }
    Ok(())
}

/// Returns the producer-assigned id, or a fresh time-ordered UUID when none
/// was given.
/// The flag is true when the producer supplied the id.
pub fn resolve_id(id: Option<&str>) -> Result<(String, bool)> {
    match id {
        Some(id) => {
            validate_id("id", id)?;
            Ok((id.to_string(), true))
        }
        None => Ok((Uuid::now_v7().to_string(), false)),
    }
}

/// Manifest body must be a non-empty object.
pub fn validate_manifest(payload: &NewManifest) -> Result<Value> {
    match &payload.body {
        Value::Null => Err(ValidationError::MissingField("body".to_string())),
        Value::Object(map) if map.is_empty() => Err(ValidationError::invalid_field(
            "body",
            "manifest body must not be empty",
        )),
        Value::Object(_) => Ok(payload.body.clone()),
        _ => Err(ValidationError::invalid_field(
            "body",
            "manifest body must be an object",
        )),
    }
}

/// Counters must be present and each one a non-negative number.
pub fn validate_stats(payload: &NewStats) -> Result<Value> {
    if payload.counters.is_empty() {
        return Err(ValidationError::MissingField("counters".to_string()));
    }
    let mut counters = Map::with_capacity(payload.counters.len());
    for (name, value) in &payload.counters {
        if name.trim().is_empty() {
            return Err(ValidationError::invalid_field(
                "counters",
                "counter names must not be blank",
            ));
        }
        match value.as_f64() {
            Some(n) if n >= 0.0 => {}
            Some(_) => {
                return Err(ValidationError::invalid_field(
                    format!("counters.{}", name),
                    "must not be negative",
                ))
            }
            None => {
                return Err(ValidationError::invalid_field(
                    format!("counters.{}", name),
                    "must be a number",
                ))
            }
        }
        counters.insert(name.clone(), value.clone());
    }
    Ok(Value::Object(counters))
}

/// A metric needs a name and a finite value.
pub fn validate_metric(payload: &NewMetric) -> Result<Value> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ValidationError::MissingField("name".to_string()));
    }
    if !payload.value.is_finite() {
        return Err(ValidationError::invalid_field(
            "value",
            "must be a finite number",
        ));
    }
    Ok(json!({ "name": name, "value": payload.value }))
}
