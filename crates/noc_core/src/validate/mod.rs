use crate::domain::{IncomingIncident, NaturalKey};
use crate::error::AppError;

fn required_key_part(value: Option<&str>, name: &str) -> Result<String, AppError> {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => Ok(v.to_string()),
        Some(_) => Err(AppError::new(
            "VALIDATION_NATURAL_KEY_BLANK",
            format!("Natural key part {name} is blank"),
        )),
        None => Err(AppError::new(
            "VALIDATION_NATURAL_KEY_MISSING",
            format!("Natural key part {name} is missing"),
        )),
    }
}

/// Extract the natural key of an incoming snapshot.
///
/// Runs before any store access; a malformed key never reaches the gateway. Surrounding
/// whitespace is not part of the key.
pub fn validate_natural_key(record: &IncomingIncident) -> Result<NaturalKey, AppError> {
    let origin = required_key_part(record.origin.as_deref(), "origin")?;
    let external_id = required_key_part(record.external_id.as_deref(), "externalId")?;
    Ok(NaturalKey {
        origin,
        external_id,
    })
}
