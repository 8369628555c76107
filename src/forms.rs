//! Turning raw request fields into typed values.
use crate::error::ApiError;
use crate::models::NewCafe;
use std::collections::HashMap;

/// Parse an HTML-form style boolean.
///
/// A missing or empty field is `false`; a ticked checkbox sends `on`.
pub fn parse_bool(field: &str, raw: Option<&str>) -> Result<bool, ApiError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" | "y" => Ok(true),
        "false" | "0" | "off" | "no" | "n" | "" => Ok(false),
        _ => Err(ApiError::Validation(format!(
            "Field `{field}` must be a boolean, got `{raw}`."
        ))),
    }
}

/// Submitted values are stored as sent; whitespace only decides blankness.
fn required(form: &HashMap<String, String>, field: &str) -> Result<String, ApiError> {
    match form.get(field) {
        Some(value) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(ApiError::Validation(format!(
            "Missing required field `{field}`."
        ))),
    }
}

/// Value of an optional field, `None` when absent or blank.
pub fn optional(form: &HashMap<String, String>, field: &str) -> Option<String> {
    form.get(field).filter(|v| !v.trim().is_empty()).cloned()
}

/// Build a `NewCafe` from the `/add` form fields.
pub fn new_cafe_from_form(form: &HashMap<String, String>) -> Result<NewCafe, ApiError> {
    let flag = |field: &str| parse_bool(field, form.get(field).map(String::as_str));
    Ok(NewCafe {
        name: required(form, "name")?,
        map_url: required(form, "map_url")?,
        img_url: required(form, "img_url")?,
        location: required(form, "loc")?,
        seats: required(form, "seats")?,
        has_sockets: flag("sockets")?,
        has_toilet: flag("toilet")?,
        has_wifi: flag("wifi")?,
        can_take_calls: flag("calls")?,
        coffee_price: optional(form, "coffee_price"),
    })
}

/// Parse an `:id` path segment; a non-numeric id can never match a row.
pub fn parse_id(raw: Option<&String>) -> Option<i64> {
    raw.and_then(|id| id.parse().ok())
}
