//! Input validation against JSON schemas
//!
//! Supports the subset the service's function cards use: `required`,
//! per-property `type`, `minimum`/`maximum` and string `enum`.

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Validation failed: {0}")]
pub struct ValidationError(pub String);

pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validate input against a JSON schema
pub fn validate_input(input: &Value, schema: &Value) -> Result<()> {
    if !input.is_object() {
        return Err(ValidationError("Input must be a JSON object".to_string()));
    }

    // Get required fields from schema
    if let Some(required) = schema.get("required").and_then(|r| r.as_array()) {
        for field_name in required {
            let field_str = field_name
                .as_str()
                .ok_or_else(|| ValidationError("Invalid schema: required field not a string".to_string()))?;

            if input.get(field_str).map_or(true, Value::is_null) {
                return Err(ValidationError(format!("Missing required field: {}", field_str)));
            }
        }
    }

    // Validate property types and ranges
    if let (Some(properties), Some(input_obj)) = (
        schema.get("properties").and_then(|p| p.as_object()),
        input.as_object(),
    ) {
        for (key, value) in input_obj {
            if value.is_null() {
                continue;
            }
            if let Some(prop_schema) = properties.get(key) {
                validate_type(key, value, prop_schema)?;
                validate_range(key, value, prop_schema)?;
                validate_enum(key, value, prop_schema)?;
            }
        }
    }

    Ok(())
}

/// Validate that a value matches the expected type
fn validate_type(key: &str, value: &Value, schema: &Value) -> Result<()> {
    if let Some(expected_type) = schema.get("type").and_then(|t| t.as_str()) {
        let valid = match expected_type {
            "string" => value.is_string(),
            "integer" => value.is_u64() || value.is_i64(),
            "number" => value.is_number(),
            "boolean" => value.is_boolean(),
            "array" => value.is_array(),
            "object" => value.is_object(),
            "null" => value.is_null(),
            _ => true, // Unknown types pass validation
        };

        if !valid {
            return Err(ValidationError(format!(
                "Type mismatch for {}: expected {}, got {}",
                key, expected_type, value
            )));
        }
    }

    Ok(())
}

fn validate_range(key: &str, value: &Value, schema: &Value) -> Result<()> {
    let Some(n) = value.as_f64() else { return Ok(()) };

    if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
        if n < min {
            return Err(ValidationError(format!("{} must be >= {}, got {}", key, min, value)));
        }
    }
    if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
        if n > max {
            return Err(ValidationError(format!("{} must be <= {}, got {}", key, max, value)));
        }
    }
    Ok(())
}

fn validate_enum(key: &str, value: &Value, schema: &Value) -> Result<()> {
    let (Some(allowed), Some(s)) = (schema.get("enum").and_then(Value::as_array), value.as_str()) else {
        return Ok(());
    };
    if allowed.iter().any(|a| a.as_str().is_some_and(|a| a.eq_ignore_ascii_case(s))) {
        Ok(())
    } else {
        Err(ValidationError(format!("{} must be one of {}, got {:?}", key, Value::Array(allowed.clone()), s)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_validate_required_fields() {
        let schema = json!({
            "type": "object",
            "required": ["source_path", "file_name"]
        });

        let valid_input = json!({
            "source_path": "/tmp/upload.bin",
            "file_name": "clip.mp4"
        });

        assert!(validate_input(&valid_input, &schema).is_ok());

        let invalid_input = json!({
            "source_path": "/tmp/upload.bin"
        });

        assert!(validate_input(&invalid_input, &schema).is_err());
    }

    #[test]
    fn test_validate_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "quality": { "type": "integer" },
                "no_sound": { "type": "boolean" }
            }
        });

        assert!(validate_input(&json!({"quality": 92, "no_sound": true}), &schema).is_ok());
        assert!(validate_input(&json!({"quality": "ninety-two"}), &schema).is_err());
        assert!(validate_input(&json!({"quality": 9.5}), &schema).is_err());
    }

    #[test]
    fn test_validate_ranges() {
        let schema = json!({
            "properties": {
                "crf": { "type": "integer", "minimum": 0, "maximum": 51 },
                "width": { "type": "integer", "minimum": 0 }
            }
        });

        assert!(validate_input(&json!({"crf": 51}), &schema).is_ok());
        assert!(validate_input(&json!({"crf": 52}), &schema).is_err());
        assert!(validate_input(&json!({"width": -1}), &schema).is_err());
    }

    #[test]
    fn test_validate_enum_case_insensitive() {
        let schema = json!({
            "properties": {
                "preset": { "type": "string", "enum": ["WEBM", "MP4"] }
            }
        });

        assert!(validate_input(&json!({"preset": "mp4"}), &schema).is_ok());
        assert!(validate_input(&json!({"preset": "AVI"}), &schema).is_err());
    }

    #[test]
    fn test_null_optional_is_ignored() {
        let schema = json!({
            "properties": { "width": { "type": "integer" } }
        });
        assert!(validate_input(&json!({"width": null}), &schema).is_ok());
    }
}
