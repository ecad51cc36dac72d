// # Tool Argument Validation
//
// Two gates in front of every tool body: `ParameterValidator` checks
// arguments against the tool's JSON-schema-shaped parameter specs, and
// `SecurityValidator` screens the raw argument structure for hostile
// content before any schema logic runs.

use std::collections::HashSet;
use std::net::{Ipv4Addr, Ipv6Addr};

use chrono::{DateTime, NaiveDate};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{FactError, Result};

lazy_static! {
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").unwrap();
    static ref URI_PATTERN: Regex = Regex::new(r"^https?://.+").unwrap();
    static ref ARGUMENT_KEY_PATTERN: Regex = Regex::new(r"^[A-Za-z0-9_-]+$").unwrap();
    static ref TOOL_CALL_NAME_PATTERN: Regex = Regex::new(r"^[A-Za-z][A-Za-z0-9_.-]*$").unwrap();

    /// Hostile content shapes scanned over every string argument.
    static ref DANGEROUS_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (
            Regex::new(r"(?i)\b(union\s+select|drop\s+table|delete\s+from|insert\s+into|update\s+set)\b")
                .unwrap(),
            "SQL injection keyword",
        ),
        (Regex::new(r"[;&|`$(){}\[\]\\]").unwrap(), "shell metacharacter"),
        (Regex::new(r"\.\./|\.\.\\").unwrap(), "path traversal"),
        (
            Regex::new(r"(?i)<script\b|javascript:|data:text/html").unwrap(),
            "script injection",
        ),
    ];
}

// ============================================================================
// Parameter validation
// ============================================================================

/// Validates tool arguments against the registered parameter schema.
///
/// Produces the full list of violations in one pass rather than stopping
/// at the first.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParameterValidator;

impl ParameterValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate(&self, arguments: &Value, schema: &Map<String, Value>) -> Result<()> {
        let Some(arguments) = arguments.as_object() else {
            return Err(FactError::Validation(
                "tool arguments must be an object".to_string(),
            ));
        };

        let mut errors = Vec::new();

        for (name, spec) in schema {
            let required = spec
                .as_object()
                .map(|s| {
                    !s.contains_key("default")
                        && s.get("required").and_then(Value::as_bool).unwrap_or(true)
                })
                .unwrap_or(false);
            if required && !arguments.contains_key(name) {
                errors.push(format!("missing required parameter: {name}"));
            }
        }

        for (name, value) in arguments {
            match schema.get(name) {
                Some(spec) => validate_value(name, value, spec, &mut errors),
                None => {
                    tracing::warn!(parameter = %name, "unknown parameter provided");
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(FactError::Validation(errors.join("; ")))
        }
    }
}

fn validate_value(name: &str, value: &Value, spec: &Value, errors: &mut Vec<String>) {
    let Some(spec) = spec.as_object() else {
        return;
    };

    if let Some(expected) = spec.get("type").and_then(Value::as_str) {
        match expected {
            "string" => validate_string(name, value, spec, errors),
            "number" => validate_number(name, value, spec, errors, false),
            "integer" => validate_number(name, value, spec, errors, true),
            "boolean" => {
                if !value.is_boolean() {
                    errors.push(format!("{name} must be a boolean"));
                }
            }
            "object" => validate_object(name, value, spec, errors),
            "array" => validate_array(name, value, spec, errors),
            other => errors.push(format!("unknown type '{other}' for parameter {name}")),
        }
    }

    if let Some(allowed) = spec.get("enum").and_then(Value::as_array) {
        if !allowed.contains(value) {
            errors.push(format!("{name} must be one of the allowed values"));
        }
    }
}

fn validate_string(name: &str, value: &Value, spec: &Map<String, Value>, errors: &mut Vec<String>) {
    let Some(text) = value.as_str() else {
        errors.push(format!("{name} must be a string"));
        return;
    };

    let length = text.chars().count();
    if let Some(min) = spec.get("minLength").and_then(Value::as_u64) {
        if (length as u64) < min {
            errors.push(format!("{name} must be at least {min} characters long"));
        }
    }
    if let Some(max) = spec.get("maxLength").and_then(Value::as_u64) {
        if (length as u64) > max {
            errors.push(format!("{name} must be at most {max} characters long"));
        }
    }

    if let Some(pattern) = spec.get("pattern").and_then(Value::as_str) {
        match Regex::new(pattern) {
            Ok(re) => {
                if !re.is_match(text) {
                    errors.push(format!("{name} does not match required pattern"));
                }
            }
            Err(e) => errors.push(format!("invalid pattern for {name}: {e}")),
        }
    }

    if let Some(format) = spec.get("format").and_then(Value::as_str) {
        if !validate_format(text, format) {
            errors.push(format!("{name} is not a valid {format}"));
        }
    }
}

fn validate_number(
    name: &str,
    value: &Value,
    spec: &Map<String, Value>,
    errors: &mut Vec<String>,
    integer_only: bool,
) {
    let number = match value.as_f64() {
        Some(n) if !integer_only || value.is_i64() || value.is_u64() => n,
        _ => {
            let kind = if integer_only { "an integer" } else { "a number" };
            errors.push(format!("{name} must be {kind}"));
            return;
        }
    };

    if let Some(min) = spec.get("minimum").and_then(Value::as_f64) {
        if number < min {
            errors.push(format!("{name} must be >= {min}"));
        }
    }
    if let Some(max) = spec.get("maximum").and_then(Value::as_f64) {
        if number > max {
            errors.push(format!("{name} must be <= {max}"));
        }
    }
}

fn validate_object(name: &str, value: &Value, spec: &Map<String, Value>, errors: &mut Vec<String>) {
    let Some(object) = value.as_object() else {
        errors.push(format!("{name} must be an object"));
        return;
    };

    let properties = spec.get("properties").and_then(Value::as_object);

    if let Some(properties) = properties {
        for (key, nested) in object {
            if let Some(nested_spec) = properties.get(key) {
                validate_value(&format!("{name}.{key}"), nested, nested_spec, errors);
            }
        }

        let additional = spec
            .get("additionalProperties")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        if !additional {
            for key in object.keys() {
                if !properties.contains_key(key) {
                    errors.push(format!("{name} contains unexpected property: {key}"));
                }
            }
        }
    }
}

fn validate_array(name: &str, value: &Value, spec: &Map<String, Value>, errors: &mut Vec<String>) {
    let Some(items) = value.as_array() else {
        errors.push(format!("{name} must be an array"));
        return;
    };

    if let Some(min) = spec.get("minItems").and_then(Value::as_u64) {
        if (items.len() as u64) < min {
            errors.push(format!("{name} must have at least {min} items"));
        }
    }
    if let Some(max) = spec.get("maxItems").and_then(Value::as_u64) {
        if (items.len() as u64) > max {
            errors.push(format!("{name} must have at most {max} items"));
        }
    }

    if let Some(item_spec) = spec.get("items") {
        for (i, item) in items.iter().enumerate() {
            validate_value(&format!("{name}[{i}]"), item, item_spec, errors);
        }
    }

    if spec.get("uniqueItems").and_then(Value::as_bool).unwrap_or(false) {
        let mut seen = HashSet::new();
        for item in items {
            if !seen.insert(item.to_string()) {
                errors.push(format!("{name} must contain unique items"));
                break;
            }
        }
    }
}

fn validate_format(text: &str, format: &str) -> bool {
    match format {
        "email" => EMAIL_PATTERN.is_match(text),
        "uri" => URI_PATTERN.is_match(text),
        "date" => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        "datetime" => DateTime::parse_from_rfc3339(text).is_ok(),
        "ipv4" => text.parse::<Ipv4Addr>().is_ok(),
        "ipv6" => text.parse::<Ipv6Addr>().is_ok(),
        other => {
            tracing::warn!(format = other, "unknown string format, skipping check");
            true
        }
    }
}

// ============================================================================
// Security screening
// ============================================================================

/// Screens tool calls for hostile structure and content.
#[derive(Debug, Clone)]
pub struct SecurityValidator {
    max_arguments: usize,
    max_key_length: usize,
    max_string_length: usize,
    max_array_length: usize,
    max_object_keys: usize,
    max_depth: usize,
}

impl Default for SecurityValidator {
    fn default() -> Self {
        Self {
            max_arguments: 50,
            max_key_length: 100,
            max_string_length: 10_000,
            max_array_length: 1_000,
            max_object_keys: 100,
            max_depth: 10,
        }
    }
}

impl SecurityValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn validate_tool_call(&self, tool_name: &str, arguments: &Value) -> Result<()> {
        self.validate_tool_name(tool_name)?;

        let Some(arguments) = arguments.as_object() else {
            return Err(FactError::Security(
                "tool arguments must be an object".to_string(),
            ));
        };

        if arguments.len() > self.max_arguments {
            return Err(FactError::Security("too many arguments provided".to_string()));
        }

        for key in arguments.keys() {
            if key.len() > self.max_key_length {
                return Err(FactError::Security(format!("argument name too long: {key}")));
            }
            if !ARGUMENT_KEY_PATTERN.is_match(key) {
                return Err(FactError::Security(format!(
                    "argument name contains forbidden characters: {key}"
                )));
            }
        }

        for (key, value) in arguments {
            self.check_value(key, value, 0)?;
        }

        Ok(())
    }

    fn validate_tool_name(&self, tool_name: &str) -> Result<()> {
        if tool_name.is_empty() || tool_name.len() > 100 {
            return Err(FactError::Security("invalid tool name".to_string()));
        }
        if !TOOL_CALL_NAME_PATTERN.is_match(tool_name) {
            return Err(FactError::Security(
                "tool name does not follow the naming convention".to_string(),
            ));
        }
        Ok(())
    }

    fn check_value(&self, key: &str, value: &Value, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(FactError::Security("argument structure too deep".to_string()));
        }

        match value {
            Value::String(text) => {
                if text.chars().count() > self.max_string_length {
                    return Err(FactError::Security(format!(
                        "string argument too long: {} characters",
                        text.chars().count()
                    )));
                }
                for (pattern, label) in DANGEROUS_PATTERNS.iter() {
                    if let Some(found) = pattern.find(text) {
                        tracing::warn!(
                            argument = %key,
                            pattern = label,
                            "dangerous pattern detected in tool argument"
                        );
                        return Err(FactError::Security(format!(
                            "dangerous pattern in argument '{key}': {label} ({})",
                            found.as_str()
                        )));
                    }
                }
            }
            Value::Array(items) => {
                if items.len() > self.max_array_length {
                    return Err(FactError::Security(format!(
                        "array argument too long: {} items",
                        items.len()
                    )));
                }
                for item in items {
                    self.check_value(key, item, depth + 1)?;
                }
            }
            Value::Object(object) => {
                if object.len() > self.max_object_keys {
                    return Err(FactError::Security(format!(
                        "object has too many properties: {}",
                        object.len()
                    )));
                }
                for (nested_key, nested) in object {
                    self.check_value(nested_key, nested, depth + 1)?;
                }
            }
            _ => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema(spec: Value) -> Map<String, Value> {
        spec.as_object().cloned().unwrap()
    }

    // -------- ParameterValidator --------

    #[test]
    fn test_required_parameter_missing() {
        let validator = ParameterValidator::new();
        let err = validator
            .validate(
                &json!({}),
                &schema(json!({"statement": {"type": "string"}})),
            )
            .unwrap_err();
        assert!(err.to_string().contains("missing required parameter"));
    }

    #[test]
    fn test_default_and_optional_are_not_required() {
        let validator = ParameterValidator::new();
        validator
            .validate(
                &json!({}),
                &schema(json!({
                    "limit": {"type": "integer", "default": 100},
                    "verbose": {"type": "boolean", "required": false}
                })),
            )
            .unwrap();
    }

    #[test]
    fn test_type_mismatches() {
        let validator = ParameterValidator::new();
        let params = schema(json!({
            "count": {"type": "integer"},
            "ratio": {"type": "number"},
            "name": {"type": "string"},
            "flag": {"type": "boolean"},
            "tags": {"type": "array"},
            "extra": {"type": "object"}
        }));

        let err = validator
            .validate(
                &json!({
                    "count": 1.5,
                    "ratio": "high",
                    "name": 7,
                    "flag": "yes",
                    "tags": {},
                    "extra": []
                }),
                &params,
            )
            .unwrap_err();

        let message = err.to_string();
        for field in ["count", "ratio", "name", "flag", "tags", "extra"] {
            assert!(message.contains(field), "missing {field} in: {message}");
        }
    }

    #[test]
    fn test_numeric_range_and_string_length() {
        let validator = ParameterValidator::new();
        let params = schema(json!({
            "age": {"type": "integer", "minimum": 0, "maximum": 150},
            "code": {"type": "string", "minLength": 2, "maxLength": 4}
        }));

        validator.validate(&json!({"age": 42, "code": "abc"}), &params).unwrap();
        assert!(validator.validate(&json!({"age": 200, "code": "abc"}), &params).is_err());
        assert!(validator.validate(&json!({"age": 42, "code": "a"}), &params).is_err());
    }

    #[test]
    fn test_pattern_and_enum() {
        let validator = ParameterValidator::new();
        let params = schema(json!({
            "quarter": {"type": "string", "pattern": "^Q[1-4]$"},
            "sector": {"type": "string", "enum": ["Technology", "Healthcare"]}
        }));

        validator
            .validate(&json!({"quarter": "Q3", "sector": "Technology"}), &params)
            .unwrap();
        assert!(validator
            .validate(&json!({"quarter": "Q5", "sector": "Technology"}), &params)
            .is_err());
        assert!(validator
            .validate(&json!({"quarter": "Q1", "sector": "Energy"}), &params)
            .is_err());
    }

    #[test]
    fn test_array_constraints() {
        let validator = ParameterValidator::new();
        let params = schema(json!({
            "ids": {
                "type": "array",
                "items": {"type": "integer"},
                "minItems": 1,
                "maxItems": 3,
                "uniqueItems": true
            }
        }));

        validator.validate(&json!({"ids": [1, 2]}), &params).unwrap();
        assert!(validator.validate(&json!({"ids": []}), &params).is_err());
        assert!(validator.validate(&json!({"ids": [1, 2, 3, 4]}), &params).is_err());
        assert!(validator.validate(&json!({"ids": [1, 1]}), &params).is_err());
        assert!(validator.validate(&json!({"ids": [1, "x"]}), &params).is_err());
    }

    #[test]
    fn test_nested_object_additional_properties() {
        let validator = ParameterValidator::new();
        let params = schema(json!({
            "filter": {
                "type": "object",
                "properties": {"year": {"type": "integer"}},
                "additionalProperties": false
            }
        }));

        validator.validate(&json!({"filter": {"year": 2024}}), &params).unwrap();
        let err = validator
            .validate(&json!({"filter": {"year": 2024, "other": 1}}), &params)
            .unwrap_err();
        assert!(err.to_string().contains("unexpected property"));
    }

    #[test]
    fn test_format_validators() {
        let validator = ParameterValidator::new();
        let cases = [
            ("email", "user@example.com", "not-an-email"),
            ("uri", "https://example.com/x", "ftp:/bad"),
            ("date", "2026-08-01", "01/08/2026"),
            ("datetime", "2026-08-01T10:30:00Z", "yesterday"),
            ("ipv4", "10.0.0.1", "999.0.0.1"),
            ("ipv6", "::1", "not-ip"),
        ];

        for (format, good, bad) in cases {
            let params = schema(json!({"v": {"type": "string", "format": format}}));
            assert!(
                validator.validate(&json!({"v": good}), &params).is_ok(),
                "{format} should accept {good}"
            );
            assert!(
                validator.validate(&json!({"v": bad}), &params).is_err(),
                "{format} should reject {bad}"
            );
        }
    }

    // -------- SecurityValidator --------

    #[test]
    fn test_clean_arguments_pass() {
        let validator = SecurityValidator::new();
        validator
            .validate_tool_call(
                "SQL_QueryReadonly",
                &json!({"statement": "SELECT name FROM companies WHERE sector='Technology'"}),
            )
            .unwrap();
    }

    #[test]
    fn test_sql_injection_keyword_detected() {
        let validator = SecurityValidator::new();
        let err = validator
            .validate_tool_call(
                "SQL_QueryReadonly",
                &json!({"statement": "SELECT 1 UNION SELECT password FROM users"}),
            )
            .unwrap_err();
        assert!(matches!(err, FactError::Security(_)));
        assert!(err.to_string().to_lowercase().contains("union select"));
    }

    #[test]
    fn test_shell_and_script_patterns_detected() {
        let validator = SecurityValidator::new();
        for hostile in [
            "run; rm -rf /",
            "`whoami`",
            "../../etc/passwd",
            "<script>alert(1)</script>",
            "javascript:alert(1)",
        ] {
            let err = validator
                .validate_tool_call("File_ReadText", &json!({"path": hostile}))
                .unwrap_err();
            assert!(matches!(err, FactError::Security(_)), "{hostile}");
        }
    }

    #[test]
    fn test_nested_strings_are_scanned() {
        let validator = SecurityValidator::new();
        let err = validator
            .validate_tool_call(
                "HTTP_Fetch",
                &json!({"options": {"headers": ["x", "y; DROP TABLE users"]}}),
            )
            .unwrap_err();
        assert!(matches!(err, FactError::Security(_)));
    }

    #[test]
    fn test_structure_limits() {
        let validator = SecurityValidator::new();

        let big_string = "a".repeat(10_001);
        assert!(validator
            .validate_tool_call("File_ReadText", &json!({"data": big_string}))
            .is_err());

        let big_array: Vec<u32> = (0..1_001).collect();
        assert!(validator
            .validate_tool_call("File_ReadText", &json!({"items": big_array}))
            .is_err());

        let mut deep = json!("leaf");
        for _ in 0..12 {
            deep = json!({ "inner": deep });
        }
        assert!(validator
            .validate_tool_call("File_ReadText", &json!({"tree": deep}))
            .is_err());
    }

    #[test]
    fn test_bad_argument_keys() {
        let validator = SecurityValidator::new();
        assert!(validator
            .validate_tool_call("File_ReadText", &json!({"bad key!": 1}))
            .is_err());

        let mut args = Map::new();
        args.insert("k".repeat(101), json!(1));
        assert!(validator
            .validate_tool_call("File_ReadText", &Value::Object(args))
            .is_err());
    }

    #[test]
    fn test_bad_tool_names() {
        let validator = SecurityValidator::new();
        for name in ["", "1leading", "name with space", "semi;colon"] {
            assert!(validator.validate_tool_call(name, &json!({})).is_err(), "{name:?}");
        }
    }
}
