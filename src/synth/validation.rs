//! Local parameter validation against a `ParameterSchema` (spec.md §4.5).

use serde_json::Value;
use std::collections::HashMap;

use crate::error::SynthesisError;
use crate::registry::types::{ParameterProperty, ParameterSchema};

/// Validates `parameters` against `schema`: required presence, per-property
/// type compatibility, `minimum`/`maximum`, `pattern`, and no unknown keys.
/// Returns `Ok(())` on success so callers can simply `?` and fall back to
/// the next synthesis strategy on failure.
pub fn validate(schema: &ParameterSchema, parameters: &HashMap<String, Value>) -> Result<(), SynthesisError> {
    for required in &schema.required {
        if !parameters.contains_key(required) {
            return Err(SynthesisError::Validation(format!("missing required parameter: {required}")));
        }
    }
    for key in parameters.keys() {
        if !schema.properties.contains_key(key) {
            return Err(SynthesisError::Validation(format!("unknown parameter: {key}")));
        }
    }
    for (name, property) in &schema.properties {
        if let Some(value) = parameters.get(name) {
            check_property(name, value, property)?;
        }
    }
    Ok(())
}

fn check_property(name: &str, value: &Value, property: &ParameterProperty) -> Result<(), SynthesisError> {
    if !type_matches(&property.type_, value) {
        return Err(SynthesisError::Validation(format!(
            "parameter {name} expected type {}, got {value}"
        )));
    }
    if let Some(n) = value.as_f64() {
        if let Some(min) = property.minimum {
            if n < min {
                return Err(SynthesisError::Validation(format!("parameter {name} below minimum {min}")));
            }
        }
        if let Some(max) = property.maximum {
            if n > max {
                return Err(SynthesisError::Validation(format!("parameter {name} above maximum {max}")));
            }
        }
    }
    if let (Some(pattern), Some(s)) = (&property.pattern, value.as_str()) {
        let re = regex::Regex::new(pattern)
            .map_err(|e| SynthesisError::Validation(format!("invalid pattern for {name}: {e}")))?;
        if !re.is_match(s) {
            return Err(SynthesisError::Validation(format!("parameter {name} does not match pattern {pattern}")));
        }
    }
    if let Some(allowed) = &property.enum_values {
        if !allowed.contains(value) {
            return Err(SynthesisError::Validation(format!("parameter {name} not in enum")));
        }
    }
    Ok(())
}

/// Type compatibility per spec.md §4.5: `string↔text`, `number↔int|float`,
/// `integer↔int`, `boolean↔bool`, `array↔sequence`, `object↔mapping`;
/// unknown declared types are accepted unconditionally.
fn type_matches(declared: &str, value: &Value) -> bool {
    match declared.to_lowercase().as_str() {
        "string" | "text" => value.is_string(),
        "number" | "float" => value.is_number(),
        "integer" | "int" => value.is_i64() || value.is_u64(),
        "boolean" | "bool" => value.is_boolean(),
        "array" | "sequence" => value.is_array(),
        "object" | "mapping" => value.is_object(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema_with(required: Vec<&str>, props: Vec<(&str, ParameterProperty)>) -> ParameterSchema {
        ParameterSchema {
            properties: props.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            required: required.into_iter().map(String::from).collect(),
        }
    }

    fn prop(type_: &str) -> ParameterProperty {
        ParameterProperty { type_: type_.to_string(), ..Default::default() }
    }

    #[test]
    fn missing_required_fails() {
        let schema = schema_with(vec!["location"], vec![("location", prop("string"))]);
        let params = HashMap::new();
        assert!(validate(&schema, &params).is_err());
    }

    #[test]
    fn unknown_property_fails() {
        let schema = schema_with(vec![], vec![("location", prop("string"))]);
        let mut params = HashMap::new();
        params.insert("bogus".to_string(), json!("x"));
        assert!(validate(&schema, &params).is_err());
    }

    #[test]
    fn type_mismatch_fails() {
        let schema = schema_with(vec![], vec![("count", prop("integer"))]);
        let mut params = HashMap::new();
        params.insert("count".to_string(), json!("not a number"));
        assert!(validate(&schema, &params).is_err());
    }

    #[test]
    fn bounds_are_enforced() {
        let mut p = prop("number");
        p.minimum = Some(0.0);
        p.maximum = Some(10.0);
        let schema = schema_with(vec![], vec![("pct", p)]);
        let mut params = HashMap::new();
        params.insert("pct".to_string(), json!(15.0));
        assert!(validate(&schema, &params).is_err());
        params.insert("pct".to_string(), json!(5.0));
        assert!(validate(&schema, &params).is_ok());
    }

    #[test]
    fn valid_parameters_pass() {
        let schema = schema_with(vec!["location"], vec![("location", prop("string"))]);
        let mut params = HashMap::new();
        params.insert("location".to_string(), json!("Hanoi"));
        assert!(validate(&schema, &params).is_ok());
    }
}
