//! Parameter Synthesizer (C5) — four-strategy layered parameter synthesis
//! against a function's parameter schema (spec.md §4.5).

pub mod validation;

use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::error::SynthesisError;
use crate::llm::{InferenceOptions, InferenceProvider, Message};
use crate::registry::types::{FunctionSchema, ParameterSchema};

/// Which strategy produced the winning parameter set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthesisStrategy {
    Template,
    Extraction,
    ContextReuse,
    LlmGeneration,
}

impl std::fmt::Display for SynthesisStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SynthesisStrategy::Template => "template",
            SynthesisStrategy::Extraction => "extraction",
            SynthesisStrategy::ContextReuse => "context_reuse",
            SynthesisStrategy::LlmGeneration => "llm_generation",
        };
        write!(f, "{s}")
    }
}

/// Minimal slice of C9's built context a synthesis call needs.
#[derive(Debug, Clone, Default)]
pub struct SynthesisContext {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SynthesisOutcome {
    pub parameters: HashMap<String, Value>,
    pub strategy: SynthesisStrategy,
}

/// One fixed `(patterns, parameters)` template entry (spec.md §4.5 strategy 1).
struct Template {
    patterns: &'static [&'static str],
    parameters: fn() -> HashMap<String, Value>,
}

fn template_table() -> Vec<Template> {
    vec![Template {
        patterns: &["miền bắc", "north region", "northern"],
        parameters: || {
            let mut m = HashMap::new();
            m.insert("region".to_string(), Value::String("North".to_string()));
            m.insert("period".to_string(), Value::String("today".to_string()));
            m.insert("metric".to_string(), Value::String("total_energy".to_string()));
            m
        },
    }]
}

/// Per-parameter-type extraction: region/relative-time/metric keyword →
/// canonical value, matched against schema property *names* that
/// semantically correspond to that parameter type (spec.md §4.5 strategy 2).
fn extract_region(query: &str) -> Option<&'static str> {
    let q = query.to_lowercase();
    if q.contains("bắc") || q.contains("north") {
        Some("North")
    } else if q.contains("nam") || q.contains("south") {
        Some("South")
    } else if q.contains("trung") || q.contains("central") {
        Some("Central")
    } else {
        None
    }
}

fn extract_relative_time(query: &str) -> Option<&'static str> {
    let q = query.to_lowercase();
    if q.contains("hôm nay") || q.contains("today") {
        Some("today")
    } else if q.contains("hôm qua") || q.contains("yesterday") {
        Some("yesterday")
    } else if q.contains("tuần này") || q.contains("this week") {
        Some("this_week")
    } else {
        None
    }
}

fn extract_metric(query: &str) -> Option<&'static str> {
    let q = query.to_lowercase();
    if q.contains("energy") || q.contains("năng lượng") || q.contains("kwh") {
        Some("total_energy")
    } else if q.contains("cost") || q.contains("chi phí") {
        Some("cost")
    } else {
        None
    }
}

fn extract_location(query: &str) -> Option<String> {
    // A location is "whatever proper noun follows a preposition" in the
    // common phrasing "weather in <place>" / "weather for <place>".
    let lower = query.to_lowercase();
    for marker in ["weather in ", "weather for ", "in "] {
        if let Some(idx) = lower.find(marker) {
            let start = idx + marker.len();
            let rest = query[start..].trim_end_matches(['?', '.', '!']).trim();
            if !rest.is_empty() {
                return Some(rest.to_string());
            }
        }
    }
    None
}

fn extraction_value_for(property_name: &str, query: &str) -> Option<Value> {
    let lower = property_name.to_lowercase();
    if lower.contains("region") {
        return extract_region(query).map(|v| Value::String(v.to_string()));
    }
    if lower.contains("period") || lower.contains("time") || lower.contains("date") {
        return extract_relative_time(query).map(|v| Value::String(v.to_string()));
    }
    if lower.contains("metric") {
        return extract_metric(query).map(|v| Value::String(v.to_string()));
    }
    if lower.contains("location") || lower.contains("city") || lower.contains("place") {
        return extract_location(query).map(Value::String);
    }
    None
}

/// Strategy 1: fixed template table, verbatim parameters plus `user_id`.
fn try_template(query: &str, context: &SynthesisContext) -> Option<HashMap<String, Value>> {
    let lower = query.to_lowercase();
    for entry in template_table() {
        if entry.patterns.iter().any(|p| lower.contains(p)) {
            let mut params = (entry.parameters)();
            if let Some(user_id) = &context.user_id {
                params.insert("user_id".to_string(), Value::String(user_id.clone()));
            }
            return Some(params);
        }
    }
    None
}

/// Strategy 2: per-property regex/keyword extraction; succeeds only if
/// every required parameter is populated.
fn try_extraction(schema: &ParameterSchema, query: &str) -> Option<HashMap<String, Value>> {
    let mut params = HashMap::new();
    for name in schema.properties.keys() {
        if let Some(value) = extraction_value_for(name, query) {
            params.insert(name.clone(), value);
        }
    }
    if schema.required.iter().all(|r| params.contains_key(r)) {
        Some(params)
    } else {
        None
    }
}

/// Strategy 3: walk `previous_results` in order, adopting the first
/// matching key found for each still-missing required parameter.
fn try_context_reuse(schema: &ParameterSchema, previous_results: &[Value]) -> Option<HashMap<String, Value>> {
    let mut params = HashMap::new();
    for required in &schema.required {
        if params.contains_key(required) {
            continue;
        }
        for result in previous_results {
            if let Some(value) = result.get(required) {
                params.insert(required.clone(), value.clone());
                break;
            }
        }
    }
    if schema.required.iter().all(|r| params.contains_key(r)) {
        Some(params)
    } else {
        None
    }
}

fn render_schema_for_prompt(schema: &ParameterSchema) -> String {
    schema
        .properties
        .iter()
        .map(|(name, prop)| {
            let required = if schema.required.contains(name) { "required" } else { "optional" };
            let description = prop.description.clone().unwrap_or_default();
            format!("- {name} ({}, {required}): {description}", prop.type_)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Parses a JSON object out of an LLM's text response, tolerating a JSON
/// fragment embedded in prose.
fn parse_object(text: &str) -> Result<HashMap<String, Value>, SynthesisError> {
    let start = text.find('{').ok_or_else(|| SynthesisError::Parse("no JSON object found".to_string()))?;
    let end = text.rfind('}').ok_or_else(|| SynthesisError::Parse("no JSON object found".to_string()))?;
    if end < start {
        return Err(SynthesisError::Parse("malformed JSON object".to_string()));
    }
    let fragment = &text[start..=end];
    let value: Value =
        serde_json::from_str(fragment).map_err(|e| SynthesisError::Parse(e.to_string()))?;
    match value {
        Value::Object(map) => Ok(map.into_iter().collect()),
        _ => Err(SynthesisError::Parse("expected a JSON object".to_string())),
    }
}

/// Attempts each strategy in order, returning the first whose output
/// passes local validation against `function_schema.parameters`.
pub async fn synthesize(
    llm: &dyn InferenceProvider,
    function_schema: &FunctionSchema,
    query: &str,
    context: &SynthesisContext,
    previous_results: &[Value],
) -> Result<SynthesisOutcome, SynthesisError> {
    let schema = &function_schema.parameters;

    if let Some(params) = try_template(query, context) {
        if validation::validate(schema, &params).is_ok() {
            debug!(strategy = "template", "parameter synthesis succeeded");
            return Ok(SynthesisOutcome { parameters: params, strategy: SynthesisStrategy::Template });
        }
    }

    if let Some(params) = try_extraction(schema, query) {
        if validation::validate(schema, &params).is_ok() {
            debug!(strategy = "extraction", "parameter synthesis succeeded");
            return Ok(SynthesisOutcome { parameters: params, strategy: SynthesisStrategy::Extraction });
        }
    }

    if let Some(params) = try_context_reuse(schema, previous_results) {
        if validation::validate(schema, &params).is_ok() {
            debug!(strategy = "context_reuse", "parameter synthesis succeeded");
            return Ok(SynthesisOutcome { parameters: params, strategy: SynthesisStrategy::ContextReuse });
        }
    }

    let recent: Vec<&Value> = previous_results.iter().rev().take(3).collect();
    let prompt = format!(
        "Query: {query}\n\nParameter schema:\n{}\n\nRecent results:\n{}\n\n\
         Return a single JSON object mapping parameter names to values that satisfy the \
         schema above. Respond with only the JSON object.",
        render_schema_for_prompt(schema),
        recent
            .iter()
            .map(|r| r.to_string())
            .collect::<Vec<_>>()
            .join("\n"),
    );
    let messages =
        vec![Message::system("You produce function-call parameters as JSON."), Message::user(prompt)];
    let response = llm
        .complete(&messages, &InferenceOptions::default())
        .await
        .map_err(|e| SynthesisError::Llm(e.to_string()))?;
    let params = parse_object(&response.content)?;
    validation::validate(schema, &params)?;
    debug!(strategy = "llm_generation", "parameter synthesis succeeded");
    Ok(SynthesisOutcome { parameters: params, strategy: SynthesisStrategy::LlmGeneration })
}
