//! THINK/ACT/REFLECT/FINAL prompt templates (spec.md §4.8).

use once_regex::function_name_regex;

use crate::agent::state::ObservationRecord;
use crate::rag::RetrievedFunction;

/// Substrings that indicate THINK decided on an action (spec.md §4.8,
/// case-insensitive).
const ACTION_INTENT_MARKERS: &[&str] = &[
    "need to call",
    "should call",
    "will call",
    "execute",
    "invoke",
    "use function",
    "call the function",
];

pub fn think_prompt(query: &str, candidates: &[RetrievedFunction], last_thoughts: &[String]) -> String {
    let top3 = candidates
        .iter()
        .take(3)
        .map(|c| format!("- {}: {}", c.name, c.description))
        .collect::<Vec<_>>()
        .join("\n");
    let recent = last_thoughts
        .iter()
        .rev()
        .take(3)
        .rev()
        .cloned()
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: {query}\n\nCandidate functions:\n{top3}\n\nRecent thoughts:\n{recent}\n\n\
         Think step by step about what to do next. If you need to call a function, say so \
         explicitly (e.g. \"I need to call <function_name>\")."
    )
}

pub fn act_prompt(query: &str, thought: &str, candidates: &[RetrievedFunction]) -> String {
    let names = candidates.iter().map(|c| c.name.clone()).collect::<Vec<_>>().join(", ");
    format!(
        "Query: {query}\n\nThought: {thought}\n\nAvailable functions: {names}\n\n\
         Respond with the function to call in the form \"Function: <name>\"."
    )
}

pub fn reflect_prompt(query: &str, observations: &[ObservationRecord]) -> String {
    let summary = observations
        .iter()
        .map(|o| {
            if o.success {
                format!("step {}: success", o.step)
            } else {
                format!("step {}: failed ({})", o.step, o.error.clone().unwrap_or_default())
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: {query}\n\nObservations so far:\n{summary}\n\n\
         Respond in exactly this format:\nQuality: <0.0-1.0>\nContinue: <yes|no>\nReasoning: <why>"
    )
}

pub fn final_prompt(query: &str, observations: &[ObservationRecord]) -> String {
    let successes = observations
        .iter()
        .filter(|o| o.success)
        .filter_map(|o| o.data.as_ref().map(|d| d.to_string()))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Query: {query}\n\nSuccessful results:\n{successes}\n\n\
         Compose a clear final answer to the user's query using the results above."
    )
}

/// Extract a function name from a THINK/ACT response via `Function:\s*(\w+)`,
/// falling back to the first underscored alphanumeric token.
pub fn extract_function_name(text: &str) -> Option<String> {
    if let Some(captures) = function_name_regex().captures(text) {
        return captures.get(1).map(|m| m.as_str().to_string());
    }
    text.split_whitespace()
        .find(|token| token.contains('_') && token.chars().all(|c| c.is_alphanumeric() || c == '_'))
        .map(|s| s.to_string())
}

/// Whether a THINK thought indicates the model wants to act.
pub fn indicates_action_intent(thought: &str) -> bool {
    let lower = thought.to_lowercase();
    ACTION_INTENT_MARKERS.iter().any(|marker| lower.contains(marker))
}

/// Parses `Quality: <x>\nContinue: <yes|no>\nReasoning: ...` from a
/// REFLECT response; tolerant of extra whitespace/ordering noise.
pub fn parse_reflection(text: &str) -> (f64, bool, String) {
    let mut quality = 0.0;
    let mut should_continue = false;
    let mut reasoning = String::new();
    for line in text.lines() {
        let lower = line.to_lowercase();
        if let Some(rest) = lower.strip_prefix("quality:") {
            quality = rest.trim().parse().unwrap_or(0.0);
        } else if let Some(rest) = lower.strip_prefix("continue:") {
            should_continue = rest.trim().starts_with("yes");
        } else if let Some(idx) = line.to_lowercase().find("reasoning:") {
            reasoning = line[idx + "reasoning:".len()..].trim().to_string();
        }
    }
    (quality, should_continue, reasoning)
}

/// A small module so the `Function:\s*(\w+)` regex is compiled once
/// without pulling in an extra lazy-static dependency.
mod once_regex {
    use regex::Regex;
    use std::sync::OnceLock;

    pub fn function_name_regex() -> &'static Regex {
        static RE: OnceLock<Regex> = OnceLock::new();
        RE.get_or_init(|| Regex::new(r"Function:\s*(\w+)").unwrap())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_function_name_from_labeled_line() {
        assert_eq!(extract_function_name("Function: get_weather"), Some("get_weather".to_string()));
    }

    #[test]
    fn falls_back_to_first_underscored_token() {
        assert_eq!(extract_function_name("I will use get_weather now"), Some("get_weather".to_string()));
    }

    #[test]
    fn detects_action_intent_case_insensitively() {
        assert!(indicates_action_intent("I NEED TO CALL the weather function"));
        assert!(!indicates_action_intent("The weather today sounds nice"));
    }

    #[test]
    fn parses_reflection_block() {
        let (quality, should_continue, reasoning) =
            parse_reflection("Quality: 0.82\nContinue: no\nReasoning: good enough");
        assert!((quality - 0.82).abs() < 1e-9);
        assert!(!should_continue);
        assert_eq!(reasoning, "good enough");
    }
}
