//! Hybrid Selector (C4) — three-tier function-selection cascade: rule
//! match, RAG semantic search, LLM reasoning (spec.md §4.4), with a
//! statistics struct tracked across tiers and confidence scoring over
//! weighted samples.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::SelectionError;
use crate::llm::{InferenceOptions, InferenceProvider, Message};
use crate::rag::{retrieve_with_timeout, RagRetriever, RetrievedFunction};

/// Which tier produced a selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMethod {
    RuleBased,
    RagSemantic,
    LlmReasoning,
}

impl std::fmt::Display for SelectionMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SelectionMethod::RuleBased => "rule_based",
            SelectionMethod::RagSemantic => "rag_semantic",
            SelectionMethod::LlmReasoning => "llm_reasoning",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
pub struct SelectionResult {
    pub functions: Vec<RetrievedFunction>,
    pub method: Option<SelectionMethod>,
    pub confidence: f64,
}

impl SelectionResult {
    fn empty() -> Self {
        Self { functions: Vec::new(), method: None, confidence: 0.0 }
    }
}

/// Per-tier invocation counters, kept for observability (spec.md §4.4).
#[derive(Debug, Default)]
pub struct SelectorStats {
    rule_hits: AtomicU64,
    rag_hits: AtomicU64,
    llm_hits: AtomicU64,
    misses: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SelectorStatsSnapshot {
    pub rule_hits: u64,
    pub rag_hits: u64,
    pub llm_hits: u64,
    pub misses: u64,
}

impl SelectorStats {
    pub fn snapshot(&self) -> SelectorStatsSnapshot {
        SelectorStatsSnapshot {
            rule_hits: self.rule_hits.load(Ordering::Relaxed),
            rag_hits: self.rag_hits.load(Ordering::Relaxed),
            llm_hits: self.llm_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Static category → regex-pattern table for the rule tier. Patterns are
/// authored for common phrasings (spec.md §4.4); extend per deployment.
fn rule_table() -> &'static HashMap<&'static str, Vec<&'static str>> {
    static TABLE: OnceLock<HashMap<&'static str, Vec<&'static str>>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut m = HashMap::new();
        m.insert(
            "weather",
            vec![r"(?i)\bweather\b", r"(?i)\btemperature\b", r"(?i)\bforecast\b", r"(?i)\brain\b"],
        );
        m.insert(
            "energy",
            vec![r"(?i)năng lượng", r"(?i)\bmiền\s+(bắc|nam|trung)\b", r"(?i)\benergy\b|\bkwh\b|\bkpi\b"],
        );
        m.insert("news", vec![r"(?i)\bnews\b", r"(?i)\bheadline", r"(?i)\blatest\b"]);
        m
    })
}

fn compiled_rule_table() -> &'static HashMap<&'static str, Vec<Regex>> {
    static COMPILED: OnceLock<HashMap<&'static str, Vec<Regex>>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        rule_table()
            .iter()
            .map(|(category, patterns)| {
                let compiled: Vec<Regex> =
                    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect();
                (*category, compiled)
            })
            .collect()
    })
}

/// Best-matching category and its rule-tier score, if any pattern matched.
fn best_rule_category(query: &str) -> Option<(&'static str, f64)> {
    let mut best: Option<(&'static str, f64)> = None;
    for (category, patterns) in compiled_rule_table() {
        let matches = patterns.iter().filter(|re| re.is_match(query)).count();
        if matches == 0 {
            continue;
        }
        let mut score = (matches as f64 / patterns.len() as f64).min(1.0);
        if matches >= 2 {
            score = (score + 0.2).min(1.0);
        }
        if best.map_or(true, |(_, b)| score > b) {
            best = Some((category, score));
        }
    }
    best
}

/// Three-tier cascade wired against a RAG retriever and an LLM provider.
pub struct HybridSelector {
    retriever: std::sync::Arc<dyn RagRetriever>,
    llm: std::sync::Arc<dyn InferenceProvider>,
    rule_threshold: f64,
    rag_timeout: Duration,
    k1: usize,
    k2: usize,
    stats: SelectorStats,
}

impl HybridSelector {
    pub fn new(
        retriever: std::sync::Arc<dyn RagRetriever>,
        llm: std::sync::Arc<dyn InferenceProvider>,
        rule_threshold: f64,
        k1: usize,
        k2: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            rule_threshold,
            rag_timeout: Duration::from_secs(10),
            k1,
            k2,
            stats: SelectorStats::default(),
        }
    }

    pub fn stats(&self) -> SelectorStatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn select(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<SelectionResult, SelectionError> {
        if let Some(result) = self.try_rule_tier(query, top_k).await? {
            self.stats.rule_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(result);
        }
        if let Some(result) = self.try_rag_tier(query, top_k).await? {
            self.stats.rag_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(result);
        }
        if let Some(result) = self.try_llm_tier(query, top_k).await? {
            self.stats.llm_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(result);
        }
        self.stats.misses.fetch_add(1, Ordering::Relaxed);
        Ok(SelectionResult::empty())
    }

    async fn try_rule_tier(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Option<SelectionResult>, SelectionError> {
        let Some((category, score)) = best_rule_category(query) else {
            return Ok(None);
        };
        if score < self.rule_threshold {
            return Ok(None);
        }
        let candidates = self.retriever.retrieve(query, Some(category), true, self.k1, top_k.max(self.k2)).await?;
        debug!(category, score, hits = candidates.len(), "rule tier matched");
        Ok(Some(SelectionResult { functions: candidates, method: Some(SelectionMethod::RuleBased), confidence: score }))
    }

    async fn try_rag_tier(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Option<SelectionResult>, SelectionError> {
        let candidates = retrieve_with_timeout(
            self.retriever.as_ref(),
            query,
            None,
            true,
            self.k1,
            top_k.max(self.k2),
            self.rag_timeout,
        )
        .await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let weights = [1.0, 0.7, 0.5, 0.3, 0.2];
        let n = candidates.len().min(weights.len());
        let weight_sum: f64 = weights[..n].iter().sum();
        let weighted: f64 = candidates
            .iter()
            .take(n)
            .zip(weights.iter())
            .map(|(c, w)| c.score as f64 * w)
            .sum();
        let confidence = if weight_sum > 0.0 { weighted / weight_sum } else { 0.0 };
        Ok(Some(SelectionResult { functions: candidates, method: Some(SelectionMethod::RagSemantic), confidence }))
    }

    async fn try_llm_tier(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Option<SelectionResult>, SelectionError> {
        let candidates = self.retriever.retrieve(query, None, false, 15, 15).await?;
        if candidates.is_empty() {
            return Ok(None);
        }
        let summaries = candidates
            .iter()
            .map(|c| format!("- {}: {}", c.name, c.description))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Given the user query: \"{query}\"\n\nCandidate functions:\n{summaries}\n\n\
             Return a JSON array of up to {top_k} function names (from the list above) that best \
             answer the query, most relevant first. Respond with only the JSON array."
        );
        let messages = vec![Message::system("You select functions to call."), Message::user(prompt)];
        let response = match self.llm.complete(&messages, &InferenceOptions::default()).await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "llm tier inference call failed");
                return Ok(None);
            }
        };
        let names = parse_name_list(&response.content).map_err(SelectionError::Parse)?;
        if names.is_empty() {
            return Ok(None);
        }
        let by_name: HashMap<&str, &RetrievedFunction> =
            candidates.iter().map(|c| (c.name.as_str(), c)).collect();
        let selected: Vec<RetrievedFunction> =
            names.iter().filter_map(|n| by_name.get(n.as_str()).cloned().cloned()).take(top_k).collect();
        if selected.is_empty() {
            return Ok(None);
        }
        Ok(Some(SelectionResult { functions: selected, method: Some(SelectionMethod::LlmReasoning), confidence: 0.7 }))
    }
}

/// Parse a JSON array of strings, tolerating a JSON fragment embedded in
/// surrounding prose (LLMs rarely return bare JSON).
fn parse_name_list(text: &str) -> Result<Vec<String>, String> {
    let start = text.find('[').ok_or_else(|| "no JSON array found".to_string())?;
    let end = text.rfind(']').ok_or_else(|| "no JSON array found".to_string())?;
    if end < start {
        return Err("malformed JSON array".to_string());
    }
    let fragment = &text[start..=end];
    serde_json::from_str(fragment).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rule_tier_matches_weather_category() {
        let (category, score) = best_rule_category("What's the weather in Hanoi?").unwrap();
        assert_eq!(category, "weather");
        assert!(score > 0.0);
    }

    #[test]
    fn rule_tier_matches_vietnamese_energy_query() {
        let (category, score) = best_rule_category("Năng lượng miền Bắc hôm nay").unwrap();
        assert_eq!(category, "energy");
        assert!(score >= 0.85, "expected rule_threshold-passing score, got {score}");
    }

    #[test]
    fn rule_tier_no_match_for_unrelated_query() {
        assert!(best_rule_category("hello").is_none());
    }

    #[test]
    fn parse_name_list_tolerates_surrounding_prose() {
        let names = parse_name_list("Sure, here you go: [\"get_weather\", \"get_forecast\"] thanks!").unwrap();
        assert_eq!(names, vec!["get_weather".to_string(), "get_forecast".to_string()]);
    }
}
