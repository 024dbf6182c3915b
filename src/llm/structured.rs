//! Structured LLM calls: extraction, normalisation, validation, retries
//!
//! Every LLM boundary in the pipeline uses a closed schema. This module owns
//! the shared machinery:
//!
//! 1. rate-limit acquisition per raw call,
//! 2. JSON extraction tolerant of code fences and surrounding prose,
//! 3. field-name normalisation for known aliases (`query`→`cypher`,
//!    `parameters`→`params`) — idempotent, canonical key wins when both occur,
//! 4. serde validation against the target type, with up to 2 retries that
//!    append a machine-readable description of the violation to the prompt.
//!
//! After three failed attempts the call fails with `LLM_STRUCTURED_FAILURE`.

use super::traits::{LlmClient, LlmRequest};
use crate::error::{PipelineError, ReasonCode};
use crate::ratelimit::{Acquire, RateLimiter};
use serde::de::DeserializeOwned;

/// Default attempts per structured call (1 initial + 2 retries).
pub const DEFAULT_ATTEMPTS: u32 = 3;

/// Configuration for one structured call site.
pub struct StructuredCall<'a> {
    /// Rate-limit key, one per call site (`plan`, `generate`, `summarise`).
    pub key: &'a str,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Total attempts before giving up.
    pub attempts: u32,
    /// `(alias, canonical)` pairs applied before validation.
    pub aliases: &'a [(&'a str, &'a str)],
    /// Keys named in the retry feedback when validation fails.
    pub expected_keys: &'a [&'a str],
}

/// Call the LLM and validate the JSON output against `T`.
///
/// # Errors
///
/// `LLM_RATE_LIMITED` when the limiter denies the call;
/// `LLM_STRUCTURED_FAILURE` when all attempts are exhausted.
pub async fn call_structured<T: DeserializeOwned>(
    llm: &dyn LlmClient,
    limiter: &RateLimiter,
    prompt: &str,
    call: &StructuredCall<'_>,
) -> Result<T, PipelineError> {
    let mut current_prompt = prompt.to_string();
    let mut last_error = String::new();
    let max_attempts = call.attempts.max(1);

    for attempt in 1..=max_attempts {
        if limiter.acquire(call.key, 1) == Acquire::Denied {
            return Err(PipelineError::rejected(
                ReasonCode::LlmRateLimited,
                format!("rate limit exceeded for {}", call.key),
            ));
        }

        let request = LlmRequest {
            prompt: current_prompt.clone(),
            max_tokens: call.max_tokens,
            temperature: call.temperature,
            json_mode: true,
        };

        let raw = match llm.complete(&request).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    key = call.key,
                    attempt,
                    error = %e,
                    "LLM call failed"
                );
                last_error = e.to_string();
                continue;
            }
        };

        let parsed = match extract_json(&raw) {
            Some(value) => value,
            None => {
                tracing::warn!(key = call.key, attempt, "LLM returned non-JSON output");
                last_error = "output was not a JSON object".to_string();
                current_prompt = append_violation(prompt, &last_error, call.expected_keys);
                continue;
            }
        };

        let normalised = normalise_fields(parsed, call.aliases);

        match serde_json::from_value::<T>(normalised) {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(key = call.key, attempt, "structured call recovered on retry");
                }
                return Ok(value);
            }
            Err(e) => {
                tracing::warn!(
                    key = call.key,
                    attempt,
                    error = %e,
                    "LLM output failed schema validation"
                );
                last_error = e.to_string();
                current_prompt = append_violation(prompt, &last_error, call.expected_keys);
            }
        }
    }

    Err(PipelineError::rejected(
        ReasonCode::LlmStructuredFailure,
        format!(
            "structured output failed after {} attempts: {}",
            max_attempts, last_error
        ),
    ))
}

/// Rename known alias fields to their canonical names.
///
/// When both alias and canonical key are present the canonical value wins and
/// the alias is dropped. Applying the mapping twice is a no-op.
pub fn normalise_fields(
    mut value: serde_json::Value,
    aliases: &[(&str, &str)],
) -> serde_json::Value {
    if let Some(map) = value.as_object_mut() {
        for (alias, canonical) in aliases {
            if let Some(alias_value) = map.remove(*alias) {
                map.entry(canonical.to_string()).or_insert(alias_value);
            }
        }
    }
    value
}

/// Extract the first JSON object from text that may contain code fences or
/// surrounding prose.
pub fn extract_json(text: &str) -> Option<serde_json::Value> {
    // Fast path: the whole reply is the object
    if let Ok(value @ serde_json::Value::Object(_)) = serde_json::from_str(text) {
        return Some(value);
    }

    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if escape_next {
            escape_next = false;
            continue;
        }
        match b {
            b'\\' => escape_next = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    let candidate = &text[start..=i];
                    return serde_json::from_str(candidate)
                        .ok()
                        .filter(serde_json::Value::is_object);
                }
            }
            _ => {}
        }
    }
    None
}

fn append_violation(base_prompt: &str, error: &str, expected_keys: &[&str]) -> String {
    format!(
        "{}\n\nYour previous reply was rejected: {}\n\
         Return a single JSON object with exactly these keys: {}. \
         No additional text.",
        base_prompt,
        error,
        expected_keys.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockLlmClient;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize)]
    struct CandidateOutput {
        cypher: String,
        params: serde_json::Map<String, serde_json::Value>,
    }

    const CANDIDATE_ALIASES: &[(&str, &str)] = &[("query", "cypher"), ("parameters", "params")];

    fn call<'a>() -> StructuredCall<'a> {
        StructuredCall {
            key: "test",
            max_tokens: 512,
            temperature: 0.0,
            attempts: DEFAULT_ATTEMPTS,
            aliases: CANDIDATE_ALIASES,
            expected_keys: &["cypher", "params"],
        }
    }

    #[test]
    fn extract_json_handles_code_fences() {
        let text = "```json\n{\"cypher\": \"MATCH (n) RETURN n LIMIT 1\"}\n```";
        let value = extract_json(text).unwrap();
        assert!(value.get("cypher").is_some());
    }

    #[test]
    fn extract_json_handles_surrounding_prose() {
        let text = "Here is the query: {\"a\": {\"b\": \"}\"}} done";
        let value = extract_json(text).unwrap();
        assert_eq!(value, json!({"a": {"b": "}"}}));
    }

    #[test]
    fn extract_json_rejects_non_objects() {
        assert!(extract_json("[1, 2, 3]").is_none());
        assert!(extract_json("no json here").is_none());
    }

    #[test]
    fn normalise_maps_legacy_names() {
        let value = json!({"query": "MATCH (n) RETURN n", "parameters": {"x": 1}});
        let out = normalise_fields(value, CANDIDATE_ALIASES);
        assert_eq!(out.get("cypher").unwrap(), "MATCH (n) RETURN n");
        assert_eq!(out.get("params").unwrap(), &json!({"x": 1}));
        assert!(out.get("query").is_none());
        assert!(out.get("parameters").is_none());
    }

    #[test]
    fn normalise_is_idempotent() {
        let value = json!({"cypher": "MATCH (n) RETURN n", "params": {}});
        let once = normalise_fields(value.clone(), CANDIDATE_ALIASES);
        let twice = normalise_fields(once.clone(), CANDIDATE_ALIASES);
        assert_eq!(once, twice);
        assert_eq!(once, value);
    }

    #[test]
    fn normalise_prefers_canonical_when_both_present() {
        let value = json!({"cypher": "keep me", "query": "drop me"});
        let out = normalise_fields(value, CANDIDATE_ALIASES);
        assert_eq!(out.get("cypher").unwrap(), "keep me");
        assert!(out.get("query").is_none());
    }

    #[tokio::test]
    async fn retries_until_valid_output() {
        let llm = MockLlmClient::with_responses(vec![
            "not json at all".to_string(),
            r#"{"wrong_key": true}"#.to_string(),
            r#"{"cypher": "MATCH (n) RETURN n LIMIT 1", "params": {}}"#.to_string(),
        ]);
        let limiter = RateLimiter::in_memory(0);

        let out: CandidateOutput = call_structured(&llm, &limiter, "generate", &call())
            .await
            .unwrap();
        assert_eq!(out.cypher, "MATCH (n) RETURN n LIMIT 1");
        assert!(out.params.is_empty());
        assert_eq!(llm.prompts().len(), 3);
        // Retry prompts carry the violation feedback
        assert!(llm.prompts()[1].contains("rejected"));
    }

    #[tokio::test]
    async fn fails_after_three_attempts() {
        let llm = MockLlmClient::with_responses(vec![
            "garbage".to_string(),
            "garbage".to_string(),
            "garbage".to_string(),
        ]);
        let limiter = RateLimiter::in_memory(0);

        let err = call_structured::<CandidateOutput>(&llm, &limiter, "generate", &call())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::LlmStructuredFailure));
    }

    #[tokio::test]
    async fn denied_limiter_short_circuits() {
        let llm = MockLlmClient::with_responses(vec![
            r#"{"cypher": "MATCH (n) RETURN n", "params": {}}"#.to_string(),
        ]);
        let limiter = RateLimiter::in_memory(1);
        // Exhaust the quota
        limiter.acquire("test", 1);

        let err = call_structured::<CandidateOutput>(&llm, &limiter, "generate", &call())
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ReasonCode::LlmRateLimited));
        assert!(llm.prompts().is_empty(), "LLM must not be called when denied");
    }

    #[tokio::test]
    async fn normalised_llm_reply_accepted_without_retry() {
        let llm = MockLlmClient::with_responses(vec![
            r#"{"query": "MATCH (s:Student {fullName:$name}) RETURN s LIMIT $limit",
                "parameters": {"name": "John Doe", "limit": 10}}"#
                .to_string(),
        ]);
        let limiter = RateLimiter::in_memory(0);

        let out: CandidateOutput = call_structured(&llm, &limiter, "generate", &call())
            .await
            .unwrap();
        assert!(out.cypher.contains("fullName:$name"));
        assert_eq!(out.params.get("name").unwrap(), "John Doe");
        assert_eq!(llm.prompts().len(), 1, "no retry expected");
    }
}
