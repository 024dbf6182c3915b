//! Heuristic input guardrail
//!
//! Fast, deterministic screening of incoming questions — pattern tables only,
//! no I/O, microsecond budget. Legitimate business questions pass; anything
//! that looks like query-language injection, shell commands or script payloads
//! is blocked before the pipeline spends a single LLM token on it.

use once_cell::sync::Lazy;
use regex::Regex;

/// Maximum question length considered; longer input is truncated before
/// analysis and sanitisation.
pub const MAX_QUESTION_LEN: usize = 4096;

/// Decision returned by the guardrail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Block { reason: String },
}

/// Mutation keywords that block on their own, wherever they appear.
static MUTATION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(CREATE|MERGE|DELETE|SET|REMOVE|DROP|DETACH)\b").expect("mutation regex")
});

/// Broader query-language keywords; two or more distinct hits look like a
/// pasted query rather than a question.
static QUERY_KEYWORDS: &[&str] = &[
    "MATCH", "RETURN", "WHERE", "WITH", "UNWIND", "CALL", "YIELD", "FOREACH", "UNION", "OPTIONAL",
    "LOAD CSV",
];

static SHELL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(rm|mkfs|fdisk|chmod|chown|sudo|wget|curl|netcat|xp_cmdshell|sp_executesql|powershell)\b")
        .expect("shell regex")
});

static SQL_INJECTION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r#"(?i)(UNION\s+SELECT|INSERT\s+INTO|DELETE\s+FROM|UPDATE\s+\w+\s+SET|'\s*(OR|AND)\s*'?\d+'?\s*=\s*'?\d+'?)"#,
    )
    .expect("sql injection regex")
});

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(<\s*script|javascript\s*:|\beval\s*\(|\bsetTimeout\s*\(|```)")
        .expect("script regex")
});

/// Characters counted towards the obfuscation ratio.
const SPECIAL_CHARS: &[char] = &[
    ';', '(', ')', '{', '}', '[', ']', '<', '>', '|', '&', '$', '`', '"', '\'', '\\',
];

/// Strip control characters, collapse whitespace, bound length.
///
/// The sanitised form is what gets logged and audited; the heuristics run on
/// the *original* input so suspicious sequences are seen before removal.
pub fn sanitize_text(text: &str) -> String {
    let bounded: String = text.chars().take(MAX_QUESTION_LEN).collect();
    let no_control: String = bounded.chars().filter(|c| !c.is_control()).collect();
    let collapsed = no_control
        .split_whitespace()
        .collect::<Vec<&str>>()
        .join(" ");
    collapsed
}

fn is_probably_malicious(text: &str) -> Option<String> {
    let bounded: String = text.chars().take(MAX_QUESTION_LEN).collect();
    let upper = bounded.to_uppercase();

    if let Some(m) = MUTATION_RE.find(&bounded) {
        return Some(format!("mutation keyword: {}", m.as_str().to_uppercase()));
    }

    let keyword_hits = QUERY_KEYWORDS
        .iter()
        .filter(|kw| contains_word(&upper, kw))
        .count();
    if keyword_hits >= 2 {
        return Some(format!("{} query keywords present", keyword_hits));
    }

    if SHELL_RE.is_match(&bounded) {
        return Some("shell command pattern".to_string());
    }
    if SQL_INJECTION_RE.is_match(&bounded) {
        return Some("sql injection pattern".to_string());
    }
    if SCRIPT_RE.is_match(&bounded) {
        return Some("script execution pattern".to_string());
    }

    let total = bounded.chars().count();
    if total > 0 {
        let special = bounded.chars().filter(|c| SPECIAL_CHARS.contains(c)).count();
        if special as f32 / total as f32 > 0.3 {
            return Some("excessive special characters".to_string());
        }
    }

    None
}

fn contains_word(haystack_upper: &str, word: &str) -> bool {
    haystack_upper.match_indices(word).any(|(pos, _)| {
        let before_ok = pos == 0
            || !haystack_upper[..pos]
                .chars()
                .next_back()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
        let after = pos + word.len();
        let after_ok = after >= haystack_upper.len()
            || !haystack_upper[after..]
                .chars()
                .next()
                .map(|c| c.is_alphanumeric() || c == '_')
                .unwrap_or(false);
        before_ok && after_ok
    })
}

/// Run the guardrail over a question.
///
/// Allows by default; blocks only when a heuristic flags the input. The check
/// is pure — it never performs I/O and cannot suspend.
pub fn check(question: &str) -> GuardrailDecision {
    match is_probably_malicious(question) {
        Some(reason) => {
            tracing::warn!(
                question = %sanitize_text(question).chars().take(100).collect::<String>(),
                %reason,
                "guardrail blocked question"
            );
            GuardrailDecision::Block { reason }
        }
        None => GuardrailDecision::Allow,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocked(question: &str) -> bool {
        matches!(check(question), GuardrailDecision::Block { .. })
    }

    #[test]
    fn legitimate_questions_pass() {
        assert!(!blocked("What are the goals for Isabella Thomas?"));
        assert!(!blocked("Which students are assigned to Ms. Garcia?"));
        assert!(!blocked("Show accommodations for Marcus since January"));
        // "set" embedded in a word is not a mutation keyword
        assert!(!blocked("What is the current goal subset for reading?"));
    }

    #[test]
    fn mutation_keywords_block() {
        assert!(blocked("DROP DATABASE neo4j;"));
        assert!(blocked("please DELETE all students"));
        assert!(blocked("create (n:Student) return n"));
        assert!(blocked("detach delete everything"));
    }

    #[test]
    fn repeated_query_keywords_block() {
        assert!(blocked("MATCH (n) RETURN n"));
        assert!(blocked("match everything where id > 0 return it"));
        // A single keyword alone is allowed
        assert!(!blocked("Can you match students to their case workers?"));
    }

    #[test]
    fn shell_and_sql_patterns_block() {
        assert!(blocked("run sudo rm -rf / please"));
        assert!(blocked("name' OR '1'='1"));
        assert!(blocked("1 UNION SELECT password FROM users"));
    }

    #[test]
    fn code_fences_block() {
        assert!(blocked("```cypher\nMATCH (n) RETURN n\n```"));
        assert!(blocked("<script>alert(1)</script>"));
    }

    #[test]
    fn special_char_soup_blocks() {
        assert!(blocked(";;;'{}[]$()<>|&;;;'\""));
    }

    #[test]
    fn sanitize_strips_control_and_collapses_whitespace() {
        assert_eq!(
            sanitize_text("What\tare \u{0007} the   goals?"),
            "What are the goals?"
        );
    }

    #[test]
    fn sanitize_bounds_length() {
        let long = "a".repeat(10_000);
        assert!(sanitize_text(&long).len() <= MAX_QUESTION_LEN);
    }
}
