//! Vendor family classification for model identifiers.
//!
//! Model ids are free-form strings controlled by external vendors, so
//! classification is substring-pattern based and fails safe to
//! `Unknown` instead of erroring.

use serde::{Deserialize, Serialize};

/// Vendor/lineage family a model identifier resolves to.
///
/// The family is the unit of diversity the debate gate protects: two
/// evaluators from the same family do not count as independent
/// evidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Family {
    Anthropic,
    #[serde(rename = "openai")]
    OpenAi,
    Google,
    Meta,
    Mistral,
    Qwen,
    #[serde(rename = "deepseek")]
    DeepSeek,
    /// No pattern matched — treated conservatively by the validator.
    Unknown,
}

impl Family {
    /// Whether the family resolved to a known vendor.
    pub fn is_known(self) -> bool {
        self != Self::Unknown
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Anthropic => write!(f, "anthropic"),
            Self::OpenAi => write!(f, "openai"),
            Self::Google => write!(f, "google"),
            Self::Meta => write!(f, "meta"),
            Self::Mistral => write!(f, "mistral"),
            Self::Qwen => write!(f, "qwen"),
            Self::DeepSeek => write!(f, "deepseek"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Ordered pattern table. The first family with a matching substring
/// wins, so more specific vendor markers come before generic ones.
const FAMILY_PATTERNS: &[(Family, &[&str])] = &[
    (
        Family::Anthropic,
        &["claude", "anthropic", "opus", "sonnet", "haiku"],
    ),
    (
        Family::OpenAi,
        &["gpt-", "gpt4", "gpt5", "chatgpt", "openai", "o1-", "o3-", "o4-"],
    ),
    (Family::Google, &["gemini", "palm", "bison", "gemma"]),
    (Family::Meta, &["llama", "codellama"]),
    (Family::Mistral, &["mistral", "mixtral", "codestral"]),
    (Family::Qwen, &["qwen", "qwq"]),
    (Family::DeepSeek, &["deepseek"]),
];

/// Classify a model identifier into a vendor family.
///
/// Pure and total: any input yields a family, unmatched ids yield
/// [`Family::Unknown`].
pub fn classify(model_id: &str) -> Family {
    let normalized = model_id.trim().to_ascii_lowercase();
    for (family, patterns) in FAMILY_PATTERNS {
        if patterns.iter().any(|p| normalized.contains(p)) {
            return *family;
        }
    }
    Family::Unknown
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_anthropic() {
        assert_eq!(classify("claude-sonnet-4-20250514"), Family::Anthropic);
        assert_eq!(classify("claude-opus-4-5"), Family::Anthropic);
        assert_eq!(classify("anthropic/claude-3-haiku"), Family::Anthropic);
    }

    #[test]
    fn test_classify_openai() {
        assert_eq!(classify("gpt-4o"), Family::OpenAi);
        assert_eq!(classify("gpt-4o-mini"), Family::OpenAi);
        assert_eq!(classify("o1-preview"), Family::OpenAi);
        assert_eq!(classify("chatgpt-4o-latest"), Family::OpenAi);
    }

    #[test]
    fn test_classify_google() {
        assert_eq!(classify("gemini-1.5-pro"), Family::Google);
        assert_eq!(classify("gemini-2.0-flash"), Family::Google);
        assert_eq!(classify("gemma-2-27b"), Family::Google);
    }

    #[test]
    fn test_classify_local_families() {
        assert_eq!(classify("llama3.1:70b"), Family::Meta);
        assert_eq!(classify("mistral-large"), Family::Mistral);
        assert_eq!(classify("qwen2.5-coder:14b"), Family::Qwen);
        assert_eq!(classify("deepseek-r1:32b"), Family::DeepSeek);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify("totally-novel-model"), Family::Unknown);
        assert_eq!(classify(""), Family::Unknown);
    }

    #[test]
    fn test_classify_case_insensitive() {
        assert_eq!(classify("Claude-Sonnet-4"), Family::Anthropic);
        assert_eq!(classify("GPT-4O"), Family::OpenAi);
        assert_eq!(classify("  Gemini-1.5-Pro  "), Family::Google);
    }

    #[test]
    fn test_ordered_table_first_match_wins() {
        // "sonnet" appears before any other family could claim it.
        assert_eq!(classify("sonnet-tuned-gemini-mix"), Family::Anthropic);
    }

    #[test]
    fn test_family_display() {
        assert_eq!(Family::Anthropic.to_string(), "anthropic");
        assert_eq!(Family::OpenAi.to_string(), "openai");
        assert_eq!(Family::Google.to_string(), "google");
        assert_eq!(Family::Unknown.to_string(), "unknown");
    }

    #[test]
    fn test_family_serde() {
        let json = serde_json::to_string(&Family::DeepSeek).unwrap();
        assert_eq!(json, "\"deepseek\"");
        let parsed: Family = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Family::DeepSeek);
        assert_eq!(serde_json::to_string(&Family::OpenAi).unwrap(), "\"openai\"");
    }

    #[test]
    fn test_is_known() {
        assert!(Family::Anthropic.is_known());
        assert!(!Family::Unknown.is_known());
    }
}
