//! Evaluator adapters — one uniform completion contract over
//! heterogeneous AI backends.
//!
//! Every backend shares the same behavior envelope: input
//! sanitization, a per-attempt timeout, bounded retries with linearly
//! increasing delay, and a best-effort diagnostics event on
//! exhaustion. The local-inference backend additionally supports
//! transparent fallback to a cloud backend (the only one allowed to
//! substitute provenance — callers must check the `fallback` flag).

pub mod anthropic;
pub mod diagnostics;
pub mod google;
pub mod ollama;
pub mod openai;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::family::Family;
use crate::personas::{PersonaId, PersonaRegistry};
use diagnostics::{fire_and_forget, DiagnosticsEvent, SharedDiagnosticsSink};

pub use anthropic::AnthropicBackend;
pub use google::GoogleBackend;
pub use ollama::OllamaBackend;
pub use openai::OpenAiBackend;

/// Token accounting reported by the backend, zeroed when the provider
/// does not report usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

/// Per-call options forwarded to the provider.
#[derive(Debug, Clone)]
pub struct CompletionOptions {
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.2,
        }
    }
}

/// A completed evaluator call with full provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub provider: String,
    pub family: Family,
    pub model: String,
    pub duration_ms: u64,
    pub usage: TokenUsage,
    /// 1-based attempt number that succeeded.
    pub attempt: u32,
    /// True when a fallback backend produced this result in place of
    /// the one originally called.
    pub fallback: bool,
    /// The original backend's terminal error when `fallback` is set.
    pub original_error: Option<String>,
}

/// Errors surfaced to callers — always after retries are exhausted,
/// never mid-retry.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("{provider} request timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("{provider} API error {status}: {body}")]
    Api {
        provider: String,
        status: u16,
        body: String,
    },

    #[error("{provider} transport error: {reason}")]
    Transport { provider: String, reason: String },

    #[error("API key not configured for {0}")]
    MissingApiKey(String),

    #[error("no backend available for family '{0}'")]
    UnsupportedFamily(Family),
}

impl ProviderError {
    /// Machine-readable category for diagnostics events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Api { .. } => "api_error",
            Self::Transport { .. } => "transport",
            Self::MissingApiKey(_) => "missing_api_key",
            Self::UnsupportedFamily(_) => "unsupported_family",
        }
    }

    /// HTTP status, when the provider returned one.
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Retry envelope shared by every backend.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Deadline for each individual attempt.
    pub attempt_timeout: Duration,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Inter-attempt delay grows linearly: `base_delay × attempt`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempt_timeout: Duration::from_secs(120),
            max_retries: 2,
            base_delay: Duration::from_millis(500),
        }
    }
}

/// Environment-driven provider configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub anthropic_api_key: Option<String>,
    pub openai_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub ollama_base_url: String,
    pub retry: RetryPolicy,
}

impl ProviderConfig {
    /// Read keys and endpoints from the environment.
    pub fn from_env() -> Self {
        Self {
            anthropic_api_key: std::env::var("ANTHROPIC_API_KEY").ok(),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            gemini_api_key: std::env::var("GEMINI_API_KEY").ok(),
            ollama_base_url: std::env::var("OLLAMA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            retry: RetryPolicy::default(),
        }
    }
}

/// Uniform request/response contract over heterogeneous completion
/// backends.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Stable provider identifier (`anthropic`, `openai`, `google`,
    /// `ollama`).
    fn provider(&self) -> &str;

    /// Vendor family this backend's model belongs to.
    fn family(&self) -> Family;

    /// Model identifier sent on the wire.
    fn model(&self) -> &str;

    /// Run one completion, honoring the shared retry envelope.
    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;
}

/// Raw result of a single wire attempt, before provenance is attached.
pub(crate) struct RawCompletion {
    pub content: String,
    pub usage: TokenUsage,
}

/// One backend per evaluator role, keyed by family at construction.
pub struct BackendSet {
    backends: HashMap<PersonaId, Arc<dyn CompletionBackend>>,
}

impl BackendSet {
    /// Wire each registered persona to the backend serving its family.
    ///
    /// Families without a cloud API here (`meta`, `mistral`, ...) are
    /// routed through local inference with the Anthropic backend as
    /// cloud fallback when a key is present.
    pub fn from_config(
        registry: &PersonaRegistry,
        config: &ProviderConfig,
    ) -> Result<Self, ProviderError> {
        let mut backends: HashMap<_, Arc<dyn CompletionBackend>> = HashMap::new();

        for persona in registry.personas() {
            let backend: Arc<dyn CompletionBackend> = match persona.family {
                Family::Anthropic => Arc::new(AnthropicBackend::new(
                    config.anthropic_api_key.clone(),
                    persona.model_id.clone(),
                    config.retry.clone(),
                )),
                Family::OpenAi => Arc::new(OpenAiBackend::new(
                    config.openai_api_key.clone(),
                    persona.model_id.clone(),
                    config.retry.clone(),
                )),
                Family::Google => Arc::new(GoogleBackend::new(
                    config.gemini_api_key.clone(),
                    persona.model_id.clone(),
                    config.retry.clone(),
                )),
                Family::Meta | Family::Mistral | Family::Qwen | Family::DeepSeek => {
                    let mut local = OllamaBackend::new(
                        config.ollama_base_url.clone(),
                        persona.model_id.clone(),
                        persona.family,
                        config.retry.clone(),
                    );
                    if config.anthropic_api_key.is_some() {
                        local = local.with_fallback(Arc::new(AnthropicBackend::new(
                            config.anthropic_api_key.clone(),
                            "claude-sonnet-4-20250514",
                            config.retry.clone(),
                        )));
                    }
                    Arc::new(local)
                }
                Family::Unknown => return Err(ProviderError::UnsupportedFamily(persona.family)),
            };
            backends.insert(persona.id, backend);
        }

        Ok(Self { backends })
    }

    /// Build directly from pre-constructed backends (tests, custom
    /// wiring).
    pub fn from_backends(backends: HashMap<PersonaId, Arc<dyn CompletionBackend>>) -> Self {
        Self { backends }
    }

    pub fn get(&self, id: PersonaId) -> Option<&Arc<dyn CompletionBackend>> {
        self.backends.get(&id)
    }
}

fn surrogate_escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // A high+low escape pair is a valid astral character; anything
        // else in the surrogate range is unpaired and gets dropped.
        Regex::new(
            r"(?x)
            (\\u[dD][89abAB][0-9a-fA-F]{2}\\u[dD][c-fC-F][0-9a-fA-F]{2})
            | \\u[dD][89a-fA-F][0-9a-fA-F]{2}",
        )
        .expect("static surrogate pattern")
    })
}

/// Strip unpaired UTF-16 surrogate escape sequences from outbound
/// text. Strict JSON encoders downstream reject lone surrogates.
pub fn sanitize_text(text: &str) -> String {
    surrogate_escape_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            match caps.get(1) {
                // Valid pair: keep verbatim.
                Some(pair) => pair.as_str().to_string(),
                None => String::new(),
            }
        })
        .into_owned()
}

/// Drive one backend call through the shared retry envelope.
///
/// Applies the per-attempt timeout, sleeps `base_delay × attempt`
/// between attempts, and on final exhaustion fires the diagnostics
/// sink (detached, never observed) before returning the terminal
/// error.
pub(crate) async fn run_with_retries<F, Fut>(
    provider: &str,
    model: &str,
    family: Family,
    policy: &RetryPolicy,
    sink: Option<&SharedDiagnosticsSink>,
    attempt_fn: F,
) -> Result<Completion, ProviderError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<RawCompletion, ProviderError>> + Send,
{
    let started = Instant::now();
    let total_attempts = policy.max_retries + 1;
    let mut last_error = None;

    for attempt in 1..=total_attempts {
        let outcome = match tokio::time::timeout(policy.attempt_timeout, attempt_fn()).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.to_string(),
                timeout_ms: policy.attempt_timeout.as_millis() as u64,
            }),
        };

        match outcome {
            Ok(raw) => {
                return Ok(Completion {
                    content: raw.content,
                    provider: provider.to_string(),
                    family,
                    model: model.to_string(),
                    duration_ms: started.elapsed().as_millis() as u64,
                    usage: raw.usage,
                    attempt,
                    fallback: false,
                    original_error: None,
                });
            }
            Err(e) => {
                tracing::warn!(
                    provider,
                    model,
                    attempt,
                    total_attempts,
                    error = %e,
                    "backend attempt failed"
                );
                last_error = Some(e);
                if attempt < total_attempts {
                    tokio::time::sleep(policy.base_delay * attempt).await;
                }
            }
        }
    }

    let error = last_error.unwrap_or(ProviderError::Transport {
        provider: provider.to_string(),
        reason: "no attempts executed".to_string(),
    });

    fire_and_forget(
        sink,
        DiagnosticsEvent {
            provider: provider.to_string(),
            model: model.to_string(),
            error_message: error.to_string(),
            error_code: error.code().to_string(),
            http_status: error.http_status(),
        },
    );

    Err(error)
}
