//! Local Ollama chat backend with transparent cloud fallback.
//!
//! Local inference is the cheap path but the least reliable one. When
//! this backend exhausts its own retries and a fallback backend is
//! configured, the fallback's completion is returned instead, tagged
//! `fallback=true` with the local error preserved in `original_error`
//! so provenance stays auditable.

use std::sync::Arc;

use async_trait::async_trait;

use crate::family::Family;

use super::diagnostics::SharedDiagnosticsSink;
use super::{
    run_with_retries, sanitize_text, Completion, CompletionBackend, CompletionOptions,
    ProviderError, RawCompletion, RetryPolicy, TokenUsage,
};

const PROVIDER: &str = "ollama";

pub struct OllamaBackend {
    base_url: String,
    model: String,
    family: Family,
    client: reqwest::Client,
    policy: RetryPolicy,
    sink: Option<SharedDiagnosticsSink>,
    fallback: Option<Arc<dyn CompletionBackend>>,
}

impl OllamaBackend {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        family: Family,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            family,
            client: reqwest::Client::builder()
                .timeout(policy.attempt_timeout)
                .build()
                .expect("reqwest client"),
            policy,
            sink: None,
            fallback: None,
        }
    }

    /// Attach the diagnostics sink fired on retry exhaustion.
    pub fn with_diagnostics(mut self, sink: SharedDiagnosticsSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Configure the cloud backend invoked when local inference is
    /// unreachable.
    pub fn with_fallback(mut self, fallback: Arc<dyn CompletionBackend>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    async fn send_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "options": {
                "temperature": opts.temperature,
                "num_predict": opts.max_tokens,
            },
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let url = format!("{}/api/chat", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                provider: PROVIDER.to_string(),
                reason: e.to_string(),
            })?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                provider: PROVIDER.to_string(),
                status,
                body,
            });
        }

        let json: serde_json::Value =
            response.json().await.map_err(|e| ProviderError::Transport {
                provider: PROVIDER.to_string(),
                reason: format!("invalid response body: {}", e),
            })?;

        let content = json["message"]["content"].as_str().unwrap_or("").to_string();
        let usage = TokenUsage {
            input_tokens: json["prompt_eval_count"].as_u64().unwrap_or(0),
            output_tokens: json["eval_count"].as_u64().unwrap_or(0),
        };

        Ok(RawCompletion { content, usage })
    }
}

#[async_trait]
impl CompletionBackend for OllamaBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn family(&self) -> Family {
        self.family
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        let system = sanitize_text(system_prompt);
        let user = sanitize_text(user_prompt);

        let local = run_with_retries(
            PROVIDER,
            &self.model,
            self.family,
            &self.policy,
            self.sink.as_ref(),
            || self.send_once(&system, &user, opts),
        )
        .await;

        match (local, self.fallback.as_ref()) {
            (Ok(completion), _) => Ok(completion),
            (Err(e), None) => Err(e),
            (Err(e), Some(fallback)) => {
                tracing::warn!(
                    model = %self.model,
                    fallback_provider = fallback.provider(),
                    fallback_model = fallback.model(),
                    error = %e,
                    "local inference exhausted, invoking cloud fallback"
                );
                let mut completion = fallback.complete(&system, &user, opts).await?;
                completion.fallback = true;
                completion.original_error = Some(e.to_string());
                Ok(completion)
            }
        }
    }
}
