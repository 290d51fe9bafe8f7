//! OpenAI chat-completions backend.

use async_trait::async_trait;

use crate::family::Family;

use super::diagnostics::SharedDiagnosticsSink;
use super::{
    run_with_retries, sanitize_text, Completion, CompletionBackend, CompletionOptions,
    ProviderError, RawCompletion, RetryPolicy, TokenUsage,
};

const PROVIDER: &str = "openai";
const API_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiBackend {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    sink: Option<SharedDiagnosticsSink>,
}

impl OpenAiBackend {
    pub fn new(api_key: Option<String>, model: impl Into<String>, policy: RetryPolicy) -> Self {
        Self {
            api_key,
            model: model.into(),
            client: reqwest::Client::builder()
                .timeout(policy.attempt_timeout)
                .build()
                .expect("reqwest client"),
            policy,
            sink: None,
        }
    }

    /// Attach the diagnostics sink fired on retry exhaustion.
    pub fn with_diagnostics(mut self, sink: SharedDiagnosticsSink) -> Self {
        self.sink = Some(sink);
        self
    }

    async fn send_once(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        opts: &CompletionOptions,
    ) -> Result<RawCompletion, ProviderError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ProviderError::MissingApiKey(PROVIDER.to_string()))?;

        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": opts.max_tokens,
            "temperature": opts.temperature,
            "messages": [
                {"role": "system", "content": system_prompt},
                {"role": "user", "content": user_prompt},
            ],
        });

        let response = self
            .client
            .post(API_URL)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
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

        let content = json["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let usage = TokenUsage {
            input_tokens: json["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            output_tokens: json["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        };

        Ok(RawCompletion { content, usage })
    }
}

#[async_trait]
impl CompletionBackend for OpenAiBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn family(&self) -> Family {
        Family::OpenAi
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

        run_with_retries(
            PROVIDER,
            &self.model,
            self.family(),
            &self.policy,
            self.sink.as_ref(),
            || self.send_once(&system, &user, opts),
        )
        .await
    }
}
