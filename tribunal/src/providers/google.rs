//! Google Gemini generateContent backend.

use async_trait::async_trait;

use crate::family::Family;

use super::diagnostics::SharedDiagnosticsSink;
use super::{
    run_with_retries, sanitize_text, Completion, CompletionBackend, CompletionOptions,
    ProviderError, RawCompletion, RetryPolicy, TokenUsage,
};

const PROVIDER: &str = "google";

pub struct GoogleBackend {
    api_key: Option<String>,
    model: String,
    client: reqwest::Client,
    policy: RetryPolicy,
    sink: Option<SharedDiagnosticsSink>,
}

impl GoogleBackend {
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

        // Gemini takes the system instruction as a dedicated field.
        let body = serde_json::json!({
            "systemInstruction": {"parts": [{"text": system_prompt}]},
            "contents": [{"parts": [{"text": user_prompt}]}],
            "generationConfig": {
                "temperature": opts.temperature,
                "maxOutputTokens": opts.max_tokens,
            },
        });

        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, api_key
        );

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

        let content = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or("")
            .to_string();
        let usage = TokenUsage {
            input_tokens: json["usageMetadata"]["promptTokenCount"]
                .as_u64()
                .unwrap_or(0),
            output_tokens: json["usageMetadata"]["candidatesTokenCount"]
                .as_u64()
                .unwrap_or(0),
        };

        Ok(RawCompletion { content, usage })
    }
}

#[async_trait]
impl CompletionBackend for GoogleBackend {
    fn provider(&self) -> &str {
        PROVIDER
    }

    fn family(&self) -> Family {
        Family::Google
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
