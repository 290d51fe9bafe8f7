//! Best-effort diagnostics side channel for adapter exhaustion.
//!
//! The sink is invoked on a detached task and its failures are
//! discarded unconditionally: it can never throw into, block, or slow
//! down the caller that just exhausted its retries.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the sink receives when a backend exhausts its retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsEvent {
    pub provider: String,
    pub model: String,
    pub error_message: String,
    /// Machine-readable error category (`timeout`, `api_error`,
    /// `transport`, `missing_api_key`).
    pub error_code: String,
    pub http_status: Option<u16>,
}

/// External root-cause-analysis sink (consumed).
#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn report(&self, event: DiagnosticsEvent) -> anyhow::Result<()>;
}

/// Shared sink handle.
pub type SharedDiagnosticsSink = Arc<dyn DiagnosticsSink>;

/// Fire the sink without awaiting it. Sink errors and panics stay on
/// the detached task.
pub fn fire_and_forget(sink: Option<&SharedDiagnosticsSink>, event: DiagnosticsEvent) {
    let Some(sink) = sink else {
        return;
    };
    let sink = Arc::clone(sink);
    tokio::spawn(async move {
        if let Err(e) = sink.report(event).await {
            tracing::debug!(error = %e, "diagnostics sink failed; discarding");
        }
    });
}
