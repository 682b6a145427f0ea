//! Audit record for a completed route.
//! Prompt and output text are never stored; the output is kept as a SHA-256 digest.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::backend::LlmResponse;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteAudit {
    pub id: Uuid,
    pub model_used: String,
    pub provider: Option<String>,
    /// Backends actually called, including the winner.
    pub attempts: usize,
    /// Fallback entries skipped for a missing credential.
    pub skipped: usize,
    pub tokens_used: Option<u64>,
    pub output_hash: String,
    pub latency_ms: u64,
    pub routed_at: chrono::DateTime<Utc>,
}

impl RouteAudit {
    pub fn new(response: &LlmResponse, attempts: usize, skipped: usize, latency_ms: u64) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(response.content.as_bytes());
        let output_hash = format!("{:x}", hasher.finalize());

        Self {
            id: Uuid::new_v4(),
            model_used: response.model_used.clone(),
            provider: response.provider().map(str::to_string),
            attempts,
            skipped,
            tokens_used: response.tokens_used,
            output_hash,
            latency_ms,
            routed_at: Utc::now(),
        }
    }

    pub fn emit(&self) {
        tracing::info!(
            audit_id = %self.id,
            model = %self.model_used,
            provider = self.provider.as_deref().unwrap_or("unknown"),
            attempts = self.attempts,
            skipped = self.skipped,
            tokens = self.tokens_used,
            latency_ms = self.latency_ms,
            output_sha256 = %self.output_hash,
            "LLM route completed"
        );
    }
}
