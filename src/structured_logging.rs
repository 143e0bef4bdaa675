//! Structured logging and composition context

use std::time::Instant;
use uuid::Uuid;

/// Structured logger for composition events
#[derive(Debug, Clone)]
pub struct CompositionLogger {
    correlation_id: String,
}

impl CompositionLogger {
    pub fn new(correlation_id: String) -> Self {
        Self { correlation_id }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn log_received(&self, envelope_bytes: usize, splices: usize, tables: usize) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            envelope_bytes,
            splices,
            tables,
            "Composition received"
        );
    }

    pub fn log_decompiled(&self, accounts: usize, instructions: usize, lookups: usize) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            accounts,
            instructions,
            lookups,
            "Envelope decompiled"
        );
    }

    pub fn log_spliced(&self, accounts: usize, instructions: usize) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            accounts,
            instructions,
            "Instructions spliced"
        );
    }

    pub fn log_compiled(&self, static_keys: usize, loaded: usize, message_bytes: usize) {
        tracing::debug!(
            correlation_id = %self.correlation_id,
            static_keys,
            loaded,
            message_bytes,
            "Message compiled"
        );
    }

    pub fn log_composed(&self, tx_bytes: u64, compute_units: u64, signers: usize, latency_us: u64) {
        tracing::info!(
            correlation_id = %self.correlation_id,
            tx_bytes,
            compute_units,
            signers,
            latency_us,
            "Composition succeeded"
        );
    }

    pub fn log_rejected(&self, stage: &str, category: &str, error: &str, latency_us: u64) {
        tracing::warn!(
            correlation_id = %self.correlation_id,
            stage = %stage,
            category = %category,
            error = %error,
            latency_us,
            "Composition rejected"
        );
    }
}

/// Per-call context: correlation id, operation name and start time
#[derive(Debug, Clone)]
pub struct CompositionContext {
    pub correlation_id: String,
    pub operation: String,
    pub started_at: Instant,
    pub logger: CompositionLogger,
}

impl CompositionContext {
    pub fn new(operation: &str) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        Self {
            logger: CompositionLogger::new(correlation_id.clone()),
            correlation_id,
            operation: operation.to_string(),
            started_at: Instant::now(),
        }
    }

    /// Context reusing a caller-supplied correlation id
    pub fn with_correlation_id(operation: &str, correlation_id: String) -> Self {
        Self {
            logger: CompositionLogger::new(correlation_id.clone()),
            correlation_id,
            operation: operation.to_string(),
            started_at: Instant::now(),
        }
    }

    pub fn elapsed_micros(&self) -> u64 {
        u64::try_from(self.started_at.elapsed().as_micros()).unwrap_or(u64::MAX)
    }
}

impl Default for CompositionContext {
    fn default() -> Self {
        Self::new("compose")
    }
}
