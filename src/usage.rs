//! Usage recording abstraction for pluggable attempt-data destinations.
//!
//! The router reports exactly one event per provider actually invoked —
//! success or failure — and never lets recording affect control flow.
//! Recorder methods are synchronous fire-and-forget: implementations that
//! need IO must spawn internally, and must swallow (log) their own errors.
//! Observability is never allowed to become a reliability hazard.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};

use crate::{api_types::Usage, providers::Tier};

/// A successfully completed provider attempt.
#[derive(Debug, Clone)]
pub struct AttemptUsage {
    pub provider: String,
    pub model: String,
    pub tier: Tier,
    pub usage: Usage,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// A failed (or cancelled) provider attempt.
#[derive(Debug, Clone)]
pub struct AttemptFailure {
    pub provider: String,
    pub model: String,
    pub tier: Tier,
    pub error: String,
    /// True when the failure is caller-initiated cancellation rather than a
    /// backend fault.
    pub cancelled: bool,
    pub duration: Duration,
    pub recorded_at: DateTime<Utc>,
}

/// Trait for usage data destinations.
///
/// Purely observational: implementations must not panic and must not block
/// the caller on IO.
pub trait UsageRecorder: Send + Sync {
    fn record_success(&self, attempt: &AttemptUsage);

    fn record_failure(&self, attempt: &AttemptFailure);

    /// Recorder name for logging.
    fn name(&self) -> &'static str;
}

/// Recorder that emits structured tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRecorder;

impl UsageRecorder for TracingRecorder {
    fn record_success(&self, attempt: &AttemptUsage) {
        tracing::info!(
            provider = %attempt.provider,
            model = %attempt.model,
            tier = %attempt.tier,
            prompt_tokens = attempt.usage.prompt_tokens,
            completion_tokens = attempt.usage.completion_tokens,
            duration_ms = attempt.duration.as_millis() as u64,
            "Provider attempt succeeded"
        );
    }

    fn record_failure(&self, attempt: &AttemptFailure) {
        tracing::warn!(
            provider = %attempt.provider,
            model = %attempt.model,
            tier = %attempt.tier,
            error = %attempt.error,
            cancelled = attempt.cancelled,
            duration_ms = attempt.duration.as_millis() as u64,
            "Provider attempt failed"
        );
    }

    fn name(&self) -> &'static str {
        "tracing"
    }
}

/// Recorder that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopRecorder;

impl UsageRecorder for NoopRecorder {
    fn record_success(&self, _attempt: &AttemptUsage) {}

    fn record_failure(&self, _attempt: &AttemptFailure) {}

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Composite recorder that fans out to multiple destinations.
///
/// Each destination is invoked in order; a misbehaving destination never
/// prevents the others from seeing the event.
pub struct CompositeRecorder {
    recorders: Vec<Arc<dyn UsageRecorder>>,
}

impl CompositeRecorder {
    pub fn new(recorders: Vec<Arc<dyn UsageRecorder>>) -> Self {
        Self { recorders }
    }

    pub fn is_empty(&self) -> bool {
        self.recorders.is_empty()
    }
}

impl UsageRecorder for CompositeRecorder {
    fn record_success(&self, attempt: &AttemptUsage) {
        for recorder in &self.recorders {
            recorder.record_success(attempt);
        }
    }

    fn record_failure(&self, attempt: &AttemptFailure) {
        for recorder in &self.recorders {
            recorder.record_failure(attempt);
        }
    }

    fn name(&self) -> &'static str {
        "composite"
    }
}
