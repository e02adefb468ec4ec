//! Tiered provider routing with exhaustive fallback.
//!
//! Given a resolved candidate set for a model, the router attempts
//! candidates strictly sequentially: ascending tier order, uniformly
//! shuffled within each tier, stopping at the first success. Every invoked
//! candidate produces exactly one usage record — success or failure — and
//! on total exhaustion the caller receives an aggregate error carrying every
//! per-provider failure in invocation order.
//!
//! Tier ordering encodes a cost/capability policy (free/fast first, paid or
//! experimental backends only on failure). Intra-tier shuffling spreads load
//! across equally-ranked providers and avoids hammering whichever provider
//! happens to be registered first when a tier-wide condition (say, a shared
//! rate limit) is failing every request.
//!
//! The streaming path shares the same candidate policy; see [`stream`] for
//! the commit-point semantics.

pub mod stream;

use std::{
    sync::{Arc, Mutex},
    time::Instant,
};

use chrono::Utc;
use rand::{SeedableRng, rngs::StdRng, seq::SliceRandom};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use stream::ChatStream;

use crate::{
    api_types::{ChatCompletionResult, ChatRequest},
    observability::metrics,
    providers::{Candidate, ProviderError, ProviderRegistry, Tier},
    usage::{AttemptFailure, AttemptUsage, UsageRecorder},
};

/// One failed attempt, kept for the aggregate error.
#[derive(Debug)]
pub struct AttemptError {
    pub provider: String,
    pub tier: Tier,
    pub error: ProviderError,
}

impl std::fmt::Display for AttemptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (tier {}): {}", self.provider, self.tier, self.error)
    }
}

/// Failure surface returned to callers of the router.
///
/// Only these variants ever escape: every per-candidate failure is caught,
/// recorded, and folded into fallback internally.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No registered provider declares support for the requested model.
    /// Fails fast; zero attempts are made or recorded.
    #[error("no provider supports model '{model}'")]
    NoProvidersAvailable { model: String },

    /// Every candidate across every tier failed. Carries the full ordered
    /// per-provider error list for diagnosis.
    #[error("all {attempts} provider(s) failed for model '{model}'")]
    ProvidersExhausted {
        model: String,
        attempts: usize,
        errors: Vec<AttemptError>,
    },

    /// A streaming candidate failed after output had already reached the
    /// caller. Never retried: a coherent fallback is impossible once partial
    /// output has been observed.
    #[error("stream from provider '{provider}' failed after output began: {source}")]
    MidStream {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// Caller-initiated cancellation observed at a suspension point.
    #[error("request cancelled")]
    Cancelled,
}

/// The core routing engine.
///
/// Holds an immutable registry snapshot and a usage recorder. The RNG used
/// for intra-tier shuffling is owned by the router and seedable for
/// deterministic tests; per-request state (the attempt plan, the error list)
/// is request-scoped and discarded afterwards.
pub struct TieredRouter {
    registry: Arc<ProviderRegistry>,
    recorder: Arc<dyn UsageRecorder>,
    rng: Mutex<StdRng>,
}

impl TieredRouter {
    pub fn new(registry: Arc<ProviderRegistry>, recorder: Arc<dyn UsageRecorder>) -> Self {
        Self {
            registry,
            recorder,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Build a router with a fixed RNG seed, making the intra-tier shuffle
    /// deterministic. Intended for tests.
    pub fn with_seed(
        registry: Arc<ProviderRegistry>,
        recorder: Arc<dyn UsageRecorder>,
        seed: u64,
    ) -> Self {
        Self {
            registry,
            recorder,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Compute the full attempt order for one request: ascending tiers, each
    /// tier uniformly shuffled. The order is fixed here, before any
    /// invocation begins; it is never recomputed mid-request.
    fn plan(&self, model: &str) -> Vec<Candidate> {
        let groups = self.registry.resolve_candidates(model);
        let mut rng = self.rng.lock().expect("rng lock poisoned");

        let mut plan = Vec::new();
        for mut group in groups {
            group.candidates.shuffle(&mut *rng);
            plan.extend(group.candidates);
        }
        plan
    }

    /// Produce exactly one completion for `request`, falling back through
    /// candidates until one succeeds or all are exhausted.
    pub async fn complete(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResult, RouterError> {
        let plan = self.plan(&request.model);
        if plan.is_empty() {
            metrics::record_route_outcome(&request.model, "no_providers", 0);
            return Err(RouterError::NoProvidersAvailable {
                model: request.model.clone(),
            });
        }

        let mut errors: Vec<AttemptError> = Vec::new();

        for candidate in plan {
            // Suspension-point check: a cancelled request never starts a new
            // candidate and records nothing for candidates never invoked.
            if cancel.is_cancelled() {
                metrics::record_route_outcome(&request.model, "cancelled", errors.len());
                return Err(RouterError::Cancelled);
            }

            let provider = Arc::clone(&candidate.provider);
            let start = Instant::now();

            let outcome = tokio::select! {
                _ = cancel.cancelled() => None,
                result = provider.chat(request, cancel) => Some(result),
            };
            let duration = start.elapsed();

            match outcome {
                None => {
                    // Cancellation fired while this candidate was in flight:
                    // one trailing failure record, then stop.
                    self.record_failure(&candidate, &request.model, "cancelled", true, duration);
                    metrics::record_route_outcome(&request.model, "cancelled", errors.len() + 1);
                    return Err(RouterError::Cancelled);
                }
                Some(Ok(result)) => {
                    tracing::debug!(
                        provider = provider.id(),
                        model = %request.model,
                        tier = %candidate.tier,
                        duration_ms = duration.as_millis() as u64,
                        "Completion succeeded"
                    );
                    self.recorder.record_success(&AttemptUsage {
                        provider: provider.id().to_string(),
                        model: request.model.clone(),
                        tier: candidate.tier,
                        usage: result.usage,
                        duration,
                        recorded_at: Utc::now(),
                    });
                    metrics::record_attempt(
                        provider.id(),
                        &request.model,
                        candidate.tier,
                        "success",
                        duration.as_secs_f64(),
                    );
                    metrics::record_route_outcome(&request.model, "success", errors.len() + 1);
                    return Ok(result);
                }
                Some(Err(error)) => {
                    tracing::warn!(
                        provider = provider.id(),
                        model = %request.model,
                        tier = %candidate.tier,
                        error = %error,
                        "Provider failed, falling back to next candidate"
                    );
                    let cancelled = error.is_cancelled();
                    self.record_failure(
                        &candidate,
                        &request.model,
                        &error.to_string(),
                        cancelled,
                        duration,
                    );
                    errors.push(AttemptError {
                        provider: provider.id().to_string(),
                        tier: candidate.tier,
                        error,
                    });
                }
            }
        }

        let attempts = errors.len();
        tracing::error!(
            model = %request.model,
            attempts,
            "All providers exhausted"
        );
        metrics::record_route_outcome(&request.model, "exhausted", attempts);
        Err(RouterError::ProvidersExhausted {
            model: request.model.clone(),
            attempts,
            errors,
        })
    }

    fn record_failure(
        &self,
        candidate: &Candidate,
        model: &str,
        error: &str,
        cancelled: bool,
        duration: std::time::Duration,
    ) {
        self.recorder.record_failure(&AttemptFailure {
            provider: candidate.provider.id().to_string(),
            model: model.to_string(),
            tier: candidate.tier,
            error: error.to_string(),
            cancelled,
            duration,
            recorded_at: Utc::now(),
        });
        let outcome = if cancelled { "cancelled" } else { "error" };
        metrics::record_attempt(
            candidate.provider.id(),
            model,
            candidate.tier,
            outcome,
            duration.as_secs_f64(),
        );
    }
}
