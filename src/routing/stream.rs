//! Streaming fallback with an explicit commit point.
//!
//! The streaming path uses the same tier/shuffle/fallback policy as the
//! blocking path, with one added constraint: fallback is only coherent
//! before any output has reached the caller. Each candidate goes through a
//! two-phase open/probe step — the stream is opened lazily, then the router
//! pulls the *first* element itself. A failure at either phase is recorded
//! and the next candidate is tried, exactly like a blocking failure. Once a
//! first chunk is obtained the candidate is committed: the chunk is replayed
//! to the caller and every subsequent error propagates as a mid-stream
//! failure instead of triggering another candidate.
//!
//! Attempt lifecycle: `NotStarted → Probing → {Committed → Streaming →
//! Terminated} | Failed(before commit)`. There is no transition back to
//! candidate selection from `Committed`.

use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Instant,
};

use chrono::Utc;
use futures_util::{Stream, StreamExt};
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};

use super::{AttemptError, RouterError, TieredRouter};
use crate::{
    api_types::{ChatCompletionChunk, ChatRequest, Usage},
    observability::metrics,
    providers::{ChunkStream, Provider, ProviderError, Tier},
    usage::{AttemptFailure, AttemptUsage, UsageRecorder},
};

impl TieredRouter {
    /// Produce a single committed chunk sequence for `request`, falling back
    /// through candidates until one yields a first chunk or all are
    /// exhausted.
    ///
    /// The returned [`ChatStream`] records exactly one usage entry for the
    /// committed provider when it terminates — success at exhaustion,
    /// failure on mid-stream error, cancellation, or early drop.
    pub async fn stream(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatStream, RouterError> {
        let plan = self.plan(&request.model);
        if plan.is_empty() {
            metrics::record_route_outcome(&request.model, "no_providers", 0);
            return Err(RouterError::NoProvidersAvailable {
                model: request.model.clone(),
            });
        }

        let mut errors: Vec<AttemptError> = Vec::new();

        for candidate in plan {
            if cancel.is_cancelled() {
                metrics::record_route_outcome(&request.model, "cancelled", errors.len());
                return Err(RouterError::Cancelled);
            }

            let provider = Arc::clone(&candidate.provider);
            let start = Instant::now();

            let probed = tokio::select! {
                _ = cancel.cancelled() => None,
                result = open_and_probe(provider.as_ref(), request, cancel) => Some(result),
            };

            match probed {
                None => {
                    self.record_failure(
                        &candidate,
                        &request.model,
                        "cancelled",
                        true,
                        start.elapsed(),
                    );
                    metrics::record_route_outcome(&request.model, "cancelled", errors.len() + 1);
                    return Err(RouterError::Cancelled);
                }
                Some(Err(error)) => {
                    // Pre-commit failure: nothing reached the caller, so
                    // falling back is still coherent.
                    tracing::warn!(
                        provider = provider.id(),
                        model = %request.model,
                        tier = %candidate.tier,
                        error = %error,
                        "Streaming candidate failed before first chunk, falling back"
                    );
                    let cancelled = error.is_cancelled();
                    self.record_failure(
                        &candidate,
                        &request.model,
                        &error.to_string(),
                        cancelled,
                        start.elapsed(),
                    );
                    errors.push(AttemptError {
                        provider: provider.id().to_string(),
                        tier: candidate.tier,
                        error,
                    });
                }
                Some(Ok((first, rest))) => {
                    tracing::debug!(
                        provider = provider.id(),
                        model = %request.model,
                        tier = %candidate.tier,
                        "Streaming candidate committed"
                    );
                    metrics::record_route_outcome(&request.model, "committed", errors.len() + 1);
                    return Ok(ChatStream::new(
                        first,
                        rest,
                        CommitContext {
                            provider: provider.id().to_string(),
                            model: request.model.clone(),
                            tier: candidate.tier,
                            recorder: Arc::clone(&self.recorder),
                            started: start,
                        },
                        cancel.clone(),
                    ));
                }
            }
        }

        let attempts = errors.len();
        tracing::error!(
            model = %request.model,
            attempts,
            "All streaming candidates exhausted"
        );
        metrics::record_route_outcome(&request.model, "exhausted", attempts);
        Err(RouterError::ProvidersExhausted {
            model: request.model.clone(),
            attempts,
            errors,
        })
    }
}

/// Open the provider stream and pull its first element. Both phases count
/// as pre-commit: any error here is a plain attempt failure.
async fn open_and_probe(
    provider: &dyn Provider,
    request: &ChatRequest,
    cancel: &CancellationToken,
) -> Result<(ChatCompletionChunk, ChunkStream), ProviderError> {
    let mut chunks = provider.stream_chat(request, cancel).await?;
    match chunks.next().await {
        Some(Ok(first)) => Ok((first, chunks)),
        Some(Err(error)) => Err(error),
        // An immediately exhausted stream emitted nothing to the caller, so
        // it is a pre-commit failure, not an empty success.
        None => Err(ProviderError::EmptyStream),
    }
}

struct CommitContext {
    provider: String,
    model: String,
    tier: Tier,
    recorder: Arc<dyn UsageRecorder>,
    started: Instant,
}

/// A committed streaming response from exactly one provider.
///
/// Replays the probed first chunk, then forwards the provider stream.
/// Terminates when the provider stream ends (recording success with
/// whatever usage the stream reported), when a mid-stream error occurs
/// (propagated as [`RouterError::MidStream`], never retried), or when the
/// caller's cancellation token fires between chunks.
pub struct ChatStream {
    first: Option<ChatCompletionChunk>,
    inner: ChunkStream,
    ctx: CommitContext,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    usage: Option<Usage>,
    finished: bool,
}

impl fmt::Debug for ChatStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatStream")
            .field("first", &self.first)
            .field("usage", &self.usage)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl ChatStream {
    fn new(
        first: ChatCompletionChunk,
        inner: ChunkStream,
        ctx: CommitContext,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            first: Some(first),
            inner,
            ctx,
            cancelled: Box::pin(cancel.cancelled_owned()),
            usage: None,
            finished: false,
        }
    }

    /// Id of the provider this stream committed to.
    pub fn provider(&self) -> &str {
        &self.ctx.provider
    }

    fn observe(&mut self, chunk: &ChatCompletionChunk) {
        // Providers that report usage do so on the final chunk
        if let Some(usage) = chunk.usage {
            self.usage = Some(usage);
        }
    }

    fn finalize_success(&mut self) {
        self.finished = true;
        let duration = self.ctx.started.elapsed();
        self.ctx.recorder.record_success(&AttemptUsage {
            provider: self.ctx.provider.clone(),
            model: self.ctx.model.clone(),
            tier: self.ctx.tier,
            usage: self.usage.unwrap_or_default(),
            duration,
            recorded_at: Utc::now(),
        });
        metrics::record_attempt(
            &self.ctx.provider,
            &self.ctx.model,
            self.ctx.tier,
            "success",
            duration.as_secs_f64(),
        );
    }

    fn finalize_failure(&mut self, error: &str, cancelled: bool) {
        self.finished = true;
        let duration = self.ctx.started.elapsed();
        self.ctx.recorder.record_failure(&AttemptFailure {
            provider: self.ctx.provider.clone(),
            model: self.ctx.model.clone(),
            tier: self.ctx.tier,
            error: error.to_string(),
            cancelled,
            duration,
            recorded_at: Utc::now(),
        });
        let outcome = if cancelled { "cancelled" } else { "error" };
        metrics::record_attempt(
            &self.ctx.provider,
            &self.ctx.model,
            self.ctx.tier,
            outcome,
            duration.as_secs_f64(),
        );
    }
}

impl Stream for ChatStream {
    type Item = Result<ChatCompletionChunk, RouterError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        if this.finished {
            return Poll::Ready(None);
        }

        // Cancellation between chunks terminates the stream; the in-flight
        // attempt gets its one trailing failure record.
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.finalize_failure("cancelled", true);
            return Poll::Ready(Some(Err(RouterError::Cancelled)));
        }

        if let Some(first) = this.first.take() {
            this.observe(&first);
            return Poll::Ready(Some(Ok(first)));
        }

        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.observe(&chunk);
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(error))) => {
                tracing::warn!(
                    provider = %this.ctx.provider,
                    model = %this.ctx.model,
                    error = %error,
                    "Committed stream failed mid-flight; not retrying"
                );
                this.finalize_failure(&error.to_string(), error.is_cancelled());
                Poll::Ready(Some(Err(RouterError::MidStream {
                    provider: this.ctx.provider.clone(),
                    source: error,
                })))
            }
            Poll::Ready(None) => {
                this.finalize_success();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Drop for ChatStream {
    fn drop(&mut self) {
        // A caller that walks away mid-stream still owes the recorder its
        // one entry for the committed attempt.
        if !self.finished {
            self.finalize_failure("stream dropped before completion", true);
        }
    }
}
