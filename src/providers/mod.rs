//! Provider backends behind a uniform capability interface.
//!
//! The gateway fronts dozens of heterogeneous backends (REST JSON, streaming
//! SSE, browser automation). Each is a [`Provider`] implementation; the
//! router is written once against the trait and is oblivious to any
//! backend's quirks. Providers are registered into a [`ProviderRegistry`]
//! at startup and are immutable for the process lifetime.

pub mod error;
pub mod open_ai;
pub mod registry;

use std::pin::Pin;

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub use error::ProviderError;
pub use open_ai::OpenAiCompatibleProvider;
pub use registry::{Candidate, ProviderRegistry, RegistryBuilder, TierGroup};

use crate::api_types::{ChatCompletionChunk, ChatCompletionResult, ChatRequest};

/// Ordinal provider ranking. Lower tiers are tried first.
///
/// Tiers encode a deliberate cost/capability policy: tier 1 is typically
/// free/fast backends, ascending through paid, slow, and experimental
/// (e.g. browser-automation) backends.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Tier(pub u8);

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A streaming completion: a finite, ordered, non-restartable sequence of
/// chunks. Terminated by a chunk carrying a finish reason or by exhaustion.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk, ProviderError>> + Send>>;

/// Trait for LLM provider backends.
///
/// Metadata (`id`, `tier`, `priority`, `supported_models`) is static for the
/// provider's lifetime and consumed by the registry. Invocation methods
/// receive the caller's cancellation token; implementations should abandon
/// in-flight work when it fires, though the router also races every call
/// against the token itself.
///
/// Each provider owns whatever internal resources it needs (HTTP client,
/// browser session). The router treats these as opaque; pooling and reuse
/// are the provider's concern.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider identifier.
    fn id(&self) -> &str;

    /// Ranking tier; lower is tried first.
    fn tier(&self) -> Tier;

    /// Intra-tier weight, carried as candidate metadata for diagnostics.
    /// Candidate ordering within a tier is a uniform shuffle regardless.
    fn priority(&self) -> u32 {
        0
    }

    /// The exact model identifiers this provider serves.
    fn supported_models(&self) -> &[String];

    /// Whether this provider serves `model`. Exact match, case-insensitive;
    /// there is no wildcard or prefix matching.
    fn supports_model(&self, model: &str) -> bool {
        self.supported_models()
            .iter()
            .any(|m| m.eq_ignore_ascii_case(model))
    }

    /// Perform a blocking chat completion.
    async fn chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChatCompletionResult, ProviderError>;

    /// Open a streaming chat completion.
    ///
    /// The returned stream must be lazy enough that failing to produce a
    /// first chunk surfaces as an error from the first poll, not from this
    /// call alone; the router treats "first element" as the fallback commit
    /// point.
    async fn stream_chat(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ChunkStream, ProviderError>;
}
