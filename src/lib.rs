//! Tiered routing and fallback engine for OpenAI-compatible LLM gateways.
//!
//! Fronts a heterogeneous fleet of chat-completion backends behind a single
//! request surface. Providers are ranked into tiers (free/fast first, paid
//! and experimental behind them); each request walks the tiers in order,
//! shuffling within a tier, falling back on any failure until a candidate
//! succeeds or the set is exhausted. Streaming requests get the same policy
//! up to the moment the first chunk is delivered, after which the chosen
//! provider is committed and failures surface to the caller instead of
//! triggering another attempt.
//!
//! Every invoked candidate produces exactly one usage record via a
//! pluggable [`usage::UsageRecorder`], successful or not, giving billing
//! and diagnostics a complete per-attempt trail.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use strata::{
//!     api_types::{ChatRequest, Message},
//!     config::RoutingConfig,
//!     routing::TieredRouter,
//!     usage::TracingRecorder,
//! };
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RoutingConfig::from_file("providers.toml")?;
//! let registry = Arc::new(config.build_registry()?);
//! let router = TieredRouter::new(registry, Arc::new(TracingRecorder));
//!
//! let request = ChatRequest::new("gpt-4o", vec![Message::user("hello")]);
//! let result = router.complete(&request, &CancellationToken::new()).await?;
//! println!("{}", result.content);
//! # Ok(())
//! # }
//! ```

pub mod api_types;
pub mod config;
pub mod observability;
pub mod providers;
pub mod routing;
pub mod usage;

pub use providers::{Provider, ProviderError, ProviderRegistry, Tier};
pub use routing::{ChatStream, RouterError, TieredRouter};

#[cfg(test)]
mod tests;
