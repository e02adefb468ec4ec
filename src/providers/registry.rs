//! Provider registry: the full set of registered backends and per-request
//! candidate resolution.
//!
//! Registration is append-only and happens once at startup; after `build()`
//! the registry is immutable and safely shared across arbitrarily many
//! concurrent requests without locking (registration happens-before any
//! read by construction ordering).

use std::{collections::BTreeMap, sync::Arc};

use super::{Provider, Tier};

/// An ephemeral association of a provider with its ranking metadata,
/// produced per-request when resolving a model identifier.
#[derive(Clone)]
pub struct Candidate {
    pub provider: Arc<dyn Provider>,
    pub tier: Tier,
    pub priority: u32,
}

impl std::fmt::Debug for Candidate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Candidate")
            .field("provider", &self.provider.id())
            .field("tier", &self.tier)
            .field("priority", &self.priority)
            .finish()
    }
}

/// All candidates sharing one tier, in registration order.
#[derive(Debug, Clone)]
pub struct TierGroup {
    pub tier: Tier,
    pub candidates: Vec<Candidate>,
}

/// Immutable set of registered providers.
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn Provider>>,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder {
            providers: Vec::new(),
        }
    }

    /// Number of registered providers.
    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    /// All registered providers, in registration order.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Resolve the providers that serve `model`, grouped by ascending tier.
    ///
    /// Matching is a case-insensitive exact lookup against each provider's
    /// declared model set; providers with no declared support are excluded
    /// entirely. An empty result is not itself an error — the router turns
    /// it into one.
    pub fn resolve_candidates(&self, model: &str) -> Vec<TierGroup> {
        let mut groups: BTreeMap<Tier, Vec<Candidate>> = BTreeMap::new();

        for provider in &self.providers {
            if provider.supports_model(model) {
                let tier = provider.tier();
                groups.entry(tier).or_default().push(Candidate {
                    provider: Arc::clone(provider),
                    tier,
                    priority: provider.priority(),
                });
            }
        }

        groups
            .into_iter()
            .map(|(tier, candidates)| TierGroup { tier, candidates })
            .collect()
    }
}

/// Startup-time registration. Append-only; hot add/remove is out of scope.
pub struct RegistryBuilder {
    providers: Vec<Arc<dyn Provider>>,
}

impl RegistryBuilder {
    pub fn register(mut self, provider: Arc<dyn Provider>) -> Self {
        tracing::debug!(
            provider = provider.id(),
            tier = %provider.tier(),
            models = provider.supported_models().len(),
            "Registered provider"
        );
        self.providers.push(provider);
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            providers: self.providers,
        }
    }
}
