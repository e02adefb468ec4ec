//! Declarative provider configuration.
//!
//! Deserialized from TOML at startup and turned into an immutable
//! [`ProviderRegistry`]. The provider set is fixed for the process lifetime;
//! changing it means restarting with a new file.
//!
//! ```toml
//! [providers.local-ollama]
//! type = "open_ai"
//! base_url = "http://localhost:11434/v1"
//! tier = 1
//! models = ["llama3.1-8b"]
//!
//! [providers.openai]
//! type = "open_ai"
//! base_url = "https://api.openai.com/v1"
//! api_key = "sk-..."
//! tier = 2
//! priority = 10
//! models = ["gpt-4o", "gpt-4o-mini"]
//! ```

use std::{collections::BTreeMap, path::Path, sync::Arc};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::providers::{OpenAiCompatibleProvider, Provider, ProviderRegistry, Tier};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("provider '{0}' declares no models")]
    NoModels(String),

    #[error("no providers configured")]
    Empty,
}

/// Root configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Keyed by provider id; BTreeMap keeps registration order stable.
    pub providers: BTreeMap<String, ProviderConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProviderConfig {
    OpenAi {
        base_url: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
        tier: Tier,
        #[serde(default)]
        priority: u32,
        models: Vec<String>,
    },
}

impl RoutingConfig {
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml(&raw)
    }

    /// Validate the configuration and build the provider registry.
    pub fn build_registry(&self) -> Result<ProviderRegistry, ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::Empty);
        }

        let mut builder = ProviderRegistry::builder();
        for (id, config) in &self.providers {
            match config {
                ProviderConfig::OpenAi {
                    base_url,
                    api_key,
                    tier,
                    priority,
                    models,
                } => {
                    if models.is_empty() {
                        return Err(ConfigError::NoModels(id.clone()));
                    }
                    let provider: Arc<dyn Provider> = Arc::new(OpenAiCompatibleProvider::new(
                        id.clone(),
                        *tier,
                        *priority,
                        models.clone(),
                        base_url.clone(),
                        api_key.clone(),
                    ));
                    builder = builder.register(provider);
                }
            }
        }
        Ok(builder.build())
    }
}
