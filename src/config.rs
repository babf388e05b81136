//! Configuration for ALLM providers and the model chain

use std::path::Path;
use std::time::Duration;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::factory::{AdapterFactory, ProviderCredentials};
use crate::model::ModelChain;
use crate::request::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use crate::Provider;

/// Provider configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig
{   /// Provider id (`openai`, `anthropic`, `gemini`, ...)
    pub name: String
  , /// Already-resolved API key
    #[serde(default)]
    pub api_key: Option<String>
  , /// API base URL (if custom)
    #[serde(default)]
    pub api_base: Option<String>
  , /// Disable streaming for this provider
    #[serde(default)]
    pub streaming: Option<bool>
}

/// Primary model plus fallbacks, as `provider/model` strings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig
{   pub primary: String
  , #[serde(default)]
    pub fallbacks: Vec<String>
}

impl ChainConfig
{   pub fn new(primary: impl Into<String>) -> Self
    {   ChainConfig
        {   primary: primary.into()
          , fallbacks: vec![]
        }
    }

    pub fn with_fallback(mut self, fallback: impl Into<String>) -> Self
    {   self.fallbacks.push(fallback.into());
        self
    }

    /// Build a fresh chain from the strings.
    pub fn resolve(&self) -> Result<ModelChain, Error>
    {   ModelChain::resolve(&self.primary, &self.fallbacks)
    }
}

/// Generation settings used when a call does not override them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationDefaults
{   pub max_tokens: u32
  , pub temperature: f32
  , /// Limit on every wait for a vendor, in seconds
    pub timeout_secs: Option<u64>
}

impl GenerationDefaults
{   pub fn timeout(&self) -> Option<Duration>
    {   self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for GenerationDefaults
{   fn default() -> Self
    {   GenerationDefaults
        {   max_tokens: DEFAULT_MAX_TOKENS
          , temperature: DEFAULT_TEMPERATURE
          , timeout_secs: Some(60)
        }
    }
}

/// ALLM configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AllmConfig
{   /// Provider configurations
    #[serde(default)]
    pub providers: Vec<ProviderConfig>
  , /// Model chain
    #[serde(default)]
    pub chain: ChainConfig
  , /// Generation defaults
    #[serde(default)]
    pub generation: GenerationDefaults
}

impl AllmConfig
{   pub fn from_json_str(json: &str) -> Result<Self, Error>
    {   serde_json::from_str(json).map_err(|e| {
          Error::InvalidConfiguration(format!("invalid config JSON: {}", e))
        })
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, Error>
    {   let path = path.as_ref();
        debug!("Loading config from {}", path.display());
        let json = std::fs::read_to_string(path).map_err(|e| {
          Error::InvalidConfiguration(format!(
            "cannot read {}: {}",
            path.display(),
            e
          ))
        })?;
        Self::from_json_str(&json)
    }

    /// Factory carrying every configured provider's credentials.
    pub fn factory(&self) -> Result<AdapterFactory, Error>
    {   let mut factory = AdapterFactory::new();
        for entry in &self.providers
        {   let provider = Provider::from_id(&entry.name)
              .ok_or_else(|| Error::UnknownProvider(entry.name.clone()))?;
            factory.set_credentials(provider, ProviderCredentials
            {   api_key: entry.api_key.clone()
              , api_base: entry.api_base.clone()
              , streaming: entry.streaming
            });
        }
        Ok(factory)
    }

    pub fn resolve_chain(&self) -> Result<ModelChain, Error>
    {   self.chain.resolve()
    }
}
