//! Builds the adapter for a model spec

use std::collections::HashMap;
use log::debug;

use crate::error::Error;
use crate::model::ModelSpec;
use crate::providers::{
  Adapter, AnthropicAdapter, GeminiAdapter, HttpTarget, MockAdapter
, OpenAiAdapter
};
use crate::{DialectKind, Provider};

/// Already-resolved credentials for one provider
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderCredentials
{   pub api_key: Option<String>
  , /// Overrides the provider's default base URL
    pub api_base: Option<String>
  , /// `Some(false)` forces non-streaming requests
    pub streaming: Option<bool>
}

impl ProviderCredentials
{   pub fn with_key(api_key: impl Into<String>) -> Self
    {   ProviderCredentials
        {   api_key: Some(api_key.into())
          , ..Default::default()
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self
    {   self.api_base = Some(api_base.into());
        self
    }

    pub fn with_streaming(mut self, streaming: bool) -> Self
    {   self.streaming = Some(streaming);
        self
    }
}

/// Maps a `ModelSpec` to its adapter.
///
/// Unknown provider ids are an error; there is no default dialect.
#[derive(Debug, Clone, Default)]
pub struct AdapterFactory
{   credentials: HashMap<Provider, ProviderCredentials>
  , mocks: HashMap<String, MockAdapter>
}

impl AdapterFactory
{   pub fn new() -> Self
    {   Self::default()
    }

    pub fn with_credentials(
      mut self
    , provider: Provider
    , credentials: ProviderCredentials
    ) -> Self
    {   self.set_credentials(provider, credentials);
        self
    }

    pub fn set_credentials(
      &mut self
    , provider: Provider
    , credentials: ProviderCredentials
    )
    {   debug!("Setting credentials for {}", provider);
        self.credentials.insert(provider, credentials);
    }

    pub fn credentials(&self, provider: Provider)
      -> Option<&ProviderCredentials>
    {   self.credentials.get(&provider)
    }

    /// Serve `mock/<model_name>` with this adapter instead of `Echo`.
    pub fn with_mock(
      mut self
    , model_name: impl Into<String>
    , adapter: MockAdapter
    ) -> Self
    {   self.mocks.insert(model_name.into(), adapter);
        self
    }

    fn target(&self, provider: Provider) -> HttpTarget
    {   let credentials = self.credentials.get(&provider);
        let api_base = credentials
          .and_then(|c| c.api_base.clone())
          .unwrap_or_else(|| provider.default_api_base().to_string());
        let mut target = HttpTarget::new(
          api_base,
          credentials.and_then(|c| c.api_key.clone())
        );
        target.streaming = credentials
          .and_then(|c| c.streaming)
          .unwrap_or(true);
        target
    }

    pub fn build(&self, spec: &ModelSpec) -> Result<Adapter, Error>
    {   let provider = spec.provider()?;
        let adapter = match provider.dialect()
        {   DialectKind::OpenAiCompatible => Adapter::OpenAi(
              OpenAiAdapter::new(provider, self.target(provider))
            )
          , DialectKind::Anthropic => Adapter::Anthropic(
              AnthropicAdapter::new(self.target(provider))
            )
          , DialectKind::Gemini => Adapter::Gemini(
              GeminiAdapter::new(self.target(provider))
            )
          , DialectKind::Mock => Adapter::Mock(
              self.mocks
                .get(&spec.model_name)
                .cloned()
                .unwrap_or_default()
            )
        };
        debug!("Built {:?} adapter for {}", adapter.dialect(), spec);
        Ok(adapter)
    }
}
