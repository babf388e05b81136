//! Model specs and the primary + fallback chain

use std::fmt;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::Provider;

/// A `provider/model` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelSpec
{   pub provider_id: String
  , pub model_name: String
}

impl ModelSpec
{   pub fn new(
      provider_id: impl Into<String>
    , model_name: impl Into<String>
    ) -> Self
    {   ModelSpec
        {   provider_id: provider_id.into()
          , model_name: model_name.into()
        }
    }

    /// Split a `provider/model` string. Syntax only; see [`ModelSpec::resolve`].
    pub fn parse(raw: &str) -> Result<Self, Error>
    {   let trimmed = raw.trim();
        if trimmed.is_empty()
        {   return Err(Error::InvalidConfiguration(
              "model string is empty".to_string()
            ));
        }

        let mut parts = trimmed.split('/');
        match (parts.next(), parts.next(), parts.next())
        {   (Some(provider), Some(model), None) => {
              let provider = provider.trim();
              let model = model.trim();
              if provider.is_empty() || model.is_empty()
              {   return Err(Error::InvalidConfiguration(format!(
                    "model string '{}' has an empty provider or model",
                    trimmed
                  )));
              }
              Ok(ModelSpec::new(provider, model))
            }
          , _ => Err(Error::InvalidConfiguration(format!(
              "model string '{}' must be 'provider/model' with exactly one '/'",
              trimmed
            )))
        }
    }

    /// Parse and check the provider against the registry.
    pub fn resolve(raw: &str) -> Result<Self, Error>
    {   let spec = Self::parse(raw)?;
        spec.provider()?;
        Ok(spec)
    }

    /// Registered provider for this spec.
    pub fn provider(&self) -> Result<Provider, Error>
    {   Provider::from_id(&self.provider_id)
          .ok_or_else(|| Error::UnknownProvider(
            self.provider_id.clone()
          ))
    }
}

impl fmt::Display for ModelSpec
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   write!(f, "{}/{}", self.provider_id, self.model_name)
    }
}

/// Ordered candidates for one generation call.
///
/// Duplicates are kept; a model listed twice is attempted twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelChain
{   pub primary: ModelSpec
  , pub fallbacks: Vec<ModelSpec>
}

impl ModelChain
{   pub fn new(
      primary: ModelSpec
    , fallbacks: Vec<ModelSpec>
    ) -> Self
    {   ModelChain
        {   primary
          , fallbacks
        }
    }

    /// Chain with no fallbacks
    pub fn single(primary: ModelSpec) -> Self
    {   Self::new(primary, vec![])
    }

    /// Build a chain from configuration strings.
    pub fn resolve<S: AsRef<str>>(
      primary: &str
    , fallbacks: &[S]
    ) -> Result<Self, Error>
    {   let primary = ModelSpec::resolve(primary)?;
        let fallbacks = fallbacks
          .iter()
          .map(|raw| ModelSpec::resolve(raw.as_ref()))
          .collect::<Result<Vec<_>, _>>()?;

        debug!(
          "Resolved model chain: primary {} with {} fallback(s)",
          primary,
          fallbacks.len()
        );
        Ok(ModelChain::new(primary, fallbacks))
    }

    /// `[primary, ...fallbacks]` in attempt order.
    pub fn candidates(&self)
      -> impl Iterator<Item = &ModelSpec>
    {   std::iter::once(&self.primary).chain(self.fallbacks.iter())
    }

    /// Number of candidates; never zero.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize
    {   1 + self.fallbacks.len()
    }
}
