//! Unified request and response types for ALLM

use std::fmt;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, FailureKind};
use crate::message::{self, CanonicalMessage};
use crate::model::{ModelChain, ModelSpec};

/// Default max tokens when the caller does not set one
pub const DEFAULT_MAX_TOKENS: u32 = 1024;
/// Default sampling temperature
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Receives decoded text fragments in arrival order.
pub type OnToken = Box<dyn FnMut(&str) + Send>;

/// Unified generation request
pub struct GenerationRequest
{   /// Conversation, in order
    pub messages: Vec<CanonicalMessage>
  , /// Max tokens to generate, > 0
    pub max_tokens: u32
  , /// Sampling temperature in [0, 2]
    pub temperature: f32
  , /// Candidates to walk
    pub chain: ModelChain
  , /// Streaming callback; enables streaming when the adapter supports it
    pub on_token: Option<OnToken>
  , /// Limit on every wait for the vendor
    pub timeout: Option<Duration>
}

impl GenerationRequest
{   pub fn new(
      messages: Vec<CanonicalMessage>
    , chain: ModelChain
    ) -> Self
    {   GenerationRequest
        {   messages
          , max_tokens: DEFAULT_MAX_TOKENS
          , temperature: DEFAULT_TEMPERATURE
          , chain
          , on_token: None
          , timeout: None
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self
    {   self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self
    {   self.temperature = temperature;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self
    {   self.timeout = Some(timeout);
        self
    }

    pub fn with_on_token<F>(mut self, on_token: F) -> Self
    where F: FnMut(&str) + Send + 'static
    {   self.on_token = Some(Box::new(on_token));
        self
    }

    /// Check every caller-side invariant before any vendor is contacted.
    pub fn validate(&self) -> Result<(), Error>
    {   message::validate_messages(&self.messages)?;

        if self.max_tokens == 0
        {   return Err(Error::MalformedRequest(
              "max_tokens must be greater than zero".to_string()
            ));
        }

        if !(0.0..=2.0).contains(&self.temperature)
        {   return Err(Error::MalformedRequest(format!(
              "temperature {} is outside [0, 2]",
              self.temperature
            )));
        }

        Ok(())
    }
}

impl fmt::Debug for GenerationRequest
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   f.debug_struct("GenerationRequest")
          .field("messages", &self.messages)
          .field("max_tokens", &self.max_tokens)
          .field("temperature", &self.temperature)
          .field("chain", &self.chain)
          .field("streaming", &self.on_token.is_some())
          .field("timeout", &self.timeout)
          .finish()
    }
}

/// Token counts reported by the vendor
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage
{   pub input_tokens: Option<u32>
  , pub output_tokens: Option<u32>
}

/// How one attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome
{   Success
  , NetworkError
  , AuthError
  , RateLimited
  , InvalidResponse
}

impl Outcome
{   pub fn is_success(&self) -> bool
    {   *self == Outcome::Success
    }
}

impl From<FailureKind> for Outcome
{   fn from(kind: FailureKind) -> Self
    {   match kind
        {   FailureKind::NetworkError => Outcome::NetworkError
          , FailureKind::AuthError => Outcome::AuthError
          , FailureKind::RateLimited => Outcome::RateLimited
          , FailureKind::InvalidResponse => Outcome::InvalidResponse
        }
    }
}

impl fmt::Display for Outcome
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match self
        {   Outcome::Success => f.write_str("success")
          , Outcome::NetworkError => FailureKind::NetworkError.fmt(f)
          , Outcome::AuthError => FailureKind::AuthError.fmt(f)
          , Outcome::RateLimited => FailureKind::RateLimited.fmt(f)
          , Outcome::InvalidResponse => FailureKind::InvalidResponse.fmt(f)
        }
    }
}

/// One full request/response cycle against one candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord
{   pub model: ModelSpec
  , pub outcome: Outcome
  , pub latency_ms: u64
  , /// Vendor-supplied or transport detail for failed attempts
    pub detail: Option<String>
}

impl fmt::Display for AttemptRecord
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   match &self.detail
        {   Some(detail) => write!(
              f, "{} -> {} ({}) after {} ms",
              self.model, self.outcome, detail, self.latency_ms
            )
          , None => write!(
              f, "{} -> {} after {} ms",
              self.model, self.outcome, self.latency_ms
            )
        }
    }
}

/// Unified generation result
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationResult
{   /// Generated text
    pub text: String
  , /// Candidate that produced it
    pub model_used: ModelSpec
  , /// Every attempt made, failures first, the success last
    pub attempts: Vec<AttemptRecord>
  , /// Token usage, when the vendor reports it
    pub usage: Option<Usage>
}
