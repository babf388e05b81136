//! LLM provider dialects
//!
//! Each dialect translates canonical messages into one vendor's wire
//! payload and back. `Adapter` is the closed set the orchestrator
//! dispatches over.

pub mod anthropic;
pub mod gemini;
pub mod http;
pub mod mock;
pub mod openai;

use std::time::Duration;
use log::trace;
use reqwest::StatusCode;
use serde::Serialize;

use crate::error::{AttemptFailure, Error};
use crate::message::CanonicalMessage;
use crate::request::Usage;
use crate::DialectKind;

// Re-export for convenience
pub use anthropic::AnthropicAdapter;
pub use gemini::GeminiAdapter;
pub use http::{Endpoint, HttpTarget};
pub use mock::{MockAdapter, MockReply};
pub use openai::OpenAiAdapter;

/// Per-attempt settings handed to `to_payload`.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig
{   pub model: String
  , pub max_tokens: u32
  , pub temperature: f32
  , pub stream: bool
}

/// Text decoded from a vendor response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion
{   pub text: String
  , pub usage: Option<Usage>
}

/// One decoded item from a streaming response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent
{   Delta(String)
  , Usage(Usage)
  , Done
}

/// Encoded vendor payload. Only adapters read its body.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderPayload
{   pub(crate) model: String
  , pub(crate) stream: bool
  , pub(crate) body: serde_json::Value
}

impl ProviderPayload
{   pub fn as_json(&self) -> &serde_json::Value
    {   &self.body
    }

    pub fn is_streaming(&self) -> bool
    {   self.stream
    }
}

/// Translation contract shared by every dialect.
pub trait Dialect: Send + Sync
{   type Payload: Serialize;

    fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<Self::Payload, Error>;

    fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>;

    fn supports_streaming(&self) -> bool;
}

/// Dialects reached over HTTP.
pub trait HttpDialect: Dialect
{   /// URL and headers; fails with `AuthError` when a key is missing.
    fn endpoint(&self, model: &str, stream: bool)
      -> Result<Endpoint, AttemptFailure>;

    /// Decode one SSE event.
    fn parse_stream_event(&self, event: &str, data: &str)
      -> Result<Vec<StreamEvent>, AttemptFailure>;

    fn classify_error(&self, status: StatusCode, body: &str)
      -> AttemptFailure
    {   http::classify_status(status, body)
    }

    /// Whether a stream may end without an explicit terminal event.
    fn stream_ends_at_eof(&self) -> bool
    {   false
    }
}

fn encode<D: Dialect>(
  dialect: &D
, messages: &[CanonicalMessage]
, config: &GenerationConfig
) -> Result<ProviderPayload, Error>
{   let payload = dialect.to_payload(messages, config)?;
    let body = serde_json::to_value(&payload).map_err(|e| {
      Error::MalformedRequest(format!("cannot encode payload: {}", e))
    })?;
    trace!("Encoded payload for {}: {}", config.model, body);
    Ok(ProviderPayload
    {   model: config.model.clone()
      , stream: config.stream
      , body
    })
}

/// One adapter per vendor dialect.
#[derive(Debug, Clone)]
pub enum Adapter
{   OpenAi(OpenAiAdapter)
  , Anthropic(AnthropicAdapter)
  , Gemini(GeminiAdapter)
  , Mock(MockAdapter)
}

impl Adapter
{   pub fn dialect(&self) -> DialectKind
    {   match self
        {   Adapter::OpenAi(_) => DialectKind::OpenAiCompatible
          , Adapter::Anthropic(_) => DialectKind::Anthropic
          , Adapter::Gemini(_) => DialectKind::Gemini
          , Adapter::Mock(_) => DialectKind::Mock
        }
    }

    pub fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<ProviderPayload, Error>
    {   match self
        {   Adapter::OpenAi(a) => encode(a, messages, config)
          , Adapter::Anthropic(a) => encode(a, messages, config)
          , Adapter::Gemini(a) => encode(a, messages, config)
          , Adapter::Mock(a) => encode(a, messages, config)
        }
    }

    pub fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>
    {   match self
        {   Adapter::OpenAi(a) => a.from_response(body)
          , Adapter::Anthropic(a) => a.from_response(body)
          , Adapter::Gemini(a) => a.from_response(body)
          , Adapter::Mock(a) => a.from_response(body)
        }
    }

    pub fn supports_streaming(&self) -> bool
    {   match self
        {   Adapter::OpenAi(a) => a.supports_streaming()
          , Adapter::Anthropic(a) => a.supports_streaming()
          , Adapter::Gemini(a) => a.supports_streaming()
          , Adapter::Mock(a) => a.supports_streaming()
        }
    }

    /// One request, one full response.
    pub async fn send(
      &self
    , client: &reqwest::Client
    , payload: &ProviderPayload
    , timeout: Option<Duration>
    ) -> Result<Completion, AttemptFailure>
    {   match self
        {   Adapter::OpenAi(a)
              => http::execute(a, client, payload, timeout).await
          , Adapter::Anthropic(a)
              => http::execute(a, client, payload, timeout).await
          , Adapter::Gemini(a)
              => http::execute(a, client, payload, timeout).await
          , Adapter::Mock(a) => a.respond(payload, timeout).await
        }
    }

    /// Streamed response; every fragment goes to `on_token` as it arrives.
    pub async fn send_streaming(
      &self
    , client: &reqwest::Client
    , payload: &ProviderPayload
    , timeout: Option<Duration>
    , on_token: &mut (dyn FnMut(&str) + Send)
    ) -> Result<Completion, AttemptFailure>
    {   match self
        {   Adapter::OpenAi(a) => {
              http::execute_streaming(
                a, client, payload, timeout, on_token
              ).await
            }
          , Adapter::Anthropic(a) => {
              http::execute_streaming(
                a, client, payload, timeout, on_token
              ).await
            }
          , Adapter::Gemini(a) => {
              http::execute_streaming(
                a, client, payload, timeout, on_token
              ).await
            }
          , Adapter::Mock(a) => {
              a.respond_streaming(payload, timeout, on_token).await
            }
        }
    }
}
