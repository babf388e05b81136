//! Anthropic Messages dialect
//!
//! The message array has no `system` role: system turns are merged into
//! the top-level `system` field and every other turn carries its text as
//! an array of typed content blocks.

use serde::{Deserialize, Serialize};
use log::{debug, error};
use reqwest::StatusCode;

use crate::error::{AttemptFailure, Error};
use crate::message::{self, CanonicalMessage};
use crate::request::Usage;
use super::{
  http, Completion, Dialect, Endpoint, GenerationConfig, HttpDialect
, HttpTarget, StreamEvent
};

pub const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagesRequest
{   pub model: String
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub system: Option<String>
  , pub messages: Vec<AnthropicMessage>
  , pub max_tokens: u32
  , pub temperature: f32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnthropicMessage
{   pub role: String
  , pub content: Vec<TextBlock>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextBlock
{   #[serde(rename = "type")]
    pub kind: &'static str
  , pub text: String
}

#[derive(Debug, Clone, Deserialize)]
struct MessagesResponse
{   #[serde(default)]
    content: Vec<ResponseBlock>
  , #[serde(default)]
    usage: Option<AnthropicUsage>
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseBlock
{   #[serde(rename = "type")]
    kind: String
  , #[serde(default)]
    text: Option<String>
}

#[derive(Debug, Clone, Copy, Deserialize)]
struct AnthropicUsage
{   #[serde(default)]
    input_tokens: Option<u32>
  , #[serde(default)]
    output_tokens: Option<u32>
}

impl From<AnthropicUsage> for Usage
{   fn from(usage: AnthropicUsage) -> Self
    {   Usage
        {   input_tokens: usage.input_tokens
          , output_tokens: usage.output_tokens
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct StreamPayload
{   #[serde(rename = "type")]
    kind: String
  , #[serde(default)]
    message: Option<StartMessage>
  , #[serde(default)]
    delta: Option<StreamDelta>
  , #[serde(default)]
    usage: Option<AnthropicUsage>
  , #[serde(default)]
    error: Option<ApiError>
}

#[derive(Debug, Clone, Deserialize)]
struct StartMessage
{   #[serde(default)]
    usage: Option<AnthropicUsage>
}

#[derive(Debug, Clone, Deserialize)]
struct StreamDelta
{   #[serde(default, rename = "type")]
    kind: Option<String>
  , #[serde(default)]
    text: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError
{   #[serde(default, rename = "type")]
    kind: String
  , #[serde(default)]
    message: String
}

fn classify_error_type(error: &ApiError) -> AttemptFailure
{   let detail = format!("{}: {}", error.kind, error.message);
    match error.kind.as_str()
    {   "authentication_error" | "permission_error"
          => AttemptFailure::auth(detail)
      , "rate_limit_error" | "overloaded_error"
          => AttemptFailure::rate_limited(detail)
      , "api_error" | "timeout_error"
          => AttemptFailure::network(detail)
      , _ => AttemptFailure::invalid_response(detail)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicAdapter
{   target: HttpTarget
}

impl AnthropicAdapter
{   pub fn new(target: HttpTarget) -> Self
    {   debug!("Creating AnthropicAdapter");
        AnthropicAdapter { target }
    }
}

impl Dialect for AnthropicAdapter
{   type Payload = MessagesRequest;

    fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<MessagesRequest, Error>
    {   let (system, turns) = message::split_system(messages);
        if turns.is_empty()
        {   return Err(Error::MalformedRequest(
              "anthropic requests need at least one user or assistant turn"
                .to_string()
            ));
        }

        Ok(MessagesRequest
        {   model: config.model.clone()
          , system
          , messages: turns
              .into_iter()
              .map(|m| AnthropicMessage
              {   role: m.role.as_str().to_string()
                , content: vec![
                    TextBlock
                    {   kind: "text"
                      , text: m.content.clone()
                    }
                  ]
              })
              .collect()
          , max_tokens: config.max_tokens
          , temperature: config.temperature
          , stream: config.stream.then_some(true)
        })
    }

    fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>
    {   let response: MessagesResponse
          = serde_json::from_str(body).map_err(|e| {
            error!("Parse error: {}", e);
            AttemptFailure::invalid_response(format!(
              "unexpected messages body: {}",
              e
            ))
          })?;

        let texts: Vec<String> = response.content
          .into_iter()
          .filter(|b| b.kind == "text")
          .filter_map(|b| b.text)
          .collect();
        if texts.is_empty()
        {   return Err(AttemptFailure::invalid_response(
              "response contained no text blocks"
            ));
        }

        Ok(Completion
        {   text: texts.concat()
          , usage: response.usage.map(Usage::from)
        })
    }

    fn supports_streaming(&self) -> bool
    {   self.target.streaming
    }
}

impl HttpDialect for AnthropicAdapter
{   fn endpoint(&self, _model: &str, _stream: bool)
      -> Result<Endpoint, AttemptFailure>
    {   let key = self.target.require_key("anthropic")?;
        Ok(Endpoint
        {   url: self.target.url("messages")
          , headers: vec![
              ("x-api-key", key.to_string())
            , ("anthropic-version", ANTHROPIC_VERSION.to_string())
            ]
        })
    }

    fn parse_stream_event(&self, _event: &str, data: &str)
      -> Result<Vec<StreamEvent>, AttemptFailure>
    {   let payload: StreamPayload
          = serde_json::from_str(data).map_err(|e| {
            AttemptFailure::invalid_response(format!(
              "unexpected stream event: {}",
              e
            ))
          })?;

        let events = match payload.kind.as_str()
        {   "message_start" => payload.message
              .and_then(|m| m.usage)
              .map(|u| vec![StreamEvent::Usage(u.into())])
              .unwrap_or_default()
          , "content_block_delta" => payload.delta
              .filter(|d| d.kind.as_deref() == Some("text_delta"))
              .and_then(|d| d.text)
              .map(|t| vec![StreamEvent::Delta(t)])
              .unwrap_or_default()
          , "message_delta" => payload.usage
              .map(|u| vec![StreamEvent::Usage(u.into())])
              .unwrap_or_default()
          , "message_stop" => vec![StreamEvent::Done]
          , "error" => {
              let error = payload.error.unwrap_or(ApiError
              {   kind: "unknown_error".to_string()
                , message: data.to_string()
              });
              return Err(classify_error_type(&error));
            }
          , _ => vec![]
        };
        Ok(events)
    }

    fn classify_error(&self, status: StatusCode, body: &str)
      -> AttemptFailure
    {   if status.as_u16() == 529
        {   return AttemptFailure::rate_limited(format!(
              "HTTP 529 (overloaded): {}",
              http::truncate(body)
            ));
        }
        http::classify_status(status, body)
    }
}
