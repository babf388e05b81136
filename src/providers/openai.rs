use serde::{Deserialize, Serialize};
use log::{debug, error};

use crate::error::{AttemptFailure, Error};
use crate::message::CanonicalMessage;
use crate::request::Usage;
use crate::Provider;
use super::{
  Completion, Dialect, Endpoint, GenerationConfig, HttpDialect
, HttpTarget, StreamEvent
};

/// Which body field carries the output limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenField
{   MaxTokens
  , MaxCompletionTokens
}

// ===== Message Types =====

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage
{   pub role: String
  , pub content: String
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest
{   pub model: String
  , pub messages: Vec<ChatMessage>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub max_completion_tokens: Option<u32>
  , pub temperature: f32
  , #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse
{   #[serde(default)]
    pub choices: Vec<Choice>
  , #[serde(default)]
    pub usage: Option<ChatUsage>
}

#[derive(Debug, Clone, Deserialize)]
pub struct Choice
{   pub message: ResponseMessage
  , #[serde(default)]
    pub finish_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage
{   #[serde(default)]
    pub content: Option<String>
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChatUsage
{   #[serde(default)]
    pub prompt_tokens: Option<u32>
  , #[serde(default)]
    pub completion_tokens: Option<u32>
}

impl From<ChatUsage> for Usage
{   fn from(usage: ChatUsage) -> Self
    {   Usage
        {   input_tokens: usage.prompt_tokens
          , output_tokens: usage.completion_tokens
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ChatChunk
{   #[serde(default)]
    choices: Vec<ChunkChoice>
  , #[serde(default)]
    usage: Option<ChatUsage>
  , #[serde(default)]
    error: Option<ApiError>
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkChoice
{   #[serde(default)]
    delta: Option<ChunkDelta>
}

#[derive(Debug, Clone, Deserialize)]
struct ChunkDelta
{   #[serde(default)]
    content: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError
{   #[serde(default)]
    message: Option<String>
  , #[serde(default, rename = "type")]
    kind: Option<String>
  , #[serde(default)]
    code: Option<serde_json::Value>
}

fn classify_api_error(error: &ApiError) -> AttemptFailure
{   let kind = error.kind.clone().unwrap_or_default();
    let code = error.code
      .as_ref()
      .map(|c| c.to_string())
      .unwrap_or_default();
    let detail = format!(
      "{} ({} {})",
      error.message.as_deref().unwrap_or("stream error"),
      kind,
      code
    );
    let tag = format!("{} {}", kind, code);

    if tag.contains("rate_limit") || tag.contains("quota")
    {   AttemptFailure::rate_limited(detail)
    } else if tag.contains("auth") || tag.contains("api_key")
    {   AttemptFailure::auth(detail)
    } else if tag.contains("server_error") || tag.contains("overloaded")
    {   AttemptFailure::network(detail)
    } else
    {   AttemptFailure::invalid_response(detail)
    }
}

// ===== Adapter =====

/// Chat-completions dialect shared by OpenAI, Groq, DeepSeek, Mistral,
/// OpenRouter and local servers. System messages stay in the list.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiAdapter
{   provider: Provider
  , target: HttpTarget
  , token_field: TokenField
}

impl OpenAiAdapter
{   pub fn new(provider: Provider, target: HttpTarget) -> Self
    {   debug!("Creating OpenAiAdapter for {}", provider);
        OpenAiAdapter
        {   provider
          , target
          , token_field: provider.token_field()
        }
    }

    pub fn provider(&self) -> Provider
    {   self.provider
    }
}

impl Dialect for OpenAiAdapter
{   type Payload = ChatRequest;

    fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<ChatRequest, Error>
    {   let (max_tokens, max_completion_tokens) = match self.token_field
        {   TokenField::MaxTokens => (Some(config.max_tokens), None)
          , TokenField::MaxCompletionTokens
              => (None, Some(config.max_tokens))
        };

        Ok(ChatRequest
        {   model: config.model.clone()
          , messages: messages
              .iter()
              .map(|m| ChatMessage
              {   role: m.role.as_str().to_string()
                , content: m.content.clone()
              })
              .collect()
          , max_tokens
          , max_completion_tokens
          , temperature: config.temperature
          , stream: config.stream.then_some(true)
        })
    }

    fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>
    {   let chat_response: ChatResponse
          = serde_json::from_str(body).map_err(|e| {
            error!("Parse error: {}", e);
            AttemptFailure::invalid_response(format!(
              "unexpected chat completion body: {}",
              e
            ))
          })?;

        let usage = chat_response.usage.map(Usage::from);
        let choice = chat_response.choices
          .into_iter()
          .next()
          .ok_or_else(|| {
            error!("No choices in response");
            AttemptFailure::invalid_response(
              "API response contained no choices"
            )
          })?;

        let text = choice.message.content.ok_or_else(|| {
          AttemptFailure::invalid_response(
            "first choice carries no text content"
          )
        })?;

        Ok(Completion { text, usage })
    }

    fn supports_streaming(&self) -> bool
    {   self.target.streaming
    }
}

impl HttpDialect for OpenAiAdapter
{   fn endpoint(&self, _model: &str, _stream: bool)
      -> Result<Endpoint, AttemptFailure>
    {   let key = if self.provider.requires_api_key()
        {   Some(self.target.require_key(self.provider.id())?)
        } else
        {   self.target.api_key.as_deref()
        };

        let headers = key
          .map(|k| vec![("Authorization", format!("Bearer {}", k))])
          .unwrap_or_default();

        Ok(Endpoint
        {   url: self.target.url("chat/completions")
          , headers
        })
    }

    fn parse_stream_event(&self, _event: &str, data: &str)
      -> Result<Vec<StreamEvent>, AttemptFailure>
    {   if data.trim() == "[DONE]"
        {   return Ok(vec![StreamEvent::Done]);
        }

        let chunk: ChatChunk = serde_json::from_str(data).map_err(|e| {
          AttemptFailure::invalid_response(format!(
            "unexpected stream chunk: {}",
            e
          ))
        })?;

        if let Some(error) = &chunk.error
        {   return Err(classify_api_error(error));
        }

        let mut events: Vec<StreamEvent> = chunk.choices
          .into_iter()
          .filter_map(|c| c.delta.and_then(|d| d.content))
          .map(StreamEvent::Delta)
          .collect();
        if let Some(usage) = chunk.usage
        {   events.push(StreamEvent::Usage(usage.into()));
        }
        Ok(events)
    }
}
