//! Gemini `generateContent` dialect

use serde::{Deserialize, Serialize};
use log::{debug, error};
use reqwest::StatusCode;

use crate::error::{AttemptFailure, Error};
use crate::message::{self, CanonicalMessage, Role};
use crate::request::Usage;
use super::{
  http, Completion, Dialect, Endpoint, GenerationConfig, HttpDialect
, HttpTarget, StreamEvent
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest
{   #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>
  , pub contents: Vec<Content>
  , pub generation_config: GenerationSettings
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemInstruction
{   pub parts: Vec<Part>
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Content
{   pub role: &'static str
  , pub parts: Vec<Part>
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Part
{   pub text: String
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationSettings
{   pub max_output_tokens: u32
  , pub temperature: f32
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse
{   #[serde(default)]
    candidates: Vec<Candidate>
  , #[serde(default)]
    usage_metadata: Option<UsageMetadata>
  , #[serde(default)]
    prompt_feedback: Option<PromptFeedback>
  , #[serde(default)]
    error: Option<ApiError>
}

#[derive(Debug, Clone, Deserialize)]
struct Candidate
{   #[serde(default)]
    content: Option<CandidateContent>
}

#[derive(Debug, Clone, Deserialize)]
struct CandidateContent
{   #[serde(default)]
    parts: Vec<CandidatePart>
}

#[derive(Debug, Clone, Deserialize)]
struct CandidatePart
{   #[serde(default)]
    text: Option<String>
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata
{   #[serde(default)]
    prompt_token_count: Option<u32>
  , #[serde(default)]
    candidates_token_count: Option<u32>
}

impl From<UsageMetadata> for Usage
{   fn from(usage: UsageMetadata) -> Self
    {   Usage
        {   input_tokens: usage.prompt_token_count
          , output_tokens: usage.candidates_token_count
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback
{   #[serde(default)]
    block_reason: Option<String>
}

#[derive(Debug, Clone, Deserialize)]
struct ApiError
{   #[serde(default)]
    message: String
  , #[serde(default)]
    status: String
}

fn classify_api_error(error: &ApiError) -> AttemptFailure
{   let detail = format!("{}: {}", error.status, error.message);
    match error.status.as_str()
    {   "UNAUTHENTICATED" | "PERMISSION_DENIED"
          => AttemptFailure::auth(detail)
      , "RESOURCE_EXHAUSTED" => AttemptFailure::rate_limited(detail)
      , "UNAVAILABLE" | "INTERNAL" | "DEADLINE_EXCEEDED"
          => AttemptFailure::network(detail)
      , _ => AttemptFailure::invalid_response(detail)
    }
}

/// Text of the first candidate, if it has any.
fn candidate_text(candidates: Vec<Candidate>) -> Option<String>
{   let texts: Vec<String> = candidates
      .into_iter()
      .next()?
      .content?
      .parts
      .into_iter()
      .filter_map(|p| p.text)
      .collect();
    if texts.is_empty()
    {   None
    } else
    {   Some(texts.concat())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeminiAdapter
{   target: HttpTarget
}

impl GeminiAdapter
{   pub fn new(target: HttpTarget) -> Self
    {   debug!("Creating GeminiAdapter");
        GeminiAdapter { target }
    }
}

impl Dialect for GeminiAdapter
{   type Payload = GenerateContentRequest;

    fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<GenerateContentRequest, Error>
    {   let (system, turns) = message::split_system(messages);
        if turns.is_empty()
        {   return Err(Error::MalformedRequest(
              "gemini requests need at least one user or assistant turn"
                .to_string()
            ));
        }

        Ok(GenerateContentRequest
        {   system_instruction: system.map(|text| SystemInstruction
            {   parts: vec![Part { text }]
            })
          , contents: turns
              .into_iter()
              .map(|m| Content
              {   role: match m.role
                  {   Role::Assistant => "model"
                    , _ => "user"
                  }
                , parts: vec![Part { text: m.content.clone() }]
              })
              .collect()
          , generation_config: GenerationSettings
            {   max_output_tokens: config.max_tokens
              , temperature: config.temperature
            }
        })
    }

    fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>
    {   let response: GenerateContentResponse
          = serde_json::from_str(body).map_err(|e| {
            error!("Parse error: {}", e);
            AttemptFailure::invalid_response(format!(
              "unexpected generateContent body: {}",
              e
            ))
          })?;

        if let Some(error) = &response.error
        {   return Err(classify_api_error(error));
        }

        let usage = response.usage_metadata.map(Usage::from);
        let blocked = response.prompt_feedback
          .and_then(|f| f.block_reason);
        match candidate_text(response.candidates)
        {   Some(text) => Ok(Completion { text, usage })
          , None => Err(AttemptFailure::invalid_response(match blocked
            {   Some(reason) => format!("prompt blocked: {}", reason)
              , None => "response contained no candidate text".to_string()
            }))
        }
    }

    fn supports_streaming(&self) -> bool
    {   self.target.streaming
    }
}

impl HttpDialect for GeminiAdapter
{   fn endpoint(&self, model: &str, stream: bool)
      -> Result<Endpoint, AttemptFailure>
    {   let key = self.target.require_key("gemini")?;
        let path = if stream
        {   format!("models/{}:streamGenerateContent?alt=sse", model)
        } else
        {   format!("models/{}:generateContent", model)
        };
        Ok(Endpoint
        {   url: self.target.url(&path)
          , headers: vec![("x-goog-api-key", key.to_string())]
        })
    }

    fn parse_stream_event(&self, _event: &str, data: &str)
      -> Result<Vec<StreamEvent>, AttemptFailure>
    {   let chunk: GenerateContentResponse
          = serde_json::from_str(data).map_err(|e| {
            AttemptFailure::invalid_response(format!(
              "unexpected stream chunk: {}",
              e
            ))
          })?;

        if let Some(error) = &chunk.error
        {   return Err(classify_api_error(error));
        }

        let mut events = Vec::new();
        if let Some(text) = candidate_text(chunk.candidates)
        {   events.push(StreamEvent::Delta(text));
        }
        if let Some(usage) = chunk.usage_metadata
        {   events.push(StreamEvent::Usage(usage.into()));
        }
        Ok(events)
    }

    fn classify_error(&self, status: StatusCode, body: &str)
      -> AttemptFailure
    {   if status == StatusCode::BAD_REQUEST
          && body.contains("API_KEY_INVALID")
        {   return AttemptFailure::auth(format!(
              "HTTP 400: {}",
              http::truncate(body)
            ));
        }
        http::classify_status(status, body)
    }

    fn stream_ends_at_eof(&self) -> bool
    {   true
    }
}
