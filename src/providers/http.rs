//! Shared HTTP transport: request, timeout, status classification, SSE

use std::future::Future;
use std::time::Duration;
use eventsource_stream::{EventStreamError, Eventsource};
use futures::StreamExt;
use log::{debug, error, trace};
use reqwest::StatusCode;

use crate::error::AttemptFailure;
use crate::request::Usage;
use super::{Completion, HttpDialect, ProviderPayload, StreamEvent};

/// Longest vendor body kept as attempt detail
const DETAIL_LIMIT: usize = 512;

/// Where a provider lives and how to authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTarget
{   pub api_base: String
  , pub api_key: Option<String>
  , pub streaming: bool
}

impl HttpTarget
{   pub fn new(
      api_base: impl Into<String>
    , api_key: Option<String>
    ) -> Self
    {   HttpTarget
        {   api_base: api_base.into()
          , api_key
          , streaming: true
        }
    }

    pub fn url(&self, path: &str) -> String
    {   format!(
          "{}/{}",
          self.api_base.trim_end_matches('/'),
          path.trim_start_matches('/')
        )
    }

    /// Configured, non-blank key or an `AuthError`.
    pub fn require_key(&self, provider: &str)
      -> Result<&str, AttemptFailure>
    {   self.api_key
          .as_deref()
          .filter(|k| !k.trim().is_empty())
          .ok_or_else(|| {
            error!("No API key for provider: {}", provider);
            AttemptFailure::auth(format!(
              "no API key configured for {}",
              provider
            ))
          })
    }
}

/// Resolved request target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint
{   pub url: String
  , pub headers: Vec<(&'static str, String)>
}

/// Await `fut`, turning an expired timeout into a `NetworkError`.
pub(crate) async fn within<F: Future>(
  timeout: Option<Duration>
, fut: F
) -> Result<F::Output, AttemptFailure>
{   match timeout
    {   Some(limit) => tokio::time::timeout(limit, fut)
          .await
          .map_err(|_| {
            debug!("Timed out after {} ms", limit.as_millis());
            AttemptFailure::network(format!(
              "timed out after {} ms",
              limit.as_millis()
            ))
          })
      , None => Ok(fut.await)
    }
}

/// Default classification of a non-2xx status.
pub fn classify_status(status: StatusCode, body: &str)
  -> AttemptFailure
{   let detail = format!("HTTP {}: {}", status.as_u16(), truncate(body));
    match status.as_u16()
    {   401 | 403 => AttemptFailure::auth(detail)
      , 429 => AttemptFailure::rate_limited(detail)
      , 408 | 500..=599 => AttemptFailure::network(detail)
      , _ => AttemptFailure::invalid_response(detail)
    }
}

pub(crate) fn truncate(body: &str) -> String
{   let body = body.trim();
    if body.chars().count() <= DETAIL_LIMIT
    {   body.to_string()
    } else
    {   let head: String = body.chars().take(DETAIL_LIMIT).collect();
        format!("{}...", head)
    }
}

fn describe(e: &reqwest::Error) -> String
{   if e.is_timeout()
    {   format!("request timed out: {}", e)
    } else if e.is_connect()
    {   format!("connection failed: {}", e)
    } else
    {   e.to_string()
    }
}

/// A missing `Content-Type` is read as SSE.
fn is_event_stream(response: &reqwest::Response) -> bool
{   response.headers()
      .get(reqwest::header::CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .map_or(true, |v| v.contains("text/event-stream"))
}

fn merge_usage(current: Option<Usage>, update: Usage) -> Usage
{   let base = current.unwrap_or_default();
    Usage
    {   input_tokens: update.input_tokens.or(base.input_tokens)
      , output_tokens: update.output_tokens.or(base.output_tokens)
    }
}

async fn post(
  client: &reqwest::Client
, endpoint: &Endpoint
, body: &serde_json::Value
, timeout: Option<Duration>
) -> Result<reqwest::Response, AttemptFailure>
{   trace!("POST {}", endpoint.url);
    let mut builder = client.post(&endpoint.url).json(body);
    for (name, value) in &endpoint.headers
    {   builder = builder.header(*name, value);
    }

    within(timeout, builder.send())
      .await?
      .map_err(|e| {
        error!("HTTP error: {}", e);
        AttemptFailure::network(describe(&e))
      })
}

/// Non-streaming request against an HTTP dialect.
pub(crate) async fn execute<D: HttpDialect>(
  dialect: &D
, client: &reqwest::Client
, payload: &ProviderPayload
, timeout: Option<Duration>
) -> Result<Completion, AttemptFailure>
{   let endpoint = dialect.endpoint(&payload.model, false)?;
    let response = post(client, &endpoint, &payload.body, timeout).await?;

    let status = response.status();
    trace!("Response status: {}", status);

    let body = within(timeout, response.text())
      .await?
      .map_err(|e| {
        error!("Failed to read response body: {}", e);
        AttemptFailure::network(describe(&e))
      })?;
    trace!("Response body: {}", body);

    if !status.is_success()
    {   return Err(dialect.classify_error(status, &body));
    }

    dialect.from_response(&body)
}

/// Streaming request: each decoded fragment is handed to `on_token`
/// before the next event is read.
pub(crate) async fn execute_streaming<D: HttpDialect>(
  dialect: &D
, client: &reqwest::Client
, payload: &ProviderPayload
, timeout: Option<Duration>
, on_token: &mut (dyn FnMut(&str) + Send)
) -> Result<Completion, AttemptFailure>
{   let endpoint = dialect.endpoint(&payload.model, true)?;
    let response = post(client, &endpoint, &payload.body, timeout).await?;

    let status = response.status();
    trace!("Stream status: {}", status);
    if !status.is_success()
    {   let body = within(timeout, response.text())
          .await?
          .unwrap_or_default();
        return Err(dialect.classify_error(status, &body));
    }

    if !is_event_stream(&response)
    {   debug!("Streaming request answered without SSE, decoding as a whole body");
        let body = within(timeout, response.text())
          .await?
          .map_err(|e| AttemptFailure::network(describe(&e)))?;
        let completion = dialect.from_response(&body)?;
        if !completion.text.is_empty()
        {   on_token(&completion.text);
        }
        return Ok(completion);
    }

    let mut events = Box::pin(response.bytes_stream().eventsource());
    let mut text = String::new();
    let mut usage: Option<Usage> = None;

    loop
    {   let event = match within(timeout, events.next()).await?
        {   Some(Ok(event)) => event
          , Some(Err(EventStreamError::Transport(e))) => {
              error!("Stream interrupted: {}", e);
              return Err(AttemptFailure::network(format!(
                "stream interrupted: {}",
                describe(&e)
              )));
            }
          , Some(Err(e)) => {
              return Err(AttemptFailure::invalid_response(format!(
                "undecodable stream event: {}",
                e
              )));
            }
          , None if dialect.stream_ends_at_eof() => break
          , None => {
              return Err(AttemptFailure::network(
                "stream ended before completion"
              ));
            }
        };

        trace!("Stream event '{}': {}", event.event, event.data);
        if event.data.trim().is_empty()
        {   continue;
        }

        for item in dialect.parse_stream_event(&event.event, &event.data)?
        {   match item
            {   StreamEvent::Delta(fragment) => {
                  if !fragment.is_empty()
                  {   on_token(&fragment);
                      text.push_str(&fragment);
                  }
                }
              , StreamEvent::Usage(update) => {
                  usage = Some(merge_usage(usage, update));
                }
              , StreamEvent::Done => {
                  debug!("Stream complete ({} bytes)", text.len());
                  return Ok(Completion { text, usage });
                }
            }
        }
    }

    if text.is_empty()
    {   return Err(AttemptFailure::invalid_response(
          "stream carried no candidate text"
        ));
    }
    debug!("Stream closed by server ({} bytes)", text.len());
    Ok(Completion { text, usage })
}
