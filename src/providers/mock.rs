//! Offline dialect for exercising chain logic without credentials

use std::time::Duration;
use serde::{Deserialize, Serialize};
use log::{debug, trace};

use crate::error::{AttemptFailure, Error, FailureKind};
use crate::message::{self, CanonicalMessage};
use super::{http, Completion, Dialect, GenerationConfig, ProviderPayload};

/// What a mock candidate answers with.
#[derive(Debug, Clone, PartialEq)]
pub enum MockReply
{   /// Repeat the last user message
    Echo
  , Fixed(String)
  , /// Streamed one by one, concatenated otherwise
    Fragments(Vec<String>)
  , Fail(FailureKind)
  , /// Deliver the fragments, then fail mid-stream
    FailAfter
    {   fragments: Vec<String>
      , kind: FailureKind
    }
}

/// The mock's "wire" payload is the canonical conversation itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockPayload
{   pub model: String
  , pub messages: Vec<CanonicalMessage>
  , pub stream: bool
}

#[derive(Debug, Clone, PartialEq)]
pub struct MockAdapter
{   reply: MockReply
  , delay: Option<Duration>
  , streaming: bool
}

impl Default for MockAdapter
{   fn default() -> Self
    {   MockAdapter::echo()
    }
}

impl MockAdapter
{   pub fn new(reply: MockReply) -> Self
    {   MockAdapter
        {   reply
          , delay: None
          , streaming: true
        }
    }

    pub fn echo() -> Self
    {   Self::new(MockReply::Echo)
    }

    pub fn fixed(text: impl Into<String>) -> Self
    {   Self::new(MockReply::Fixed(text.into()))
    }

    pub fn fragments<I, S>(fragments: I) -> Self
    where I: IntoIterator<Item = S>
        , S: Into<String>
    {   Self::new(MockReply::Fragments(
          fragments.into_iter().map(Into::into).collect()
        ))
    }

    pub fn failing(kind: FailureKind) -> Self
    {   Self::new(MockReply::Fail(kind))
    }

    pub fn failing_after<I, S>(fragments: I, kind: FailureKind) -> Self
    where I: IntoIterator<Item = S>
        , S: Into<String>
    {   Self::new(MockReply::FailAfter
        {   fragments: fragments.into_iter().map(Into::into).collect()
          , kind
        })
    }

    /// Wait this long before the response, and before every fragment.
    pub fn with_delay(mut self, delay: Duration) -> Self
    {   self.delay = Some(delay);
        self
    }

    pub fn without_streaming(mut self) -> Self
    {   self.streaming = false;
        self
    }

    pub fn reply(&self) -> &MockReply
    {   &self.reply
    }

    fn decode(payload: &ProviderPayload)
      -> Result<MockPayload, AttemptFailure>
    {   serde_json::from_value(payload.body.clone()).map_err(|e| {
          AttemptFailure::invalid_response(format!(
            "mock payload did not decode: {}",
            e
          ))
        })
    }

    fn failure(kind: FailureKind, model: &str) -> AttemptFailure
    {   AttemptFailure::new(
          kind,
          format!("mock {} configured to fail", model)
        )
    }

    fn answer(&self, request: &MockPayload)
      -> Result<Vec<String>, AttemptFailure>
    {   match &self.reply
        {   MockReply::Echo => message::last_user_message(&request.messages)
              .map(|m| vec![m.content.clone()])
              .ok_or_else(|| AttemptFailure::invalid_response(
                "no user message to echo"
              ))
          , MockReply::Fixed(text) => Ok(vec![text.clone()])
          , MockReply::Fragments(fragments) => Ok(fragments.clone())
          , MockReply::Fail(kind)
          | MockReply::FailAfter { kind, .. }
              => Err(Self::failure(*kind, &request.model))
        }
    }

    async fn pause(&self, timeout: Option<Duration>)
      -> Result<(), AttemptFailure>
    {   if let Some(delay) = self.delay
        {   http::within(timeout, tokio::time::sleep(delay)).await?;
        }
        Ok(())
    }

    pub(crate) async fn respond(
      &self
    , payload: &ProviderPayload
    , timeout: Option<Duration>
    ) -> Result<Completion, AttemptFailure>
    {   let request = Self::decode(payload)?;
        debug!("Mock {} answering ({:?})", request.model, self.reply);
        self.pause(timeout).await?;
        let body = self.answer(&request)?.concat();
        self.from_response(&body)
    }

    pub(crate) async fn respond_streaming(
      &self
    , payload: &ProviderPayload
    , timeout: Option<Duration>
    , on_token: &mut (dyn FnMut(&str) + Send)
    ) -> Result<Completion, AttemptFailure>
    {   let request = Self::decode(payload)?;
        debug!("Mock {} streaming ({:?})", request.model, self.reply);

        let (fragments, interruption) = match &self.reply
        {   MockReply::FailAfter { fragments, kind } => (
              fragments.clone(),
              Some(Self::failure(*kind, &request.model))
            )
          , _ => (self.answer(&request)?, None)
        };

        let mut text = String::new();
        for fragment in fragments
        {   self.pause(timeout).await?;
            trace!("Mock fragment: {:?}", fragment);
            on_token(&fragment);
            text.push_str(&fragment);
        }

        match interruption
        {   Some(failure) => Err(failure)
          , None => Ok(Completion { text, usage: None })
        }
    }
}

impl Dialect for MockAdapter
{   type Payload = MockPayload;

    fn to_payload(
      &self
    , messages: &[CanonicalMessage]
    , config: &GenerationConfig
    ) -> Result<MockPayload, Error>
    {   Ok(MockPayload
        {   model: config.model.clone()
          , messages: messages.to_vec()
          , stream: config.stream
        })
    }

    fn from_response(&self, body: &str)
      -> Result<Completion, AttemptFailure>
    {   Ok(Completion
        {   text: body.to_string()
          , usage: None
        })
    }

    fn supports_streaming(&self) -> bool
    {   self.streaming
    }
}
