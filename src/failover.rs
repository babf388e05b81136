//! Failover across the model chain
//!
//! Candidates are tried strictly one at a time, each exactly once, in
//! chain order. The first success ends the walk; exhausting the chain
//! returns every attempt so the caller can see why each one failed.

use std::time::Instant;
use log::{debug, error, info, warn};

use crate::error::Error;
use crate::factory::AdapterFactory;
use crate::model::ModelSpec;
use crate::providers::GenerationConfig;
use crate::request::{
  AttemptRecord, GenerationRequest, GenerationResult, Outcome
};

/// Position of one generation call in its chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState
{   Idle
  , Attempting(usize)
  , Advancing(usize)
  , Succeeded(usize)
  , Exhausted
}

impl ChainState
{   /// Leave `Idle` for the first candidate.
    pub fn start(self, len: usize) -> ChainState
    {   match self
        {   ChainState::Idle if len > 0 => ChainState::Attempting(0)
          , ChainState::Idle => ChainState::Exhausted
          , other => other
        }
    }

    /// Transition after the current attempt finished with `outcome`.
    pub fn after_attempt(self, outcome: Outcome, len: usize) -> ChainState
    {   match self
        {   ChainState::Attempting(i) if outcome.is_success()
              => ChainState::Succeeded(i)
          , ChainState::Attempting(i) if i + 1 < len
              => ChainState::Advancing(i + 1)
          , ChainState::Attempting(_) => ChainState::Exhausted
          , other => other
        }
    }

    /// Begin the attempt we advanced to.
    pub fn resume(self) -> ChainState
    {   match self
        {   ChainState::Advancing(i) => ChainState::Attempting(i)
          , other => other
        }
    }

    pub fn is_terminal(&self) -> bool
    {   matches!(self, ChainState::Succeeded(_) | ChainState::Exhausted)
    }
}

fn elapsed_ms(started: Instant) -> u64
{   u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Drives one chain walk per `generate` call.
///
/// Holds only read-only inputs, so one orchestrator can serve any
/// number of concurrent calls.
#[derive(Debug, Clone)]
pub struct Orchestrator
{   http_client: reqwest::Client
  , factory: AdapterFactory
}

impl Orchestrator
{   pub fn new(factory: AdapterFactory) -> Self
    {   Self::with_client(reqwest::Client::new(), factory)
    }

    pub fn with_client(
      http_client: reqwest::Client
    , factory: AdapterFactory
    ) -> Self
    {   Orchestrator
        {   http_client
          , factory
        }
    }

    pub fn factory(&self) -> &AdapterFactory
    {   &self.factory
    }

    /// Walk the chain until a candidate answers.
    ///
    /// Fails before any attempt with `MalformedRequest` or
    /// `UnknownProvider`; fails after the last attempt with
    /// `AllCandidatesFailed` carrying every attempt in order.
    pub async fn generate(
      &self
    , mut request: GenerationRequest
    ) -> Result<GenerationResult, Error>
    {   request.validate()?;

        let candidates: Vec<ModelSpec>
          = request.chain.candidates().cloned().collect();
        let adapters = candidates
          .iter()
          .map(|spec| self.factory.build(spec))
          .collect::<Result<Vec<_>, _>>()?;

        let len = candidates.len();
        let mut on_token = request.on_token.take();
        let mut attempts: Vec<AttemptRecord> = Vec::with_capacity(len);
        let mut state = ChainState::Idle.start(len);
        debug!("Generation over {} candidate(s): {:?}", len, state);

        loop
        { match state
          {   ChainState::Attempting(index) => {
                let spec = &candidates[index];
                let adapter = &adapters[index];
                let streaming
                  = on_token.is_some() && adapter.supports_streaming();

                let config = GenerationConfig
                {   model: spec.model_name.clone()
                  , max_tokens: request.max_tokens
                  , temperature: request.temperature
                  , stream: streaming
                };
                let payload = adapter.to_payload(&request.messages, &config)?;

                debug!(
                  "Attempt {}/{} against {} (streaming: {})",
                  index + 1, len, spec, streaming
                );
                let started = Instant::now();
                let result = match on_token.as_mut()
                {   Some(callback) if streaming => {
                      adapter.send_streaming(
                        &self.http_client,
                        &payload,
                        request.timeout,
                        &mut **callback
                      ).await
                    }
                  , _ => {
                      adapter.send(
                        &self.http_client,
                        &payload,
                        request.timeout
                      ).await
                    }
                };
                let latency_ms = elapsed_ms(started);

                match result
                {   Ok(completion) => {
                      attempts.push(AttemptRecord
                      {   model: spec.clone()
                        , outcome: Outcome::Success
                        , latency_ms
                        , detail: None
                      });
                      debug!(
                        "Chain state: {:?}",
                        state.after_attempt(Outcome::Success, len)
                      );
                      info!(
                        "{} answered after {} attempt(s)",
                        spec, attempts.len()
                      );
                      return Ok(GenerationResult
                      {   text: completion.text
                        , model_used: spec.clone()
                        , attempts
                        , usage: completion.usage
                      });
                    }
                  , Err(failure) => {
                      warn!("{} failed: {}", spec, failure);
                      let outcome = Outcome::from(failure.kind);
                      attempts.push(AttemptRecord
                      {   model: spec.clone()
                        , outcome
                        , latency_ms
                        , detail: Some(failure.detail)
                      });
                      state = state.after_attempt(outcome, len);
                    }
                }
              }
            , ChainState::Advancing(next) => {
                debug!(
                  "Advancing to candidate {}/{}: {}",
                  next + 1, len, candidates[next]
                );
                state = state.resume();
              }
            , ChainState::Idle => {
                state = state.start(len);
              }
            , ChainState::Succeeded(_) | ChainState::Exhausted => break
          }
        }

        error!(
          "All {} candidate(s) failed",
          attempts.len()
        );
        Err(Error::AllCandidatesFailed(attempts))
    }
}
