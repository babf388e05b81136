use std::fmt;
use thiserror::Error as ThisError;

use crate::request::AttemptRecord;

/// Custom error type for ALLM operations
/// Implements Clone for sending through channels
#[derive(Debug, Clone, PartialEq, ThisError)]
pub enum Error
{   /// Caller-supplied data violates an invariant; never sent to a vendor
    #[error("Malformed request: {0}")]
    MalformedRequest(String)
  , /// Provider id has no registered dialect
    #[error("Unknown provider: {0}")]
    UnknownProvider(String)
  , /// Invalid configuration (model strings, config files)
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String)
  , /// Every candidate in the chain failed
    #[error(
      "All {} candidate(s) failed: {}",
      .0.len(),
      describe_attempts(.0)
    )]
    AllCandidatesFailed(Vec<AttemptRecord>)
  , /// Backend task is gone
    #[error("Backend disconnected")]
    BackendDisconnected
}

fn describe_attempts(attempts: &[AttemptRecord]) -> String
{   attempts
      .iter()
      .map(|a| a.to_string())
      .collect::<Vec<_>>()
      .join("; ")
}

/// Classification of a single failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind
{   NetworkError
  , AuthError
  , RateLimited
  , InvalidResponse
}

impl fmt::Display for FailureKind
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   let label = match self
        {   FailureKind::NetworkError => "network error"
          , FailureKind::AuthError => "auth error"
          , FailureKind::RateLimited => "rate limited"
          , FailureKind::InvalidResponse => "invalid response"
        };
        f.write_str(label)
    }
}

/// A classified attempt failure returned by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptFailure
{   pub kind: FailureKind
  , pub detail: String
}

impl AttemptFailure
{   pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self
    {   AttemptFailure
        {   kind
          , detail: detail.into()
        }
    }

    pub fn network(detail: impl Into<String>) -> Self
    {   Self::new(FailureKind::NetworkError, detail)
    }

    pub fn auth(detail: impl Into<String>) -> Self
    {   Self::new(FailureKind::AuthError, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self
    {   Self::new(FailureKind::RateLimited, detail)
    }

    pub fn invalid_response(detail: impl Into<String>) -> Self
    {   Self::new(FailureKind::InvalidResponse, detail)
    }
}

impl fmt::Display for AttemptFailure
{   fn fmt(&self, f: &mut fmt::Formatter<'_>)
      -> fmt::Result
    {   write!(f, "{}: {}", self.kind, self.detail)
    }
}
