//! Canonical, vendor-neutral conversation messages

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Separator used when several system messages are merged into one.
pub const SYSTEM_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role
{   System
  , User
  , Assistant
}

impl Role
{   pub fn as_str(&self) -> &'static str
    {   match self
        {   Role::System => "system"
          , Role::User => "user"
          , Role::Assistant => "assistant"
        }
    }
}

/// One conversation turn. Order in a sequence is conversation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanonicalMessage
{   pub role: Role
  , pub content: String
}

impl CanonicalMessage
{   pub fn new(role: Role, content: impl Into<String>) -> Self
    {   CanonicalMessage
        {   role
          , content: content.into()
        }
    }

    pub fn system(content: impl Into<String>) -> Self
    {   Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self
    {   Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self
    {   Self::new(Role::Assistant, content)
    }

    pub fn is_system(&self) -> bool
    {   self.role == Role::System
    }
}

/// Reject sequences no vendor could accept.
pub fn validate_messages(
  messages: &[CanonicalMessage]
) -> Result<(), Error>
{   if messages.is_empty()
    {   return Err(Error::MalformedRequest(
          "message sequence is empty".to_string()
        ));
    }

    if let Some(index) = messages
      .iter()
      .position(|m| m.content.trim().is_empty())
    {   return Err(Error::MalformedRequest(format!(
          "message {} ({}) has empty content",
          index,
          messages[index].role.as_str()
        )));
    }

    if messages.iter().all(CanonicalMessage::is_system)
    {   return Err(Error::MalformedRequest(
          "at least one user or assistant message is required"
            .to_string()
        ));
    }

    Ok(())
}

/// Pull every system message out of the sequence.
///
/// Returns the system contents joined in original order with a blank
/// line, plus the remaining turns with their order untouched.
pub fn split_system(
  messages: &[CanonicalMessage]
) -> (Option<String>, Vec<&CanonicalMessage>)
{   let (system, turns): (Vec<&CanonicalMessage>, Vec<&CanonicalMessage>)
      = messages.iter().partition(|m| m.is_system());

    let merged = if system.is_empty()
    {   None
    } else
    {   Some(
          system
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join(SYSTEM_SEPARATOR)
        )
    };

    (merged, turns)
}

/// Last message sent by the user, if any.
pub fn last_user_message(
  messages: &[CanonicalMessage]
) -> Option<&CanonicalMessage>
{   messages.iter().rev().find(|m| m.role == Role::User)
}
