//! Identifier types for agents, messages and blockers.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ForemanError, Result};

/// Recipient name reserved for fan-out delivery.
pub const BROADCAST: &str = "broadcast";

/// Name of an agent in the fleet.
///
/// Agents are addressed by stable, human-chosen names ("builder-1",
/// "supervisor"). The name `broadcast` is reserved.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(String);

impl AgentId {
    /// Wrap a name without validation (see [`AgentId::parse`]).
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Parse and validate an agent name.
    pub fn parse(name: impl Into<String>) -> Result<Self> {
        let id = Self(name.into());
        id.validate()?;
        Ok(id)
    }

    /// Reject empty, padded, or reserved names.
    pub fn validate(&self) -> Result<()> {
        if self.0.trim().is_empty() {
            return Err(ForemanError::invalid_input("agent id must not be empty"));
        }
        if self.0.trim() != self.0 {
            return Err(ForemanError::invalid_input(format!(
                "agent id '{}' has surrounding whitespace",
                self.0
            )));
        }
        if self.0 == BROADCAST {
            return Err(ForemanError::invalid_input(
                "'broadcast' is reserved and cannot name an agent",
            ));
        }
        Ok(())
    }

    /// Borrow the name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for AgentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Unique identifier of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new random ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Parse from a string
    pub fn parse(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for MessageId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Identifier of a reported blocker, e.g. `BLK-1718000000-3`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockerId(String);

impl BlockerId {
    /// Build an id from the report time (unix seconds) and a sequence number.
    pub fn from_parts(unix_secs: i64, sequence: u64) -> Self {
        Self(format!("BLK-{}-{}", unix_secs, sequence))
    }

    /// Borrow the textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for BlockerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_id_validation() {
        assert!(AgentId::parse("builder-1").is_ok());
        assert!(AgentId::parse("").is_err());
        assert!(AgentId::parse("  ").is_err());
        assert!(AgentId::parse(" padded").is_err());
        assert!(AgentId::parse(BROADCAST).is_err());
    }

    #[test]
    fn test_agent_id_ordering_is_lexical() {
        let mut ids = vec![AgentId::from("b"), AgentId::from("a"), AgentId::from("c")];
        ids.sort();
        assert_eq!(ids, vec![AgentId::from("a"), AgentId::from("b"), AgentId::from("c")]);
    }

    #[test]
    fn test_message_id_creation() {
        let id1 = MessageId::new();
        let id2 = MessageId::new();
        assert_ne!(id1, id2);

        let parsed = MessageId::parse(&id1.to_string()).unwrap();
        assert_eq!(id1, parsed);
    }

    #[test]
    fn test_blocker_id_format() {
        let id = BlockerId::from_parts(1_700_000_000, 4);
        assert_eq!(id.as_str(), "BLK-1700000000-4");
    }
}
