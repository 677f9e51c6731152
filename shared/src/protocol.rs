//! Relay wire payloads
//!
//! Both directions carry a fixed two-field JSON object:
//! ```text
//! command: {"type": "event",          "key": 0 | 1}
//! ack:     {"type": "Socket-mini-v2", "key": 0 | 1}
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::relay;

/// Power state requested from (or reported by) the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RelayTarget {
    Off = 0,
    On = 1,
}

impl RelayTarget {
    /// Wire key for this state
    pub fn key(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for RelayTarget {
    type Error = String;

    fn try_from(key: u8) -> Result<Self, Self::Error> {
        match key {
            0 => Ok(RelayTarget::Off),
            1 => Ok(RelayTarget::On),
            other => Err(format!("relay key must be 0 or 1, got {}", other)),
        }
    }
}

impl From<RelayTarget> for u8 {
    fn from(target: RelayTarget) -> u8 {
        target.key()
    }
}

impl fmt::Display for RelayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayTarget::Off => write!(f, "off"),
            RelayTarget::On => write!(f, "on"),
        }
    }
}

/// Outbound relay instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommandMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub key: RelayTarget,
}

impl CommandMessage {
    /// Create a command asking the relay to switch to `target`
    pub fn new(target: RelayTarget) -> Self {
        Self {
            msg_type: relay::COMMAND_TYPE.into(),
            key: target,
        }
    }

    /// Whether the type tag is the one the relay accepts
    pub fn has_protocol_tag(&self) -> bool {
        self.msg_type == relay::COMMAND_TYPE
    }
}

/// Inbound confirmation from the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AckMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub key: RelayTarget,
}

impl AckMessage {
    /// Create an acknowledgment reporting the relay switched to `target`
    pub fn new(target: RelayTarget) -> Self {
        Self {
            msg_type: relay::ACK_TYPE.into(),
            key: target,
        }
    }

    /// Whether the type tag identifies a Socket-mini-v2 acknowledgment
    pub fn has_protocol_tag(&self) -> bool {
        self.msg_type == relay::ACK_TYPE
    }

    /// Whether this ack confirms the command for `outstanding`
    pub fn confirms(&self, outstanding: RelayTarget) -> bool {
        self.has_protocol_tag() && self.key == outstanding
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_target_keys() {
        assert_eq!(RelayTarget::Off.key(), 0);
        assert_eq!(RelayTarget::On.key(), 1);
        assert!(RelayTarget::try_from(2).is_err());
    }

    #[test]
    fn test_ack_confirms_only_matching_key() {
        let ack = AckMessage::new(RelayTarget::On);
        assert!(ack.confirms(RelayTarget::On));
        assert!(!ack.confirms(RelayTarget::Off));
    }

    #[test]
    fn test_foreign_tag_never_confirms() {
        let ack = AckMessage {
            msg_type: "Socket-mini-v1".into(),
            key: RelayTarget::On,
        };
        assert!(!ack.confirms(RelayTarget::On));
    }
}
