//! JSON codec for relay payloads
//!
//! Payloads are validated against the fixed two-field schema before anything
//! else looks at them. Extra fields, missing fields, a non-integer key or a key
//! other than 0/1 all fail decoding; callers discard such messages whole.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::protocol::{AckMessage, CommandMessage};
use crate::relay;

/// Largest payload accepted from the broker
pub const MAX_PAYLOAD_SIZE: usize = 1024;

/// Errors that can occur during encoding/decoding
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("Payload too large: {0} bytes (max: {MAX_PAYLOAD_SIZE})")]
    PayloadTooLarge(usize),

    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unexpected type tag: expected {expected:?}, got {found:?}")]
    UnexpectedType {
        expected: &'static str,
        found: String,
    },
}

/// Encode a relay command for publishing
pub fn encode_command(command: &CommandMessage) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(command)?))
}

/// Encode a relay acknowledgment for publishing
pub fn encode_ack(ack: &AckMessage) -> Result<Bytes, CodecError> {
    Ok(Bytes::from(serde_json::to_vec(ack)?))
}

/// Decode and validate an inbound acknowledgment
pub fn decode_ack(payload: &[u8]) -> Result<AckMessage, CodecError> {
    let ack: AckMessage = decode_strict(payload)?;
    if !ack.has_protocol_tag() {
        return Err(CodecError::UnexpectedType {
            expected: relay::ACK_TYPE,
            found: ack.msg_type,
        });
    }
    Ok(ack)
}

/// Decode and validate an inbound command (relay side)
pub fn decode_command(payload: &[u8]) -> Result<CommandMessage, CodecError> {
    let command: CommandMessage = decode_strict(payload)?;
    if !command.has_protocol_tag() {
        return Err(CodecError::UnexpectedType {
            expected: relay::COMMAND_TYPE,
            found: command.msg_type,
        });
    }
    Ok(command)
}

fn decode_strict<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CodecError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(CodecError::PayloadTooLarge(payload.len()));
    }
    Ok(serde_json::from_slice(payload)?)
}
