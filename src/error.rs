//! Error types for the invoke bridge.
//!
//! Two layers of failure exist:
//!
//! - [`CodecError`] describes why a raw wire string could not become a
//!   [`Message`](crate::message::Message), or why a message could not be
//!   serialized. These never escape `listener` or `send`; they are logged
//!   and the message is dropped.
//! - [`InvokeError`] is what the public endpoint API returns to calling code.

use thiserror::Error;

/// Failures while converting between wire strings and messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload is not valid JSON.
    #[error("Malformed payload: {0}")]
    Parse(#[source] serde_json::Error),

    /// The payload parsed, but is not a keyed record.
    #[error("Payload is not an object")]
    NotAnObject,

    /// The `command` key is absent, empty, or not a string.
    #[error("Message has no command")]
    MissingCommand,

    /// A known key is present with an unusable value.
    #[error("Invalid `{field}` field: {reason}")]
    InvalidField {
        /// Wire name of the offending key
        field: &'static str,
        /// Human readable description
        reason: &'static str,
    },

    /// The message could not be represented on the wire.
    #[error("Failed to serialize message: {0}")]
    Serialize(#[source] serde_json::Error),

    /// The encoded message exceeds the configured bound.
    #[error("Message size {size} exceeds maximum {max} bytes")]
    TooLarge {
        /// Encoded size in bytes
        size: usize,
        /// Configured maximum
        max: usize,
    },
}

/// Errors surfaced by the endpoint API.
#[derive(Debug, Error)]
pub enum InvokeError {
    /// `define` or `bind` was given an empty command name.
    #[error("Command name must be a non-empty string")]
    InvalidCommand,

    /// An inbound call named a command with no registered handler.
    ///
    /// The protocol has no "command not found" reply, so the caller on the
    /// other side is never told; its pending entry stays pending.
    #[error("No handler defined for command `{0}`")]
    UnknownCommand(String),

    /// The embedded bootstrap hook already has an endpoint attached.
    #[error("Inbound hook is already installed")]
    HookAlreadyInstalled,

    /// Codec failure surfaced to a caller that asked for it explicitly.
    #[error(transparent)]
    Codec(#[from] CodecError),
}
