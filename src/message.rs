//! Wire message record and its JSON codec.
//!
//! Every message on the bridge is a single JSON object:
//!
//! ```text
//! {"command":"add","id":7,"data":[2,3],"isReply":false}
//! ```
//!
//! A reply echoes `command` and `id` of the call it answers and carries the
//! results in `data` with `isReply` set.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CodecError;

/// Process-wide counter backing [`CallId::next`].
static NEXT_CALL_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque correlation token.
///
/// Peers may use strings or numbers; whichever arrives is echoed back
/// unchanged, so a numeric id stays numeric on the reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CallId {
    Number(serde_json::Number),
    Text(String),
}

impl CallId {
    /// Generate a token unique within this process.
    pub fn next() -> Self {
        CallId::Number(NEXT_CALL_ID.fetch_add(1, Ordering::Relaxed).into())
    }

    /// `""` and `0` do not identify anything and are treated as missing.
    pub fn is_absent(&self) -> bool {
        match self {
            CallId::Text(text) => text.is_empty(),
            CallId::Number(n) => n.as_f64() == Some(0.0),
        }
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallId::Number(n) => write!(f, "{}", n),
            CallId::Text(text) => f.write_str(text),
        }
    }
}

impl From<u64> for CallId {
    fn from(value: u64) -> Self {
        CallId::Number(value.into())
    }
}

impl From<&str> for CallId {
    fn from(value: &str) -> Self {
        CallId::Text(value.to_string())
    }
}

impl From<String> for CallId {
    fn from(value: String) -> Self {
        CallId::Text(value)
    }
}

/// A call or a reply as exchanged on the bridge.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    /// Command name; never empty on a decoded message.
    pub command: String,
    pub id: CallId,
    /// Call arguments, or reply results.
    pub data: Vec<Value>,
    #[serde(rename = "isReply")]
    pub is_reply: bool,
}

impl Message {
    /// Build a fresh call with a newly generated id.
    pub fn call(command: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            id: CallId::next(),
            data,
            is_reply: false,
        }
    }

    /// Build the reply answering `command`/`id`.
    pub fn reply(command: impl Into<String>, id: CallId, data: Vec<Value>) -> Self {
        Self {
            command: command.into(),
            id,
            data,
            is_reply: true,
        }
    }

    /// Parse a raw wire string.
    ///
    /// Missing `data` becomes an empty sequence, missing `isReply` becomes
    /// `false`, and a missing (or `""`/`0`) `id` is replaced with a fresh
    /// token. Unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The payload is not JSON
    /// - The payload is not an object
    /// - `command` is absent, empty or not a string
    /// - `id`, `data` or `isReply` is present with the wrong type
    pub fn decode(raw: &str) -> Result<Self, CodecError> {
        let value: Value = serde_json::from_str(raw).map_err(CodecError::Parse)?;
        let Value::Object(mut fields) = value else {
            return Err(CodecError::NotAnObject);
        };

        let command = match fields.remove("command") {
            Some(Value::String(command)) if !command.is_empty() => command,
            _ => return Err(CodecError::MissingCommand),
        };

        Ok(Self {
            command,
            id: decode_id(&mut fields)?,
            data: decode_data(&mut fields)?,
            is_reply: decode_is_reply(&mut fields)?,
        })
    }

    /// Serialize to the wire format.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(CodecError::Serialize)
    }

    /// Serialize, rejecting results larger than `max_size` bytes.
    pub fn encode_within(&self, max_size: usize) -> Result<String, CodecError> {
        let encoded = self.encode()?;
        if encoded.len() > max_size {
            return Err(CodecError::TooLarge {
                size: encoded.len(),
                max: max_size,
            });
        }
        Ok(encoded)
    }
}

fn decode_id(fields: &mut Map<String, Value>) -> Result<CallId, CodecError> {
    let id = match fields.remove("id") {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(CallId::Text(text)),
        Some(Value::Number(n)) => Some(CallId::Number(n)),
        Some(_) => {
            return Err(CodecError::InvalidField {
                field: "id",
                reason: "expected a string or a number",
            })
        }
    };

    Ok(id.filter(|id| !id.is_absent()).unwrap_or_else(CallId::next))
}

fn decode_data(fields: &mut Map<String, Value>) -> Result<Vec<Value>, CodecError> {
    match fields.remove("data") {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(CodecError::InvalidField {
            field: "data",
            reason: "expected an array",
        }),
    }
}

fn decode_is_reply(fields: &mut Map<String, Value>) -> Result<bool, CodecError> {
    match fields.remove("isReply") {
        None | Some(Value::Null) => Ok(false),
        Some(Value::Bool(flag)) => Ok(flag),
        Some(_) => Err(CodecError::InvalidField {
            field: "isReply",
            reason: "expected a boolean",
        }),
    }
}
