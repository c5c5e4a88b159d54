//! Tag/json/data codec.

use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::{FrameError, Result};

/// Decoded payload of an envelope: routing hops are not part of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Hierarchical tag, e.g. `"kvs.get"`.
    pub tag: String,
    /// Parsed json frame. `None` when absent or not valid JSON.
    pub json: Option<Value>,
    /// Data frame bytes, if any.
    pub data: Option<Bytes>,
}

impl Message {
    /// A tag-only message.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            json: None,
            data: None,
        }
    }

    /// Attach a json document.
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Attach a data payload. Encoding fails unless json is attached too.
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = Some(data.into());
        self
    }

    /// Length of the data payload, zero when absent.
    pub fn data_len(&self) -> usize {
        self.data.as_ref().map_or(0, Bytes::len)
    }

    /// Encode into a fresh, unrouted envelope.
    pub fn encode(&self) -> Result<Envelope> {
        encode(&self.tag, self.json.as_ref(), self.data.as_deref())
    }
}

/// Build an unrouted envelope `[tag][json]?[data]?`.
///
/// An empty `data` slice is treated as absent. Supplying data without json is
/// rejected, since a lone trailing frame would be read back as json.
pub fn encode(tag: &str, json: Option<&Value>, data: Option<&[u8]>) -> Result<Envelope> {
    if tag.is_empty() {
        return Err(FrameError::InvalidArgument(
            "tag must not be empty".to_string(),
        ));
    }
    let data = data.filter(|d| !d.is_empty());
    if data.is_some() && json.is_none() {
        return Err(FrameError::InvalidArgument(
            "data frame requires a json frame".to_string(),
        ));
    }

    let mut envelope = Envelope::new();
    envelope.push(Bytes::copy_from_slice(tag.as_bytes()));
    if let Some(json) = json {
        envelope.push(json.to_string());
    }
    if let Some(data) = data {
        envelope.push(Bytes::copy_from_slice(data));
    }
    Ok(envelope)
}

/// Split an envelope into tag, json, and data.
///
/// Fails with `Protocol` when no usable tag frame exists. A json frame that
/// does not parse yields `json: None` instead of an error.
pub fn decode(envelope: &Envelope) -> Result<Message> {
    let tag = envelope.tag()?.to_string();

    let json = envelope
        .json_frame()
        .and_then(|frame| match serde_json::from_slice(frame) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(%tag, error = %err, "ignoring malformed json frame");
                None
            }
        });
    let data = envelope.data_frame().cloned();

    Ok(Message { tag, json, data })
}
