//! Stream Codec
//!
//! Encodes outbound request frames and decodes inbound frames into
//! session events. Level-one option entries become `QuoteFrame`s keyed by
//! numeric field code; non-numeric keys other than `key` are ignored.

use std::collections::HashMap;

use serde_json::Value;

use super::messages::{ResponseContent, ResponseEntry, StreamEnvelope, StreamRequests};
use crate::domain::quote::QuoteFrame;

/// Service name for level-one option payloads.
const LEVELONE_OPTIONS: &str = "LEVELONE_OPTIONS";

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON encoding/decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame is not a JSON object.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),
}

/// Decoded inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Command acknowledgement.
    Response(ResponseEntry),
    /// Server heartbeat.
    Heartbeat,
    /// Server notice (e.g. forced disconnect).
    Notice(ResponseContent),
    /// Option quote entries.
    Quotes(Vec<QuoteFrame>),
    /// Payload for a service this session does not consume.
    OtherData {
        /// Service name.
        service: String,
    },
}

/// JSON codec for the streaming API.
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamCodec;

impl StreamCodec {
    /// Create a codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Encode an outbound frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn encode(&self, requests: &StreamRequests) -> Result<String, CodecError> {
        Ok(serde_json::to_string(requests)?)
    }

    /// Decode an inbound frame into events, in `response`, `notify`, `data`
    /// order.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not a JSON object of the expected
    /// shape.
    pub fn decode(&self, text: &str) -> Result<Vec<StreamEvent>, CodecError> {
        let trimmed = text.trim();
        if !trimmed.starts_with('{') {
            return Err(CodecError::InvalidFormat(format!(
                "expected JSON object, got: {}...",
                trimmed.chars().take(50).collect::<String>()
            )));
        }

        let envelope: StreamEnvelope = serde_json::from_str(trimmed)?;
        let mut events = Vec::new();

        events.extend(envelope.response.into_iter().map(StreamEvent::Response));

        for notify in envelope.notify {
            if notify.heartbeat.is_some() {
                events.push(StreamEvent::Heartbeat);
            } else if let Some(content) = notify.content {
                events.push(StreamEvent::Notice(content));
            }
        }

        for data in envelope.data {
            if data.service == LEVELONE_OPTIONS {
                let frames: Vec<QuoteFrame> =
                    data.content.iter().filter_map(quote_frame).collect();
                if !frames.is_empty() {
                    events.push(StreamEvent::Quotes(frames));
                }
            } else {
                events.push(StreamEvent::OtherData {
                    service: data.service,
                });
            }
        }

        Ok(events)
    }
}

fn quote_frame(entry: &Value) -> Option<QuoteFrame> {
    let object = entry.as_object()?;
    let symbol = object.get("key")?.as_str()?.to_string();

    let fields: HashMap<u32, Value> = object
        .iter()
        .filter_map(|(name, value)| name.parse::<u32>().ok().map(|code| (code, value.clone())))
        .collect();

    Some(QuoteFrame { symbol, fields })
}
