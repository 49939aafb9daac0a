//! Streamer Wire Messages
//!
//! JSON request and response shapes for the venue's streaming API.
//!
//! # Requests
//!
//! Every outbound frame wraps one or more requests:
//!
//! ```json
//! {"requests":[{
//!   "service":"LEVELONE_OPTIONS","requestid":"3","command":"ADD",
//!   "SchwabClientCustomerId":"...","SchwabClientCorrelId":"...",
//!   "parameters":{"keys":"SPXW  250603C05485000","fields":"0,2,3,..."}
//! }]}
//! ```
//!
//! # Responses
//!
//! Inbound frames carry one of three top-level arrays:
//!
//! - `response`: command acknowledgements, `content.code` 0 is success
//! - `notify`: heartbeats and server notices
//! - `data`: service payloads; for `LEVELONE_OPTIONS` each `content` entry
//!   has a `key` plus numeric field codes

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::ports::StreamerCredentials;
use crate::domain::quote::fields;

// =============================================================================
// Enums
// =============================================================================

/// Streaming service names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Service {
    /// Session administration (LOGIN, QOS).
    Admin,
    /// Level-one option quotes.
    LeveloneOptions,
}

/// Request commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Command {
    /// Authenticate the session.
    Login,
    /// Replace the subscription set.
    Subs,
    /// Add to the subscription set.
    Add,
    /// Remove from the subscription set.
    Unsubs,
    /// Set the quality-of-service level.
    Qos,
    /// Close the session.
    Logout,
}

impl Command {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Subs => "SUBS",
            Self::Add => "ADD",
            Self::Unsubs => "UNSUBS",
            Self::Qos => "QOS",
            Self::Logout => "LOGOUT",
        }
    }
}

// =============================================================================
// Requests
// =============================================================================

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequests {
    /// Requests in this frame.
    pub requests: Vec<StreamRequest>,
}

impl From<StreamRequest> for StreamRequests {
    fn from(request: StreamRequest) -> Self {
        Self {
            requests: vec![request],
        }
    }
}

/// One streaming request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    /// Target service.
    pub service: Service,
    /// Client-chosen request id, echoed in the response.
    pub requestid: String,
    /// Command.
    pub command: Command,
    /// Customer identifier.
    #[serde(rename = "SchwabClientCustomerId")]
    pub customer_id: String,
    /// Correlation identifier.
    #[serde(rename = "SchwabClientCorrelId")]
    pub correl_id: String,
    /// Command parameters.
    pub parameters: Value,
}

impl StreamRequest {
    fn new(
        service: Service,
        command: Command,
        request_id: u64,
        credentials: &StreamerCredentials,
        parameters: Value,
    ) -> Self {
        Self {
            service,
            requestid: request_id.to_string(),
            command,
            customer_id: credentials.customer_id.clone(),
            correl_id: credentials.correl_id.clone(),
            parameters,
        }
    }

    /// LOGIN with a bearer token.
    #[must_use]
    pub fn login(credentials: &StreamerCredentials, token: &str, request_id: u64) -> Self {
        Self::new(
            Service::Admin,
            Command::Login,
            request_id,
            credentials,
            serde_json::json!({
                "Authorization": token,
                "SchwabClientChannel": credentials.channel,
                "SchwabClientFunctionId": credentials.function_id,
            }),
        )
    }

    /// QOS keep-alive at the given level.
    #[must_use]
    pub fn qos(credentials: &StreamerCredentials, level: u8, request_id: u64) -> Self {
        Self::new(
            Service::Admin,
            Command::Qos,
            request_id,
            credentials,
            serde_json::json!({ "qoslevel": level.to_string() }),
        )
    }

    /// LOGOUT.
    #[must_use]
    pub fn logout(credentials: &StreamerCredentials, request_id: u64) -> Self {
        Self::new(
            Service::Admin,
            Command::Logout,
            request_id,
            credentials,
            serde_json::json!({}),
        )
    }

    /// SUBS, ADD or UNSUBS for option symbols. SUBS and ADD request the full
    /// field list; UNSUBS only names keys.
    #[must_use]
    pub fn options(
        command: Command,
        symbols: &[String],
        credentials: &StreamerCredentials,
        request_id: u64,
    ) -> Self {
        let keys = symbols.join(",");
        let parameters = match command {
            Command::Unsubs => serde_json::json!({ "keys": keys }),
            _ => serde_json::json!({ "keys": keys, "fields": fields::SUBSCRIBED }),
        };
        Self::new(
            Service::LeveloneOptions,
            command,
            request_id,
            credentials,
            parameters,
        )
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Inbound frame. Any of the arrays may be absent.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct StreamEnvelope {
    /// Command acknowledgements.
    #[serde(default)]
    pub response: Vec<ResponseEntry>,
    /// Heartbeats and notices.
    #[serde(default)]
    pub notify: Vec<NotifyEntry>,
    /// Service payloads.
    #[serde(default)]
    pub data: Vec<DataEntry>,
}

/// Command acknowledgement.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ResponseEntry {
    /// Service the command targeted.
    #[serde(default)]
    pub service: String,
    /// Command name.
    #[serde(default)]
    pub command: String,
    /// Echoed request id.
    #[serde(default)]
    pub requestid: String,
    /// Result code and message.
    #[serde(default)]
    pub content: ResponseContent,
}

/// Response code and message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResponseContent {
    /// 0 on success.
    #[serde(default = "unknown_code")]
    pub code: i64,
    /// Server message.
    #[serde(default)]
    pub msg: String,
}

const fn unknown_code() -> i64 {
    -1
}

impl ResponseContent {
    /// Whether the server reported success.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Heartbeat or server notice.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NotifyEntry {
    /// Heartbeat timestamp, when this is a heartbeat.
    #[serde(default)]
    pub heartbeat: Option<Value>,
    /// Notice payload, when this is a notice.
    #[serde(default)]
    pub content: Option<ResponseContent>,
}

/// Service payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DataEntry {
    /// Service name.
    pub service: String,
    /// Per-key entries.
    #[serde(default)]
    pub content: Vec<Value>,
}
