//! Venue Streamer
//!
//! Session protocol for the venue's level-one options stream.
//!
//! - `messages`: request and response payloads
//! - `codec`: JSON encode/decode into stream events
//! - `session`: one authenticated duplex session
//! - `keepalive`: QOS keep-alive and read-inactivity detection
//! - `retry`: backoff between session attempts
//! - `supervisor`: session lifecycle across faults

pub mod codec;
pub mod keepalive;
pub mod messages;
pub mod retry;
pub mod session;
pub mod supervisor;

pub use codec::{CodecError, StreamCodec, StreamEvent};
pub use keepalive::KeepaliveConfig;
pub use messages::{Command, StreamRequest, StreamRequests};
pub use retry::{ConstantBackoff, ExponentialBackoff, ExponentialConfig, RetryPolicy};
pub use session::{SessionConfig, SessionError, SessionState, StreamSession};
pub use supervisor::{SessionSupervisor, SupervisorConfig, SupervisorDeps};
