//! Streaming Transports
//!
//! Adapters for the `TransportConnector` port.
//!
//! - `WebSocketConnector`: production WebSocket client (rustls)
//! - `MemoryConnector`: scripted in-process transport for tests and dry runs

/// In-memory scripted transport.
pub mod memory;

/// WebSocket transport.
pub mod websocket;

pub use memory::{MemoryConnector, MemoryLink};
pub use websocket::WebSocketConnector;
