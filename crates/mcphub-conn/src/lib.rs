//! MCP connection management: transports, JSON-RPC client, per-server
//! state machine, and the connection manager with its health loop.
//!
//! Reference: <https://spec.modelcontextprotocol.io/>

pub mod client;
pub mod connection;
pub mod manager;
pub mod protocol;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use client::{ClientError, McpClient};
pub use connection::{Connection, ConnectionError};
pub use manager::{ConnectionManager, ManagerError, start_health_loop};
pub use transport::{DefaultTransportFactory, Transport, TransportError, TransportFactory};
