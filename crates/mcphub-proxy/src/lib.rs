//! HTTP proxy for managed MCP servers.
//!
//! Downstream clients speak plain HTTP to one stable port; the proxy
//! routes each call to the right connection through the manager.

pub mod error;
pub mod rpc;
pub mod server;

pub use error::ProxyError;
pub use server::{create_router, serve};
