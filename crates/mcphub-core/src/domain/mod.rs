//! Domain types shared across the manager, proxy, and external shells.

mod capability;
mod server;
mod status;

pub use capability::{ResourceDescriptor, ToolDescriptor};
pub use server::{ServerConfig, TransportKind};
pub use status::{ConnectionState, ServerDetail, ServerStatus};
