//! Backend routing: transports, per-backend lifecycle, and the core
//! that multiplexes them.

pub mod backend;
pub mod core;
pub mod transport;

pub use backend::{BackendConnection, Capabilities, ConnectionState, LiveBackend, LoadPhase};
pub use core::{RouterCore, RouterOptions, ServerStatus};
pub use transport::{
    BackendTransport, PromptInfo, ResourceInfo, RmcpTransportFactory, ToolInfo, TransportError,
    TransportFactory,
};
