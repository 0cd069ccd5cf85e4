//! Error taxonomy for the router.
//!
//! Failures are grouped the way callers need to react to them: config
//! problems keep the router running on the last-known-good table, caller
//! errors are surfaced verbatim, and backend failures are scoped to the
//! backend that produced them.

use thiserror::Error;

// Type alias for Result with our RouterError
pub type Result<T> = std::result::Result<T, RouterError>;

#[derive(Debug, Error)]
pub enum RouterError {
    /// Config file could not be read.
    #[error("Failed to read config: {0}")]
    ConfigIo(#[from] std::io::Error),

    /// Config file is not valid TOML.
    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// The requested name is absent from the routing table.
    #[error("Unknown server: {0}")]
    UnknownServer(String),

    #[error("Server is disabled: {0}")]
    ServerDisabled(String),

    /// The definition has neither a command nor a url, so there is nothing
    /// to connect to.
    #[error("Server '{0}' has neither 'command' nor 'url' configured")]
    BackendUnavailable(String),

    /// Spawn or handshake failed. Cached on the live backend as its
    /// `load_error` so repeated callers see the same outcome.
    #[error("Failed to start server '{name}': {message}")]
    BackendStart { name: String, message: String },

    /// A call arrived while the connection was not READY.
    #[error("Server '{name}' is not ready ({state})")]
    BackendNotReady { name: String, state: String },

    /// A specific tool call or resource read failed. The backend stays
    /// loaded unless the transport itself was detected dead.
    #[error("Invocation failed on server '{server}': {message}")]
    BackendInvocation { server: String, message: String },

    /// A facade operation was called before the router was wired up.
    #[error("Router not initialized")]
    NotInitialized,
}
