//! mcpmux: a lazy multiplexing router over MCP backends.
//!
//! Backends are configured declaratively in TOML and connected only when
//! first addressed. The router bounds the number of warm backends with
//! LRU eviction, reclaims idle ones on a timer, hot-reloads its routing
//! table when the config changes, and exposes the whole thing as an MCP
//! server over stdio.

pub mod config;
pub mod error;
pub mod facade;
pub mod router;
pub mod server;
pub mod test_utils;

use crate::config::ConfigStore;
use crate::facade::RequestFacade;
use crate::router::{RouterCore, RouterOptions, TransportFactory};
use std::sync::Arc;

/// Explicit application wiring: the router core and the facade bound to
/// it. Built once in `main`, shared by the MCP surface.
pub struct AppContext {
    pub router: Arc<RouterCore>,
    pub facade: Arc<RequestFacade>,
}

impl AppContext {
    /// Loads the initial routing table and wires up the facade.
    ///
    /// A broken config at startup is logged and replaced with an empty
    /// table so the process still comes up and hot reload can recover.
    pub async fn initialize(
        mut store: ConfigStore,
        factory: Arc<dyn TransportFactory>,
        options: RouterOptions,
    ) -> Self {
        let table = match store.load().await {
            Ok(table) => table,
            Err(err) => {
                tracing::warn!(error = %err, "initial config load failed, starting empty");
                config::RoutingTable::empty()
            }
        };

        let router = RouterCore::new(store, table, factory, options);
        let facade = Arc::new(RequestFacade::new());
        facade.initialize(Arc::clone(&router));

        Self { router, facade }
    }
}
