//! Declarative server table: definitions, router-wide policy, and the
//! [`ConfigStore`] that loads them from disk.
//!
//! The routing table is immutable once built. Reloads construct a fresh
//! table and swap it in atomically; nothing ever mutates a table in place.

pub mod store;

pub use store::ConfigStore;

use serde::Deserialize;
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 300;
pub const DEFAULT_HOT_RELOAD_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_MAX_LOADED_SERVERS: usize = 15;

/// Router-wide policy parsed from the `[router]` table.
#[derive(Debug, Clone)]
pub struct RouterPolicy {
    pub hot_reload: bool,
    pub hot_reload_interval: Duration,
    pub default_idle_timeout: Duration,
    /// Upper bound on concurrently warm backends; loading past it evicts
    /// the least recently used one.
    pub max_loaded_servers: usize,
}

impl Default for RouterPolicy {
    fn default() -> Self {
        Self {
            hot_reload: true,
            hot_reload_interval: Duration::from_secs(DEFAULT_HOT_RELOAD_INTERVAL_SECS),
            default_idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            max_loaded_servers: DEFAULT_MAX_LOADED_SERVERS,
        }
    }
}

/// Immutable description of one routable backend.
///
/// Exactly one of `command` (local subprocess) or `url` (remote session)
/// is set; entries violating that are rejected when the table is built,
/// not when a connect is attempted.
#[derive(Debug, Clone)]
pub struct ServerDefinition {
    pub name: String,
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub url: Option<String>,
    pub description: String,
    pub tags: BTreeSet<String>,
    pub auto_load: bool,
    /// Zero means the backend is never evicted for idleness.
    pub idle_timeout: Duration,
    pub enabled: bool,
}

impl ServerDefinition {
    pub fn is_remote(&self) -> bool {
        self.url.is_some()
    }
}

/// Mapping from server name to definition plus the process-wide policy.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    pub policy: RouterPolicy,
    pub servers: HashMap<String, Arc<ServerDefinition>>,
}

impl RoutingTable {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ServerDefinition>> {
        self.servers.get(name)
    }
}

// ---------------------------------------------------------------------------
// Raw serde shapes, converted into the validated table by `build_table`
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawConfig {
    #[serde(default)]
    pub router: RawPolicy,
    #[serde(default)]
    pub servers: HashMap<String, RawServer>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawPolicy {
    pub hot_reload: Option<bool>,
    pub hot_reload_interval: Option<u64>,
    pub default_idle_timeout: Option<u64>,
    pub max_loaded_servers: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawServer {
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    pub url: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub auto_load: bool,
    pub idle_timeout: Option<u64>,
    pub enabled: Option<bool>,
}

/// Builds a validated table. Malformed entries (both or neither of
/// command/url) are skipped with a warning rather than failing the whole
/// table; partially-specified entries get the documented defaults.
pub(crate) fn build_table(raw: RawConfig) -> RoutingTable {
    let policy = RouterPolicy {
        hot_reload: raw.router.hot_reload.unwrap_or(true),
        hot_reload_interval: Duration::from_secs(
            raw.router
                .hot_reload_interval
                .unwrap_or(DEFAULT_HOT_RELOAD_INTERVAL_SECS),
        ),
        default_idle_timeout: Duration::from_secs(
            raw.router
                .default_idle_timeout
                .unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS),
        ),
        max_loaded_servers: raw
            .router
            .max_loaded_servers
            .unwrap_or(DEFAULT_MAX_LOADED_SERVERS),
    };

    let mut servers = HashMap::new();
    for (name, entry) in raw.servers {
        match (entry.command.is_some(), entry.url.is_some()) {
            (true, true) => {
                tracing::warn!(
                    server = %name,
                    "skipping server entry with both 'command' and 'url'"
                );
                continue;
            }
            (false, false) => {
                tracing::warn!(
                    server = %name,
                    "skipping server entry with neither 'command' nor 'url'"
                );
                continue;
            }
            _ => {}
        }

        let idle_timeout = entry
            .idle_timeout
            .map(Duration::from_secs)
            .unwrap_or(policy.default_idle_timeout);

        servers.insert(
            name.clone(),
            Arc::new(ServerDefinition {
                name,
                command: entry.command,
                args: entry.args,
                env: entry.env,
                working_dir: entry.working_dir,
                url: entry.url,
                description: entry.description,
                tags: entry.tags,
                auto_load: entry.auto_load,
                idle_timeout,
                enabled: entry.enabled.unwrap_or(true),
            }),
        );
    }

    RoutingTable { policy, servers }
}
