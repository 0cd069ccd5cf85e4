//! The routing core: live-backend map, lazy loading with coalescing,
//! LRU eviction, idle sweep, config hot reload, ordered teardown.

use crate::config::{ConfigStore, RoutingTable, ServerDefinition};
use crate::error::{Result, RouterError};
use crate::router::backend::{LiveBackend, LoadPhase};
use crate::router::transport::TransportFactory;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Timing knobs, overridable by tests.
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub sweep_interval: Duration,
    pub connect_timeout: Duration,
    pub close_grace: Duration,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            close_grace: Duration::from_secs(5),
        }
    }
}

struct RouterState {
    table: Arc<RoutingTable>,
    live: HashMap<String, Arc<LiveBackend>>,
    next_seq: u64,
}

/// What `acquire_slot` hands the loading task.
enum LoadTicket {
    /// Someone already holds the slot; wait for (or reuse) their outcome.
    Existing(Arc<LiveBackend>),
    /// We are the load leader; connect, then settle the placeholder.
    Fresh {
        backend: Arc<LiveBackend>,
        evicted: Vec<Arc<LiveBackend>>,
    },
}

/// The multiplexing router. All map mutation happens under one lock;
/// connects, invocations, and closes run outside it.
pub struct RouterCore {
    state: Mutex<RouterState>,
    store: Mutex<ConfigStore>,
    factory: Arc<dyn TransportFactory>,
    options: RouterOptions,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl RouterCore {
    pub fn new(
        store: ConfigStore,
        table: RoutingTable,
        factory: Arc<dyn TransportFactory>,
        options: RouterOptions,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RouterState {
                table: Arc::new(table),
                live: HashMap::new(),
                next_seq: 0,
            }),
            store: Mutex::new(store),
            factory,
            options,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Spawns the background tasks and auto-loads flagged servers.
    pub async fn start(self: &Arc<Self>) {
        let sweep = {
            let router = Arc::clone(self);
            tokio::spawn(async move { router.idle_sweep_loop().await })
        };
        self.tasks.lock().await.push(sweep);

        let (hot_reload, auto_load) = {
            let state = self.state.lock().await;
            let policy = &state.table.policy;
            let auto: Vec<String> = state
                .table
                .servers
                .values()
                .filter(|def| def.enabled && def.auto_load)
                .map(|def| def.name.clone())
                .collect();
            (policy.hot_reload, auto)
        };

        if hot_reload {
            let reload = {
                let router = Arc::clone(self);
                tokio::spawn(async move { router.hot_reload_loop().await })
            };
            self.tasks.lock().await.push(reload);
        }

        for name in auto_load {
            if let Err(err) = self.load_server(&name).await {
                tracing::warn!(server = %name, error = %err, "auto-load failed");
            }
        }
    }

    /// Stops background tasks and closes every live backend in order.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let drained: Vec<Arc<LiveBackend>> = {
            let mut state = self.state.lock().await;
            state.live.drain().map(|(_, backend)| backend).collect()
        };
        for backend in drained {
            backend.connection.close(self.options.close_grace).await;
        }
        tracing::info!("router stopped");
    }

    pub async fn routing_table(&self) -> Arc<RoutingTable> {
        Arc::clone(&self.state.lock().await.table)
    }

    pub async fn get_backend(&self, name: &str) -> Option<Arc<LiveBackend>> {
        self.state.lock().await.live.get(name).cloned()
    }

    pub async fn live_snapshot(&self) -> Vec<Arc<LiveBackend>> {
        self.state.lock().await.live.values().cloned().collect()
    }

    /// Loads (or returns the already-live) backend for `name`.
    ///
    /// Concurrent callers for the same name coalesce onto a single
    /// connect; all observe the identical outcome. A previously failed
    /// load returns its cached error until the sweep evicts the entry.
    pub async fn load_server(&self, name: &str) -> Result<Arc<LiveBackend>> {
        match self.acquire_slot(name).await? {
            LoadTicket::Existing(backend) => {
                backend.wait_settled().await?;
                backend.touch();
                Ok(backend)
            }
            LoadTicket::Fresh { backend, evicted } => {
                for old in evicted {
                    tracing::info!(server = %old.name(), "evicting least recently used backend");
                    old.connection.close(self.options.close_grace).await;
                }

                let outcome = backend
                    .connection
                    .connect(
                        backend.definition(),
                        self.factory.as_ref(),
                        self.options.connect_timeout,
                    )
                    .await;

                match outcome {
                    Ok(capabilities) => {
                        backend.set_capabilities(capabilities);
                        backend.touch();
                        backend.settle_ready();
                        tracing::info!(
                            server = %name,
                            tools = backend.tools().len(),
                            "backend loaded"
                        );
                        Ok(backend)
                    }
                    Err(err) => {
                        // Placeholder stays in the map with the cached
                        // error; the idle sweep is the retry window.
                        let message = match &err {
                            RouterError::BackendStart { message, .. } => message.clone(),
                            other => other.to_string(),
                        };
                        backend.settle_failed(message);
                        tracing::warn!(server = %name, error = %err, "backend load failed");
                        Err(err)
                    }
                }
            }
        }
    }

    async fn acquire_slot(&self, name: &str) -> Result<LoadTicket> {
        let mut state = self.state.lock().await;

        if let Some(existing) = state.live.get(name) {
            return Ok(LoadTicket::Existing(Arc::clone(existing)));
        }

        let definition = state
            .table
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownServer(name.to_string()))?;
        if !definition.enabled {
            return Err(RouterError::ServerDisabled(name.to_string()));
        }

        let max = state.table.policy.max_loaded_servers.max(1);
        let mut evicted = Vec::new();
        while state.live.len() >= max {
            // A Loading placeholder belongs to its leader and is never a
            // victim; when only placeholders remain the map may
            // transiently exceed the cap.
            let victim = state
                .live
                .values()
                .filter(|b| !b.is_loading())
                .min_by_key(|b| (b.last_used_instant(), b.insert_seq()))
                .map(|b| b.name().to_string());
            match victim {
                Some(victim) => {
                    if let Some(backend) = state.live.remove(&victim) {
                        evicted.push(backend);
                    }
                }
                None => break,
            }
        }

        let seq = state.next_seq;
        state.next_seq += 1;
        let backend = Arc::new(LiveBackend::placeholder(definition, seq));
        state.live.insert(name.to_string(), Arc::clone(&backend));

        Ok(LoadTicket::Fresh { backend, evicted })
    }

    /// Removes and closes the named backend. False when it was not live.
    pub async fn unload_server(&self, name: &str) -> bool {
        let removed = self.state.lock().await.live.remove(name);
        match removed {
            Some(backend) => {
                backend.connection.close(self.options.close_grace).await;
                tracing::info!(server = %name, "backend unloaded");
                true
            }
            None => false,
        }
    }

    /// Loads on demand, forwards the call, and refreshes last-use.
    pub async fn call_tool(&self, server: &str, tool: &str, arguments: Value) -> Result<Value> {
        let backend = self.load_server(server).await?;
        let result = backend.connection.invoke(tool, arguments).await?;
        backend.touch();
        Ok(result)
    }

    pub async fn read_resource(&self, server: &str, uri: &str) -> Result<Value> {
        let backend = self.load_server(server).await?;
        let result = backend.connection.read_resource(uri).await?;
        backend.touch();
        Ok(result)
    }

    /// Swaps in a new routing table; live backends keep running, with
    /// orphan flags recomputed against the new table.
    pub async fn update_config(&self, table: RoutingTable) {
        let mut state = self.state.lock().await;
        state.table = Arc::new(table);
        for (name, backend) in &state.live {
            backend.set_orphaned(!state.table.servers.contains_key(name));
        }
        tracing::info!(servers = state.table.servers.len(), "routing table updated");
    }

    /// Re-reads the config file and swaps the table in.
    pub async fn reload_config(&self) -> Result<Arc<RoutingTable>> {
        let table = self.store.lock().await.load().await?;
        self.update_config(table).await;
        Ok(self.routing_table().await)
    }

    /// One sweep pass; evicts backends idle past their timeout.
    ///
    /// A zero timeout exempts the backend; Loading placeholders are
    /// never swept mid-load. The removal re-checks identity and idleness
    /// under the lock so a touch between snapshot and removal wins.
    pub async fn sweep_idle_once(&self) {
        let snapshot: Vec<Arc<LiveBackend>> = {
            let state = self.state.lock().await;
            state.live.values().cloned().collect()
        };

        let mut expired = Vec::new();
        for backend in snapshot {
            let timeout = backend.definition().idle_timeout;
            if timeout.is_zero() || backend.is_loading() {
                continue;
            }
            if backend.idle_for() >= timeout {
                expired.push(backend);
            }
        }

        let mut to_close = Vec::new();
        if !expired.is_empty() {
            let mut state = self.state.lock().await;
            for backend in expired {
                let name = backend.name().to_string();
                let still_there = state
                    .live
                    .get(&name)
                    .map(|current| Arc::ptr_eq(current, &backend))
                    .unwrap_or(false);
                if !still_there {
                    continue;
                }
                if backend.is_loading() || backend.idle_for() < backend.definition().idle_timeout {
                    continue;
                }
                state.live.remove(&name);
                to_close.push(backend);
            }
        }

        for backend in to_close {
            tracing::info!(
                server = %backend.name(),
                idle_secs = backend.idle_for().as_secs(),
                "evicting idle backend"
            );
            backend.connection.close(self.options.close_grace).await;
        }
    }

    async fn idle_sweep_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.options.sweep_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => self.sweep_idle_once().await,
            }
        }
    }

    async fn hot_reload_loop(self: Arc<Self>) {
        let period = {
            let state = self.state.lock().await;
            state
                .table
                .policy
                .hot_reload_interval
                .max(Duration::from_millis(100))
        };
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = interval.tick() => {
                    let changed = self.store.lock().await.has_changed().await;
                    if changed {
                        tracing::info!("config file changed, reloading");
                        if let Err(err) = self.reload_config().await {
                            tracing::warn!(error = %err, "config reload failed");
                        }
                    }
                }
            }
        }
    }

    /// Status rows for every configured server, then any orphaned live
    /// backends, both name-sorted.
    pub async fn server_status(&self) -> Vec<ServerStatus> {
        let (table, live) = {
            let state = self.state.lock().await;
            (Arc::clone(&state.table), state.live.clone())
        };

        let mut rows = Vec::new();
        let mut names: Vec<&String> = table.servers.keys().collect();
        names.sort();
        for name in names {
            let def = &table.servers[name];
            rows.push(ServerStatus::from_parts(def, live.get(name), true));
        }

        let mut orphans: Vec<&Arc<LiveBackend>> = live
            .values()
            .filter(|b| !table.servers.contains_key(b.name()))
            .collect();
        orphans.sort_by(|a, b| a.name().cmp(b.name()));
        for backend in orphans {
            rows.push(ServerStatus::from_parts(
                backend.definition(),
                Some(backend),
                false,
            ));
        }
        rows
    }
}

/// One row of `get_status` / `list_servers` output.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub configured: bool,
    pub enabled: bool,
    pub loaded: bool,
    pub loading: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub tools_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used: Option<String>,
    pub is_remote: bool,
    pub description: String,
    pub tags: Vec<String>,
    pub orphaned: bool,
}

impl ServerStatus {
    fn from_parts(
        def: &Arc<ServerDefinition>,
        backend: Option<&Arc<LiveBackend>>,
        configured: bool,
    ) -> Self {
        let (loaded, loading, error, tools_count, last_used, orphaned) = match backend {
            Some(b) => (
                b.phase() == LoadPhase::Ready,
                b.is_loading(),
                b.load_error().map(str::to_string),
                b.tools().len(),
                Some(b.last_used_at().to_rfc3339()),
                b.is_orphaned(),
            ),
            None => (false, false, None, 0, None, false),
        };
        Self {
            name: def.name.clone(),
            configured,
            enabled: def.enabled,
            loaded,
            loading,
            error,
            tools_count,
            last_used,
            is_remote: def.is_remote(),
            description: def.description.clone(),
            tags: def.tags.iter().cloned().collect(),
            orphaned,
        }
    }
}
