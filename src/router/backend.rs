//! Per-backend runtime state: connection lifecycle and the live entry
//! held in the router's map.

use crate::config::ServerDefinition;
use crate::error::{Result, RouterError};
use crate::router::transport::{
    BackendTransport, PromptInfo, ResourceInfo, ToolInfo, TransportFactory,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::sync::{watch, RwLock};

/// Connection lifecycle. Terminal states are CLOSED and FAILED.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connecting,
    Ready,
    Closing,
    Closed,
    Failed,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Unconnected => "unconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Ready => "ready",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Failed => "failed",
        }
    }
}

/// Capability lists enumerated once at connect time.
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    pub tools: Vec<ToolInfo>,
    pub resources: Vec<ResourceInfo>,
    pub prompts: Vec<PromptInfo>,
}

/// One backend's transport and its lifecycle state.
///
/// The transport is shared behind an `Arc` so an in-flight invocation
/// keeps its session alive even if the backend is evicted mid-call; the
/// call then completes or fails with a transport-closed error.
pub struct BackendConnection {
    name: String,
    state: RwLock<ConnectionState>,
    transport: RwLock<Option<Arc<dyn BackendTransport>>>,
}

impl BackendConnection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ConnectionState::Unconnected),
            transport: RwLock::new(None),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Establishes the session and enumerates capabilities.
    ///
    /// Enumeration failures are logged and yield empty lists; only the
    /// connect itself is fatal.
    pub async fn connect(
        &self,
        definition: &ServerDefinition,
        factory: &dyn TransportFactory,
        connect_timeout: Duration,
    ) -> Result<Capabilities> {
        if definition.command.is_none() && definition.url.is_none() {
            *self.state.write().await = ConnectionState::Failed;
            return Err(RouterError::BackendUnavailable(definition.name.clone()));
        }

        *self.state.write().await = ConnectionState::Connecting;

        let connected = tokio::time::timeout(connect_timeout, factory.connect(definition)).await;
        let transport: Arc<dyn BackendTransport> = match connected {
            Ok(Ok(transport)) => Arc::from(transport),
            Ok(Err(err)) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(RouterError::BackendStart {
                    name: definition.name.clone(),
                    message: err.to_string(),
                });
            }
            Err(_) => {
                *self.state.write().await = ConnectionState::Failed;
                return Err(RouterError::BackendStart {
                    name: definition.name.clone(),
                    message: format!("connect timed out after {connect_timeout:?}"),
                });
            }
        };

        let tools = match transport.list_tools().await {
            Ok(tools) => tools,
            Err(err) => {
                tracing::warn!(server = %self.name, error = %err, "failed to list tools");
                Vec::new()
            }
        };
        let resources = match transport.list_resources().await {
            Ok(resources) => resources,
            Err(err) => {
                tracing::debug!(server = %self.name, error = %err, "failed to list resources");
                Vec::new()
            }
        };
        let prompts = match transport.list_prompts().await {
            Ok(prompts) => prompts,
            Err(err) => {
                tracing::debug!(server = %self.name, error = %err, "failed to list prompts");
                Vec::new()
            }
        };

        *self.transport.write().await = Some(transport);
        *self.state.write().await = ConnectionState::Ready;

        Ok(Capabilities {
            tools,
            resources,
            prompts,
        })
    }

    async fn ready_transport(&self) -> Result<Arc<dyn BackendTransport>> {
        let state = *self.state.read().await;
        if state != ConnectionState::Ready {
            return Err(RouterError::BackendNotReady {
                name: self.name.clone(),
                state: state.as_str().to_string(),
            });
        }
        self.transport
            .read()
            .await
            .clone()
            .ok_or_else(|| RouterError::BackendNotReady {
                name: self.name.clone(),
                state: "closed".to_string(),
            })
    }

    pub async fn invoke(&self, tool: &str, arguments: Value) -> Result<Value> {
        let transport = self.ready_transport().await?;
        match transport.call_tool(tool, arguments).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    *self.state.write().await = ConnectionState::Failed;
                }
                Err(RouterError::BackendInvocation {
                    server: self.name.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    pub async fn read_resource(&self, uri: &str) -> Result<Value> {
        let transport = self.ready_transport().await?;
        match transport.read_resource(uri).await {
            Ok(value) => Ok(value),
            Err(err) => {
                if err.is_fatal() {
                    *self.state.write().await = ConnectionState::Failed;
                }
                Err(RouterError::BackendInvocation {
                    server: self.name.clone(),
                    message: err.to_string(),
                })
            }
        }
    }

    /// Idempotent teardown; the transport gets a bounded grace period.
    pub async fn close(&self, grace: Duration) {
        {
            let mut state = self.state.write().await;
            if matches!(*state, ConnectionState::Closing | ConnectionState::Closed) {
                return;
            }
            *state = ConnectionState::Closing;
        }

        let transport = self.transport.write().await.take();
        if let Some(transport) = transport {
            transport.shutdown(grace).await;
        }

        *self.state.write().await = ConnectionState::Closed;
        tracing::debug!(server = %self.name, "backend connection closed");
    }
}

/// Load lifecycle of a live entry, observable by coalesced loaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadPhase {
    Loading,
    Ready,
    Failed,
}

/// A backend slot in the router's live map.
///
/// Created as a Loading placeholder by the load leader; concurrent
/// loaders wait on the phase channel instead of connecting again.
pub struct LiveBackend {
    definition: Arc<ServerDefinition>,
    pub connection: BackendConnection,
    tools: OnceLock<Vec<ToolInfo>>,
    resources: OnceLock<Vec<ResourceInfo>>,
    prompts: OnceLock<Vec<PromptInfo>>,
    loaded_at: Instant,
    // Microseconds since loaded_at; monotonic via fetch_max.
    last_used_us: AtomicU64,
    created_wall: DateTime<Utc>,
    load_error: OnceLock<String>,
    phase_tx: watch::Sender<LoadPhase>,
    insert_seq: u64,
    orphaned: AtomicBool,
}

impl std::fmt::Debug for LiveBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveBackend")
            .field("name", &self.definition.name)
            .field("phase", &self.phase())
            .field("insert_seq", &self.insert_seq)
            .finish()
    }
}

impl LiveBackend {
    pub fn placeholder(definition: Arc<ServerDefinition>, insert_seq: u64) -> Self {
        let (phase_tx, _) = watch::channel(LoadPhase::Loading);
        let name = definition.name.clone();
        Self {
            definition,
            connection: BackendConnection::new(name),
            tools: OnceLock::new(),
            resources: OnceLock::new(),
            prompts: OnceLock::new(),
            loaded_at: Instant::now(),
            last_used_us: AtomicU64::new(0),
            created_wall: Utc::now(),
            load_error: OnceLock::new(),
            phase_tx,
            insert_seq,
            orphaned: AtomicBool::new(false),
        }
    }

    pub fn definition(&self) -> &Arc<ServerDefinition> {
        &self.definition
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn insert_seq(&self) -> u64 {
        self.insert_seq
    }

    /// Marks the backend as used now.
    pub fn touch(&self) {
        let us = self.loaded_at.elapsed().as_micros() as u64;
        self.last_used_us.fetch_max(us, Ordering::Relaxed);
    }

    pub fn last_used_instant(&self) -> Instant {
        self.loaded_at + Duration::from_micros(self.last_used_us.load(Ordering::Relaxed))
    }

    pub fn idle_for(&self) -> Duration {
        self.last_used_instant().elapsed()
    }

    /// Wall-clock last-use for status reporting.
    pub fn last_used_at(&self) -> DateTime<Utc> {
        let since_load = Duration::from_micros(self.last_used_us.load(Ordering::Relaxed));
        self.created_wall + chrono::Duration::from_std(since_load).unwrap_or_default()
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        let _ = self.tools.set(capabilities.tools);
        let _ = self.resources.set(capabilities.resources);
        let _ = self.prompts.set(capabilities.prompts);
    }

    pub fn tools(&self) -> &[ToolInfo] {
        self.tools.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn resources(&self) -> &[ResourceInfo] {
        self.resources.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn prompts(&self) -> &[PromptInfo] {
        self.prompts.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn load_error(&self) -> Option<&str> {
        self.load_error.get().map(String::as_str)
    }

    // send_replace, not send: the phase must advance even when no
    // follower is subscribed yet.
    pub fn settle_ready(&self) {
        self.phase_tx.send_replace(LoadPhase::Ready);
    }

    pub fn settle_failed(&self, error: String) {
        let _ = self.load_error.set(error);
        self.phase_tx.send_replace(LoadPhase::Failed);
    }

    pub fn phase(&self) -> LoadPhase {
        *self.phase_tx.borrow()
    }

    pub fn is_loading(&self) -> bool {
        self.phase() == LoadPhase::Loading
    }

    /// Blocks until the load leader settles the phase, then mirrors the
    /// leader's outcome.
    pub async fn wait_settled(&self) -> Result<()> {
        let mut rx = self.phase_tx.subscribe();
        let phase = rx
            .wait_for(|phase| *phase != LoadPhase::Loading)
            .await
            .map(|phase| *phase)
            .unwrap_or_else(|_| self.phase());
        match phase {
            LoadPhase::Ready => Ok(()),
            _ => Err(RouterError::BackendStart {
                name: self.definition.name.clone(),
                message: self
                    .load_error()
                    .unwrap_or("load failed")
                    .to_string(),
            }),
        }
    }

    pub fn set_orphaned(&self, orphaned: bool) {
        self.orphaned.store(orphaned, Ordering::Relaxed);
    }

    pub fn is_orphaned(&self) -> bool {
        self.orphaned.load(Ordering::Relaxed)
    }
}
