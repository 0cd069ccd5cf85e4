//! Shared test helpers: a scriptable in-memory transport factory so
//! routing behavior can be exercised without real subprocesses.

use crate::config::{RouterPolicy, RoutingTable, ServerDefinition};
use crate::router::transport::{
    BackendTransport, PromptInfo, ResourceInfo, ToolInfo, TransportError, TransportFactory,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// In-memory transport that echoes calls back as JSON.
pub struct MockTransport {
    server: String,
    tools: Vec<ToolInfo>,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl BackendTransport for MockTransport {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, TransportError> {
        Ok(self.tools.clone())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, TransportError> {
        Ok(Vec::new())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, TransportError> {
        Ok(Vec::new())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("mock transport closed".into()));
        }
        Ok(json!({
            "server": self.server,
            "tool": name,
            "arguments": arguments,
        }))
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, TransportError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(TransportError::Closed("mock transport closed".into()));
        }
        Ok(json!({ "server": self.server, "uri": uri }))
    }

    async fn shutdown(&self, _grace: Duration) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Scriptable factory: per-server tool lists, injected failures, a
/// connect delay for coalescing tests, and connect/close accounting.
#[derive(Default)]
pub struct MockFactory {
    connect_delay: Duration,
    fail: Mutex<HashMap<String, String>>,
    tools: Mutex<HashMap<String, Vec<ToolInfo>>>,
    connects: Mutex<HashMap<String, usize>>,
    closed: Mutex<HashMap<String, Arc<AtomicBool>>>,
}

impl MockFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            connect_delay: delay,
            ..Self::default()
        }
    }

    /// Every connect for `server` fails with `message`.
    pub fn fail_server(&self, server: &str, message: &str) {
        self.fail
            .lock()
            .unwrap()
            .insert(server.to_string(), message.to_string());
    }

    pub fn clear_failure(&self, server: &str) {
        self.fail.lock().unwrap().remove(server);
    }

    pub fn set_tools(&self, server: &str, tools: Vec<ToolInfo>) {
        self.tools.lock().unwrap().insert(server.to_string(), tools);
    }

    pub fn connect_count(&self, server: &str) -> usize {
        self.connects.lock().unwrap().get(server).copied().unwrap_or(0)
    }

    /// Whether the most recent transport for `server` has been shut down.
    pub fn is_closed(&self, server: &str) -> bool {
        self.closed
            .lock()
            .unwrap()
            .get(server)
            .map(|flag| flag.load(Ordering::SeqCst))
            .unwrap_or(false)
    }
}

#[async_trait]
impl TransportFactory for MockFactory {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Box<dyn BackendTransport>, TransportError> {
        *self
            .connects
            .lock()
            .unwrap()
            .entry(definition.name.clone())
            .or_insert(0) += 1;

        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }

        if let Some(message) = self.fail.lock().unwrap().get(&definition.name) {
            return Err(TransportError::Connect(message.clone()));
        }

        let tools = self
            .tools
            .lock()
            .unwrap()
            .get(&definition.name)
            .cloned()
            .unwrap_or_default();

        let closed = Arc::new(AtomicBool::new(false));
        self.closed
            .lock()
            .unwrap()
            .insert(definition.name.clone(), Arc::clone(&closed));

        Ok(Box::new(MockTransport {
            server: definition.name.clone(),
            tools,
            closed,
        }))
    }
}

pub fn tool_info(name: &str, description: &str) -> ToolInfo {
    ToolInfo {
        name: name.to_string(),
        description: description.to_string(),
        input_schema: json!({ "type": "object", "properties": {} }),
    }
}

/// A minimal enabled local definition with a 300s idle timeout.
pub fn local_definition(name: &str) -> ServerDefinition {
    ServerDefinition {
        name: name.to_string(),
        command: Some("true".to_string()),
        args: Vec::new(),
        env: HashMap::new(),
        working_dir: None,
        url: None,
        description: String::new(),
        tags: BTreeSet::new(),
        auto_load: false,
        idle_timeout: Duration::from_secs(300),
        enabled: true,
    }
}

pub fn table_with(policy: RouterPolicy, definitions: Vec<ServerDefinition>) -> RoutingTable {
    let servers = definitions
        .into_iter()
        .map(|def| (def.name.clone(), Arc::new(def)))
        .collect();
    RoutingTable { policy, servers }
}
