//! Stateless delegation layer between the MCP surface and the router.
//!
//! Every operation returns a structured [`FacadeResponse`] rather than
//! propagating errors upward; callers always get a JSON payload with a
//! success flag. Before `initialize` runs, every operation reports a
//! "router not initialized" error.

use crate::error::RouterError;
use crate::router::{LoadPhase, RouterCore};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::{Arc, OnceLock};

/// Uniform operation result payload.
#[derive(Debug, Serialize)]
pub struct FacadeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FacadeResponse {
    pub fn ok(result: Value) -> Self {
        Self {
            success: true,
            server: None,
            tool: None,
            result: Some(result),
            error: None,
        }
    }

    pub fn ok_for(server: &str, tool: Option<&str>, result: Value) -> Self {
        Self {
            success: true,
            server: Some(server.to_string()),
            tool: tool.map(str::to_string),
            result: Some(result),
            error: None,
        }
    }

    pub fn fail(error: impl ToString) -> Self {
        Self {
            success: false,
            server: None,
            tool: None,
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn fail_for(server: &str, tool: Option<&str>, error: impl ToString) -> Self {
        Self {
            success: false,
            server: Some(server.to_string()),
            tool: tool.map(str::to_string),
            result: None,
            error: Some(error.to_string()),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({"success": false}))
    }
}

/// The operations published as MCP tools.
pub struct RequestFacade {
    router: OnceLock<Arc<RouterCore>>,
}

impl Default for RequestFacade {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestFacade {
    pub fn new() -> Self {
        Self {
            router: OnceLock::new(),
        }
    }

    /// Wires the facade to a router. One-shot; later calls are ignored.
    pub fn initialize(&self, router: Arc<RouterCore>) {
        let _ = self.router.set(router);
    }

    fn router(&self) -> Result<&Arc<RouterCore>, FacadeResponse> {
        self.router
            .get()
            .ok_or_else(|| FacadeResponse::fail(RouterError::NotInitialized))
    }

    /// All configured servers plus load-state counts.
    pub async fn list_servers(&self) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        let servers = router.server_status().await;
        let table = router.routing_table().await;
        let loaded = servers.iter().filter(|s| s.loaded).count();
        FacadeResponse::ok(json!({
            "servers": servers,
            "configured_count": table.servers.len(),
            "loaded_count": loaded,
            "max_loaded": table.policy.max_loaded_servers,
        }))
    }

    /// Connects the named backend (or reuses it) and reports its
    /// capabilities.
    pub async fn load_server(&self, name: &str) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        match router.load_server(name).await {
            Ok(backend) => FacadeResponse::ok_for(
                name,
                None,
                json!({
                    "message": format!("Server '{name}' is loaded"),
                    "is_remote": backend.definition().is_remote(),
                    "tools": backend.tools(),
                    "resources": backend.resources(),
                    "prompts": backend.prompts(),
                }),
            ),
            Err(err) => FacadeResponse::fail_for(name, None, err),
        }
    }

    /// Disconnects the named backend. Success reflects whether it was
    /// actually live.
    pub async fn unload_server(&self, name: &str) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        if router.unload_server(name).await {
            FacadeResponse::ok_for(
                name,
                None,
                json!({ "message": format!("Server '{name}' unloaded") }),
            )
        } else {
            FacadeResponse::fail_for(name, None, format!("Server '{name}' is not loaded"))
        }
    }

    pub async fn list_server_tools(&self, name: &str) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        match router.load_server(name).await {
            Ok(backend) => {
                let tools = backend.tools();
                FacadeResponse::ok_for(
                    name,
                    None,
                    json!({ "tools": tools, "count": tools.len() }),
                )
            }
            Err(err) => FacadeResponse::fail_for(name, None, err),
        }
    }

    /// Forwards a tool invocation, loading the backend on demand.
    pub async fn call_server_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
    ) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        match router.call_tool(server, tool, arguments).await {
            Ok(result) => FacadeResponse::ok_for(server, Some(tool), result),
            Err(err) => FacadeResponse::fail_for(server, Some(tool), err),
        }
    }

    pub async fn read_server_resource(&self, server: &str, uri: &str) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        match router.read_resource(server, uri).await {
            Ok(result) => FacadeResponse::ok_for(server, None, json!({ "uri": uri, "contents": result })),
            Err(err) => FacadeResponse::fail_for(server, None, err),
        }
    }

    /// Substring search over tool names and descriptions across loaded
    /// backends, then over server metadata for unloaded candidates.
    /// `tags` filters servers; a tag no server carries yields nothing.
    pub async fn search_tools(&self, query: &str, tags: &[String]) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        let needle = query.to_lowercase();
        let table = router.routing_table().await;

        let mut live = router.live_snapshot().await;
        live.sort_by(|a, b| a.name().cmp(b.name()));

        let mut results = Vec::new();
        for backend in &live {
            if backend.phase() != LoadPhase::Ready {
                continue;
            }
            let def = backend.definition();
            if !tags.is_empty() && !tags.iter().all(|t| def.tags.contains(t)) {
                continue;
            }
            for tool in backend.tools() {
                let matches = needle.is_empty()
                    || tool.name.to_lowercase().contains(&needle)
                    || tool.description.to_lowercase().contains(&needle);
                if matches {
                    results.push(json!({
                        "server": backend.name(),
                        "tool": tool.name,
                        "description": tool.description,
                        "loaded": true,
                    }));
                }
            }
        }

        let live_names: Vec<&str> = live.iter().map(|b| b.name()).collect();
        let mut unloaded: Vec<_> = table
            .servers
            .values()
            .filter(|def| def.enabled && !live_names.contains(&def.name.as_str()))
            .collect();
        unloaded.sort_by(|a, b| a.name.cmp(&b.name));
        for def in unloaded {
            if !tags.is_empty() && !tags.iter().all(|t| def.tags.contains(t)) {
                continue;
            }
            let matches = !needle.is_empty()
                && (def.name.to_lowercase().contains(&needle)
                    || def.description.to_lowercase().contains(&needle));
            if matches {
                results.push(json!({
                    "server": def.name,
                    "description": def.description,
                    "loaded": false,
                    "hint": format!("load_server('{}') to see its tools", def.name),
                }));
            }
        }

        FacadeResponse::ok(json!({
            "query": query,
            "tags": tags,
            "results": results,
            "count": results.len(),
        }))
    }

    /// Router-wide status: policy, loaded backends, per-server rows.
    pub async fn get_status(&self) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        let table = router.routing_table().await;
        let servers = router.server_status().await;
        let mut loaded_names: Vec<&str> = servers
            .iter()
            .filter(|s| s.loaded)
            .map(|s| s.name.as_str())
            .collect();
        loaded_names.sort_unstable();
        FacadeResponse::ok(json!({
            "router": "mcpmux",
            "version": env!("CARGO_PKG_VERSION"),
            "hot_reload_enabled": table.policy.hot_reload,
            "max_loaded_servers": table.policy.max_loaded_servers,
            "configured_count": table.servers.len(),
            "loaded_servers": loaded_names,
            "loaded_count": loaded_names.len(),
            "servers": servers,
        }))
    }

    /// Configuration summary, published as the `router://config` resource.
    pub async fn describe_config(&self) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        let table = router.routing_table().await;
        let mut names: Vec<&String> = table.servers.keys().collect();
        names.sort();
        let mut servers = serde_json::Map::new();
        for name in names {
            let def = &table.servers[name];
            servers.insert(
                name.clone(),
                json!({
                    "description": def.description,
                    "tags": def.tags,
                    "enabled": def.enabled,
                    "auto_load": def.auto_load,
                    "is_remote": def.is_remote(),
                    "idle_timeout_secs": def.idle_timeout.as_secs(),
                }),
            );
        }
        FacadeResponse::ok(json!({
            "router": {
                "hot_reload": table.policy.hot_reload,
                "hot_reload_interval_secs": table.policy.hot_reload_interval.as_secs(),
                "default_idle_timeout_secs": table.policy.default_idle_timeout.as_secs(),
                "max_loaded_servers": table.policy.max_loaded_servers,
            },
            "servers": servers,
        }))
    }

    /// Forces a config re-read and table swap.
    pub async fn reload_config(&self) -> FacadeResponse {
        let router = match self.router() {
            Ok(router) => router,
            Err(resp) => return resp,
        };
        match router.reload_config().await {
            Ok(table) => {
                let mut names: Vec<&String> = table.servers.keys().collect();
                names.sort();
                FacadeResponse::ok(json!({
                    "message": "Configuration reloaded",
                    "servers_count": table.servers.len(),
                    "servers": names,
                }))
            }
            Err(err) => FacadeResponse::fail(err),
        }
    }
}
