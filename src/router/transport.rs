//! Transport seam between the router and its backends.
//!
//! [`BackendTransport`] is the capability interface the router programs
//! against; [`RmcpTransportFactory`] is the production implementation,
//! speaking MCP over stdio to local subprocesses and over SSE to remote
//! endpoints. Tests substitute their own factory.

use crate::config::ServerDefinition;
use async_trait::async_trait;
use rmcp::model::CallToolRequestParam;
use rmcp::model::ReadResourceRequestParam;
use rmcp::service::{RoleClient, RunningService, ServiceError};
use rmcp::transport::sse_client::SseClientTransport;
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use rmcp::ServiceExt;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;

/// Tool metadata as reported by a backend.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    #[serde(rename = "inputSchema")]
    pub input_schema: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PromptInfo {
    pub name: String,
    pub description: String,
}

/// Failures at the transport layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not establish the session at all.
    #[error("connect failed: {0}")]
    Connect(String),
    /// The backend answered the request with an error.
    #[error("request failed: {0}")]
    Request(String),
    /// The session is gone; the connection cannot be reused.
    #[error("transport closed: {0}")]
    Closed(String),
}

impl TransportError {
    /// Fatal errors poison the connection; request errors do not.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Closed(_))
    }
}

/// An established session with one backend.
#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, TransportError>;
    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, TransportError>;
    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, TransportError>;
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, TransportError>;
    async fn read_resource(&self, uri: &str) -> Result<Value, TransportError>;
    /// Graceful teardown with a hard deadline; the session is unusable after.
    async fn shutdown(&self, grace: Duration);
}

/// Establishes sessions from definitions. The seam tests mock.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Box<dyn BackendTransport>, TransportError>;
}

/// Production factory: `TokioChildProcess` for `command` definitions,
/// `SseClientTransport` for `url` ones.
pub struct RmcpTransportFactory {
    remote_retries: u32,
    retry_backoff: Duration,
}

impl Default for RmcpTransportFactory {
    fn default() -> Self {
        Self {
            remote_retries: 3,
            retry_backoff: Duration::from_millis(500),
        }
    }
}

impl RmcpTransportFactory {
    pub fn new() -> Self {
        Self::default()
    }

    async fn connect_local(
        &self,
        definition: &ServerDefinition,
    ) -> Result<RunningService<RoleClient, ()>, TransportError> {
        let command = definition
            .command
            .as_deref()
            .ok_or_else(|| TransportError::Connect("no command configured".into()))?;

        let cmd = Command::new(command).configure(|cmd| {
            cmd.args(&definition.args);
            cmd.envs(&definition.env);
            if let Some(dir) = &definition.working_dir {
                cmd.current_dir(dir);
            }
        });

        let transport = TokioChildProcess::new(cmd)
            .map_err(|e| TransportError::Connect(format!("failed to spawn '{command}': {e}")))?;

        let client = ().serve(transport).await.map_err(|e| {
            TransportError::Connect(format!("handshake with '{command}' failed: {e}"))
        })?;
        Ok(client)
    }

    async fn connect_remote(
        &self,
        definition: &ServerDefinition,
    ) -> Result<RunningService<RoleClient, ()>, TransportError> {
        let url = definition
            .url
            .as_deref()
            .ok_or_else(|| TransportError::Connect("no url configured".into()))?;

        let mut last_error = String::new();
        for attempt in 0..self.remote_retries {
            if attempt > 0 {
                tokio::time::sleep(self.retry_backoff * attempt).await;
            }
            match SseClientTransport::start(url.to_string()).await {
                Ok(transport) => match ().serve(transport).await {
                    Ok(client) => return Ok(client),
                    Err(e) => last_error = format!("handshake with '{url}' failed: {e}"),
                },
                Err(e) => last_error = format!("sse connect to '{url}' failed: {e}"),
            }
            tracing::debug!(url, attempt, error = %last_error, "remote connect attempt failed");
        }
        Err(TransportError::Connect(last_error))
    }
}

#[async_trait]
impl TransportFactory for RmcpTransportFactory {
    async fn connect(
        &self,
        definition: &ServerDefinition,
    ) -> Result<Box<dyn BackendTransport>, TransportError> {
        let client = if definition.is_remote() {
            self.connect_remote(definition).await?
        } else {
            self.connect_local(definition).await?
        };
        Ok(Box::new(RmcpTransport::new(client)))
    }
}

/// Live MCP client session wrapping an `rmcp` peer.
pub struct RmcpTransport {
    peer: rmcp::service::Peer<RoleClient>,
    running: Mutex<Option<RunningService<RoleClient, ()>>>,
}

impl RmcpTransport {
    pub fn new(client: RunningService<RoleClient, ()>) -> Self {
        let peer = client.peer().clone();
        Self {
            peer,
            running: Mutex::new(Some(client)),
        }
    }
}

fn classify(err: ServiceError) -> TransportError {
    match err {
        ServiceError::McpError(e) => TransportError::Request(e.to_string()),
        other => TransportError::Closed(other.to_string()),
    }
}

#[async_trait]
impl BackendTransport for RmcpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolInfo>, TransportError> {
        let tools = self.peer.list_all_tools().await.map_err(classify)?;
        Ok(tools
            .into_iter()
            .map(|t| ToolInfo {
                name: t.name.to_string(),
                description: t.description.map(|d| d.to_string()).unwrap_or_default(),
                input_schema: Value::Object((*t.input_schema).clone()),
            })
            .collect())
    }

    async fn list_resources(&self) -> Result<Vec<ResourceInfo>, TransportError> {
        let resources = self.peer.list_all_resources().await.map_err(classify)?;
        Ok(resources
            .into_iter()
            .map(|r| ResourceInfo {
                uri: r.raw.uri.clone(),
                name: r.raw.name.clone(),
                description: r.raw.description.clone().unwrap_or_default(),
            })
            .collect())
    }

    async fn list_prompts(&self) -> Result<Vec<PromptInfo>, TransportError> {
        let prompts = self.peer.list_all_prompts().await.map_err(classify)?;
        Ok(prompts
            .into_iter()
            .map(|p| PromptInfo {
                name: p.name.to_string(),
                description: p.description.map(|d| d.to_string()).unwrap_or_default(),
            })
            .collect())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<Value, TransportError> {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            Value::Null => None,
            other => {
                return Err(TransportError::Request(format!(
                    "tool arguments must be an object, got {other}"
                )))
            }
        };

        let result = self
            .peer
            .call_tool(CallToolRequestParam {
                name: name.to_string().into(),
                arguments,
            })
            .await
            .map_err(classify)?;

        let value = serde_json::to_value(&result)
            .map_err(|e| TransportError::Request(format!("unserializable tool result: {e}")))?;

        if result.is_error == Some(true) {
            let message = value
                .pointer("/content/0/text")
                .and_then(Value::as_str)
                .unwrap_or("tool reported an error")
                .to_string();
            return Err(TransportError::Request(message));
        }
        Ok(value)
    }

    async fn read_resource(&self, uri: &str) -> Result<Value, TransportError> {
        let result = self
            .peer
            .read_resource(ReadResourceRequestParam {
                uri: uri.to_string(),
            })
            .await
            .map_err(classify)?;
        serde_json::to_value(&result)
            .map_err(|e| TransportError::Request(format!("unserializable resource: {e}")))
    }

    async fn shutdown(&self, grace: Duration) {
        let client = self.running.lock().await.take();
        if let Some(client) = client {
            match tokio::time::timeout(grace, client.cancel()).await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "backend session cancel error"),
                Err(_) => tracing::warn!("backend session did not stop within grace period"),
            }
        }
    }
}
