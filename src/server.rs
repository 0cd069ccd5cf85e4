//! MCP ServerHandler for the router.
//!
//! Publishes the facade operations as MCP tools over a `ToolRouter`
//! built from dynamic routes. Each route deserializes its arguments,
//! calls the facade, and returns the structured payload as a single
//! text content block.

use crate::facade::{FacadeResponse, RequestFacade};
use rmcp::handler::server::tool::{ToolCallContext, ToolRoute};
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    Annotated, CallToolResult, Content, ErrorData, Implementation, JsonObject,
    ListResourcesResult, PaginatedRequestParam, ProtocolVersion, RawResource,
    ReadResourceRequestParam, ReadResourceResult, ResourceContents, ServerCapabilities,
    ServerInfo,
};
use rmcp::service::{RequestContext, RoleServer};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

pub const CONFIG_RESOURCE_URI: &str = "router://config";
pub const STATUS_RESOURCE_URI: &str = "router://status";

#[derive(Clone)]
pub struct RouterService {
    facade: Arc<RequestFacade>,
}

impl RouterService {
    pub fn new(facade: Arc<RequestFacade>) -> Self {
        Self { facade }
    }
}

fn router_resource(uri: &str, name: &str, description: &str) -> Annotated<RawResource> {
    let mut raw = RawResource::new(uri.to_string(), name.to_string());
    raw.description = Some(description.to_string());
    raw.mime_type = Some("application/json".to_string());
    Annotated::new(raw, None)
}

impl ServerHandler for RouterService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "mcpmux".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                title: None,
                website_url: None,
                icons: None,
            },
            instructions: Some(
                "Lazy multiplexing router over MCP servers. Use list_available_servers \
                 to discover backends, load_server to connect one, and call_server_tool \
                 to invoke its tools."
                    .to_string(),
            ),
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ListResourcesResult, ErrorData>> + Send + '_ {
        std::future::ready(Ok(ListResourcesResult {
            resources: vec![
                router_resource(
                    CONFIG_RESOURCE_URI,
                    "Router configuration",
                    "Routing policy and the configured servers",
                ),
                router_resource(
                    STATUS_RESOURCE_URI,
                    "Router status",
                    "Loaded servers and per-server state",
                ),
            ],
            ..Default::default()
        }))
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl Future<Output = Result<ReadResourceResult, ErrorData>> + Send + '_ {
        let facade = self.facade.clone();
        async move {
            let response = match request.uri.as_str() {
                CONFIG_RESOURCE_URI => facade.describe_config().await,
                STATUS_RESOURCE_URI => facade.get_status().await,
                other => {
                    return Err(ErrorData::resource_not_found(
                        format!("unknown resource '{other}'"),
                        None,
                    ))
                }
            };
            let text = serde_json::to_string_pretty(&response.to_value())
                .unwrap_or_else(|_| "{}".to_string());
            Ok(ReadResourceResult {
                contents: vec![ResourceContents::text(text, request.uri)],
            })
        }
    }
}

fn text_result(response: &FacadeResponse) -> Result<CallToolResult, ErrorData> {
    let text = serde_json::to_string_pretty(&response.to_value())
        .unwrap_or_else(|_| "{\"success\":false}".to_string());
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

fn required_str(arguments: &Option<JsonObject>, key: &str) -> Result<String, ErrorData> {
    arguments
        .as_ref()
        .and_then(|map| map.get(key))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            ErrorData::invalid_params(format!("missing required argument '{key}'"), None)
        })
}

fn schema(value: Value) -> Arc<JsonObject> {
    match value {
        Value::Object(map) => Arc::new(map),
        _ => Arc::new(JsonObject::new()),
    }
}

fn route(
    name: &str,
    description: &str,
    input_schema: Value,
    facade: Arc<RequestFacade>,
    handler: impl Fn(
            Arc<RequestFacade>,
            Option<JsonObject>,
        ) -> std::pin::Pin<
            Box<dyn std::future::Future<Output = Result<CallToolResult, ErrorData>> + Send>,
        > + Send
        + Sync
        + 'static,
) -> ToolRoute<RouterService> {
    let tool_def = rmcp::model::Tool {
        name: name.to_string().into(),
        description: Some(description.to_string().into()),
        input_schema: schema(input_schema),
        annotations: None,
        title: None,
        icons: None,
        output_schema: None,
    };
    ToolRoute::new_dyn(tool_def, move |context: ToolCallContext<'_, RouterService>| {
        handler(facade.clone(), context.arguments)
    })
}

/// Builds the full route set for the router's MCP surface.
pub fn tool_routes(facade: Arc<RequestFacade>) -> Vec<ToolRoute<RouterService>> {
    let server_arg = json!({
        "type": "object",
        "properties": {
            "server": { "type": "string", "description": "Configured server name" }
        },
        "required": ["server"]
    });

    vec![
        route(
            "list_available_servers",
            "List all configured servers with their load state",
            json!({ "type": "object", "properties": {} }),
            facade.clone(),
            |facade, _args| {
                Box::pin(async move { text_result(&facade.list_servers().await) })
            },
        ),
        route(
            "load_server",
            "Connect a configured server and report its tools, resources and prompts",
            server_arg.clone(),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let server = required_str(&args, "server")?;
                    text_result(&facade.load_server(&server).await)
                })
            },
        ),
        route(
            "unload_server",
            "Disconnect a loaded server and free its resources",
            server_arg.clone(),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let server = required_str(&args, "server")?;
                    text_result(&facade.unload_server(&server).await)
                })
            },
        ),
        route(
            "list_server_tools",
            "List the tools of a server, loading it on demand",
            server_arg.clone(),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let server = required_str(&args, "server")?;
                    text_result(&facade.list_server_tools(&server).await)
                })
            },
        ),
        route(
            "call_server_tool",
            "Invoke a tool on a server, loading it on demand",
            json!({
                "type": "object",
                "properties": {
                    "server": { "type": "string", "description": "Configured server name" },
                    "tool": { "type": "string", "description": "Tool name on that server" },
                    "arguments": { "type": "object", "description": "Tool arguments" }
                },
                "required": ["server", "tool"]
            }),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let server = required_str(&args, "server")?;
                    let tool = required_str(&args, "tool")?;
                    let arguments = args
                        .as_ref()
                        .and_then(|map| map.get("arguments"))
                        .cloned()
                        .unwrap_or(Value::Null);
                    text_result(&facade.call_server_tool(&server, &tool, arguments).await)
                })
            },
        ),
        route(
            "read_server_resource",
            "Read a resource from a server, loading it on demand",
            json!({
                "type": "object",
                "properties": {
                    "server": { "type": "string", "description": "Configured server name" },
                    "uri": { "type": "string", "description": "Resource URI" }
                },
                "required": ["server", "uri"]
            }),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let server = required_str(&args, "server")?;
                    let uri = required_str(&args, "uri")?;
                    text_result(&facade.read_server_resource(&server, &uri).await)
                })
            },
        ),
        route(
            "search_tools",
            "Search tool names and descriptions across servers, optionally filtered by tags",
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string", "description": "Substring to search for" },
                    "tags": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "Only consider servers carrying all of these tags"
                    }
                },
                "required": ["query"]
            }),
            facade.clone(),
            |facade, args| {
                Box::pin(async move {
                    let query = required_str(&args, "query")?;
                    let tags: Vec<String> = args
                        .as_ref()
                        .and_then(|map| map.get("tags"))
                        .and_then(|v| serde_json::from_value(v.clone()).ok())
                        .unwrap_or_default();
                    text_result(&facade.search_tools(&query, &tags).await)
                })
            },
        ),
        route(
            "get_router_status",
            "Router-wide status: policy, loaded servers, per-server detail",
            json!({ "type": "object", "properties": {} }),
            facade.clone(),
            |facade, _args| Box::pin(async move { text_result(&facade.get_status().await) }),
        ),
        route(
            "reload_config",
            "Re-read the config file and swap in the new routing table",
            json!({ "type": "object", "properties": {} }),
            facade,
            |facade, _args| Box::pin(async move { text_result(&facade.reload_config().await) }),
        ),
    ]
}
