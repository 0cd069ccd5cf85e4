//! MCP surface: advertised capabilities and the published route set.

use mcpmux::facade::RequestFacade;
use mcpmux::server::{tool_routes, RouterService};
use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::ServerHandler;
use std::sync::Arc;

#[test]
fn info_advertises_tools_and_resources() {
    let facade = Arc::new(RequestFacade::new());
    let info = RouterService::new(facade).get_info();

    assert_eq!(info.server_info.name, "mcpmux");
    assert!(info.capabilities.tools.is_some());
    assert!(info.capabilities.resources.is_some());
}

#[test]
fn all_router_operations_are_published() {
    let facade = Arc::new(RequestFacade::new());
    let mut router = ToolRouter::new();
    for route in tool_routes(facade) {
        router.add_route(route);
    }

    let names: Vec<String> = router
        .list_all()
        .iter()
        .map(|t| t.name.to_string())
        .collect();
    for expected in [
        "list_available_servers",
        "load_server",
        "unload_server",
        "list_server_tools",
        "call_server_tool",
        "read_server_resource",
        "search_tools",
        "get_router_status",
        "reload_config",
    ] {
        assert!(names.contains(&expected.to_string()), "missing {expected}");
    }
    assert_eq!(names.len(), 9);
}
