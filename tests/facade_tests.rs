//! Facade payload shapes: structured success and error results, tool
//! search, status reporting.

use mcpmux::config::{ConfigStore, RouterPolicy, ServerDefinition};
use mcpmux::facade::RequestFacade;
use mcpmux::router::{RouterCore, RouterOptions};
use mcpmux::test_utils::{local_definition, table_with, tool_info, MockFactory};
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

fn wired_facade(factory: Arc<MockFactory>, definitions: Vec<ServerDefinition>) -> RequestFacade {
    let router = RouterCore::new(
        ConfigStore::detached(),
        table_with(RouterPolicy::default(), definitions),
        factory,
        RouterOptions::default(),
    );
    let facade = RequestFacade::new();
    facade.initialize(router);
    facade
}

fn tagged(name: &str, tags: &[&str]) -> ServerDefinition {
    ServerDefinition {
        tags: tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
        ..local_definition(name)
    }
}

#[tokio::test]
async fn uninitialized_facade_reports_structured_errors() {
    let facade = RequestFacade::new();

    let response = facade.list_servers().await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Router not initialized"));

    let response = facade.call_server_tool("a", "t", json!({})).await;
    assert!(!response.success);
    assert_eq!(response.error.as_deref(), Some("Router not initialized"));
}

#[tokio::test]
async fn load_server_reports_capabilities() {
    let factory = Arc::new(MockFactory::new());
    factory.set_tools("alpha", vec![tool_info("foo_bar", "Does foo to bar")]);
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade.load_server("alpha").await;
    assert!(response.success);
    assert_eq!(response.server.as_deref(), Some("alpha"));
    let result = response.result.expect("result payload");
    assert_eq!(result["tools"][0]["name"], "foo_bar");
    assert_eq!(result["is_remote"], false);
}

#[tokio::test]
async fn load_failure_is_a_structured_error_not_a_panic() {
    let factory = Arc::new(MockFactory::new());
    factory.fail_server("bad", "no such binary");
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("bad")]);

    let response = facade.load_server("bad").await;
    assert!(!response.success);
    assert!(response.error.expect("error").contains("no such binary"));
}

#[tokio::test]
async fn unload_success_reflects_whether_the_server_was_live() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade.unload_server("alpha").await;
    assert!(!response.success);

    facade.load_server("alpha").await;
    let response = facade.unload_server("alpha").await;
    assert!(response.success);
}

#[tokio::test]
async fn call_server_tool_wraps_the_backend_result() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade
        .call_server_tool("alpha", "compute", json!({"x": 2}))
        .await;
    assert!(response.success);
    assert_eq!(response.server.as_deref(), Some("alpha"));
    assert_eq!(response.tool.as_deref(), Some("compute"));
    let result = response.result.expect("result");
    assert_eq!(result["arguments"]["x"], 2);
}

#[tokio::test]
async fn call_on_unknown_server_fails_cleanly() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade.call_server_tool("ghost", "t", json!({})).await;
    assert!(!response.success);
    assert!(response.error.expect("error").contains("ghost"));
}

#[tokio::test]
async fn search_matches_tools_on_loaded_servers() {
    let factory = Arc::new(MockFactory::new());
    factory.set_tools(
        "alpha",
        vec![
            tool_info("foo_bar", "Combines foo with bar"),
            tool_info("unrelated", "Nothing to see"),
        ],
    );
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);
    facade.load_server("alpha").await;

    let response = facade.search_tools("foo", &[]).await;
    assert!(response.success);
    let result = response.result.expect("result");
    assert_eq!(result["count"], 1);
    assert_eq!(result["results"][0]["tool"], "foo_bar");
    assert_eq!(result["results"][0]["loaded"], true);
}

#[tokio::test]
async fn search_with_absent_tag_finds_nothing() {
    let factory = Arc::new(MockFactory::new());
    factory.set_tools("alpha", vec![tool_info("foo_bar", "Combines foo with bar")]);
    let facade = wired_facade(
        Arc::clone(&factory),
        vec![tagged("alpha", &["development"])],
    );
    facade.load_server("alpha").await;

    let response = facade
        .search_tools("foo", &["no-such-tag".to_string()])
        .await;
    let result = response.result.expect("result");
    assert_eq!(result["count"], 0);
}

#[tokio::test]
async fn search_suggests_unloaded_servers_by_metadata() {
    let factory = Arc::new(MockFactory::new());
    let mut cold = local_definition("weather");
    cold.description = "Weather forecasts and alerts".to_string();
    let facade = wired_facade(Arc::clone(&factory), vec![cold]);

    let response = facade.search_tools("weather", &[]).await;
    let result = response.result.expect("result");
    assert_eq!(result["count"], 1);
    assert_eq!(result["results"][0]["server"], "weather");
    assert_eq!(result["results"][0]["loaded"], false);
}

#[tokio::test]
async fn status_reports_policy_and_loaded_servers() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(
        Arc::clone(&factory),
        vec![local_definition("alpha"), local_definition("beta")],
    );
    facade.load_server("beta").await;

    let response = facade.get_status().await;
    assert!(response.success);
    let result = response.result.expect("result");
    assert_eq!(result["router"], "mcpmux");
    assert_eq!(result["configured_count"], 2);
    assert_eq!(result["loaded_count"], 1);
    assert_eq!(result["loaded_servers"][0], "beta");
    assert!(result["servers"].as_array().expect("rows").len() == 2);
}

#[tokio::test]
async fn config_summary_covers_policy_and_definitions() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(
        Arc::clone(&factory),
        vec![tagged("alpha", &["development"]), local_definition("beta")],
    );

    let response = facade.describe_config().await;
    assert!(response.success);
    let result = response.result.expect("result");
    assert_eq!(result["router"]["max_loaded_servers"], 15);
    assert_eq!(result["servers"]["alpha"]["tags"][0], "development");
    assert_eq!(result["servers"]["beta"]["enabled"], true);
    assert_eq!(result["servers"]["beta"]["is_remote"], false);
}

#[tokio::test]
async fn reload_config_on_a_detached_store_yields_an_empty_table() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade.reload_config().await;
    assert!(response.success);
    let result = response.result.expect("result");
    assert_eq!(result["servers_count"], 0);
}

#[tokio::test]
async fn read_server_resource_forwards_the_uri() {
    let factory = Arc::new(MockFactory::new());
    let facade = wired_facade(Arc::clone(&factory), vec![local_definition("alpha")]);

    let response = facade
        .read_server_resource("alpha", "file:///tmp/data.txt")
        .await;
    assert!(response.success);
    let result = response.result.expect("result");
    assert_eq!(result["uri"], "file:///tmp/data.txt");
    assert_eq!(result["contents"]["server"], "alpha");
}
