use clap::Parser;
use mcpmux::config::ConfigStore;
use mcpmux::router::{RmcpTransportFactory, RouterOptions};
use mcpmux::server::{tool_routes, RouterService};
use mcpmux::AppContext;
use rmcp::handler::server::router::Router as McpRouter;
use rmcp::transport::io::stdio;
use rmcp::ServiceExt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Lazy multiplexing router over MCP servers, served over stdio.
#[derive(Parser)]
#[command(name = "mcpmux", version, about)]
struct Cli {
    /// Path to the config file (searches standard locations when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print an example config file and exit
    #[arg(long)]
    example_config: bool,
}

const EXAMPLE_CONFIG: &str = r#"# mcpmux configuration

[router]
hot_reload = true
hot_reload_interval = 5
default_idle_timeout = 300
max_loaded_servers = 15

[servers.github]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-github"]
env = { GITHUB_TOKEN = "ghp_..." }
description = "GitHub repositories, issues and pull requests"
tags = ["git", "development"]

[servers.memory]
command = "npx"
args = ["-y", "@modelcontextprotocol/server-memory"]
description = "Persistent knowledge graph memory"
tags = ["memory"]
auto_load = true
idle_timeout = 0

[servers.remote-math]
url = "http://localhost:9100/sse"
description = "Remote calculation service"
tags = ["math"]
enabled = false
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.example_config {
        print!("{EXAMPLE_CONFIG}");
        return Ok(());
    }

    // stdout carries the MCP protocol; all logging goes to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mcpmux=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let store = ConfigStore::new(cli.config);
    match store.path() {
        Some(path) => tracing::info!(path = %path.display(), "using config file"),
        None => tracing::warn!("no config file found, starting with an empty routing table"),
    }

    let context = AppContext::initialize(
        store,
        Arc::new(RmcpTransportFactory::new()),
        RouterOptions::default(),
    )
    .await;
    context.router.start().await;

    let service = McpRouter::new(RouterService::new(Arc::clone(&context.facade)))
        .with_tools(tool_routes(Arc::clone(&context.facade)));

    tracing::info!("serving MCP over stdio");
    let server = service.serve(stdio()).await?;
    server.waiting().await?;

    context.router.shutdown().await;
    Ok(())
}
