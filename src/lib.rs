pub mod agent_core;
pub mod config;
pub mod inference;
pub mod mcp_client;
pub mod server;

use std::sync::Arc;

use anyhow::Context;

use agent_core::{CompletionMode, HandlerConfig, SessionAgents, SessionStore, ToolExecutor, ToolRegistry};
use config::AppConfig;
use inference::InferenceClient;
use mcp_client::{McpClient, NoBridge, ToolBridge};

/// Initialize the tracing subscriber on stderr.
///
/// `RUST_LOG` wins over the default `agent_relay=info,warn` filter. With
/// `json` set, every event is written as one JSON object per line.
fn init_tracing(json: bool) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agent_relay=info,warn"));

    let builder = fmt::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false);

    // A second init (tests, embedding) keeps the first subscriber.
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// Start every configured bridge server. Without any, tool calls outside the
/// built-ins resolve to unknown-tool errors.
async fn start_bridge(config: &AppConfig) -> (Arc<dyn ToolBridge>, Option<Arc<McpClient>>) {
    if config.bridge.servers.is_empty() {
        return (Arc::new(NoBridge), None);
    }
    let mut client = McpClient::start(&config.bridge.servers).await;
    if let Some(timeout_ms) = config.bridge.call_timeout_ms {
        client = client.with_call_timeout(timeout_ms);
    }
    let client = Arc::new(client);
    tracing::info!(
        configured = config.bridge.servers.len(),
        running = client.server_count(),
        "MCP bridge started"
    );
    let bridge: Arc<dyn ToolBridge> = client.clone();
    (bridge, Some(client))
}

/// Load configuration, open the session store, start the tool bridge and
/// serve the HTTP surface until Ctrl-C.
pub async fn run() -> anyhow::Result<()> {
    let (config, config_path) = AppConfig::load().context("failed to load configuration")?;
    init_tracing(config.logging.json);

    let addr = config.bind_addr()?;
    let db_path = config.database_path();
    let live_endpoint = config.completion.live_endpoint();

    // Startup banner
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.as_ref().map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".into()),
        bind = %addr,
        db_path = %db_path,
        mode = if config.completion.is_mock() { "mock" } else { "live" },
        pid = std::process::id(),
        "=== Agent Relay starting ==="
    );

    if let Some(parent) = std::path::Path::new(&db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }
    let store = Arc::new(
        SessionStore::open(&db_path, config.session_defaults())
            .with_context(|| format!("failed to open session database at {db_path}"))?,
    );

    let (bridge, mcp) = start_bridge(&config).await;

    let mode = match live_endpoint {
        Some(endpoint) => {
            tracing::info!(base_url = %endpoint.base_url, "completion endpoint configured");
            CompletionMode::Live(Arc::new(InferenceClient::new(endpoint)?))
        }
        None => {
            tracing::warn!("no usable completion endpoint configured, serving mock replies");
            CompletionMode::Mock {
                chunk_delay: config.completion.mock_chunk_delay(),
            }
        }
    };

    let mut executor = ToolExecutor::new(bridge.clone(), config.tools.search_api_key.clone());
    if let Some(endpoint) = &config.tools.search_endpoint {
        executor = executor.with_search_endpoint(endpoint.clone());
    }

    let handler_config = HandlerConfig {
        mode,
        max_tokens: config.completion.max_tokens,
        registry: ToolRegistry::new(bridge),
        executor: Arc::new(executor),
    };
    let agents = Arc::new(SessionAgents::new(store, handler_config));

    let result = server::serve(server::AppState::new(agents), addr).await;

    if let Some(mcp) = mcp {
        mcp.shutdown().await;
    }
    result.map_err(Into::into)
}
