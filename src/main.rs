use anyhow::Context;
use api_registry::mcp::server::McpServer;
use api_registry::{App, Config};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "api-registry", version, about = "Registry and authenticated proxy for external HTTP APIs")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP over stdin/stdout (default).
    Stdio,
    /// Serve MCP over HTTP at POST /mcp.
    Http {
        #[arg(long, env = "APIREG_HTTP_ADDR")]
        addr: Option<SocketAddr>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .ok()
        .or_else(|| {
            std::env::var("LOG_LEVEL")
                .ok()
                .filter(|level| !level.trim().is_empty())
                .and_then(|level| EnvFilter::try_new(level.trim()).ok())
        })
        .unwrap_or_else(|| "info".into());
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::debug!(config = ?config, "configuration loaded");
    let app = App::from_config(&config).context("startup failed")?;
    let server = McpServer::new(Arc::new(app));

    match cli.command.unwrap_or(Command::Stdio) {
        Command::Stdio => server.run_stdio().await.context("stdio transport failed")?,
        Command::Http { addr } => {
            let addr = addr.unwrap_or(config.http_addr);
            api_registry::mcp::http::serve(addr, server)
                .await
                .context("http transport failed")?
        }
    }
    Ok(())
}
