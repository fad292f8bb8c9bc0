use anyhow::{Context, Result};
use clap::Parser;
use urpc::RpcServer;
use urpc::logging::{self, LogConfig};

#[derive(Parser)]
#[command(name = "urpcd")]
#[command(about = "Minimal RPC listener daemon", long_about = None)]
struct Cli {
    /// URI prefix to listen on, e.g. http://127.0.0.1:9090/
    prefix: String,

    #[arg(long)]
    verbose: bool,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    logging::init(LogConfig {
        json: cli.json_logs,
        verbose: cli.verbose,
    });

    let server = RpcServer::new(&cli.prefix).context("Invalid listener prefix")?;
    server.start().await.context("Failed to start RPC server")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for shutdown signal")?;
    server.stop().await;

    Ok(())
}
