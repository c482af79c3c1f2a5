use clap::{Parser, Subcommand};
use std::time::Duration;
use vigil_cli::{render, DaemonClient};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Vigil CLI - agent telemetry from a running Vigil daemon")]
#[command(version = vigil_core::VERSION)]
struct Cli {
    /// Base URL of the daemon
    #[arg(long, global = true, default_value = "http://localhost:8090")]
    daemon: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Recent agent log entries
    Logs {
        #[arg(long)]
        agent: Option<String>,
        /// info, warning, error or debug
        #[arg(long)]
        severity: Option<String>,
    },
    /// Inter-agent bus messages
    Messages {
        /// Matches sender or receiver
        #[arg(long)]
        agent: Option<String>,
    },
    /// Current status of every agent
    States,
    /// Order book depth for a symbol
    Depth {
        symbol: String,
        /// Seconds to wait for the first fetch
        #[arg(long, default_value_t = 5)]
        wait: u64,
    },
    /// Start the backend market data collection job
    Trigger,
    /// Daemon health and subscription statistics
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = DaemonClient::new(&cli.daemon)?;

    let output = match cli.command {
        Commands::Logs { agent, severity } => {
            render::logs(&client.logs(agent.as_deref(), severity.as_deref()).await?)
        }
        Commands::Messages { agent } => render::messages(&client.messages(agent.as_deref()).await?),
        Commands::States => render::states(&client.states().await?),
        Commands::Depth { symbol, wait } => {
            render::depth(&client.depth(&symbol, Duration::from_secs(wait)).await?)
        }
        Commands::Trigger => {
            let reply = client.trigger().await?;
            format!("🚀 Market data collection {}\n", reply["status"].as_str().unwrap_or("requested"))
        }
        Commands::Status => {
            let health = client.health().await?;
            let metrics = client.metrics().await?;
            render::status(&health, &metrics)
        }
    };

    print!("{output}");
    Ok(())
}
