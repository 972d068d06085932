// personal-assistant/crates/personal-assistant/src/main.rs

#[cfg(feature = "cli")]
use clap::Parser;
#[cfg(feature = "cli")]
use personal_assistant::{config::Config, run_server, telemetry::init_tracing};

/// Personal-assistant API server. Flags override the environment.
#[cfg(feature = "cli")]
#[derive(Debug, Parser)]
#[command(name = "personal-assistant", version, about)]
struct Cli {
    /// Address to bind
    #[arg(long)]
    host: Option<String>,
    /// Port to bind
    #[arg(long)]
    port: Option<u16>,
    /// SQLite database file
    #[arg(long)]
    database: Option<std::path::PathBuf>,
    /// Time zone used when a user has none
    #[arg(long)]
    default_timezone: Option<String>,
}

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let mut cfg = Config::from_env()?;
    if let Some(host) = cli.host {
        cfg.api_host = host;
    }
    if let Some(port) = cli.port {
        cfg.api_port = port;
    }
    if let Some(database) = cli.database {
        cfg.database_path = database;
    }
    if let Some(name) = cli.default_timezone {
        cfg.default_timezone = name
            .parse()
            .map_err(|_| anyhow::anyhow!("Unknown time zone '{}'", name))?;
    }

    run_server(cfg).await
}

#[cfg(not(feature = "cli"))]
fn main() {
    println!("CLI feature not enabled. Enable with --features cli");
}
