use anyhow::Context;
use clap::Parser;
use edge_algo_agent::{Agent, AgentConfig};

/// Edge device agent: maintains an MQTT session with a broker and executes
/// remote install/delete/configure/list commands against locally installed
/// algorithm artifacts.
#[derive(Parser, Debug)]
#[command(name = "edge-agentd", version, about)]
struct Cli {
    /// Path to a YAML configuration file, merged over built-in defaults and
    /// under `EDGE_AGENT_*` environment variables.
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    edge_algo_agent::init_tracing();
    let cli = Cli::parse();

    let config = AgentConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    Agent::new(config).run().await.context("agent exited with error")?;
    Ok(())
}
