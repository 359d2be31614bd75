use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use advisor_gateway::daemon::open_lead_sink;
use advisor_gateway::lead::LeadRecord;
use advisor_gateway::{Config, Daemon};

/// Advisor - telephony agent that qualifies investment leads
#[derive(Parser)]
#[command(name = "advisor", version, about)]
struct Cli {
    /// Port for the status API
    #[arg(long, env = "ADVISOR_PORT")]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run lead extraction on a sample utterance and print the result
    Extract {
        /// Caller utterance
        text: String,
    },
    /// Show the most recent stored leads
    Leads {
        /// Number of leads to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // RUST_LOG wins over -v when set
    let filter = match cli.verbose {
        0 => "info,advisor_gateway=info",
        1 => "info,advisor_gateway=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::Extract { text } => cmd_extract(&text),
            Command::Leads { limit } => cmd_leads(limit).await,
        };
    }

    // Load configuration
    let mut config = Config::load()?;
    if let Some(port) = cli.port {
        config.port = port;
    }
    tracing::debug!(?config, "loaded configuration");

    tracing::info!(
        ari = %config.ari.url,
        app = %config.ari.app,
        port = config.port,
        "starting advisor gateway"
    );

    // Create and run daemon
    let daemon = Daemon::new(config).await?;
    daemon.run().await?;

    Ok(())
}

/// Print what the lead extractor takes from one utterance
fn cmd_extract(text: &str) -> anyhow::Result<()> {
    let lead = LeadRecord::new("cli", Utc::now()).extract(text);
    println!("{}", serde_json::to_string_pretty(&lead)?);
    println!("qualified: {}", lead.is_qualified());
    Ok(())
}

/// Print recent leads from the configured store
async fn cmd_leads(limit: usize) -> anyhow::Result<()> {
    let config = Config::load()?;
    let sink = open_lead_sink(&config.leads)?;
    let leads = sink.recent(limit).await?;

    if leads.is_empty() {
        println!("No leads stored in {}", config.leads.path.display());
        return Ok(());
    }

    for lead in &leads {
        println!(
            "{}  {:<16} {:<12} {:<12} {:<8} {:<16} {}",
            lead.call_time().format("%Y-%m-%d %H:%M"),
            lead.caller_number(),
            lead.investment_interest().map_or("-", |i| i.as_str()),
            lead.investment_amount().unwrap_or("-"),
            lead.risk_tolerance().map_or("-", |r| r.as_str()),
            lead.timeline().unwrap_or("-"),
            if lead.is_qualified() { "qualified" } else { "" },
        );
    }
    println!("\n{} lead(s)", leads.len());

    Ok(())
}
