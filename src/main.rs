use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use paper_sniper::config::Settings;
use paper_sniper::execution::{replay, Engine, OpenOutcome};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "paper-sniper", about = "Paper-trades take-profit positions with a replayable CSV ledger")]
struct Cli {
    /// Config file (defaults to ./paper-sniper.toml if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start monitoring and open a position for every asset id read from stdin
    Run,
    /// Replay the ledger and list the positions that are still open
    Positions,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref())?;
    setup_logging(&settings.log_filter);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(settings).await,
        Command::Positions => list_positions(&settings),
    }
}

fn setup_logging(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(settings: Settings) -> Result<()> {
    tracing::info!("🚀 Paper sniper starting");

    let engine = Arc::new(Engine::new(
        settings.price_client()?,
        settings.ledger()?,
        settings.engine_config(),
    ));

    tracing::info!("\n📊 Configuration:");
    tracing::info!("  Ledger: {}", settings.ledger.path.display());
    tracing::info!("  Balance: {:.4} SOL", engine.balance().await);
    tracing::info!("  Buy size: {} SOL", settings.trading.buy_size);
    tracing::info!("  Take profit: {}x", settings.trading.take_profit_multiplier);
    tracing::info!("  Poll interval: {}ms", settings.monitor.poll_interval_ms);

    let mut monitor = engine
        .start_monitoring()
        .await
        .context("Failed to start monitoring")?;

    tracing::info!("Reading asset ids from stdin, press Ctrl+C to stop...");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("\n⚠️  Received Ctrl+C, shutting down...");
                break;
            }
            result = &mut monitor => {
                tracing::error!("Monitor loop exited: {:?}", result);
                break;
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => submit(&engine, line.trim()),
                    Ok(None) => {
                        tracing::info!("stdin closed, still monitoring open positions");
                        stdin_open = false;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    monitor.abort();
    tracing::info!(
        "👋 Stopped with balance {:.4} SOL and {} open positions",
        engine.balance().await,
        engine.open_positions().await.len()
    );
    Ok(())
}

fn submit<O>(engine: &Arc<Engine<O>>, asset_id: &str)
where
    O: paper_sniper::PriceOracle + 'static,
{
    if asset_id.is_empty() || asset_id.starts_with('#') {
        return;
    }

    let engine = Arc::clone(engine);
    let asset_id = asset_id.to_string();
    tokio::spawn(async move {
        match engine.open_position(&asset_id).await {
            Ok(OpenOutcome::Opened(fill)) => {
                tracing::info!(
                    "  ✓ Opened {} with {:.4} tokens @ {:.9}",
                    fill.asset_id,
                    fill.token_amount,
                    fill.entry_price
                );
            }
            Ok(outcome) => tracing::info!("  → {} not opened: {:?}", asset_id, outcome),
            Err(e) => tracing::error!("  ✗ Failed to open {}: {}", asset_id, e),
        }
    });
}

fn list_positions(settings: &Settings) -> Result<()> {
    let ledger = settings.ledger()?;
    let state = replay(ledger.read_all()?);

    let mut open: Vec<_> = state.open.into_values().collect();
    open.sort_by(|a, b| a.asset_id.cmp(&b.asset_id));

    println!("\n═══════════════════════════════════════════════════════");
    println!("  Ledger: {} ({} rows)", ledger.path().display(), state.rows);
    println!("═══════════════════════════════════════════════════════\n");

    for position in &open {
        println!(
            "  {} | Entry: {:.9} | Tokens: {:.4} | Target: {:.9}",
            position.asset_id,
            position.entry_price,
            position.token_amount,
            position.entry_price * settings.trading.take_profit_multiplier
        );
    }

    println!("\n  Open positions: {}", open.len());
    if let Some(balance) = state.last_balance {
        println!("  Last recorded balance: {:.4} SOL", balance);
    }

    Ok(())
}
