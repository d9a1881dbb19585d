//! Round replay CLI
//!
//! Feeds recorded rounds (JSON lines) through the forecast engine.
//!
//! Commands:
//! - run: replay every round, then print accuracy stats per table
//! - forecast: replay quietly, then print a fresh forecast for one table
//!
//! Each input line is either a single round
//! `{"table": "tx", "sid": 1200, "d1": 3, "d2": 4, "d3": 6}` or an upstream
//! history snapshot `{"table": "md5", "htr": [{"sid": ..., "d1": ...}, ...]}`.
//! `table` is optional and defaults to `--table`.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use round_forecast::{EngineConfig, ForecastEngine, RoundEvent};
use serde::Deserialize;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "replay")]
#[command(about = "Replay recorded over/under rounds through the forecast engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Replay rounds and report accuracy
    Run {
        #[command(flatten)]
        input: InputArgs,
        /// Print every forecast as a JSON line while replaying
        #[arg(long)]
        emit_forecasts: bool,
    },
    /// Replay rounds, then forecast the next round of one table
    Forecast {
        #[command(flatten)]
        input: InputArgs,
    },
}

#[derive(Args)]
struct InputArgs {
    /// JSON-lines file of rounds (stdin when omitted)
    #[arg(short, long)]
    input: Option<PathBuf>,
    /// Table for lines that do not name one
    #[arg(short, long, default_value = "tx")]
    table: String,
    /// TOML engine config
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum InputRecord {
    Snapshot {
        #[serde(default)]
        table: Option<String>,
        htr: Vec<RoundEvent>,
    },
    Round {
        #[serde(default)]
        table: Option<String>,
        #[serde(flatten)]
        event: RoundEvent,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run { input, emit_forecasts } => {
            let mut engine = ForecastEngine::new(load_config(&input)?);
            replay(&mut engine, &input, emit_forecasts)?;

            for table in engine.tables() {
                let report = serde_json::json!({
                    "table": table,
                    "status": engine.status(&table),
                    "stats": engine.stats(&table),
                    "summary": engine.summary(&table),
                    "latest_forecast": engine.latest_forecast(&table),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            }
        }
        Commands::Forecast { input } => {
            let mut engine = ForecastEngine::new(load_config(&input)?);
            replay(&mut engine, &input, false)?;
            let prediction = engine
                .forecast(&input.table)
                .with_context(|| format!("cannot forecast table {}", input.table))?;
            println!("{}", serde_json::to_string_pretty(&prediction)?);
        }
    }
    Ok(())
}

fn load_config(input: &InputArgs) -> Result<EngineConfig> {
    let mut config = match &input.config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

fn open_input(input: &InputArgs) -> Result<Box<dyn BufRead>> {
    let reader: Box<dyn BufRead> = match &input.input {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(io::stdin())),
    };
    Ok(reader)
}

fn replay(engine: &mut ForecastEngine, input: &InputArgs, emit_forecasts: bool) -> Result<()> {
    let reader = open_input(input)?;
    let (mut lines, mut added) = (0usize, 0usize);

    for (n, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        lines += 1;

        let record: InputRecord = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = n + 1, error = %e, "skipping unparsable line");
                continue;
            }
        };

        let (table, events) = match record {
            InputRecord::Snapshot { table, htr } => (table, htr),
            InputRecord::Round { table, event } => (table, vec![event]),
        };
        let table = table.unwrap_or_else(|| input.table.clone());

        for event in events {
            match engine.ingest_event(&table, event) {
                Ok(outcome) => {
                    added += usize::from(outcome.added);
                    if let (true, Some(prediction)) = (emit_forecasts, &outcome.forecast) {
                        println!("{}", serde_json::to_string(prediction)?);
                    }
                }
                Err(e) => warn!(line = n + 1, error = %e, "skipping round"),
            }
        }
    }

    info!(lines, added, "replay finished");
    Ok(())
}
