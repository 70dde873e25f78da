use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "qos-pipeline")]
#[command(version = concat!("Ver:", env!("CARGO_PKG_VERSION")))]
#[command(about = "Server-side QoE telemetry ingest, aggregation, and diagnosis pipeline")]
pub struct Cli {
    /// Path to the TOML config file. Falls back to PIPELINE_CONFIG_PATH,
    /// then config/pipeline.toml, then built-in defaults.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the ingest HTTP server, aggregator workers, diagnoser, and
    /// retention sweep together in one process (the default deployment
    /// shape for small and medium installs).
    Run,

    /// Run only the ingest HTTP server.
    ServeIngest,

    /// Run only the aggregator consume-and-flush loops.
    RunAggregator,

    /// Run only the diagnoser cadence loop.
    RunDiagnoser,

    /// Inspect the dead-letter subject (read-only triage; see DESIGN.md for
    /// scope — this is a thin contract, not a full DLQ management tool).
    Dlq {
        #[command(subcommand)]
        action: DlqAction,
    },
}

#[derive(Subcommand, Debug)]
pub enum DlqAction {
    /// Peek up to `limit` dead-lettered messages without consuming them.
    List {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Peek and permanently remove up to `limit` dead-lettered messages.
    Drain {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
