//! Command-line surface (spec §1's "thin binary"): run a single turn
//! against the demo backend/tools, replay a saved trace file, or inspect
//! the active config. Scaled down from the teacher's `gateway::cli`
//! (which also covers a server, MCP, and account management) to just the
//! commands the runtime core needs a caller for.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "rt-cli", about = "Drive the agentic conversation runtime from a terminal")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run one turn against the in-process demo backend and tools.
    Run {
        /// The user message to send.
        message: String,
        /// Session ID to append the turn to (created if new).
        #[arg(long, default_value = "demo-session")]
        session: String,
        /// Maximum iterations before the loop force-stops.
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// Replay a JSONL trace file to stdout, validating its structure.
    Replay {
        /// Path to a trace file written by a prior run.
        path: std::path::PathBuf,
        /// Replay speed multiplier; 0 replays as fast as possible.
        #[arg(long, default_value_t = 0.0)]
        speed: f64,
    },
    /// Config file inspection.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Print the effective config as TOML.
    Show,
    /// Validate the config file and report issues.
    Validate,
}
