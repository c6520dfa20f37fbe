//! Command-line interface for attune
//!
//! Provides argument parsing using clap derive macros.

use clap::Parser;
use std::path::PathBuf;

/// Conversational-awareness audio server
#[derive(Parser, Debug)]
#[command(
    name = "attune",
    version,
    about = "Dims your audio when someone talks to you"
)]
pub struct Cli {
    /// Path to configuration file (default: ~/.config/attune/config.json)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Control API port override
    #[arg(long, value_name = "PORT")]
    pub port: Option<u16>,

    /// Client WebSocket port override
    #[arg(long, value_name = "PORT")]
    pub ws_port: Option<u16>,

    /// Suppress status output (quiet mode)
    #[arg(short, long)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// The tracing filter directive implied by the verbosity flags.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "attune=info",
            1 => "attune=debug",
            _ => "attune=trace",
        }
    }
}
