//! Command-line interface for narrate
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Chunked text-to-speech narration pipeline
#[derive(Parser, Debug)]
#[command(name = "narrate", version, about = "Chunked text-to-speech narration pipeline")]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose output (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,
}

/// Parse a duration string into milliseconds.
///
/// Bare numbers are milliseconds; anything else goes through `humantime`
/// (`2s`, `5m`, `1m30s`).
fn parse_duration_ms(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if let Ok(ms) = s.parse::<u64>() {
        return Ok(ms);
    }
    humantime::parse_duration(s)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .map_err(|e| e.to_string())
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one or more job files through the full pipeline
    Run {
        /// Job option files (TOML)
        #[arg(required = true, value_name = "JOB")]
        jobs: Vec<PathBuf>,

        /// Voice for every job, overriding job files and config
        #[arg(long, value_name = "VOICE")]
        voice: Option<String>,

        /// Delay between synthesis attempts (e.g., 2s, 500)
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_ms)]
        retry_delay: Option<u64>,

        /// Wall-clock limit per synthesis attempt (e.g., 5m); 0 disables
        #[arg(long, value_name = "DURATION", value_parser = parse_duration_ms)]
        attempt_timeout: Option<u64>,
    },

    /// Print the units a text file would be split into
    Chunk {
        /// Text file to split
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Maximum unit length in characters (default: from config)
        #[arg(long, short = 'l', value_name = "CHARS")]
        length: Option<usize>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Configuration actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}
