use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::unbounded;
use narrate::cli::{Cli, Commands, ConfigAction};
use narrate::config::Config;
use narrate::engine::CommandEngine;
use narrate::job::{JobEvent, JobId, JobOptions, JobOutcome, SynthesisJob};
use narrate::pipeline::{JobQueue, JobRunner};
use narrate::text::Chunker;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);

    match cli.command {
        Commands::Run {
            jobs,
            voice,
            retry_delay,
            attempt_timeout,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(ms) = retry_delay {
                config.synthesis.retry_delay_ms = ms;
            }
            if let Some(ms) = attempt_timeout {
                config.synthesis.attempt_timeout_ms = ms;
            }
            config.validate()?;
            run_jobs(&config, &jobs, voice.as_deref(), cli.json, cli.quiet)
        }
        Commands::Chunk { file, length } => {
            let config = load_config(cli.config.as_deref())?;
            print_units(&file, length.unwrap_or(config.synthesis.chunk_length), cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref(), cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Log to stderr. `RUST_LOG` wins over the verbosity flags.
fn init_tracing(quiet: bool, verbose: u8) {
    let default = match (quiet, verbose) {
        (true, _) => "narrate=warn",
        (false, 0) => "narrate=info",
        (false, 1) => "narrate=debug",
        (false, _) => "narrate=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default)),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Load configuration from file or use defaults.
///
/// Priority order:
/// 1. Custom config path from CLI (--config), which must exist
/// 2. Default config path (~/.config/narrate/config.toml)
/// 3. Built-in defaults with environment variable overrides
fn load_config(custom_path: Option<&Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        Config::load(path).with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        Config::load_or_default(&Config::default_path())?
    };
    Ok(config.with_env_overrides())
}

fn run_jobs(
    config: &Config,
    paths: &[PathBuf],
    voice: Option<&str>,
    json: bool,
    quiet: bool,
) -> Result<ExitCode> {
    let engine = Arc::new(CommandEngine::from_config(&config.synthesis.engine));
    let (events_tx, events_rx) = unbounded();
    let mut queue = JobQueue::with_events(JobRunner::new(config, engine), events_tx);

    let mut ids: Vec<JobId> = Vec::new();
    let mut rejected = 0usize;
    for path in paths {
        let job = JobOptions::load(path).and_then(|options| SynthesisJob::from_options(options, config));
        match job {
            Ok(job) => {
                let job = match voice {
                    Some(v) => job.with_voice(v),
                    None => job,
                };
                ids.push(queue.enqueue(job)?);
            }
            Err(e) => {
                eprintln!("{} {}: {}", "rejected".red(), path.display(), e);
                rejected += 1;
            }
        }
    }

    let mut outcomes: Vec<JobOutcome> = Vec::with_capacity(ids.len());
    while outcomes.len() < ids.len() {
        let Ok(event) = events_rx.recv() else { break };
        match event {
            JobEvent::StateChanged { id, state } if !json && !quiet => {
                println!("{} {}", id.dimmed(), state.cyan());
            }
            JobEvent::Finished(outcome) => outcomes.push(outcome),
            _ => {}
        }
    }
    queue.shutdown()?;
    outcomes.sort_by_key(|o| o.id);
    if json {
        println!("{}", serde_json::to_string_pretty(&outcomes)?);
    } else {
        for outcome in &outcomes {
            print_outcome(outcome);
        }
    }

    let failed = outcomes.iter().filter(|o| !o.succeeded()).count();
    if failed > 0 || rejected > 0 || outcomes.len() < ids.len() {
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

fn print_outcome(outcome: &JobOutcome) {
    if outcome.succeeded() {
        let path = outcome
            .final_path
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        println!("{} {} {} -> {}", "done".green(), outcome.id, outcome.title.bold(), path);
    } else {
        println!(
            "{} {} {}: {}",
            "failed".red(),
            outcome.id,
            outcome.title.bold(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn print_units(file: &Path, length: usize, json: bool) -> Result<()> {
    anyhow::ensure!(length > 0, "--length must be greater than zero");
    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let units: Vec<_> = Chunker::new(length).chunk(&text).collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&units)?);
        return Ok(());
    }
    for unit in &units {
        println!(
            "{} {} {}",
            format!("[{:>4}]", unit.index).dimmed(),
            format!("({:>3})", unit.text.chars().count()).dimmed(),
            unit.text
        );
    }
    eprintln!("{} units, max {} chars", units.len(), length);
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&Path>, json: bool) -> Result<()> {
    match action {
        ConfigAction::Path => {
            let path = custom_path
                .map(Path::to_path_buf)
                .unwrap_or_else(Config::default_path);
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = load_config(custom_path)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&config)?);
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
    }
    Ok(())
}
