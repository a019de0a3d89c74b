//! Fusion CLI - command-line surface over the combination engine.
//!
//! ```text
//! main() -> init_tracing() -> FusionConfig::load() -> Store::open() -> seed
//!        -> CombinationEngine -> Command::run() -> JSON on stdout
//! ```

use std::{
    fs::{self, OpenOptions},
    path::PathBuf,
    sync::{Arc, Mutex},
};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Value, json};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use fusion_engine::fusion_providers::gemini::GeminiClient;
use fusion_engine::{
    CombinationEngine, ElementGenerator, ElementId, EngineSettings, FusionConfig, SessionId,
    StarterElement, Store, config,
};

const DEFAULT_STATS_LIMIT: u32 = 10;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (log_file, init_warnings) = open_fusion_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::info!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // stdout carries the JSON output, so logs go to stderr.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_fusion_log_file() -> (Option<(PathBuf, std::fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in fusion_log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new()
            .create(true)
            .append(true)
            .open(&candidate)
        {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn fusion_log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.fusion/logs/fusion.log
    if let Some(data_dir) = config::data_dir() {
        candidates.push(data_dir.join("logs").join("fusion.log"));
    }

    // Fallback: ./.fusion/logs/fusion.log
    candidates.push(PathBuf::from(".fusion").join("logs").join("fusion.log"));

    candidates
}

/// Combine elements and inspect sessions. Every command prints JSON.
#[derive(Parser, Debug)]
#[command(name = "fusion", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Command {
    /// Insert the starter elements
    Seed,
    /// Start a session
    Session {
        /// Skip safety checks for this session's generations
        #[arg(long = "unsafe")]
        safety_override: bool,
    },
    /// Toggle a session's safety override
    Override {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
        #[arg(value_enum)]
        state: Switch,
    },
    /// Combine two elements
    Combine {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
        #[arg(value_parser = parse_element_id)]
        first: ElementId,
        #[arg(value_parser = parse_element_id)]
        second: ElementId,
        /// Skip safety checks for this request
        #[arg(long)]
        allow_unsafe: bool,
    },
    /// List a session's elements
    Elements {
        #[arg(value_parser = parse_session_id)]
        session: SessionId,
        /// Keep only names containing this text
        query: Option<String>,
    },
    /// Most used elements and pairs
    Stats {
        #[arg(default_value_t = DEFAULT_STATS_LIMIT)]
        limit: u32,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Switch {
    On,
    Off,
}

impl Switch {
    fn enabled(self) -> bool {
        matches!(self, Self::On)
    }
}

fn parse_element_id(raw: &str) -> Result<ElementId, String> {
    raw.parse::<i64>()
        .map(ElementId::new)
        .map_err(|_| format!("invalid element id: {raw}"))
}

fn parse_session_id(raw: &str) -> Result<SessionId, String> {
    if raw.trim().is_empty() {
        return Err("session id must not be empty".to_string());
    }
    Ok(SessionId::new(raw))
}

impl Command {
    async fn run(self, engine: &CombinationEngine) -> Result<Value> {
        let output = match self {
            Self::Seed => {
                let seeded = engine
                    .seed_starters(StarterElement::defaults())
                    .context("seeding starter elements")?;
                json!({ "elements": seeded })
            }
            Self::Session { safety_override } => {
                serde_json::to_value(engine.create_session(safety_override)?)?
            }
            Self::Override { session, state } => {
                let enabled = state.enabled();
                engine.set_safety_override(&session, enabled)?;
                json!({ "session_id": session, "safety_override": enabled })
            }
            Self::Combine {
                session,
                first,
                second,
                allow_unsafe,
            } => serde_json::to_value(
                engine
                    .combine(&session, first, second, allow_unsafe)
                    .await?,
            )?,
            Self::Elements { session, query } => {
                let elements = engine.discovered_elements(&session, query.as_deref())?;
                json!({ "elements": elements })
            }
            Self::Stats { limit } => serde_json::to_value(engine.usage_stats(limit)?)?,
        };
        Ok(output)
    }
}

fn build_engine() -> Result<CombinationEngine> {
    let config = FusionConfig::load()
        .context("loading config")?
        .unwrap_or_default();
    let settings = EngineSettings::from_config(&config).context("validating config")?;

    let db_path = config
        .database_path()
        .context("no home directory; set [storage] path in the config")?;
    let store = Store::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let backend: Option<Arc<dyn ElementGenerator>> = match config.gemini() {
        Some(gemini) => Some(Arc::new(
            GeminiClient::new(gemini).context("building Gemini client")?,
        )),
        None => {
            tracing::info!("No Gemini API key configured; new pairs use local simulation");
            None
        }
    };

    let engine = CombinationEngine::new(Arc::new(store), settings, backend);
    engine
        .seed_starters(StarterElement::defaults())
        .context("seeding starter elements")?;
    Ok(engine)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let engine = build_engine()?;
    let output = cli.command.run(&engine).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
