// ============================================================================
// faces-solver - play the faces game and manage the label database
// ============================================================================
// Usage:
//   faces-solver run --sessions 5 --cookie "authToken=..."   Play scored sessions
//   faces-solver stats                                       Label database statistics
//   faces-solver export                                      Print the snapshot as JSON
//   faces-solver import FILE [--replace]                     Merge or replace labels
//   faces-solver lookup --name NAME | --digest HEX           Query the indices
//   faces-solver letter L                                    Names starting with L
//   faces-solver clear                                       Empty the database
// ============================================================================

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use solver_core::cache::{parse_snapshot, JsonSnapshotStore, SnapshotFormat};
use solver_core::{
    Credentials, ImageDigest, LabelCache, LabelStorage, Orchestrator, RunReport, SolverConfig,
};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Automated player for the faces game
#[derive(Parser)]
#[command(name = "faces-solver", version, about = "Play the faces game from a learned label cache")]
struct Cli {
    /// Snapshot file (default: ~/.faces/faces_data.json)
    #[arg(long, global = true)]
    data_path: Option<PathBuf>,

    /// Fast store file (default: ~/.faces/labels.redb)
    #[arg(long, global = true)]
    store_path: Option<PathBuf>,

    /// Use the snapshot file only
    #[arg(long, global = true)]
    no_fast_store: bool,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play scored sessions and learn from every answer
    Run {
        /// Number of scored sessions
        #[arg(long, default_value = "1")]
        sessions: u32,

        /// Extra request header, as "Name: value" (repeatable)
        #[arg(long = "header")]
        headers: Vec<String>,

        /// Cookie header of a logged-in session (falls back to FACES_COOKIE)
        #[arg(long)]
        cookie: Option<String>,

        /// First question id of the next game; skips the bootstrap game
        #[arg(long)]
        start_id: Option<u64>,

        /// Questions per session
        #[arg(long)]
        questions: Option<u32>,

        /// Print the full report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show label count, distinct names and names per letter
    Stats,

    /// Print every label as snapshot JSON
    Export,

    /// Merge labels from a snapshot file
    Import {
        file: PathBuf,

        /// Replace the current labels (a backup is written first)
        #[arg(long)]
        replace: bool,
    },

    /// Look a label up by name or by digest
    Lookup {
        #[arg(long, conflicts_with = "digest", required_unless_present = "digest")]
        name: Option<String>,

        #[arg(long)]
        digest: Option<String>,
    },

    /// List names starting with a letter
    Letter { letter: char },

    /// Remove every label (a backup is written first)
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Could not load .env file: {}", e);
        }
    }

    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = SolverConfig::from_env()?;
    if let Some(path) = cli.data_path {
        config.data_path = path;
    }
    if let Some(path) = cli.store_path {
        config.store_path = Some(path);
    }
    if cli.no_fast_store {
        config.store_path = None;
    }

    match cli.command {
        Commands::Run {
            sessions,
            headers,
            cookie,
            start_id,
            questions,
            json,
        } => {
            if start_id.is_some() {
                config.start_question_id = start_id;
            }
            if let Some(questions) = questions {
                config.questions_per_session = questions;
            }
            cmd_run(config, sessions, &headers, cookie, json).await
        }
        Commands::Stats => cmd_stats(&config).await,
        Commands::Export => cmd_export(&config).await,
        Commands::Import { file, replace } => cmd_import(&config, file, replace).await,
        Commands::Lookup { name, digest } => cmd_lookup(&config, name, digest).await,
        Commands::Letter { letter } => cmd_letter(&config, letter).await,
        Commands::Clear => cmd_clear(&config).await,
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose {
        "solver_core=debug,faces_solver=debug"
    } else {
        "solver_core=info,faces_solver=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn open_cache(config: &SolverConfig) -> Result<LabelCache> {
    let storage = LabelStorage::open(&config.data_path, config.store_path.as_deref());
    let cache = LabelCache::new(storage);
    let report = cache.load().await;
    if let Some(warning) = report.warning {
        warn!("{}", warning);
    }
    Ok(cache)
}

async fn cmd_run(
    config: SolverConfig,
    sessions: u32,
    headers: &[String],
    cookie: Option<String>,
    json: bool,
) -> Result<()> {
    let mut credentials = Credentials::new();
    for line in headers {
        credentials = credentials.with_header_line(line)?;
    }
    if let Some(cookie) = cookie.or_else(|| std::env::var("FACES_COOKIE").ok()) {
        credentials = credentials.with_cookie(&cookie);
    }
    if !credentials.has_cookie() {
        warn!("No cookie given (--cookie or FACES_COOKIE); the game will likely reject requests");
    }

    let (mut orchestrator, loaded) = Orchestrator::connect(config, &credentials).await?;
    if let Some(warning) = loaded.warning {
        warn!("{}", warning);
    }
    info!("Loaded {} labels", loaded.loaded);

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, finishing up...");
            on_ctrl_c.cancel();
        }
    });

    match orchestrator.run_sequence(sessions, &cancel).await {
        Ok(report) => {
            print_report(&report, json)?;
            Ok(())
        }
        Err(aborted) => {
            print_report(&aborted.report, json)?;
            Err(anyhow!("{}", aborted))
        }
    }
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("=== Faces Solver Run ===");
    for (i, session) in report.sessions.iter().enumerate() {
        println!(
            "Session {:>2}  game {:<12}  score {:>6}  {}/{} correct",
            i + 1,
            session.game_id,
            session.score,
            session.correct,
            session.total
        );
    }
    println!();
    println!("Total score:  {}", report.total_score);
    println!("Best score:   {}", report.best_score);
    println!(
        "Correct:      {}/{} ({:.1}%)",
        report.correct_guesses,
        report.total_guesses,
        report.accuracy * 100.0
    );
    println!("Labels known: {}", report.known_label_count);
    if !report.persisted {
        println!("WARNING: learned labels could not be saved");
    }
    if report.cancelled {
        println!("Run was cancelled before all sessions finished");
    }
    Ok(())
}

async fn cmd_stats(config: &SolverConfig) -> Result<()> {
    let cache = open_cache(config).await?;
    let stats = cache.stats().await;

    println!("=== Faces Label Database ===");
    println!("Snapshot:   {}", config.data_path.display());
    match &config.store_path {
        Some(path) => println!("Fast store: {}", path.display()),
        None => println!("Fast store: disabled"),
    }
    println!();
    println!("Labels:         {}", stats.labels);
    println!("Distinct names: {}", stats.distinct_names);
    for (letter, count) in &stats.names_per_letter {
        println!("  {}  {}", letter.to_uppercase(), count);
    }
    Ok(())
}

async fn cmd_export(config: &SolverConfig) -> Result<()> {
    let cache = open_cache(config).await?;
    let records = cache.snapshot().await;
    println!("{}", serde_json::to_string_pretty(&records)?);
    Ok(())
}

async fn cmd_import(config: &SolverConfig, file: PathBuf, replace: bool) -> Result<()> {
    let content = std::fs::read_to_string(&file)
        .map_err(|e| anyhow!("Failed to read {}: {}", file.display(), e))?;
    let parsed = parse_snapshot(&content)?;
    if parsed.format == SnapshotFormat::LegacyMap {
        println!(
            "Note: {} uses the legacy {{hash: name}} layout. Entries hashed from base64 text instead of picture bytes will never match a question.",
            file.display()
        );
    }
    if parsed.skipped > 0 {
        println!("Skipped {} malformed entries", parsed.skipped);
    }
    let records = parsed.records;
    let cache = open_cache(config).await?;

    if replace {
        if let Some(backup) = JsonSnapshotStore::new(&config.data_path).backup()? {
            println!("Backup written to {}", backup.display());
        }
        cache.clear().await;
    }

    let summary = cache.merge(&records).await;
    cache.save().await?;

    println!(
        "Imported {} records: {} new, {} corrected, {} unchanged, {} rejected",
        records.len(),
        summary.inserted,
        summary.corrected,
        summary.unchanged,
        summary.rejected
    );
    println!("Labels now: {}", cache.len().await);
    Ok(())
}

async fn cmd_lookup(
    config: &SolverConfig,
    name: Option<String>,
    digest: Option<String>,
) -> Result<()> {
    let cache = open_cache(config).await?;

    if let Some(name) = name {
        let digests = cache.digests_for_name(&name).await;
        if digests.is_empty() {
            println!("No pictures known for '{}'", name);
        }
        for digest in digests {
            println!("{}  {}", digest, name);
        }
        return Ok(());
    }

    if let Some(hex) = digest {
        let digest: ImageDigest = hex.parse().map_err(|e: String| anyhow!(e))?;
        match cache.lookup_by_digest(&digest).await {
            Some(name) => println!("{}  {}", digest, name),
            None => println!("Unknown digest {}", digest),
        }
    }
    Ok(())
}

async fn cmd_letter(config: &SolverConfig, letter: char) -> Result<()> {
    let cache = open_cache(config).await?;
    let names = cache.names_by_letter(letter).await;

    if names.is_empty() {
        println!("No names starting with '{}'", letter);
    }
    for name in &names {
        println!("{}", name);
    }
    Ok(())
}

async fn cmd_clear(config: &SolverConfig) -> Result<()> {
    if let Some(backup) = JsonSnapshotStore::new(&config.data_path).backup()? {
        println!("Backup written to {}", backup.display());
    }

    let cache = open_cache(config).await?;
    let before = cache.len().await;
    cache.clear().await;
    cache.save().await?;

    println!("Removed {} labels", before);
    Ok(())
}
