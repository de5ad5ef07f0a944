//! Command-line driver for EKG builds.
//!
//! # Responsibility
//! - Parse a small command set and delegate to `ekg_core`.
//! - Print reports as JSON on stdout; diagnostics go to the log file.

use ekg_core::{
    core_version, init_logging, open_db, EkgConfig, EkgPipeline, GraphStore, LogBatch,
    PruneOptions, RedundancyPruner, SqliteGraphStore,
};
use log::error;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const LOG_DIR_ENV: &str = "EKG_LOG_DIR";
const USAGE: &str = "usage:
  ekg_cli version
  ekg_cli build <log.json> <db-path> [config.json]
  ekg_cli rebuild <log.json> <db-path> [config.json]
  ekg_cli resume <db-path>
  ekg_cli summary <db-path>";

fn main() -> ExitCode {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    let args = args.iter().map(String::as_str).collect::<Vec<_>>();

    let outcome = match args.as_slice() {
        ["version"] => {
            println!("ekg_core version={}", core_version());
            Ok(())
        }
        [command @ ("build" | "rebuild"), log_path, db_path, rest @ ..] if rest.len() <= 1 => {
            let mode = if *command == "rebuild" {
                BuildMode::Reset
            } else {
                BuildMode::Extend
            };
            build(
                Path::new(log_path),
                Path::new(db_path),
                rest.first().map(Path::new),
                mode,
            )
        }
        ["resume", db_path] => resume(Path::new(db_path)),
        ["summary", db_path] => summary(Path::new(db_path)),
        _ => {
            eprintln!("{USAGE}");
            return ExitCode::from(2);
        }
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            error!("event=cli module=cli status=error error={message}");
            eprintln!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// `Extend` keeps what the store holds; `Reset` wipes it first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildMode {
    Extend,
    Reset,
}

fn build(
    log_path: &Path,
    db_path: &Path,
    config_path: Option<&Path>,
    mode: BuildMode,
) -> Result<(), String> {
    let config = match config_path {
        Some(path) => read_json::<EkgConfig>(path)?,
        None => EkgConfig::default(),
    };
    config
        .validate()
        .map_err(|err| format!("invalid config: {err}"))?;
    start_logging(&config.log_level)?;

    let batch = read_json::<LogBatch>(log_path)?;
    let conn = open_db(db_path).map_err(|err| format!("graph DB open failed: {err}"))?;
    let store = SqliteGraphStore::try_new(&conn).map_err(|err| err.to_string())?;

    let pipeline = EkgPipeline::new(store, config);
    let report = match mode {
        BuildMode::Extend => pipeline.run(&batch),
        BuildMode::Reset => pipeline.rebuild(&batch),
    }
    .map_err(|err| err.to_string())?;
    print_json(&report)
}

fn resume(db_path: &Path) -> Result<(), String> {
    let config = EkgConfig::default();
    start_logging(&config.log_level)?;

    let conn = open_db(db_path).map_err(|err| format!("graph DB open failed: {err}"))?;
    let store = SqliteGraphStore::try_new(&conn).map_err(|err| err.to_string())?;
    let options = PruneOptions {
        retry: config.retry,
        ..PruneOptions::default()
    };

    match RedundancyPruner::new(store, options)
        .resume_pending()
        .map_err(|err| err.to_string())?
    {
        Some(report) => print_json(&report),
        None => {
            println!("no pending prune run");
            Ok(())
        }
    }
}

fn summary(db_path: &Path) -> Result<(), String> {
    let conn = open_db(db_path).map_err(|err| format!("graph DB open failed: {err}"))?;
    let store = SqliteGraphStore::try_new(&conn).map_err(|err| err.to_string())?;
    let summary = store.graph_summary().map_err(|err| err.to_string())?;
    print_json(&summary)
}

/// Logs only when `EKG_LOG_DIR` points somewhere; otherwise stays silent.
fn start_logging(level: &str) -> Result<(), String> {
    let Some(log_dir) = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from) else {
        return Ok(());
    };
    init_logging(level, &log_dir).map_err(|err| format!("{LOG_DIR_ENV}: {err}"))
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let raw = std::fs::read_to_string(path)
        .map_err(|err| format!("failed to read `{}`: {err}", path.display()))?;
    serde_json::from_str(&raw).map_err(|err| format!("failed to parse `{}`: {err}", path.display()))
}

fn print_json(value: &impl Serialize) -> Result<(), String> {
    let rendered = serde_json::to_string_pretty(value).map_err(|err| err.to_string())?;
    println!("{rendered}");
    Ok(())
}
