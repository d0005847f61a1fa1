use anyhow::{Context, Result};
use clap::Parser;
use repograph::db::GraphStore;
use repograph::indexer::{Indexer, scan::ScanOptions};
use repograph::{cli, mcp, rpc};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_LOG_FILTER: &str = "repograph=info,warn";

/// Logs go to stderr; stdout carries JSONL and MCP traffic.
fn init_logging() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}

fn resolve_db_path(repo: &PathBuf, db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| mcp::default_db_path(repo))
}

fn open_indexer(repo: PathBuf, db_path: PathBuf, scan_options: ScanOptions) -> Result<Indexer> {
    let location = db_path.to_string_lossy().into_owned();
    let store = GraphStore::open(&location)
        .with_context(|| format!("open graph store {}", db_path.display()))?;
    Ok(Indexer::new_with_options(repo, Arc::new(store), scan_options))
}

fn main() -> Result<()> {
    init_logging();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Serve {
            repo,
            db,
            no_ignore,
        } => {
            let db_path = resolve_db_path(&repo, db);
            rpc::serve(repo, db_path, ScanOptions::new(no_ignore))
        }
        cli::Command::Index {
            repo,
            db,
            no_ignore,
        } => {
            let db_path = resolve_db_path(&repo, db);
            let indexer = open_indexer(repo, db_path, ScanOptions::new(no_ignore))?;
            let report = indexer.index_repository();
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        cli::Command::IndexFile { repo, db, path } => {
            let db_path = resolve_db_path(&repo, db);
            let indexer = open_indexer(repo, db_path, ScanOptions::default())?;
            let indexed = indexer.index_file(&path)?;
            println!("{}", serde_json::to_string_pretty(&indexed)?);
            Ok(())
        }
        cli::Command::Stats { repo, db } => {
            let db_path = resolve_db_path(&repo, db);
            let indexer = open_indexer(repo, db_path, ScanOptions::default())?;
            let stats = indexer.store().stats()?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        cli::Command::Request {
            repo,
            db,
            method,
            params,
            params_file,
            id,
        } => {
            let db_path = resolve_db_path(&repo, db);
            let params_raw = match params_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read {}", path.display()))?,
                None => params,
            };
            let response = rpc::call(repo, db_path, method, &params_raw, &id)?;
            println!("{response}");
            Ok(())
        }
        cli::Command::McpServe {
            repo,
            db,
            no_ignore,
        } => {
            let db_path = resolve_db_path(&repo, db);
            mcp::serve(repo, db_path, ScanOptions::new(no_ignore))
        }
    }
}
