use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "repograph",
    version,
    about = "Python repository graph indexer and query service",
    after_help = r#"Examples:
  repograph index --repo .
  repograph index-file --repo . app/models.py
  repograph stats --repo .
  repograph request --method find_entity --params '{"name":"UserService"}'
  repograph request --method find_related --params '{"name":"UserService","relationship":"CONTAINS"}'
  repograph request --method execute_query --params '{"query":"SELECT label, COUNT(*) AS n FROM nodes GROUP BY label"}'
  repograph serve --repo .
  repograph mcp-serve --repo .
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run JSONL RPC server over stdin/stdout.
    Serve {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        /// Graph store path or SQLite `file:` URI.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
    },
    /// Index every Python file of the repository once and exit.
    Index {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
    },
    /// Index a single file and exit.
    IndexFile {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        path: PathBuf,
    },
    /// Print node and edge counts.
    Stats {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Run a single JSONL request and exit.
    Request {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Run MCP server over stdio.
    McpServe {
        #[arg(long, default_value = ".")]
        repo: PathBuf,
        #[arg(long)]
        db: Option<PathBuf>,
        /// Include files ignored by .gitignore.
        #[arg(long)]
        no_ignore: bool,
    },
}
