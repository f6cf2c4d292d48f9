use crate::watch::WatchMode;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "codegraph",
    version,
    about = "Python and Rust call-graph indexer",
    after_help = r#"Examples:
  codegraph index --root .
  codegraph request --method find --params '{"query":"save","limit":10}'
  codegraph request --method navigate --params '{"function":"DataProcessor.process","depth":2}'
  codegraph request --method impact --params '{"function":"helpers.validate","include_tests":true}'
  codegraph serve --root . --listen 127.0.0.1:7878 --watch auto
  codegraph mcp-serve --root .
"#
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

/// Where the project and its saved index live.
#[derive(ClapArgs, Clone, Debug)]
pub struct IndexArgs {
    /// Project root to index.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Index file, defaults to <root>/.codegraph/index.db.
    #[arg(long)]
    pub index: Option<PathBuf>,
    /// Include files ignored by .gitignore.
    #[arg(long)]
    pub no_ignore: bool,
}

impl IndexArgs {
    pub fn index_path(&self, canonical_root: &Path) -> PathBuf {
        self.index
            .clone()
            .unwrap_or_else(|| crate::db::default_index_path(canonical_root))
    }
}

#[derive(ClapArgs, Clone, Debug)]
pub struct WatchArgs {
    /// File watch mode: auto|on|off.
    #[arg(long, default_value = "auto")]
    pub watch: WatchMode,
    /// Debounce window for filesystem events in milliseconds.
    #[arg(long)]
    pub watch_debounce_ms: Option<u64>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Refresh the saved index, or build it, and print the stats.
    Index {
        #[command(flatten)]
        target: IndexArgs,
        /// Ignore any saved index and build from scratch.
        #[arg(long)]
        rebuild: bool,
    },
    /// Show files changed on disk since the saved index.
    ChangedFiles {
        #[command(flatten)]
        target: IndexArgs,
    },
    /// Print index counts.
    Status {
        #[command(flatten)]
        target: IndexArgs,
    },
    /// Run a single request against a refreshed index and exit.
    Request {
        #[command(flatten)]
        target: IndexArgs,
        #[arg(long)]
        method: String,
        #[arg(long, default_value = "{}")]
        params: String,
        #[arg(long, value_name = "PATH")]
        params_file: Option<PathBuf>,
        #[arg(long, default_value = "1")]
        id: String,
    },
    /// Run the line-delimited JSON-RPC server over stdio, or TCP with --listen.
    Serve {
        #[command(flatten)]
        target: IndexArgs,
        /// Listen on this TCP address instead of stdio.
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,
        #[command(flatten)]
        watch: WatchArgs,
    },
    /// Run the MCP server over stdio.
    McpServe {
        #[command(flatten)]
        target: IndexArgs,
        #[command(flatten)]
        watch: WatchArgs,
    },
}
