use anyhow::{Context, Result};
use clap::Parser;
use codegraph::cli::{self, IndexArgs, WatchArgs};
use codegraph::graph::IndexGraph;
use codegraph::indexer::{Indexer, scan::ScanOptions};
use codegraph::mcp::Session;
use codegraph::service::{self, IndexService};
use codegraph::{server, watch};
use serde_json::{Value, json};
use std::io;
use std::sync::Arc;

fn main() -> Result<()> {
    init_tracing();
    let args = cli::Args::parse();

    match args.command {
        cli::Command::Index { target, rebuild } => {
            let (_, stats) = open_service(&target, rebuild)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        cli::Command::ChangedFiles { target } => {
            let indexer = open_indexer(&target)?;
            let index_path = target.index_path(indexer.repo_root());
            let saved = service::load_saved(&index_path)
                .with_context(|| format!("open index {}", index_path.display()))?
                .unwrap_or_else(IndexGraph::empty);
            let changed = indexer.changed_files(&saved)?;
            println!("{}", serde_json::to_string_pretty(&changed)?);
            Ok(())
        }
        cli::Command::Status { target } => {
            let (service, _) = open_service(&target, false)?;
            let status = service.snapshot().status();
            println!("{}", serde_json::to_string_pretty(&status)?);
            Ok(())
        }
        cli::Command::Request {
            target,
            method,
            params,
            params_file,
            id,
        } => {
            let params_raw = match params_file {
                Some(path) => std::fs::read_to_string(&path)
                    .with_context(|| format!("read params {}", path.display()))?,
                None => params,
            };
            let params: Value =
                serde_json::from_str(&params_raw).context("params must be valid JSON")?;
            let id = serde_json::from_str::<Value>(&id)
                .ok()
                .filter(|value| value.is_number())
                .unwrap_or(Value::String(id));
            let (service, _) = open_service(&target, false)?;
            let session = Session::preinitialized(Arc::new(service));
            let message = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
            if let Some(response) = session.handle_message(message) {
                println!("{}", serde_json::to_string(&response)?);
            }
            Ok(())
        }
        cli::Command::Serve {
            target,
            listen,
            watch,
        } => serve(&target, &watch, listen.as_deref(), "serve"),
        cli::Command::McpServe { target, watch } => serve(&target, &watch, None, "mcp-serve"),
    }
}

/// Logs go to stderr; stdout carries protocol frames and command output.
fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn open_indexer(target: &IndexArgs) -> Result<Indexer> {
    Indexer::new_with_options(target.root.clone(), ScanOptions::new(target.no_ignore))
        .with_context(|| format!("open project {}", target.root.display()))
}

fn open_service(
    target: &IndexArgs,
    rebuild: bool,
) -> Result<(IndexService, codegraph::model::IndexStats)> {
    let indexer = open_indexer(target)?;
    let index_path = target.index_path(indexer.repo_root());
    IndexService::open_or_build(indexer, index_path.clone(), rebuild)
        .with_context(|| format!("index {}", index_path.display()))
}

/// Open, refresh, save, publish, then watch; the protocol loop runs until
/// its input closes or ctrl-c.
fn serve(
    target: &IndexArgs,
    watch_args: &WatchArgs,
    listen: Option<&str>,
    name: &str,
) -> Result<()> {
    let (service, stats) = open_service(target, false)?;
    tracing::info!(
        generation = stats.generation,
        files = stats.files,
        symbols = stats.symbols,
        edges = stats.edges,
        "{name}: index ready"
    );
    let service = Arc::new(service);
    let watch_config =
        watch::WatchConfig::new(watch_args.watch, watch_args.watch_debounce_ms, target.no_ignore);
    let watcher = watch::start(service.clone(), service.repo_root(), watch_config)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("start tokio runtime")?;
    let result = runtime.block_on(async {
        match listen {
            Some(addr) => server::serve_tcp(addr, service).await,
            None => server::serve_stdio(service).await,
        }
    });
    if let Some(watcher) = watcher {
        watcher.stop();
    }
    result
}
