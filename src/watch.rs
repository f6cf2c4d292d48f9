use crate::config::Config;
use crate::indexer::scan::{self, SKIP_DIRS};
use crate::service::IndexService;
use anyhow::{Context, Result};
use clap::ValueEnum;
use ignore::{
    Match as IgnoreMatch,
    gitignore::{Gitignore, GitignoreBuilder},
};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::{Duration, Instant};

const IDLE_POLL: Duration = Duration::from_millis(200);

#[derive(ValueEnum, Clone, Copy, Debug, Eq, PartialEq)]
pub enum WatchMode {
    Off,
    Auto,
    On,
}

#[derive(Clone, Copy, Debug)]
pub struct WatchConfig {
    pub mode: WatchMode,
    pub debounce: Duration,
    /// Interval of the periodic refresh used when events are unavailable.
    pub fallback_scan: Duration,
    pub no_ignore: bool,
}

impl WatchConfig {
    pub fn new(mode: WatchMode, debounce_ms: Option<u64>, no_ignore: bool) -> Self {
        let config = Config::get();
        let debounce_ms = debounce_ms.unwrap_or(config.watch_debounce_ms);
        Self {
            mode,
            debounce: Duration::from_millis(debounce_ms.max(1)),
            fallback_scan: config.refresh_interval(),
            no_ignore,
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self::new(WatchMode::Auto, None, false)
    }
}

pub struct WatchHandle {
    stop: Sender<()>,
    thread: Option<thread::JoinHandle<()>>,
}

impl WatchHandle {
    pub fn stop(mut self) {
        let _ = self.stop.send(());
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        let _ = self.stop.send(());
    }
}

/// Starts a background thread that refreshes `service` whenever indexed
/// sources under `repo_root` change.
///
/// In `Auto` mode a watcher that cannot start degrades to a periodic
/// refresh; in `On` mode the failure is returned.
pub fn start(
    service: Arc<IndexService>,
    repo_root: PathBuf,
    config: WatchConfig,
) -> Result<Option<WatchHandle>> {
    if config.mode == WatchMode::Off {
        return Ok(None);
    }
    let (ready_tx, ready_rx) = mpsc::channel();
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = thread::Builder::new()
        .name("codegraph-watch".to_string())
        .spawn(move || {
            if let Err(err) = run_loop(service, repo_root, config, stop_rx, ready_tx) {
                tracing::error!("watch error: {err:#}");
            }
        })
        .context("spawn watch thread")?;
    let watch = WatchHandle {
        stop: stop_tx,
        thread: Some(handle),
    };
    match ready_rx.recv_timeout(Duration::from_secs(2)) {
        Ok(Ok(())) => Ok(Some(watch)),
        Ok(Err(err)) => Err(err),
        Err(_) => Ok(Some(watch)),
    }
}

fn run_loop(
    service: Arc<IndexService>,
    repo_root: PathBuf,
    config: WatchConfig,
    stop_rx: Receiver<()>,
    ready: Sender<Result<()>>,
) -> Result<()> {
    let repo_root = std::fs::canonicalize(&repo_root).unwrap_or(repo_root);
    let filter = PathFilter::new(&repo_root, config.no_ignore);
    let (mut watcher, mut event_rx) = match try_start_watcher(&repo_root) {
        Ok((watcher, rx)) => {
            tracing::info!(
                debounce_ms = config.debounce.as_millis() as u64,
                "watching {}",
                repo_root.display()
            );
            let _ = ready.send(Ok(()));
            (Some(watcher), Some(rx))
        }
        Err(err) => {
            if config.mode == WatchMode::On {
                let _ = ready.send(
                    Err(err).with_context(|| format!("watch {}", repo_root.display())),
                );
                return Ok(());
            }
            tracing::warn!(
                interval_secs = config.fallback_scan.as_secs(),
                "watch disabled, falling back to periodic refresh: {err}"
            );
            let _ = ready.send(Ok(()));
            (None, None)
        }
    };

    let mut pending: BTreeSet<PathBuf> = BTreeSet::new();
    let mut last_event = Instant::now();
    let mut last_fallback = Instant::now();
    let mut force_refresh = false;

    loop {
        if stop_requested(&stop_rx) {
            return Ok(());
        }

        if watcher.is_some() {
            let Some(rx) = event_rx.as_ref() else {
                watcher = None;
                continue;
            };
            let wait = if pending.is_empty() {
                IDLE_POLL
            } else {
                config.debounce
            };

            match rx.recv_timeout(wait) {
                Ok(Ok(event)) => {
                    if event.need_rescan() {
                        force_refresh = true;
                        last_event = Instant::now();
                        continue;
                    }
                    if is_noise_event(&event) {
                        continue;
                    }
                    for path in &event.paths {
                        if is_relevant(path) && !filter.is_ignored(path) {
                            pending.insert(path.to_path_buf());
                        }
                    }
                    if !pending.is_empty() {
                        last_event = Instant::now();
                    }
                }
                Ok(Err(err)) => {
                    if should_fallback(&err, config.mode) {
                        tracing::warn!("watch fallback to periodic refresh: {err}");
                        watcher = None;
                        event_rx = None;
                        refresh(&service, "watch fallback");
                        last_fallback = Instant::now();
                    } else {
                        tracing::warn!("watch error: {err}");
                    }
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {}
                Err(mpsc::RecvTimeoutError::Disconnected) => {
                    if config.mode == WatchMode::Auto {
                        tracing::warn!("watch channel closed, falling back to periodic refresh");
                        watcher = None;
                        event_rx = None;
                        last_fallback = Instant::now();
                    } else {
                        return Ok(());
                    }
                }
            }

            let settled = !pending.is_empty() && last_event.elapsed() >= config.debounce;
            if force_refresh || settled {
                tracing::debug!(paths = pending.len(), rescan = force_refresh, "flushing changes");
                refresh(&service, "watch");
                force_refresh = false;
                pending.clear();
            }
        } else if last_fallback.elapsed() >= config.fallback_scan {
            refresh(&service, "periodic refresh");
            last_fallback = Instant::now();
        } else {
            thread::sleep(IDLE_POLL);
        }
    }
}

/// Refresh failures are logged and the previous snapshot stays published.
fn refresh(service: &IndexService, context: &str) {
    match service.refresh() {
        Ok(stats) => {
            if stats.extracted + stats.deleted > 0 {
                tracing::info!(
                    generation = stats.generation,
                    extracted = stats.extracted,
                    deleted = stats.deleted,
                    "{context}: index refreshed"
                );
            }
            if stats.parse_errors > 0 {
                tracing::warn!("{context}: {} files failed to parse", stats.parse_errors);
            }
        }
        Err(err) => tracing::error!("{context}: refresh failed: {err}"),
    }
}

fn stop_requested(stop_rx: &Receiver<()>) -> bool {
    match stop_rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn try_start_watcher(
    repo_root: &Path,
) -> notify::Result<(RecommendedWatcher, Receiver<notify::Result<Event>>)> {
    let (event_tx, event_rx) = mpsc::channel();
    let handler = move |res| {
        let _ = event_tx.send(res);
    };
    let mut watcher = notify::recommended_watcher(handler)?;
    watcher.watch(repo_root, RecursiveMode::Recursive)?;
    Ok((watcher, event_rx))
}

fn is_noise_event(event: &Event) -> bool {
    matches!(event.kind, EventKind::Access(_))
}

/// Indexed sources, plus directories since a removed or renamed directory
/// reports only its own path.
fn is_relevant(path: &Path) -> bool {
    scan::language_for_path(path).is_some() || path.extension().is_none()
}

fn should_fallback(err: &notify::Error, mode: WatchMode) -> bool {
    if mode != WatchMode::Auto {
        return false;
    }
    matches!(
        &err.kind,
        notify::ErrorKind::MaxFilesWatch
            | notify::ErrorKind::WatchNotFound
            | notify::ErrorKind::PathNotFound
    )
}

struct PathFilter {
    repo_root: PathBuf,
    no_ignore: bool,
    gitignore: Gitignore,
}

impl PathFilter {
    fn new(repo_root: &Path, no_ignore: bool) -> Self {
        let gitignore = if no_ignore {
            Gitignore::empty()
        } else {
            build_gitignore(
                repo_root,
                &[
                    repo_root.join(".gitignore"),
                    repo_root.join(".ignore"),
                    repo_root.join(".git/info/exclude"),
                ],
            )
        };
        Self {
            repo_root: repo_root.to_path_buf(),
            no_ignore,
            gitignore,
        }
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let Ok(rel) = path.strip_prefix(&self.repo_root) else {
            return true;
        };
        let skipped = rel.components().any(|component| {
            component
                .as_os_str()
                .to_str()
                .is_some_and(|name| SKIP_DIRS.contains(&name))
        });
        if skipped {
            return true;
        }
        if self.no_ignore {
            return false;
        }
        matches!(
            self.gitignore
                .matched_path_or_any_parents(path, path.is_dir()),
            IgnoreMatch::Ignore(_)
        )
    }
}

fn build_gitignore(root: &Path, files: &[PathBuf]) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    for path in files.iter().filter(|path| path.is_file()) {
        if let Some(err) = builder.add(path) {
            tracing::warn!("watch: ignore parse error: {err}");
        }
    }
    builder.build().unwrap_or_else(|err| {
        tracing::warn!("watch: ignore build error: {err}");
        Gitignore::empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn off_mode_starts_nothing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("m.py"), "def a():\n    pass\n").unwrap();
        let indexer = crate::indexer::Indexer::new(dir.path().to_path_buf()).unwrap();
        let (graph, _) = indexer.build().unwrap();
        let service = Arc::new(IndexService::from_graph(
            indexer,
            crate::db::default_index_path(dir.path()),
            graph,
        ));
        let config = WatchConfig::new(WatchMode::Off, Some(10), false);
        let handle = start(service, dir.path().to_path_buf(), config).unwrap();
        assert!(handle.is_none());
    }

    #[test]
    fn filter_skips_index_dir_and_gitignored_paths() {
        let dir = tempfile::tempdir().unwrap();
        let root = std::fs::canonicalize(dir.path()).unwrap();
        std::fs::write(root.join(".gitignore"), "generated/\n").unwrap();
        let filter = PathFilter::new(&root, false);
        assert!(filter.is_ignored(&root.join(".codegraph/index.db")));
        assert!(filter.is_ignored(&root.join("pkg/__pycache__/m.py")));
        assert!(filter.is_ignored(&root.join("generated/m.py")));
        assert!(filter.is_ignored(Path::new("/elsewhere/m.py")));
        assert!(!filter.is_ignored(&root.join("pkg/m.py")));

        let open = PathFilter::new(&root, true);
        assert!(!open.is_ignored(&root.join("generated/m.py")));
        assert!(open.is_ignored(&root.join(".codegraph/index.db")));
    }

    #[test]
    fn only_sources_and_directories_are_relevant() {
        assert!(is_relevant(Path::new("/r/pkg/m.py")));
        assert!(is_relevant(Path::new("/r/pkg/stubs.pyi")));
        assert!(is_relevant(Path::new("/r/src/lib.rs")));
        assert!(is_relevant(Path::new("/r/pkg")));
        assert!(!is_relevant(Path::new("/r/README.md")));
    }

    #[test]
    fn debounce_has_a_floor() {
        let config = WatchConfig::new(WatchMode::Auto, Some(0), false);
        assert_eq!(config.debounce, Duration::from_millis(1));
    }
}
