//! The live index: one published snapshot for readers, one writer at a time.
//!
//! Queries call [`IndexService::snapshot`] and keep that `Arc` for the whole
//! request, so a concurrent refresh never shows them a half-built graph.

use crate::db;
use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::indexer::Indexer;
use crate::model::IndexStats;
use arc_swap::ArcSwap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

struct Writer {
    indexer: Indexer,
    index_path: PathBuf,
}

pub struct IndexService {
    snapshot: ArcSwap<IndexGraph>,
    writer: Mutex<Writer>,
}

impl IndexService {
    /// Opens the saved index and refreshes it, or builds fresh when it is
    /// missing, corrupt or `rebuild` is set. The result is saved before returning.
    pub fn open_or_build(
        indexer: Indexer,
        index_path: PathBuf,
        rebuild: bool,
    ) -> GraphResult<(Self, IndexStats)> {
        let saved = if rebuild {
            None
        } else {
            load_saved(&index_path)?
        };
        let (graph, stats) = match saved {
            Some(graph) => indexer.refresh(&graph)?,
            None => indexer.build()?,
        };
        db::save(&graph, &index_path)?;
        let service = Self::from_graph(indexer, index_path, graph);
        Ok((service, stats))
    }

    pub fn from_graph(indexer: Indexer, index_path: PathBuf, graph: IndexGraph) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(graph),
            writer: Mutex::new(Writer {
                indexer,
                index_path,
            }),
        }
    }

    pub fn snapshot(&self) -> Arc<IndexGraph> {
        self.snapshot.load_full()
    }

    /// Refreshes against the filesystem, saves, then publishes the new generation.
    pub fn refresh(&self) -> GraphResult<IndexStats> {
        let writer = self.lock_writer();
        let current = self.snapshot();
        let (next, stats) = writer.indexer.refresh(&current)?;
        db::save(&next, &writer.index_path)?;
        self.snapshot.store(Arc::new(next));
        Ok(stats)
    }

    pub fn repo_root(&self) -> PathBuf {
        self.lock_writer().indexer.repo_root().to_path_buf()
    }

    fn lock_writer(&self) -> MutexGuard<'_, Writer> {
        self.writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// The saved index, or `None` when there is nothing usable on disk and a
/// build is needed.
pub fn load_saved(index_path: &Path) -> GraphResult<Option<IndexGraph>> {
    match db::open(index_path) {
        Ok(graph) => Ok(Some(graph)),
        Err(GraphError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            tracing::info!("no index at {}, building", index_path.display());
            Ok(None)
        }
        Err(err @ GraphError::CorruptIndex { .. }) => {
            tracing::warn!("{err}; rebuilding");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn refresh_publishes_new_generation() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.py"), "def a():\n    pass\n").unwrap();
        let indexer = Indexer::new(dir.path().to_path_buf()).unwrap();
        let index_path = db::default_index_path(dir.path());
        let (service, stats) =
            IndexService::open_or_build(indexer, index_path.clone(), false).unwrap();
        assert_eq!(stats.generation, 1);

        let held = service.snapshot();
        fs::write(dir.path().join("n.py"), "def b():\n    a()\n").unwrap();
        let stats = service.refresh().unwrap();
        assert_eq!(stats.generation, 2);
        assert_eq!(held.generation(), 1);
        assert_eq!(held.symbols().len(), 1);
        assert_eq!(service.snapshot().symbols().len(), 2);
        assert_eq!(db::open(&index_path).unwrap().generation(), 2);
    }

    #[test]
    fn corrupt_index_is_rebuilt() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("m.py"), "def a():\n    pass\n").unwrap();
        let index_path = db::default_index_path(dir.path());
        fs::create_dir_all(index_path.parent().unwrap()).unwrap();
        fs::write(&index_path, vec![b'x'; 4096]).unwrap();
        let indexer = Indexer::new(dir.path().to_path_buf()).unwrap();
        let (service, _) = IndexService::open_or_build(indexer, index_path.clone(), false).unwrap();
        assert_eq!(service.snapshot().symbols().len(), 1);
        assert!(db::open(&index_path).is_ok());
    }
}
