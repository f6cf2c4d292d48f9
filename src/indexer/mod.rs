use crate::config::Config;
use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::indexer::pipeline::{FileExtraction, PendingCall};
use crate::indexer::resolve::SymbolTable;
use crate::model::{
    CallEdge, ChangedFilesResult, FileRecord, ImportBinding, IndexStats, Resolution, Symbol,
};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

pub mod extract;
pub mod pipeline;
pub mod python;
pub mod resolve;
pub mod rust;
pub mod scan;
pub mod stable_id;
pub mod test_detection;

pub struct Indexer {
    repo_root: PathBuf,
    scan_options: scan::ScanOptions,
    workers: usize,
    max_file_bytes: u64,
}

/// One freshly extracted file, with symbol ids assigned and calls pending.
struct FileUnit {
    record: FileRecord,
    symbols: Vec<Symbol>,
    calls: Vec<PendingCall>,
}

impl Indexer {
    pub fn new(repo_root: PathBuf) -> GraphResult<Self> {
        Self::new_with_options(repo_root, scan::ScanOptions::default())
    }

    pub fn new_with_options(
        repo_root: PathBuf,
        scan_options: scan::ScanOptions,
    ) -> GraphResult<Self> {
        let repo_root =
            std::fs::canonicalize(&repo_root).map_err(|err| GraphError::io(&repo_root, err))?;
        let config = Config::get();
        Ok(Self {
            repo_root,
            scan_options,
            workers: config.workers,
            max_file_bytes: config.max_file_bytes,
        })
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_max_file_bytes(mut self, max_file_bytes: u64) -> Self {
        self.max_file_bytes = max_file_bytes;
        self
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    /// Full extraction and resolution of every source file under the root.
    pub fn build(&self) -> GraphResult<(IndexGraph, IndexStats)> {
        let _span = tracing::info_span!("build", root = %self.repo_root.display()).entered();
        self.update(&IndexGraph::empty())
    }

    /// Re-extracts changed, new and deleted files only; everything else is carried over.
    pub fn refresh(&self, graph: &IndexGraph) -> GraphResult<(IndexGraph, IndexStats)> {
        let _span = tracing::info_span!(
            "refresh",
            root = %self.repo_root.display(),
            generation = graph.generation()
        )
        .entered();
        self.update(graph)
    }

    pub fn changed_files(&self, graph: &IndexGraph) -> GraphResult<ChangedFilesResult> {
        let scanned = scan::scan_repo_with_options(&self.repo_root, self.scan_options)?;
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut seen = HashSet::new();
        for file in scanned {
            seen.insert(file.rel_path.clone());
            match graph.file(&file.rel_path) {
                None => added.push(file.rel_path),
                Some(record) if record.hash != file.hash => modified.push(file.rel_path),
                _ => {}
            }
        }
        let deleted: Vec<String> = graph
            .files()
            .keys()
            .filter(|path| !seen.contains(*path))
            .cloned()
            .collect();
        Ok(ChangedFilesResult {
            added,
            modified,
            deleted,
        })
    }

    fn update(&self, previous: &IndexGraph) -> GraphResult<(IndexGraph, IndexStats)> {
        let started = Instant::now();
        let scanned = scan::scan_repo_with_options(&self.repo_root, self.scan_options)?;

        let mut unchanged: HashSet<String> = HashSet::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut to_extract = Vec::new();
        for file in scanned {
            seen.insert(file.rel_path.clone());
            match previous.file(&file.rel_path) {
                Some(record) if record.hash == file.hash => {
                    unchanged.insert(file.rel_path);
                }
                _ => to_extract.push(file),
            }
        }
        let deleted = previous
            .files()
            .keys()
            .filter(|path| !seen.contains(*path))
            .count();
        let extracted_count = to_extract.len();

        let units: Vec<FileUnit> =
            pipeline::parallel_extract(to_extract, self.workers, self.max_file_bytes)
                .into_iter()
                .map(assemble_unit)
                .collect();

        let mut files: BTreeMap<String, FileRecord> = previous
            .files()
            .iter()
            .filter(|(path, _)| unchanged.contains(*path))
            .map(|(path, record)| (path.clone(), record.clone()))
            .collect();
        let mut symbols: BTreeMap<String, Symbol> = previous
            .symbols()
            .values()
            .filter(|symbol| unchanged.contains(&symbol.file))
            .map(|symbol| (symbol.id.clone(), symbol.clone()))
            .collect();

        let mut added_ids = HashSet::new();
        for unit in &units {
            for symbol in &unit.symbols {
                if symbols.contains_key(&symbol.id) {
                    continue;
                }
                if previous.symbol(&symbol.id).is_none() {
                    added_ids.insert(symbol.id.clone());
                }
                symbols.insert(symbol.id.clone(), symbol.clone());
            }
            files.insert(unit.record.path.clone(), unit.record.clone());
        }

        let mut affected_names: HashSet<String> = HashSet::new();
        let mut note_affected = |symbol: &Symbol| {
            affected_names.insert(symbol.name.clone());
            for decorator in &symbol.decorators {
                if let Some(name) = resolve::decorator_name(decorator) {
                    affected_names.insert(name.to_string());
                }
            }
        };
        for symbol in previous.symbols().values() {
            if !symbols.contains_key(&symbol.id) {
                note_affected(symbol);
            }
        }
        for id in &added_ids {
            if let Some(symbol) = symbols.get(id) {
                note_affected(symbol);
            }
        }

        let table = SymbolTable::new(&symbols);
        let mut edges: Vec<CallEdge> = previous
            .edges()
            .iter()
            .filter(|edge| unchanged.contains(&edge.file))
            .map(|edge| carry_edge(&table, &files, &unchanged, &affected_names, edge))
            .collect();

        let pending: Vec<(&[ImportBinding], Vec<PendingCall>)> = units
            .iter()
            .map(|unit| (unit.record.imports.as_slice(), unit.calls.clone()))
            .collect();
        edges.extend(pipeline::parallel_resolve(&table, &pending, self.workers));
        drop(table);

        let generation = previous.generation() + 1;
        let graph = IndexGraph::new(generation, symbols, edges, files);
        let status = graph.status();
        let stats = IndexStats {
            generation,
            files: status.files,
            extracted: extracted_count,
            unchanged: unchanged.len(),
            deleted,
            parse_errors: status.parse_errors,
            symbols: status.symbols,
            edges: status.edges,
            duration_ms: started.elapsed().as_millis(),
        };
        tracing::info!(
            generation,
            files = stats.files,
            extracted = stats.extracted,
            deleted = stats.deleted,
            symbols = stats.symbols,
            edges = stats.edges,
            parse_errors = stats.parse_errors,
            "index updated in {} ms",
            stats.duration_ms
        );
        Ok((graph, stats))
    }
}

/// Keeps an edge from an unchanged file, re-resolving it when the symbols it
/// could reach may have changed.
fn carry_edge(
    table: &SymbolTable<'_>,
    files: &BTreeMap<String, FileRecord>,
    unchanged: &HashSet<String>,
    affected_names: &HashSet<String>,
    edge: &CallEdge,
) -> CallEdge {
    let Some(caller) = table.symbol(&edge.caller_id) else {
        return edge.clone();
    };
    let dangling = edge
        .candidates
        .iter()
        .any(|candidate| table.symbol(candidate).is_none());
    let name_affected = resolve::terminal_name(&edge.callee_name)
        .is_some_and(|name| affected_names.contains(name));
    let binding_affected = table
        .bound_decorator(caller, &edge.callee_name)
        .is_some_and(|name| affected_names.contains(name));
    if dangling || name_affected || binding_affected || edge.resolution == Resolution::Unresolved
    {
        let imports = files
            .get(&edge.file)
            .map(|record| record.imports.as_slice())
            .unwrap_or_default();
        let candidates = table.resolve(caller, &edge.callee_name, imports);
        return edge.clone().with_candidates(candidates);
    }

    // Same ids, but a re-extracted file may have moved them.
    let moved = edge.candidates.len() > 1
        && edge.candidates.iter().any(|id| {
            table
                .symbol(id)
                .is_some_and(|symbol| !unchanged.contains(&symbol.file))
        });
    if !moved {
        return edge.clone();
    }
    let mut targets: Vec<&Symbol> = edge
        .candidates
        .iter()
        .filter_map(|id| table.symbol(id))
        .collect();
    resolve::sort_by_preference(&caller.file, &mut targets);
    let candidates = targets.iter().map(|symbol| symbol.id.clone()).collect();
    edge.clone().with_candidates(candidates)
}

fn assemble_unit(extraction: FileExtraction) -> FileUnit {
    let FileExtraction {
        scanned,
        module,
        outcome,
    } = extraction;
    let mut record = FileRecord {
        path: scanned.rel_path.clone(),
        hash: scanned.hash,
        size: scanned.size,
        modified: scanned.modified,
        module: module.clone(),
        parse_error: None,
        imports: Vec::new(),
        symbol_ids: Vec::new(),
    };
    let extracted = match outcome {
        Ok(extracted) => extracted,
        Err(message) => {
            record.parse_error = Some(message);
            return FileUnit {
                record,
                symbols: Vec::new(),
                calls: Vec::new(),
            };
        }
    };

    let ids: Vec<String> = extracted
        .symbols
        .iter()
        .map(|input| stable_id::compute_stable_symbol_id(&record.path, input))
        .collect();
    let symbols: Vec<Symbol> = extracted
        .symbols
        .into_iter()
        .zip(ids.iter())
        .map(|(input, id)| Symbol {
            id: id.clone(),
            name: input.name,
            qualified_name: input.qualname,
            module: module.clone(),
            language: scanned.language,
            kind: input.kind,
            is_async: input.is_async,
            file: record.path.clone(),
            line: input.start_line,
            end_line: input.end_line,
            parent_id: input.parent.and_then(|idx| ids.get(idx).cloned()),
            signature: input.signature,
            docstring: input.docstring,
            parameters: input.parameters,
            decorators: input.decorators,
        })
        .collect();
    let calls: Vec<PendingCall> = extracted
        .calls
        .into_iter()
        .filter_map(|call| {
            Some(PendingCall {
                caller_id: ids.get(call.caller)?.clone(),
                callee: call.callee,
                file: record.path.clone(),
                line: call.line,
                column: call.column,
            })
        })
        .collect();
    record.imports = extracted.imports;

    FileUnit {
        record,
        symbols,
        calls,
    }
}
