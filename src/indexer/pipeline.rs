//! Parallel extraction and resolution passes.
//!
//! Extraction is embarrassingly parallel: each worker owns its parsers and
//! touches nothing shared. Resolution needs the complete symbol table, so it
//! only starts once every file has been extracted.

use crate::error::GraphError;
use crate::indexer::extract::{ExtractedFile, LanguageExtractor, extractor_for};
use crate::indexer::resolve::SymbolTable;
use crate::indexer::scan::ScannedFile;
use crate::model::{CallEdge, ImportBinding, Language, Resolution};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;

pub struct FileExtraction {
    pub scanned: ScannedFile,
    pub module: String,
    pub outcome: Result<ExtractedFile, String>,
}

/// A call site whose caller id is known but whose callee is not yet resolved.
#[derive(Debug, Clone)]
pub struct PendingCall {
    pub caller_id: String,
    pub callee: String,
    pub file: String,
    pub line: i64,
    pub column: i64,
}

/// One parser per language, created lazily on the worker that needs it.
#[derive(Default)]
struct WorkerExtractors {
    by_language: HashMap<Language, Box<dyn LanguageExtractor>>,
}

impl WorkerExtractors {
    fn get(&mut self, language: Language) -> Result<&mut Box<dyn LanguageExtractor>, String> {
        if !self.by_language.contains_key(&language) {
            let extractor = extractor_for(language).map_err(|err| err.to_string())?;
            self.by_language.insert(language, extractor);
        }
        self.by_language
            .get_mut(&language)
            .ok_or_else(|| format!("no {} extractor", language.as_str()))
    }
}

fn thread_pool(workers: usize) -> Option<rayon::ThreadPool> {
    match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
        Ok(pool) => Some(pool),
        Err(err) => {
            tracing::warn!("thread pool unavailable, running sequentially: {err}");
            None
        }
    }
}

pub fn parallel_extract(
    files: Vec<ScannedFile>,
    workers: usize,
    max_file_bytes: u64,
) -> Vec<FileExtraction> {
    if files.is_empty() {
        return Vec::new();
    }
    match thread_pool(workers) {
        Some(pool) => pool.install(|| {
            files
                .into_par_iter()
                .map_init(WorkerExtractors::default, |extractors, file| {
                    extract_file_worker(extractors, file, max_file_bytes)
                })
                .collect()
        }),
        None => {
            let mut extractors = WorkerExtractors::default();
            files
                .into_iter()
                .map(|file| extract_file_worker(&mut extractors, file, max_file_bytes))
                .collect()
        }
    }
}

fn extract_file_worker(
    extractors: &mut WorkerExtractors,
    scanned: ScannedFile,
    max_file_bytes: u64,
) -> FileExtraction {
    let extractor = match extractors.get(scanned.language) {
        Ok(extractor) => extractor,
        Err(message) => {
            return FileExtraction {
                scanned,
                module: String::new(),
                outcome: Err(message),
            };
        }
    };
    let module = extractor.module_name_from_rel_path(&scanned.rel_path);
    let outcome = read_source(&scanned, max_file_bytes).and_then(|source| {
        extractor
            .extract(&source, &scanned.rel_path)
            .map_err(|err| match err {
                GraphError::Parse { message, .. } => message,
                other => other.to_string(),
            })
    });
    if let Err(message) = &outcome {
        tracing::warn!("parse error in {}: {message}", scanned.rel_path);
    } else {
        tracing::debug!("extracted {}", scanned.rel_path);
    }
    FileExtraction {
        scanned,
        module,
        outcome,
    }
}

fn read_source(scanned: &ScannedFile, max_file_bytes: u64) -> Result<String, String> {
    if let Some(message) = &scanned.read_error {
        return Err(message.clone());
    }
    if scanned.size.max(0) as u64 > max_file_bytes {
        return Err(format!(
            "file is {} bytes, larger than the {max_file_bytes} byte limit",
            scanned.size
        ));
    }
    let bytes = fs::read(&scanned.abs_path).map_err(|err| format!("read failed: {err}"))?;
    String::from_utf8(bytes).map_err(|_| "file is not valid UTF-8".to_string())
}

/// Resolves each file's pending calls against the frozen table.
pub fn parallel_resolve(
    table: &SymbolTable<'_>,
    units: &[(&[ImportBinding], Vec<PendingCall>)],
    workers: usize,
) -> Vec<CallEdge> {
    let resolve_unit = |(imports, calls): &(&[ImportBinding], Vec<PendingCall>)| {
        calls
            .iter()
            .filter_map(|call| resolve_pending(table, imports, call))
            .collect::<Vec<_>>()
    };
    let per_file: Vec<Vec<CallEdge>> = match thread_pool(workers) {
        Some(pool) => pool.install(|| units.par_iter().map(resolve_unit).collect()),
        None => units.iter().map(resolve_unit).collect(),
    };
    per_file.into_iter().flatten().collect()
}

fn resolve_pending(
    table: &SymbolTable<'_>,
    imports: &[ImportBinding],
    call: &PendingCall,
) -> Option<CallEdge> {
    let caller = table.symbol(&call.caller_id)?;
    let candidates = table.resolve(caller, &call.callee, imports);
    Some(
        CallEdge {
            caller_id: call.caller_id.clone(),
            callee_id: None,
            callee_name: call.callee.clone(),
            resolution: Resolution::Unresolved,
            candidates: Vec::new(),
            file: call.file.clone(),
            line: call.line,
            column: call.column,
        }
        .with_candidates(candidates),
    )
}
