//! Durable storage for the index graph.
//!
//! The whole graph is written to a single SQLite file. Saving always goes to a
//! temporary file in the same directory which is renamed over the target, so a
//! crash mid-write leaves the previous index intact.

use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::model::{CallEdge, FileRecord, Language, Resolution, Symbol, SymbolKind};
use crate::util;
use rusqlite::{Connection, OpenFlags, params};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub mod migrations;

pub use migrations::{FORMAT_TAG, FORMAT_VERSION};

static TEMP_COUNTER: AtomicUsize = AtomicUsize::new(0);

pub fn default_index_path(root: &Path) -> PathBuf {
    root.join(".codegraph").join("index.db")
}

/// Writes `graph` to `path`, replacing any previous index atomically.
pub fn save(graph: &IndexGraph, path: &Path) -> GraphResult<()> {
    util::ensure_parent_dir(path)?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "index.db".to_string());
    let temp_path = path.with_file_name(format!(
        ".{file_name}.tmp-{}-{}",
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let written = write_graph(graph, &temp_path)
        .and_then(|()| fs::rename(&temp_path, path).map_err(|err| GraphError::io(path, err)));
    if written.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    written?;
    tracing::debug!(
        generation = graph.generation(),
        "saved index to {}",
        path.display()
    );
    Ok(())
}

fn write_graph(graph: &IndexGraph, temp_path: &Path) -> GraphResult<()> {
    let mut conn = Connection::open(temp_path)?;
    conn.execute_batch("PRAGMA journal_mode = DELETE; PRAGMA synchronous = FULL;")?;
    let tx = conn.transaction()?;
    migrations::create_schema(&tx)?;
    migrations::set_meta(&tx, "format", FORMAT_TAG)?;
    migrations::set_meta(&tx, "format_version", &FORMAT_VERSION.to_string())?;
    migrations::set_meta(&tx, "generation", &graph.generation().to_string())?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO files (path, hash, size, modified, module, parse_error, imports)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )?;
        for record in graph.files().values() {
            stmt.execute(params![
                record.path,
                record.hash,
                record.size,
                record.modified,
                record.module,
                record.parse_error,
                serde_json::to_string(&record.imports)?,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO symbols (id, name, qualified_name, module, language, kind, is_async,
                                  file, line, end_line, parent_id, signature, docstring,
                                  parameters, decorators)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        )?;
        for symbol in graph.symbols().values() {
            stmt.execute(params![
                symbol.id,
                symbol.name,
                symbol.qualified_name,
                symbol.module,
                symbol.language.as_str(),
                symbol.kind.as_str(),
                symbol.is_async,
                symbol.file,
                symbol.line,
                symbol.end_line,
                symbol.parent_id,
                symbol.signature,
                symbol.docstring,
                serde_json::to_string(&symbol.parameters)?,
                serde_json::to_string(&symbol.decorators)?,
            ])?;
        }

        let mut stmt = tx.prepare(
            "INSERT INTO edges (seq, caller_id, callee_id, callee_name, resolution, candidates,
                                file, line, col)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        )?;
        for (seq, edge) in graph.edges().iter().enumerate() {
            stmt.execute(params![
                seq as i64,
                edge.caller_id,
                edge.callee_id,
                edge.callee_name,
                edge.resolution.as_str(),
                serde_json::to_string(&edge.candidates)?,
                edge.file,
                edge.line,
                edge.column,
            ])?;
        }
    }
    tx.commit()?;
    conn.close().map_err(|(_, err)| GraphError::Storage(err))?;
    Ok(())
}

/// Loads a persisted graph.
///
/// A missing or unreadable file is an `Io` error. Anything that is readable but
/// not a current-format index is `CorruptIndex`, and the caller should rebuild.
pub fn open(path: &Path) -> GraphResult<IndexGraph> {
    fs::metadata(path).map_err(|err| GraphError::io(path, err))?;
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|err| GraphError::corrupt(path, err.to_string()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .map_err(|err| GraphError::corrupt(path, err.to_string()))?;
    migrations::check_format(&conn).map_err(|message| GraphError::corrupt(path, message))?;
    let graph = read_graph(&conn).map_err(|message| GraphError::corrupt(path, message))?;
    tracing::debug!(
        generation = graph.generation(),
        symbols = graph.symbols().len(),
        "opened index {}",
        path.display()
    );
    Ok(graph)
}

fn read_graph(conn: &Connection) -> Result<IndexGraph, String> {
    let generation = migrations::meta_value(conn, "generation")?
        .and_then(|value| value.parse::<u64>().ok())
        .ok_or_else(|| "generation is missing".to_string())?;
    let files = read_files(conn).map_err(|err| err.to_string())?;
    let symbols = read_symbols(conn).map_err(|err| err.to_string())?;
    let edges = read_edges(conn).map_err(|err| err.to_string())?;

    let mut file_map = BTreeMap::new();
    for (record, imports) in files {
        let imports = serde_json::from_str(&imports)
            .map_err(|err| format!("imports of {}: {err}", record.path))?;
        file_map.insert(record.path.clone(), FileRecord { imports, ..record });
    }

    let mut symbol_map = BTreeMap::new();
    for row in symbols {
        let kind = SymbolKind::parse(&row.kind)
            .ok_or_else(|| format!("unknown symbol kind {}", row.kind))?;
        let parameters = serde_json::from_str(&row.parameters)
            .map_err(|err| format!("parameters of {}: {err}", row.symbol.id))?;
        let decorators = serde_json::from_str(&row.decorators)
            .map_err(|err| format!("decorators of {}: {err}", row.symbol.id))?;
        let language = Language::parse(&row.language)
            .ok_or_else(|| format!("unknown language {}", row.language))?;
        let symbol = Symbol {
            language,
            kind,
            parameters,
            decorators,
            ..row.symbol
        };
        symbol_map.insert(symbol.id.clone(), symbol);
    }

    let mut edge_list = Vec::with_capacity(edges.len());
    for row in edges {
        let resolution = Resolution::parse(&row.resolution)
            .ok_or_else(|| format!("unknown resolution {}", row.resolution))?;
        let candidates = serde_json::from_str(&row.candidates).map_err(|err| {
            format!("candidates of edge at {}:{}: {err}", row.edge.file, row.edge.line)
        })?;
        edge_list.push(CallEdge {
            resolution,
            candidates,
            ..row.edge
        });
    }

    Ok(IndexGraph::new(generation, symbol_map, edge_list, file_map))
}

struct SymbolRow {
    symbol: Symbol,
    language: String,
    kind: String,
    parameters: String,
    decorators: String,
}

struct EdgeRow {
    edge: CallEdge,
    resolution: String,
    candidates: String,
}

fn read_files(conn: &Connection) -> rusqlite::Result<Vec<(FileRecord, String)>> {
    let mut stmt = conn.prepare(
        "SELECT path, hash, size, modified, module, parse_error, imports FROM files ORDER BY path",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok((
            FileRecord {
                path: row.get(0)?,
                hash: row.get(1)?,
                size: row.get(2)?,
                modified: row.get(3)?,
                module: row.get(4)?,
                parse_error: row.get(5)?,
                imports: Vec::new(),
                symbol_ids: Vec::new(),
            },
            row.get(6)?,
        ))
    })?;
    rows.collect()
}

fn read_symbols(conn: &Connection) -> rusqlite::Result<Vec<SymbolRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, qualified_name, module, language, kind, is_async, file, line,
                end_line, parent_id, signature, docstring, parameters, decorators
         FROM symbols ORDER BY id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(SymbolRow {
            symbol: Symbol {
                id: row.get(0)?,
                name: row.get(1)?,
                qualified_name: row.get(2)?,
                module: row.get(3)?,
                language: Language::Python,
                kind: SymbolKind::Function,
                is_async: row.get(6)?,
                file: row.get(7)?,
                line: row.get(8)?,
                end_line: row.get(9)?,
                parent_id: row.get(10)?,
                signature: row.get(11)?,
                docstring: row.get(12)?,
                parameters: Vec::new(),
                decorators: Vec::new(),
            },
            language: row.get(4)?,
            kind: row.get(5)?,
            parameters: row.get(13)?,
            decorators: row.get(14)?,
        })
    })?;
    rows.collect()
}

fn read_edges(conn: &Connection) -> rusqlite::Result<Vec<EdgeRow>> {
    let mut stmt = conn.prepare(
        "SELECT caller_id, callee_id, callee_name, resolution, candidates, file, line, col
         FROM edges ORDER BY seq",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(EdgeRow {
            edge: CallEdge {
                caller_id: row.get(0)?,
                callee_id: row.get(1)?,
                callee_name: row.get(2)?,
                resolution: Resolution::Unresolved,
                candidates: Vec::new(),
                file: row.get(5)?,
                line: row.get(6)?,
                column: row.get(7)?,
            },
            resolution: row.get(3)?,
            candidates: row.get(4)?,
        })
    })?;
    rows.collect()
}
