//! Error taxonomy shared by the index, the query engine and the protocol layer.
//!
//! Every variant maps to a stable JSON-RPC error code and a snake_case kind tag
//! so the protocol layer can answer with a structured error instead of crashing.

use std::path::PathBuf;
use thiserror::Error;

pub type GraphResult<T> = Result<T, GraphError>;

/// A symbol offered to the caller when a name is ambiguous.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Candidate {
    pub id: String,
    pub qualified_name: String,
    pub file: String,
    pub line: i64,
}

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("parse error in {path}: {message}")]
    Parse { path: String, message: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt index {path}: {message}")]
    CorruptIndex { path: PathBuf, message: String },

    #[error("ambiguous symbol '{name}': {} candidates", candidates.len())]
    AmbiguousSymbol {
        name: String,
        candidates: Vec<Candidate>,
    },

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("request timed out after {0} ms")]
    Timeout(u64),

    #[error("server not initialized")]
    NotInitialized,

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl GraphError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        GraphError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        GraphError::CorruptIndex {
            path: path.into(),
            message: message.into(),
        }
    }

    /// JSON-RPC error code used on the wire.
    pub fn code(&self) -> i64 {
        match self {
            GraphError::SymbolNotFound(_) => -32000,
            GraphError::AmbiguousSymbol { .. } => -32001,
            GraphError::NotInitialized => -32002,
            GraphError::Timeout(_) => -32003,
            GraphError::CorruptIndex { .. } => -32004,
            GraphError::UnknownOperation(_) => -32601,
            GraphError::InvalidArgument(_) | GraphError::Json(_) => -32602,
            GraphError::Parse { .. } | GraphError::Io { .. } | GraphError::Storage(_) => -32603,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            GraphError::Parse { .. } => "parse_error",
            GraphError::Io { .. } => "io_error",
            GraphError::CorruptIndex { .. } => "corrupt_index",
            GraphError::AmbiguousSymbol { .. } => "ambiguous_symbol",
            GraphError::SymbolNotFound(_) => "symbol_not_found",
            GraphError::UnknownOperation(_) => "unknown_operation",
            GraphError::InvalidArgument(_) | GraphError::Json(_) => "invalid_argument",
            GraphError::Timeout(_) => "timeout",
            GraphError::NotInitialized => "not_initialized",
            GraphError::Storage(_) => "storage_error",
        }
    }
}
