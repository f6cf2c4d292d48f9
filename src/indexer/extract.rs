use crate::error::GraphResult;
use crate::model::{ImportBinding, Language, SymbolKind};
use tree_sitter::Node;

#[derive(Debug, Clone)]
pub struct SymbolInput {
    pub kind: SymbolKind,
    pub is_async: bool,
    pub name: String,
    pub qualname: String,
    /// Index of the lexically enclosing declaration in [`ExtractedFile::symbols`].
    pub parent: Option<usize>,
    pub start_line: i64,
    pub end_line: i64,
    pub signature: Option<String>,
    pub docstring: Option<String>,
    pub parameters: Vec<String>,
    pub decorators: Vec<String>,
    /// blake3 of the declaration's source text.
    pub content_hash: String,
}

/// A call site before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    /// Index of the enclosing declaration in [`ExtractedFile::symbols`].
    pub caller: usize,
    pub callee: String,
    pub line: i64,
    pub column: i64,
}

#[derive(Debug, Default)]
pub struct ExtractedFile {
    pub module: String,
    pub symbols: Vec<SymbolInput>,
    pub calls: Vec<CallRef>,
    pub imports: Vec<ImportBinding>,
}

pub trait LanguageExtractor: Send {
    fn module_name_from_rel_path(&self, rel_path: &str) -> String;

    /// Extracts declarations, call sites and imports from one file.
    ///
    /// A file that does not parse cleanly fails with `GraphError::Parse`; the
    /// indexer records that on the file and keeps going.
    fn extract(&mut self, source: &str, rel_path: &str) -> GraphResult<ExtractedFile>;
}

pub fn extractor_for(language: Language) -> GraphResult<Box<dyn LanguageExtractor>> {
    match language {
        Language::Python => Ok(Box::new(super::python::PythonExtractor::new()?)),
        Language::Rust => Ok(Box::new(super::rust::RustExtractor::new()?)),
    }
}

/// Trimmed source text of `node`.
pub fn node_text(node: Node<'_>, source: &str) -> String {
    source
        .get(node.start_byte()..node.end_byte())
        .unwrap_or("")
        .trim()
        .to_string()
}

pub fn collapse_whitespace(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("")
}

/// 1-based line and column of the first error or missing node.
pub fn first_error_position(root: Node<'_>) -> Option<(usize, usize)> {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if node.is_error() || node.is_missing() {
            let pos = node.start_position();
            return Some((pos.row + 1, pos.column + 1));
        }
        if !node.has_error() {
            continue;
        }
        let mut cursor = node.walk();
        let children: Vec<_> = node.children(&mut cursor).collect();
        stack.extend(children.into_iter().rev());
    }
    None
}

/// `(params) -> ret` from the `parameters` and `return_type` fields.
pub fn extract_signature(node: Node<'_>, source: &str) -> Option<String> {
    let params = node
        .child_by_field_name("parameters")
        .map(|n| node_text(n, source));
    let return_type = node
        .child_by_field_name("return_type")
        .map(|n| node_text(n, source));
    match (params, return_type) {
        (Some(p), Some(r)) => Some(format!("{p} -> {r}")),
        (Some(p), None) => Some(p),
        _ => None,
    }
}
