//! The in-memory index graph.
//!
//! An [`IndexGraph`] is immutable once constructed: build and refresh always
//! produce a new value, and readers share it behind an `Arc`. Adjacency is
//! derived from the edge list at construction time.

use crate::model::{CallEdge, FileRecord, IndexStatus, Resolution, Symbol};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Default)]
pub struct IndexGraph {
    generation: u64,
    symbols: BTreeMap<String, Symbol>,
    edges: Vec<CallEdge>,
    files: BTreeMap<String, FileRecord>,
    outgoing: HashMap<String, Vec<usize>>,
    incoming: HashMap<String, Vec<usize>>,
    children: HashMap<String, Vec<String>>,
}

impl IndexGraph {
    pub fn new(
        generation: u64,
        symbols: BTreeMap<String, Symbol>,
        mut edges: Vec<CallEdge>,
        mut files: BTreeMap<String, FileRecord>,
    ) -> Self {
        sort_edges(&mut edges);

        let mut owned: HashMap<&str, Vec<&Symbol>> = HashMap::new();
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for symbol in symbols.values() {
            owned.entry(symbol.file.as_str()).or_default().push(symbol);
            if let Some(parent) = &symbol.parent_id {
                children
                    .entry(parent.clone())
                    .or_default()
                    .push(symbol.id.clone());
            }
        }
        for record in files.values_mut() {
            let mut ids: Vec<&Symbol> = owned.remove(record.path.as_str()).unwrap_or_default();
            ids.sort_by(|a, b| a.line.cmp(&b.line).then_with(|| a.id.cmp(&b.id)));
            record.symbol_ids = ids.into_iter().map(|s| s.id.clone()).collect();
        }
        for ids in children.values_mut() {
            ids.sort_by_key(|id| symbols.get(id).map(|s| s.line).unwrap_or_default());
        }

        let mut outgoing: HashMap<String, Vec<usize>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<usize>> = HashMap::new();
        for (idx, edge) in edges.iter().enumerate() {
            outgoing.entry(edge.caller_id.clone()).or_default().push(idx);
            for target in &edge.candidates {
                incoming.entry(target.clone()).or_default().push(idx);
            }
        }

        Self {
            generation,
            symbols,
            edges,
            files,
            outgoing,
            incoming,
            children,
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn symbols(&self) -> &BTreeMap<String, Symbol> {
        &self.symbols
    }

    pub fn symbol(&self, id: &str) -> Option<&Symbol> {
        self.symbols.get(id)
    }

    pub fn edges(&self) -> &[CallEdge] {
        &self.edges
    }

    pub fn files(&self) -> &BTreeMap<String, FileRecord> {
        &self.files
    }

    pub fn file(&self, path: &str) -> Option<&FileRecord> {
        self.files.get(path)
    }

    pub fn outgoing<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a CallEdge> + use<'a> {
        self.outgoing
            .get(id)
            .into_iter()
            .flatten()
            .map(|idx| &self.edges[*idx])
    }

    pub fn incoming<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a CallEdge> + use<'a> {
        self.incoming
            .get(id)
            .into_iter()
            .flatten()
            .map(|idx| &self.edges[*idx])
    }

    /// Symbols declared directly inside `id`, in source order.
    pub fn children<'a>(&'a self, id: &str) -> impl Iterator<Item = &'a Symbol> + use<'a> {
        self.children
            .get(id)
            .into_iter()
            .flatten()
            .filter_map(|child| self.symbols.get(child))
    }

    /// Symbols declared at module level in `path`, in source order.
    pub fn top_level<'a>(&'a self, path: &str) -> impl Iterator<Item = &'a Symbol> + use<'a> {
        self.files
            .get(path)
            .into_iter()
            .flat_map(|record| record.symbol_ids.iter())
            .filter_map(|id| self.symbols.get(id))
            .filter(|symbol| symbol.parent_id.is_none())
    }

    pub fn status(&self) -> IndexStatus {
        let mut status = IndexStatus {
            generation: self.generation,
            files: self.files.len(),
            symbols: self.symbols.len(),
            edges: self.edges.len(),
            resolved: 0,
            ambiguous: 0,
            unresolved: 0,
            parse_errors: self
                .files
                .values()
                .filter(|record| record.parse_error.is_some())
                .count(),
        };
        for edge in &self.edges {
            match edge.resolution {
                Resolution::Resolved => status.resolved += 1,
                Resolution::Ambiguous => status.ambiguous += 1,
                Resolution::Unresolved => status.unresolved += 1,
            }
        }
        status
    }
}

/// Canonical edge order: call site first, so equal content always serializes equally.
pub fn sort_edges(edges: &mut [CallEdge]) {
    edges.sort_by(|a, b| {
        a.file
            .cmp(&b.file)
            .then_with(|| a.line.cmp(&b.line))
            .then_with(|| a.column.cmp(&b.column))
            .then_with(|| a.caller_id.cmp(&b.caller_id))
            .then_with(|| a.callee_name.cmp(&b.callee_name))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Language, SymbolKind};

    fn symbol(id: &str, name: &str, parent: Option<&str>, line: i64) -> Symbol {
        Symbol {
            id: id.to_string(),
            name: name.to_string(),
            qualified_name: name.to_string(),
            module: "m".to_string(),
            language: Language::Python,
            kind: SymbolKind::Function,
            is_async: false,
            file: "m.py".to_string(),
            line,
            end_line: line,
            parent_id: parent.map(str::to_string),
            signature: None,
            docstring: None,
            parameters: Vec::new(),
            decorators: Vec::new(),
        }
    }

    fn file() -> FileRecord {
        FileRecord {
            path: "m.py".to_string(),
            hash: "h".to_string(),
            size: 1,
            modified: 0,
            module: "m".to_string(),
            parse_error: None,
            imports: Vec::new(),
            symbol_ids: Vec::new(),
        }
    }

    #[test]
    fn adjacency_follows_all_candidates() {
        let mut symbols = BTreeMap::new();
        for s in [
            symbol("a", "a", None, 1),
            symbol("b", "b", None, 3),
            symbol("c", "c", None, 5),
            symbol("inner", "inner", Some("a"), 2),
        ] {
            symbols.insert(s.id.clone(), s);
        }
        let edge = CallEdge {
            caller_id: "a".to_string(),
            callee_id: None,
            callee_name: "x".to_string(),
            resolution: Resolution::Unresolved,
            candidates: Vec::new(),
            file: "m.py".to_string(),
            line: 1,
            column: 1,
        }
        .with_candidates(vec!["b".to_string(), "c".to_string()]);
        let mut files = BTreeMap::new();
        files.insert("m.py".to_string(), file());
        let graph = IndexGraph::new(1, symbols, vec![edge], files);

        assert_eq!(graph.outgoing("a").count(), 1);
        assert_eq!(graph.incoming("b").count(), 1);
        assert_eq!(graph.incoming("c").count(), 1);
        assert_eq!(graph.edges()[0].resolution, Resolution::Ambiguous);
        let kids: Vec<_> = graph.children("a").map(|s| s.id.as_str()).collect();
        assert_eq!(kids, vec!["inner"]);
        let top: Vec<_> = graph.top_level("m.py").map(|s| s.id.as_str()).collect();
        assert_eq!(top, vec!["a", "b", "c"]);
        assert_eq!(graph.file("m.py").unwrap().symbol_ids.len(), 4);
    }
}
