//! Read-only queries over one [`IndexGraph`] snapshot.

use crate::error::{Candidate, GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::model::{Symbol, SymbolSummary};
use serde::Serialize;
use std::time::{Duration, Instant};

pub mod find;
pub mod impact;
pub mod navigate;

pub use find::{FindResult, find};
pub use impact::{ImpactResult, RiskLevel, impact, risk_level};
pub use navigate::{NavigateResult, navigate};

/// Traversals poll the deadline once per this many visited edges.
const DEADLINE_STRIDE: usize = 256;

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    expires_at: Option<Instant>,
    budget_ms: u64,
}

impl Deadline {
    pub fn unbounded() -> Self {
        Self {
            expires_at: None,
            budget_ms: 0,
        }
    }

    pub fn after(budget: Duration) -> Self {
        Self {
            expires_at: Instant::now().checked_add(budget),
            budget_ms: budget.as_millis() as u64,
        }
    }

    pub fn check(&self) -> GraphResult<()> {
        match self.expires_at {
            Some(at) if Instant::now() >= at => Err(GraphError::Timeout(self.budget_ms)),
            _ => Ok(()),
        }
    }

    /// Checks only every [`DEADLINE_STRIDE`] steps.
    fn tick(&self, step: &mut usize) -> GraphResult<()> {
        *step += 1;
        if *step % DEADLINE_STRIDE == 0 {
            self.check()?;
        }
        Ok(())
    }
}

/// A symbol reached by a traversal, `distance` hops from the start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reached {
    #[serde(flatten)]
    pub symbol: SymbolSummary,
    pub distance: usize,
}

/// Finds the one symbol named `name`.
///
/// Matches a symbol id, a bare name, a qualified name (`DataProcessor.process`)
/// or a module-qualified name (`main.DataProcessor.process`).
pub fn lookup_symbol<'g>(graph: &'g IndexGraph, name: &str) -> GraphResult<&'g Symbol> {
    let name = name.trim();
    if name.is_empty() {
        return Err(GraphError::InvalidArgument(
            "function must not be empty".to_string(),
        ));
    }
    if let Some(symbol) = graph.symbol(name) {
        return Ok(symbol);
    }
    let mut matches: Vec<&Symbol> = graph
        .symbols()
        .values()
        .filter(|symbol| {
            symbol.name == name
                || symbol.qualified_name == name
                || symbol.module_qualified_name() == name
        })
        .collect();
    match matches.len() {
        0 => Err(GraphError::SymbolNotFound(name.to_string())),
        1 => Ok(matches[0]),
        _ => {
            matches.sort_by(|a, b| a.file.cmp(&b.file).then_with(|| a.line.cmp(&b.line)));
            Err(GraphError::AmbiguousSymbol {
                name: name.to_string(),
                candidates: matches
                    .into_iter()
                    .map(|symbol| Candidate {
                        id: symbol.id.clone(),
                        qualified_name: symbol.module_qualified_name(),
                        file: symbol.file.clone(),
                        line: symbol.line,
                    })
                    .collect(),
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::graph::IndexGraph;
    use crate::model::{CallEdge, FileRecord, Language, Resolution, Symbol, SymbolKind};
    use std::collections::BTreeMap;

    /// Small hand-built graphs for query tests.
    #[derive(Default)]
    pub struct GraphBuilder {
        symbols: BTreeMap<String, Symbol>,
        edges: Vec<CallEdge>,
        files: BTreeMap<String, FileRecord>,
    }

    impl GraphBuilder {
        pub fn symbol(mut self, file: &str, qualname: &str, line: i64) -> Self {
            let id = qualname.to_string();
            let name = qualname.rsplit('.').next().unwrap().to_string();
            let parent_id = qualname.rsplit_once('.').map(|(parent, _)| parent.to_string());
            let module = file.trim_end_matches(".py").replace('/', ".");
            self.files.entry(file.to_string()).or_insert_with(|| FileRecord {
                path: file.to_string(),
                hash: "h".to_string(),
                size: 0,
                modified: 0,
                module: module.clone(),
                parse_error: None,
                imports: Vec::new(),
                symbol_ids: Vec::new(),
            });
            self.symbols.insert(
                id.clone(),
                Symbol {
                    id,
                    name,
                    qualified_name: qualname.to_string(),
                    module,
                    language: Language::Python,
                    kind: if parent_id.is_some() {
                        SymbolKind::Method
                    } else {
                        SymbolKind::Function
                    },
                    is_async: false,
                    file: file.to_string(),
                    line,
                    end_line: line + 1,
                    parent_id,
                    signature: None,
                    docstring: None,
                    parameters: Vec::new(),
                    decorators: Vec::new(),
                },
            );
            self
        }

        pub fn call(self, caller: &str, callees: &[&str]) -> Self {
            let name = callees.first().copied().unwrap_or("unknown");
            self.call_named(caller, name, callees)
        }

        pub fn call_named(mut self, caller: &str, name: &str, callees: &[&str]) -> Self {
            let file = self.symbols[caller].file.clone();
            let line = self.symbols[caller].line + 1 + self.edges.len() as i64;
            self.edges.push(
                CallEdge {
                    caller_id: caller.to_string(),
                    callee_id: None,
                    callee_name: name.to_string(),
                    resolution: Resolution::Unresolved,
                    candidates: Vec::new(),
                    file,
                    line,
                    column: 5,
                }
                .with_candidates(callees.iter().map(|c| c.to_string()).collect()),
            );
            self
        }

        pub fn build(self) -> IndexGraph {
            IndexGraph::new(1, self.symbols, self.edges, self.files)
        }
    }
}
