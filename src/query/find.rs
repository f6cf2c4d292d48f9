use super::Deadline;
use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::model::{Symbol, SymbolSummary};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Serialize)]
pub struct FindResult {
    pub query: String,
    pub matches: Vec<SymbolSummary>,
    /// Qualified names of the shown matches, keyed by file.
    pub grouped_by_file: BTreeMap<String, Vec<String>>,
    /// Matches before `limit` was applied.
    pub total: usize,
    pub summary: String,
}

/// Case-insensitive substring search over names and qualified names.
///
/// Exact name matches come first, then shorter qualified names, then file and
/// line, so the result order is stable for a given generation.
pub fn find(
    graph: &IndexGraph,
    query: &str,
    scope: Option<&str>,
    limit: Option<usize>,
    deadline: &Deadline,
) -> GraphResult<FindResult> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Err(GraphError::InvalidArgument(
            "query must not be empty".to_string(),
        ));
    }
    let scope = scope
        .map(|value| value.trim().trim_start_matches("./"))
        .filter(|value| !value.is_empty() && *value != ".");

    let mut step = 0usize;
    let mut hits: Vec<(&Symbol, bool)> = Vec::new();
    for symbol in graph.symbols().values() {
        deadline.tick(&mut step)?;
        if let Some(prefix) = scope {
            if !symbol.file.starts_with(prefix) {
                continue;
            }
        }
        let name = symbol.name.to_lowercase();
        if name.contains(&needle) || symbol.qualified_name.to_lowercase().contains(&needle) {
            hits.push((symbol, name == needle));
        }
    }
    hits.sort_by(|(a, a_exact), (b, b_exact)| {
        b_exact
            .cmp(a_exact)
            .then_with(|| a.qualified_name.len().cmp(&b.qualified_name.len()))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.line.cmp(&b.line))
    });

    let total = hits.len();
    let shown = limit.unwrap_or(total).min(total);
    let matches: Vec<SymbolSummary> = hits
        .into_iter()
        .take(shown)
        .map(|(symbol, _)| SymbolSummary::from(symbol))
        .collect();
    let mut grouped_by_file: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for summary in &matches {
        grouped_by_file
            .entry(summary.file.clone())
            .or_default()
            .push(summary.qualified_name.clone());
    }

    let scope_note = scope.map(|s| format!(" in {s}")).unwrap_or_default();
    let mut summary = format!("Found {total} symbols matching '{}'{scope_note}.", query.trim());
    if shown < total {
        summary.push_str(&format!(" Showing the first {shown}."));
    }
    Ok(FindResult {
        query: query.trim().to_string(),
        matches,
        grouped_by_file,
        total,
        summary,
    })
}
