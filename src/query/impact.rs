use super::{Deadline, Reached, lookup_symbol};
use crate::error::GraphResult;
use crate::graph::IndexGraph;
use crate::indexer::test_detection::is_test_file;
use crate::model::SymbolSummary;
use serde::Serialize;
use std::collections::{BTreeSet, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    None,
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// Risk of changing a symbol with `callers` transitive callers spread over `files` files.
///
/// Monotonic in both arguments.
pub fn risk_level(callers: usize, files: usize) -> RiskLevel {
    match (callers, files) {
        (0, _) => RiskLevel::None,
        (n, f) if n <= 3 && f <= 1 => RiskLevel::Low,
        (n, f) if n <= 10 && f <= 3 => RiskLevel::Medium,
        _ => RiskLevel::High,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ImpactResult {
    pub function: SymbolSummary,
    pub risk_level: RiskLevel,
    pub include_tests: bool,
    pub direct_callers: Vec<Reached>,
    pub transitive_callers: Vec<Reached>,
    pub files_affected: Vec<String>,
    /// Test files the walk passed through, reported whether or not their
    /// callers are.
    pub test_files: Vec<String>,
    pub summary: String,
}

/// Everything that calls `function`, directly or through other callers.
///
/// The walk always passes through test files; `include_tests` only decides
/// whether callers defined in them are reported.
pub fn impact(
    graph: &IndexGraph,
    function: &str,
    include_tests: bool,
    deadline: &Deadline,
) -> GraphResult<ImpactResult> {
    let target = lookup_symbol(graph, function)?;

    let mut transitive_callers = Vec::new();
    let mut test_files: BTreeSet<&str> = BTreeSet::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
    let mut step = 0usize;
    visited.insert(target.id.as_str());
    queue.push_back((target.id.as_str(), 0));

    while let Some((id, distance)) = queue.pop_front() {
        for edge in graph.incoming(id) {
            deadline.tick(&mut step)?;
            let caller_id = edge.caller_id.as_str();
            if !visited.insert(caller_id) {
                continue;
            }
            let Some(caller) = graph.symbol(caller_id) else {
                continue;
            };
            queue.push_back((caller_id, distance + 1));
            if is_test_file(&caller.file) {
                test_files.insert(caller.file.as_str());
                if !include_tests {
                    continue;
                }
            }
            transitive_callers.push(Reached {
                symbol: SymbolSummary::from(caller),
                distance: distance + 1,
            });
        }
    }

    let direct_callers: Vec<Reached> = transitive_callers
        .iter()
        .filter(|reached| reached.distance == 1)
        .cloned()
        .collect();
    let files_affected: Vec<String> = transitive_callers
        .iter()
        .map(|reached| reached.symbol.file.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let risk = risk_level(transitive_callers.len(), files_affected.len());
    let summary = format!(
        "Changing '{}' directly affects {} callers and transitively {} callers \
         across {} files. Risk level: {}.",
        target.qualified_name,
        direct_callers.len(),
        transitive_callers.len(),
        files_affected.len(),
        risk.as_str()
    );

    Ok(ImpactResult {
        function: SymbolSummary::from(target),
        risk_level: risk,
        include_tests,
        direct_callers,
        transitive_callers,
        files_affected,
        test_files: test_files.into_iter().map(str::to_string).collect(),
        summary,
    })
}
