use super::{Deadline, Reached, lookup_symbol};
use crate::error::{GraphError, GraphResult};
use crate::graph::IndexGraph;
use crate::model::{Symbol, SymbolSummary};
use serde::Serialize;
use std::collections::{HashSet, VecDeque};

#[derive(Debug, Clone, Serialize)]
pub struct NavigateResult {
    pub function: Symbol,
    pub depth: usize,
    pub calls: Vec<Reached>,
    pub called_by: Vec<Reached>,
    pub unresolved_calls: Vec<String>,
    pub siblings: Vec<SymbolSummary>,
    pub summary: String,
}

#[derive(Clone, Copy)]
enum Direction {
    Callees,
    Callers,
}

/// Callees and callers of `function` up to `depth` hops away.
pub fn navigate(
    graph: &IndexGraph,
    function: &str,
    depth: usize,
    deadline: &Deadline,
) -> GraphResult<NavigateResult> {
    if depth < 1 {
        return Err(GraphError::InvalidArgument(
            "depth must be at least 1".to_string(),
        ));
    }
    let target = lookup_symbol(graph, function)?;
    let mut unresolved_calls = Vec::new();
    let calls = traverse(
        graph,
        target,
        depth,
        Direction::Callees,
        deadline,
        &mut unresolved_calls,
    )?;
    let called_by = traverse(
        graph,
        target,
        depth,
        Direction::Callers,
        deadline,
        &mut Vec::new(),
    )?;
    let siblings = siblings_of(graph, target);

    let mut summary = format!(
        "'{}' at {}:{} calls {} symbols and is called by {} symbols within {} hop{}; \
         it has {} siblings.",
        target.qualified_name,
        target.file,
        target.line,
        calls.len(),
        called_by.len(),
        depth,
        if depth == 1 { "" } else { "s" },
        siblings.len()
    );
    if !unresolved_calls.is_empty() {
        summary.push_str(&format!(
            " {} calls could not be resolved.",
            unresolved_calls.len()
        ));
    }

    Ok(NavigateResult {
        function: target.clone(),
        depth,
        calls,
        called_by,
        unresolved_calls,
        siblings,
        summary,
    })
}

fn traverse(
    graph: &IndexGraph,
    target: &Symbol,
    depth: usize,
    direction: Direction,
    deadline: &Deadline,
    unresolved: &mut Vec<String>,
) -> GraphResult<Vec<Reached>> {
    let mut results = Vec::new();
    let mut visited: HashSet<&str> = HashSet::new();
    let mut seen_unresolved: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<(&str, usize)> = VecDeque::new();
    let mut step = 0usize;
    visited.insert(target.id.as_str());
    queue.push_back((target.id.as_str(), 0));

    while let Some((id, distance)) = queue.pop_front() {
        if distance >= depth {
            continue;
        }
        let next: Vec<&str> = match direction {
            Direction::Callees => {
                let mut next = Vec::new();
                for edge in graph.outgoing(id) {
                    deadline.tick(&mut step)?;
                    if edge.candidates.is_empty() {
                        let entry = format!("unknown callee: {}", edge.callee_name);
                        if seen_unresolved.insert(entry.clone()) {
                            unresolved.push(entry);
                        }
                    }
                    next.extend(edge.candidates.iter().map(String::as_str));
                }
                next
            }
            Direction::Callers => {
                let mut next = Vec::new();
                for edge in graph.incoming(id) {
                    deadline.tick(&mut step)?;
                    next.push(edge.caller_id.as_str());
                }
                next
            }
        };
        for neighbour in next {
            if !visited.insert(neighbour) {
                continue;
            }
            let Some(symbol) = graph.symbol(neighbour) else {
                continue;
            };
            results.push(Reached {
                symbol: SymbolSummary::from(symbol),
                distance: distance + 1,
            });
            queue.push_back((neighbour, distance + 1));
        }
    }
    Ok(results)
}

/// Other symbols sharing the target's parent, or its file's module level.
fn siblings_of(graph: &IndexGraph, target: &Symbol) -> Vec<SymbolSummary> {
    let peers: Vec<&Symbol> = match &target.parent_id {
        Some(parent) => graph.children(parent).collect(),
        None => graph.top_level(&target.file).collect(),
    };
    peers
        .into_iter()
        .filter(|symbol| symbol.id != target.id)
        .map(SymbolSummary::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::testing::GraphBuilder;

    fn names(reached: &[Reached]) -> Vec<(&str, usize)> {
        reached
            .iter()
            .map(|r| (r.symbol.qualified_name.as_str(), r.distance))
            .collect()
    }

    fn chain() -> IndexGraph {
        GraphBuilder::default()
            .symbol("m.py", "a", 1)
            .symbol("m.py", "b", 10)
            .symbol("m.py", "c", 20)
            .symbol("m.py", "d", 30)
            .call("a", &["b"])
            .call("b", &["c"])
            .call("c", &["d"])
            .call("d", &["a"])
            .call_named("b", "print", &[])
            .build()
    }

    #[test]
    fn depth_bounds_each_direction() {
        let graph = chain();
        let one = navigate(&graph, "b", 1, &Deadline::unbounded()).unwrap();
        assert_eq!(names(&one.calls), vec![("c", 1)]);
        assert_eq!(names(&one.called_by), vec![("a", 1)]);
        assert_eq!(one.unresolved_calls, vec!["unknown callee: print"]);

        let two = navigate(&graph, "b", 2, &Deadline::unbounded()).unwrap();
        assert_eq!(names(&two.calls), vec![("c", 1), ("d", 2)]);
        assert_eq!(names(&two.called_by), vec![("a", 1), ("d", 2)]);
    }

    #[test]
    fn cycles_terminate_and_exclude_target() {
        let graph = chain();
        let result = navigate(&graph, "a", 10, &Deadline::unbounded()).unwrap();
        assert_eq!(names(&result.calls), vec![("b", 1), ("c", 2), ("d", 3)]);
        assert!(result.called_by.iter().all(|r| r.symbol.id != "a"));
        assert_eq!(result.called_by.len(), 3);
    }

    #[test]
    fn ambiguous_edges_contribute_all_candidates() {
        let graph = GraphBuilder::default()
            .symbol("m.py", "run", 1)
            .symbol("a.py", "A.save", 1)
            .symbol("b.py", "B.save", 1)
            .call_named("run", "obj.save", &["A.save", "B.save"])
            .build();
        let result = navigate(&graph, "run", 1, &Deadline::unbounded()).unwrap();
        assert_eq!(names(&result.calls), vec![("A.save", 1), ("B.save", 1)]);
        let back = navigate(&graph, "B.save", 1, &Deadline::unbounded()).unwrap();
        assert_eq!(names(&back.called_by), vec![("run", 1)]);
    }

    #[test]
    fn siblings_share_a_parent() {
        let graph = GraphBuilder::default()
            .symbol("m.py", "C", 1)
            .symbol("m.py", "C.one", 2)
            .symbol("m.py", "C.two", 4)
            .symbol("m.py", "free", 10)
            .build();
        let result = navigate(&graph, "C.one", 1, &Deadline::unbounded()).unwrap();
        let siblings: Vec<_> = result.siblings.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(siblings, vec!["C.two"]);
        let top = navigate(&graph, "free", 1, &Deadline::unbounded()).unwrap();
        let siblings: Vec<_> = top.siblings.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(siblings, vec!["C"]);
    }

    #[test]
    fn zero_depth_is_rejected() {
        assert!(matches!(
            navigate(&chain(), "a", 0, &Deadline::unbounded()),
            Err(GraphError::InvalidArgument(_))
        ));
    }
}
