//! Step-graph analysis over `next_steps` edges.
//!
//! Uses `petgraph` to model the workflow as a directed graph: one node per
//! step, one edge per outcome mapping, plus an edge from each loop step to
//! its body entry. Used for reachability warnings and cycle detection at
//! validation time.

use std::collections::{HashMap, HashSet};

use petgraph::algo::is_cyclic_directed;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;

use super::definition::WorkflowGraph;

/// Config key a loop step uses for its body entry slug.
const LOOP_BODY_KEY: &str = "body";

struct StepGraph<'a> {
    graph: DiGraph<&'a str, ()>,
    nodes: HashMap<&'a str, NodeIndex>,
}

fn build(workflow: &WorkflowGraph) -> StepGraph<'_> {
    let mut graph = DiGraph::<&str, ()>::new();
    let nodes: HashMap<&str, NodeIndex> = workflow
        .steps()
        .iter()
        .map(|s| (s.step_slug.as_str(), graph.add_node(s.step_slug.as_str())))
        .collect();

    for step in workflow.steps() {
        let from = nodes[step.step_slug.as_str()];
        let body = step
            .config
            .get(LOOP_BODY_KEY)
            .and_then(|v| v.as_str())
            .filter(|_| step.step_type == "loop");
        for target in step.next_steps.values().map(String::as_str).chain(body) {
            // Dangling targets are reported by validation, not here.
            if let Some(&to) = nodes.get(target) {
                graph.add_edge(from, to, ());
            }
        }
    }

    StepGraph { graph, nodes }
}

/// Steps not reachable from `entry`, in listing order.
pub fn unreachable_steps(workflow: &WorkflowGraph, entry: &str) -> Vec<String> {
    let sg = build(workflow);
    let Some(&start) = sg.nodes.get(entry) else {
        return workflow.steps().iter().map(|s| s.step_slug.clone()).collect();
    };

    let mut seen = HashSet::new();
    let mut dfs = Dfs::new(&sg.graph, start);
    while let Some(node) = dfs.next(&sg.graph) {
        seen.insert(sg.graph[node]);
    }

    workflow
        .steps()
        .iter()
        .filter(|s| !seen.contains(s.step_slug.as_str()))
        .map(|s| s.step_slug.clone())
        .collect()
}

/// Steps reachable from `from` (inclusive).
pub fn reachable_from<'a>(workflow: &'a WorkflowGraph, from: &str) -> HashSet<&'a str> {
    let sg = build(workflow);
    let mut seen = HashSet::new();
    if let Some(&start) = sg.nodes.get(from) {
        let mut dfs = Dfs::new(&sg.graph, start);
        while let Some(node) = dfs.next(&sg.graph) {
            seen.insert(sg.graph[node]);
        }
    }
    seen
}

/// Whether any `next_steps` path revisits a step.
pub fn has_cycle(workflow: &WorkflowGraph) -> bool {
    is_cyclic_directed(&build(workflow).graph)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
