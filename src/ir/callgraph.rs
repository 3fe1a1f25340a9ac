//! Module call graph.
//!
//! Rebuilt from scratch whenever the module changes; the work-group pass
//! constructs a fresh one for every kernel it processes.

use std::collections::{BTreeSet, HashMap};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Dfs, Reversed};

use super::{Function, Module};

pub struct CallGraph {
    graph: DiGraph<String, ()>,
    index: HashMap<String, NodeIndex>,
}

impl CallGraph {
    pub fn build(module: &Module) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for func in &module.functions {
            let node = graph.add_node(func.name.clone());
            index.insert(func.name.clone(), node);
        }
        for func in &module.functions {
            let from = index[&func.name];
            for callee in func.callees() {
                let to = *index
                    .entry(callee.to_string())
                    .or_insert_with(|| graph.add_node(callee.to_string()));
                graph.update_edge(from, to, ());
            }
        }
        Self { graph, index }
    }

    /// `root` and every function transitively called from it.
    pub fn reachable_from(&self, root: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        if let Some(&start) = self.index.get(root) {
            let mut dfs = Dfs::new(&self.graph, start);
            while let Some(node) = dfs.next(&self.graph) {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    /// Every function that satisfies `pred` or transitively calls one
    /// that does. Functions missing from the module never satisfy `pred`.
    pub fn reaching(&self, module: &Module, pred: impl Fn(&Function) -> bool) -> BTreeSet<String> {
        let reversed = Reversed(&self.graph);
        let mut out = BTreeSet::new();
        for func in module.functions.iter().filter(|f| pred(f)) {
            let mut dfs = Dfs::new(reversed, self.index[&func.name]);
            while let Some(node) = dfs.next(reversed) {
                out.insert(self.graph[node].clone());
            }
        }
        out
    }

    pub fn is_recursive(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }
}
