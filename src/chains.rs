use serde::Serialize;

use crate::analysis::FlowAnalysis;

/// A definition at instruction `def` of variable `var` that reaches the use
/// at instruction `use_at` without an intervening redefinition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DefUseChain {
    pub def: usize,
    pub use_at: usize,
    pub var: usize,
}

impl DefUseChain {
    pub fn new(def: usize, use_at: usize, var: usize) -> Self {
        Self { def, use_at, var }
    }
}

pub trait ChainSearch {
    fn search(&self, analysis: &FlowAnalysis) -> Vec<DefUseChain>;
}

/// Enumerates chains by walking successors depth-first from every
/// definition. A use ends a chain but not the walk; a redefinition ends the
/// walk along that path.
#[derive(Debug, Clone, Copy, Default)]
pub struct DepthFirstChainSearch;

impl ChainSearch for DepthFirstChainSearch {
    fn search(&self, analysis: &FlowAnalysis) -> Vec<DefUseChain> {
        let n = analysis.frames.len();
        let mut chains = Vec::new();
        let mut visited = vec![false; n];
        let mut stack = Vec::new();

        for (def, frame) in analysis.frames.iter().enumerate() {
            for &var in &frame.defs {
                visited.fill(false);
                stack.clear();
                stack.extend(analysis.successors[def].iter().rev().copied());

                let mut found = Vec::new();
                while let Some(at) = stack.pop() {
                    if visited[at] {
                        continue;
                    }
                    visited[at] = true;

                    let here = &analysis.frames[at];
                    if here.uses.contains(&var) {
                        found.push(at);
                    }
                    if here.defs.contains(&var) {
                        continue;
                    }
                    stack.extend(analysis.successors[at].iter().rev().copied());
                }

                found.sort_unstable();
                chains.extend(found.into_iter().map(|u| DefUseChain::new(def, u, var)));
            }
        }
        chains
    }
}

/// Keeps chains whose endpoints lie in different basic blocks.
pub fn globals(chains: &[DefUseChain], leaders: &[usize]) -> Vec<DefUseChain> {
    chains
        .iter()
        .filter(|c| match (leaders.get(c.def), leaders.get(c.use_at)) {
            (Some(d), Some(u)) => d != u,
            _ => false,
        })
        .copied()
        .collect()
}
