//! Turns global chains into source-level def-use pairs.

use serde::Serialize;
use std::fmt;
use tracing::{debug, warn};

use crate::analysis::Variable;
use crate::bytecode::LocalScope;
use crate::chains::DefUseChain;
use crate::error::NameResolutionError;

/// A def-use pair as shown to the user.
///
/// `use_line` may be smaller than `def_line`: lines come from sparse debug
/// information, and a loop body can read a value defined further down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dua {
    pub def_line: u32,
    pub use_line: u32,
    pub var: String,
}

impl fmt::Display for Dua {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.def_line, self.use_line, self.var)
    }
}

/// Maps every chain to lines through `lines` and names its variable.
/// Chains that point outside `variables` or `lines` are dropped.
pub fn resolve_chains(
    chains: &[DefUseChain],
    variables: &[Variable],
    lines: &[u32],
    scopes: &[LocalScope],
) -> Vec<Dua> {
    let mut duas = Vec::with_capacity(chains.len());
    for chain in chains {
        let (Some(var), Some(&def_line), Some(&use_line)) = (
            variables.get(chain.var),
            lines.get(chain.def),
            lines.get(chain.use_at),
        ) else {
            warn!(?chain, "chain refers outside the analyzed method, dropped");
            continue;
        };

        let name = match var {
            Variable::Field { name, .. } => name.clone(),
            Variable::Local { slot } => match local_name(scopes, chain.use_at, *slot) {
                Ok(name) => name.to_string(),
                Err(e) => {
                    debug!(error = %e, "falling back to generic variable name");
                    var.to_string()
                }
            },
        };

        duas.push(Dua {
            def_line,
            use_line,
            var: name,
        });
    }
    duas
}

/// Name of local `slot` at the use at instruction `use_at`.
///
/// The probe position is `use_at + 1`, matched against half-open
/// `[start, end)` scopes. The first declared match wins.
pub fn local_name(
    scopes: &[LocalScope],
    use_at: usize,
    slot: u16,
) -> Result<&str, NameResolutionError> {
    let probe = use_at + 1;
    scopes
        .iter()
        .find(|s| s.slot == slot && s.start <= probe && probe < s.end)
        .map(|s| s.name.as_str())
        .ok_or(NameResolutionError { slot, probe })
}
