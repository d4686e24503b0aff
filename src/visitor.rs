//! Class and method visiting: names, source resolution, line tables and
//! def-use edges for one parsed class.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::analysis::DataFlowAnalyzer;
use crate::builder::BuildStats;
use crate::bytecode::{LineAnnotation, MethodBody};
use crate::chains::{self, ChainSearch};
use crate::classfile::{ClassBinary, MethodBinary};
use crate::error::AnalysisError;
use crate::resolve::{self, Dua};
use crate::tree::{ExplorerNode, NodeType};

/// Source line of every instruction.
///
/// Annotated slots take their line; every other slot inherits the nearest
/// annotated line before it, or line 1 when there is none.
pub fn reconstruct_lines(len: usize, annotations: &[LineAnnotation]) -> Vec<u32> {
    let mut lines = vec![0u32; len];
    for a in annotations {
        if let Some(slot) = lines.get_mut(a.index) {
            *slot = a.line;
        }
    }

    let mut current = 1;
    for line in lines.iter_mut() {
        if *line == 0 {
            *line = current;
        } else {
            current = *line;
        }
    }
    lines
}

pub struct ClassVisitor<'a> {
    source_dirs: &'a [PathBuf],
    analyzer: &'a dyn DataFlowAnalyzer,
    search: &'a dyn ChainSearch,
}

impl<'a> ClassVisitor<'a> {
    pub fn new(
        source_dirs: &'a [PathBuf],
        analyzer: &'a dyn DataFlowAnalyzer,
        search: &'a dyn ChainSearch,
    ) -> Self {
        Self {
            source_dirs,
            analyzer,
            search,
        }
    }

    /// Builds the Class node with its Method and DefUseEdge children.
    pub fn visit(&self, class: &ClassBinary, stats: &mut BuildStats) -> ExplorerNode {
        let source = self.resolve_source(class);
        let mut node =
            ExplorerNode::new(class.simple_name(), NodeType::Class).with_source(source.clone());

        for method in &class.methods {
            let mut method_node = ExplorerNode::new(
                format!("{}{}", method.name, method.descriptor),
                NodeType::for_method(method.access),
            )
            .with_source(source.clone());

            match self.method_duas(class, method) {
                Ok(duas) => {
                    stats.chains += duas.len();
                    for dua in duas {
                        method_node.push(ExplorerNode::def_use(dua, source.clone()));
                    }
                }
                Err(e) => {
                    warn!(
                        class = %class.internal_name,
                        method = %method_node.label,
                        error = %e,
                        "data-flow analysis failed, method kept without def-use edges"
                    );
                    stats.failed_methods += 1;
                }
            }

            stats.methods += 1;
            node.push(method_node);
        }

        stats.classes += 1;
        node
    }

    /// First `<source dir>/<package>/<SourceFile>` that exists.
    pub fn resolve_source(&self, class: &ClassBinary) -> Option<PathBuf> {
        let file_name = class.source_file.as_deref()?;
        let found = self
            .source_dirs
            .iter()
            .map(|dir| source_candidate(dir, class.package(), file_name))
            .find(|candidate| candidate.exists());
        if found.is_none() {
            debug!(class = %class.internal_name, source = file_name, "source file not found");
        }
        found
    }

    /// Global def-use pairs of one method, in chain-search order.
    pub fn method_duas(
        &self,
        class: &ClassBinary,
        method: &MethodBinary,
    ) -> Result<Vec<Dua>, AnalysisError> {
        let body = MethodBody::decode(method, &class.constant_pool)?;
        let lines = reconstruct_lines(body.len(), &body.line_annotations);

        let analysis = self.analyzer.analyze(&body)?;
        let all = self.search.search(&analysis);
        let global = chains::globals(&all, &analysis.leaders);

        Ok(resolve::resolve_chains(
            &global,
            &analysis.variables,
            &lines,
            &body.local_scopes,
        ))
    }
}

fn source_candidate(dir: &Path, package: &str, file_name: &str) -> PathBuf {
    let mut path = dir.to_path_buf();
    for part in package.split('/').filter(|p| !p.is_empty()) {
        path.push(part);
    }
    path.push(file_name);
    path
}
