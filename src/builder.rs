//! Builds the explorer tree for a project by walking its class directories.
//!
//! The walk drives a [`TreeBuilder`], which keeps the traversal cursor as an
//! explicit stack of owned nodes: entering a directory pushes a node, leaving
//! it pops the node and appends it to its parent. The Project node sits at
//! the bottom of the stack for the whole build.

use memmap2::Mmap;
use serde::Serialize;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::analysis::{BytecodeAnalyzer, DataFlowAnalyzer};
use crate::chains::{ChainSearch, DepthFirstChainSearch};
use crate::classfile::parse_class;
use crate::config::ProjectRoots;
use crate::error::{Result, VizError};
use crate::scan::{DirectoryVisitor, FileMatcher, walk_filtered};
use crate::tree::{ExplorerNode, NodeType};
use crate::visitor::ClassVisitor;

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Group classes under a SourceFile node named after their declared
    /// source file.
    pub group_by_source: bool,
    /// Checked before every class file; raising it aborts the build.
    pub cancel: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    pub class_files: usize,
    pub classes: usize,
    pub methods: usize,
    pub chains: usize,
    pub skipped_files: usize,
    pub failed_methods: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProjectTree {
    pub root: ExplorerNode,
    pub stats: BuildStats,
}

/// Builds the tree with the default bytecode analyzer and chain search.
pub fn build_project_tree(
    project: &ProjectRoots,
    matcher: &FileMatcher,
    options: BuildOptions,
) -> Result<ProjectTree> {
    build_project_tree_with(
        project,
        matcher,
        options,
        &BytecodeAnalyzer,
        &DepthFirstChainSearch,
    )
}

pub fn build_project_tree_with(
    project: &ProjectRoots,
    matcher: &FileMatcher,
    options: BuildOptions,
    analyzer: &dyn DataFlowAnalyzer,
    search: &dyn ChainSearch,
) -> Result<ProjectTree> {
    let mut builder = TreeBuilder::new(project, options, analyzer, search);
    for dir in project.class_dirs() {
        debug!(dir = %dir.display(), "walking class directory");
        walk_filtered(dir, matcher, &mut builder)?;
    }

    let tree = builder.finish();
    info!(
        class_files = tree.stats.class_files,
        classes = tree.stats.classes,
        methods = tree.stats.methods,
        chains = tree.stats.chains,
        skipped = tree.stats.skipped_files,
        failed = tree.stats.failed_methods,
        "explorer tree built"
    );
    Ok(tree)
}

pub struct TreeBuilder<'a> {
    project: &'a ProjectRoots,
    options: BuildOptions,
    visitor: ClassVisitor<'a>,
    stack: Vec<ExplorerNode>,
    class_root: Option<PathBuf>,
    stats: BuildStats,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(
        project: &'a ProjectRoots,
        options: BuildOptions,
        analyzer: &'a dyn DataFlowAnalyzer,
        search: &'a dyn ChainSearch,
    ) -> Self {
        let label = project
            .root()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| project.root().display().to_string());

        Self {
            project,
            options,
            visitor: ClassVisitor::new(project.source_dirs(), analyzer, search),
            stack: vec![ExplorerNode::new(label, NodeType::Project)],
            class_root: None,
            stats: BuildStats::default(),
        }
    }

    /// Folds any still-open directories into their parents and returns the
    /// Project node.
    pub fn finish(mut self) -> ProjectTree {
        while self.stack.len() > 1 {
            self.close_top();
        }
        let root = self
            .stack
            .pop()
            .unwrap_or_else(|| ExplorerNode::new("", NodeType::Project));
        ProjectTree {
            root,
            stats: self.stats,
        }
    }

    fn cancelled(&self) -> bool {
        self.options
            .cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn close_top(&mut self) {
        if self.stack.len() < 2 {
            return;
        }
        let Some(mut node) = self.stack.pop() else {
            return;
        };
        if node.kind == NodeType::Package && node.children.is_empty() {
            node.kind = NodeType::EmptyPackage;
        }
        if let Some(parent) = self.stack.last_mut() {
            parent.push(node);
        }
    }

    fn folder_label(&self, dir: &Path) -> String {
        let rel = dir.strip_prefix(self.project.root()).unwrap_or(dir);
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }

    fn package_label(&self, dir: &Path) -> String {
        let rel = self
            .class_root
            .as_deref()
            .and_then(|root| dir.strip_prefix(root).ok())
            .unwrap_or(dir);
        let parts: Vec<_> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        parts.join(".")
    }

    fn attach_class(&mut self, class_node: ExplorerNode, source_file: Option<&str>) {
        let group = self.options.group_by_source;
        let Some(top) = self.stack.last_mut() else {
            return;
        };

        match source_file.filter(|_| group) {
            Some(name) => {
                let at = match top
                    .children
                    .iter()
                    .position(|c| c.kind == NodeType::SourceFile && c.label == name)
                {
                    Some(at) => at,
                    None => {
                        top.push(
                            ExplorerNode::new(name, NodeType::SourceFile)
                                .with_source(class_node.source.clone()),
                        );
                        top.children.len() - 1
                    }
                };
                top.children[at].push(class_node);
            }
            None => top.push(class_node),
        }
    }
}

impl DirectoryVisitor for TreeBuilder<'_> {
    fn enter_directory(&mut self, dir: &Path) -> Result<()> {
        let node = if self.project.is_class_root(dir) {
            self.class_root = Some(dir.to_path_buf());
            ExplorerNode::new(self.folder_label(dir), NodeType::SourceFolder)
        } else {
            ExplorerNode::new(self.package_label(dir), NodeType::Package)
        };
        self.stack.push(node);
        Ok(())
    }

    fn visit_file(&mut self, file: &Path) -> Result<()> {
        if self.cancelled() {
            return Err(VizError::Cancelled);
        }
        self.stats.class_files += 1;

        let handle = File::open(file).map_err(|e| VizError::io(file, e))?;
        let len = handle.metadata().map_err(|e| VizError::io(file, e))?.len();
        if len == 0 {
            warn!(file = %file.display(), "empty class file skipped");
            self.stats.skipped_files += 1;
            return Ok(());
        }

        // SAFETY: the file is opened read-only and the map is dropped before
        // this call returns.
        let mmap = unsafe { Mmap::map(&handle) }.map_err(|e| VizError::io(file, e))?;
        let class = match parse_class(&mmap[..]) {
            Ok(class) => class,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "malformed class file skipped");
                self.stats.skipped_files += 1;
                return Ok(());
            }
        };
        drop(mmap);

        let node = self.visitor.visit(&class, &mut self.stats);
        self.attach_class(node, class.source_file.as_deref());
        Ok(())
    }

    fn leave_directory(&mut self, dir: &Path) -> Result<()> {
        if self.project.is_class_root(dir) {
            self.class_root = None;
        }
        self.close_top();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_project(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "defuse_viz_builder_{}_{}_{}",
            std::process::id(),
            nanos,
            name
        ));
        fs::create_dir_all(dir.join("classes")).unwrap();
        dir
    }

    fn matcher() -> FileMatcher {
        FileMatcher::new(&["*.class".to_string()], &[]).unwrap()
    }

    #[test]
    fn empty_directories_become_empty_packages() {
        let root = temp_project("empty");
        fs::create_dir_all(root.join("classes/org/example")).unwrap();
        let project = ProjectRoots::new(root.clone(), &[PathBuf::from("classes")], &[]).unwrap();

        let tree = build_project_tree(&project, &matcher(), BuildOptions::default()).unwrap();
        let folder = tree.root.child(NodeType::SourceFolder, "classes").unwrap();
        let org = folder.child(NodeType::Package, "org").unwrap();
        assert!(org.child(NodeType::EmptyPackage, "org.example").is_some());
        assert_eq!(tree.stats, BuildStats::default());
        assert!(tree.root.iter().all(|n| n.source.is_none()));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_and_empty_class_files_are_skipped() {
        let root = temp_project("malformed");
        fs::write(root.join("classes/Broken.class"), b"not a class file").unwrap();
        fs::write(root.join("classes/Empty.class"), b"").unwrap();
        let project = ProjectRoots::new(root.clone(), &[PathBuf::from("classes")], &[]).unwrap();

        let tree = build_project_tree(&project, &matcher(), BuildOptions::default()).unwrap();
        assert_eq!(tree.stats.class_files, 2);
        assert_eq!(tree.stats.skipped_files, 2);
        assert_eq!(tree.root.count(NodeType::Class), 0);
        assert_eq!(tree.root.children.len(), 1);

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn raised_cancel_flag_aborts_before_the_first_class() {
        let root = temp_project("cancel");
        fs::write(root.join("classes/A.class"), b"x").unwrap();
        let project = ProjectRoots::new(root.clone(), &[PathBuf::from("classes")], &[]).unwrap();

        let options = BuildOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..BuildOptions::default()
        };
        let err = build_project_tree(&project, &matcher(), options).unwrap_err();
        assert!(matches!(err, VizError::Cancelled));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn class_directories_are_walked_in_configured_order() {
        let root = temp_project("order");
        fs::create_dir_all(root.join("more/classes")).unwrap();
        let project = ProjectRoots::new(
            root.clone(),
            &[PathBuf::from("more/classes"), PathBuf::from("classes")],
            &[],
        )
        .unwrap();

        let tree = build_project_tree(&project, &matcher(), BuildOptions::default()).unwrap();
        let labels: Vec<_> = tree.root.children.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["more/classes", "classes"]);
        assert!(tree.root.children.iter().all(|c| c.kind == NodeType::SourceFolder));

        let _ = fs::remove_dir_all(root);
    }
}
