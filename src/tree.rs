//! The explorer tree handed to presentation code.

use ptree::TreeBuilder;
use serde::Serialize;
use std::path::PathBuf;

use crate::classfile::{ACC_PRIVATE, ACC_PROTECTED, ACC_PUBLIC};
use crate::resolve::Dua;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Project,
    SourceFolder,
    Package,
    EmptyPackage,
    SourceFile,
    Class,
    MethodPublic,
    MethodPrivate,
    MethodProtected,
    MethodDefault,
    DefUseEdge,
}

impl NodeType {
    pub fn for_method(access: u16) -> Self {
        match access & (ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED) {
            ACC_PUBLIC => NodeType::MethodPublic,
            ACC_PRIVATE => NodeType::MethodPrivate,
            ACC_PROTECTED => NodeType::MethodProtected,
            _ => NodeType::MethodDefault,
        }
    }

    pub fn is_method(self) -> bool {
        matches!(
            self,
            NodeType::MethodPublic
                | NodeType::MethodPrivate
                | NodeType::MethodProtected
                | NodeType::MethodDefault
        )
    }

    fn tag(self) -> &'static str {
        match self {
            NodeType::Project => "project",
            NodeType::SourceFolder => "src",
            NodeType::Package => "package",
            NodeType::EmptyPackage => "empty package",
            NodeType::SourceFile => "file",
            NodeType::Class => "class",
            NodeType::MethodPublic => "public",
            NodeType::MethodPrivate => "private",
            NodeType::MethodProtected => "protected",
            NodeType::MethodDefault => "package-private",
            NodeType::DefUseEdge => "def-use",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplorerNode {
    pub label: String,
    pub kind: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dua: Option<Dua>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ExplorerNode>,
}

impl ExplorerNode {
    pub fn new(label: impl Into<String>, kind: NodeType) -> Self {
        Self {
            label: label.into(),
            kind,
            source: None,
            dua: None,
            children: Vec::new(),
        }
    }

    pub fn with_source(mut self, source: Option<PathBuf>) -> Self {
        self.source = source;
        self
    }

    pub fn def_use(dua: Dua, source: Option<PathBuf>) -> Self {
        Self {
            label: dua.to_string(),
            kind: NodeType::DefUseEdge,
            source,
            dua: Some(dua),
            children: Vec::new(),
        }
    }

    pub fn push(&mut self, child: ExplorerNode) {
        self.children.push(child);
    }

    /// Pre-order iterator over this node and all descendants.
    pub fn iter(&self) -> impl Iterator<Item = &ExplorerNode> {
        let mut stack = vec![self];
        std::iter::from_fn(move || {
            let node = stack.pop()?;
            stack.extend(node.children.iter().rev());
            Some(node)
        })
    }

    pub fn count(&self, kind: NodeType) -> usize {
        self.iter().filter(|n| n.kind == kind).count()
    }

    /// First child with the given kind and label.
    pub fn child(&self, kind: NodeType, label: &str) -> Option<&ExplorerNode> {
        self.children
            .iter()
            .find(|c| c.kind == kind && c.label == label)
    }

    /// Renders the tree as indented text.
    pub fn render_text(&self) -> std::io::Result<String> {
        let mut builder = TreeBuilder::new(self.display_label());
        add_children(&mut builder, &self.children);
        let tree = builder.build();

        let mut out = Vec::new();
        ptree::write_tree(&tree, &mut out)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    fn display_label(&self) -> String {
        format!("{} [{}]", self.label, self.kind.tag())
    }
}

fn add_children(builder: &mut TreeBuilder, children: &[ExplorerNode]) {
    for child in children {
        if child.children.is_empty() {
            builder.add_empty_child(child.display_label());
        } else {
            builder.begin_child(child.display_label());
            add_children(builder, &child.children);
            builder.end_child();
        }
    }
}
