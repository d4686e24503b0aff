use defuse_viz::builder::{BuildOptions, ProjectTree, build_project_tree};
use defuse_viz::config::ProjectRoots;
use defuse_viz::resolve::Dua;
use defuse_viz::scan::FileMatcher;
use defuse_viz::tree::{ExplorerNode, NodeType};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(name: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!(
        "defuse_viz_it_{}_{}_{}",
        std::process::id(),
        nanos,
        name
    ))
}

fn write_file(path: &Path, content: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Minimal class-file assembler: constant pool, methods with a `Code`
/// attribute and its debug tables, and a `SourceFile` attribute.
#[derive(Default)]
struct ClassAssembler {
    pool: Vec<Vec<u8>>,
    methods: Vec<Vec<u8>>,
}

struct MethodDef<'a> {
    access: u16,
    name: &'a str,
    descriptor: &'a str,
    max_locals: u16,
    code: Vec<u8>,
    lines: Vec<(u16, u16)>,
    /// (start_pc, length, name, descriptor, slot)
    locals: Vec<(u16, u16, &'a str, &'a str, u16)>,
}

impl ClassAssembler {
    fn constant(&mut self, bytes: Vec<u8>) -> u16 {
        self.pool.push(bytes);
        self.pool.len() as u16
    }

    fn utf8(&mut self, s: &str) -> u16 {
        let mut b = vec![1];
        b.extend((s.len() as u16).to_be_bytes());
        b.extend(s.as_bytes());
        self.constant(b)
    }

    fn class(&mut self, name: &str) -> u16 {
        let n = self.utf8(name);
        let mut b = vec![7];
        b.extend(n.to_be_bytes());
        self.constant(b)
    }

    fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(owner);
        let n = self.utf8(name);
        let d = self.utf8(descriptor);
        let mut nat = vec![12];
        nat.extend(n.to_be_bytes());
        nat.extend(d.to_be_bytes());
        let nat = self.constant(nat);
        let mut b = vec![9];
        b.extend(class.to_be_bytes());
        b.extend(nat.to_be_bytes());
        self.constant(b)
    }

    fn method(&mut self, m: MethodDef<'_>) {
        let name = self.utf8(m.name);
        let descriptor = self.utf8(m.descriptor);
        let code_attr = self.utf8("Code");
        let lnt = self.utf8("LineNumberTable");
        let lvt = self.utf8("LocalVariableTable");

        let mut lines = Vec::new();
        lines.extend((m.lines.len() as u16).to_be_bytes());
        for (pc, line) in &m.lines {
            lines.extend(pc.to_be_bytes());
            lines.extend(line.to_be_bytes());
        }

        let mut locals = Vec::new();
        locals.extend((m.locals.len() as u16).to_be_bytes());
        for (start, len, local_name, local_desc, slot) in &m.locals {
            let n = self.utf8(local_name);
            let d = self.utf8(local_desc);
            locals.extend(start.to_be_bytes());
            locals.extend(len.to_be_bytes());
            locals.extend(n.to_be_bytes());
            locals.extend(d.to_be_bytes());
            locals.extend(slot.to_be_bytes());
        }

        let mut code = Vec::new();
        code.extend(4u16.to_be_bytes());
        code.extend(m.max_locals.to_be_bytes());
        code.extend((m.code.len() as u32).to_be_bytes());
        code.extend(&m.code);
        code.extend(0u16.to_be_bytes());
        code.extend(2u16.to_be_bytes());
        code.extend(lnt.to_be_bytes());
        code.extend((lines.len() as u32).to_be_bytes());
        code.extend(&lines);
        code.extend(lvt.to_be_bytes());
        code.extend((locals.len() as u32).to_be_bytes());
        code.extend(&locals);

        let mut b = Vec::new();
        b.extend(m.access.to_be_bytes());
        b.extend(name.to_be_bytes());
        b.extend(descriptor.to_be_bytes());
        b.extend(1u16.to_be_bytes());
        b.extend(code_attr.to_be_bytes());
        b.extend((code.len() as u32).to_be_bytes());
        b.extend(&code);
        self.methods.push(b);
    }

    fn finish(mut self, name: &str, source_file: &str) -> Vec<u8> {
        let this = self.class(name);
        let sup = self.class("java/lang/Object");
        let sf_attr = self.utf8("SourceFile");
        let sf = self.utf8(source_file);

        let mut out = Vec::new();
        out.extend(0xCAFE_BABEu32.to_be_bytes());
        out.extend(0u16.to_be_bytes());
        out.extend(52u16.to_be_bytes());
        out.extend((self.pool.len() as u16 + 1).to_be_bytes());
        for c in &self.pool {
            out.extend(c);
        }
        out.extend(0x0021u16.to_be_bytes());
        out.extend(this.to_be_bytes());
        out.extend(sup.to_be_bytes());
        out.extend(0u16.to_be_bytes()); // interfaces
        out.extend(0u16.to_be_bytes()); // fields
        out.extend((self.methods.len() as u16).to_be_bytes());
        for m in &self.methods {
            out.extend(m);
        }
        out.extend(1u16.to_be_bytes());
        out.extend(sf_attr.to_be_bytes());
        out.extend(2u32.to_be_bytes());
        out.extend(sf.to_be_bytes());
        out
    }
}

/// `org.example.Counter` with
///
/// ```text
/// 10  public void tick(int n) {
/// 11      if (n > 0) this.counter = n;
/// 12      int x = this.counter;
/// 13  }
///     private void broken() { jsr ...; return; }
/// ```
fn counter_class() -> Vec<u8> {
    let mut asm = ClassAssembler::default();
    let field = asm.field_ref("org/example/Counter", "counter", "I");
    let [fh, fl] = field.to_be_bytes();

    asm.method(MethodDef {
        access: 0x0001,
        name: "tick",
        descriptor: "(I)V",
        max_locals: 3,
        code: vec![
            0x1b, // 0: iload_1
            0x9e, 0x00, 0x08, // 1: ifle 9
            0x2a, // 4: aload_0
            0x1b, // 5: iload_1
            0xb5, fh, fl, // 6: putfield counter
            0x2a, // 9: aload_0
            0xb4, fh, fl, // 10: getfield counter
            0x3d, // 13: istore_2
            0xb1, // 14: return
        ],
        lines: vec![(0, 10), (4, 11), (9, 12), (14, 13)],
        locals: vec![
            (0, 15, "this", "Lorg/example/Counter;", 0),
            (0, 15, "n", "I", 1),
            (14, 1, "x", "I", 2),
        ],
    });
    asm.method(MethodDef {
        access: 0x0002,
        name: "broken",
        descriptor: "()V",
        max_locals: 1,
        code: vec![
            0xa8, 0x00, 0x03, // 0: jsr 3
            0xb1, // 3: return
        ],
        lines: vec![(0, 20)],
        locals: vec![],
    });
    asm.finish("org/example/Counter", "Counter.java")
}

fn inner_class() -> Vec<u8> {
    ClassAssembler::default().finish("org/example/Counter$Inner", "Counter.java")
}

/// Lays out `<root>/classes` and `<root>/src` with the Counter fixture.
fn counter_project(name: &str) -> anyhow::Result<PathBuf> {
    let root = temp_dir(name);
    write_file(&root.join("classes/org/example/Counter.class"), &counter_class())?;
    write_file(&root.join("classes/org/example/Counter$Inner.class"), &inner_class())?;
    write_file(&root.join("classes/org/example/Junk.class"), b"\xca\xfe")?;
    write_file(&root.join("classes/org/example/readme.txt"), b"not visited")?;
    std::fs::create_dir_all(root.join("classes/org/empty"))?;
    write_file(
        &root.join("src/org/example/Counter.java"),
        b"package org.example;\n",
    )?;
    Ok(root)
}

fn build(root: &Path, options: BuildOptions) -> anyhow::Result<ProjectTree> {
    let project = ProjectRoots::new(
        root.to_path_buf(),
        &[PathBuf::from("classes")],
        &[PathBuf::from("src")],
    )?;
    let matcher = FileMatcher::new(&["*.class".to_string()], &[])?;
    Ok(build_project_tree(&project, &matcher, options)?)
}

fn example_package(tree: &ProjectTree) -> &ExplorerNode {
    tree.root
        .child(NodeType::SourceFolder, "classes")
        .and_then(|f| f.child(NodeType::Package, "org"))
        .and_then(|p| p.child(NodeType::Package, "org.example"))
        .expect("org.example package")
}

fn dua(def_line: u32, use_line: u32, var: &str) -> Dua {
    Dua {
        def_line,
        use_line,
        var: var.to_string(),
    }
}

#[test]
fn global_chains_map_to_source_lines() -> anyhow::Result<()> {
    let root = counter_project("lines")?;
    let tree = build(&root, BuildOptions::default())?;

    let class = example_package(&tree)
        .child(NodeType::Class, "Counter")
        .expect("Counter class");
    let source = root.join("src/org/example/Counter.java");
    assert_eq!(class.source.as_deref(), Some(source.as_path()));

    let tick = class
        .child(NodeType::MethodPublic, "tick(I)V")
        .expect("tick method");
    let duas: Vec<_> = tick.children.iter().filter_map(|c| c.dua.clone()).collect();
    assert_eq!(
        duas,
        vec![
            dua(10, 11, "this"),
            dua(10, 12, "this"),
            dua(10, 11, "n"),
            dua(11, 12, "counter"),
        ]
    );
    assert!(tick.children.iter().all(|c| c.kind == NodeType::DefUseEdge));
    assert!(
        tick.children
            .iter()
            .all(|c| c.source.as_deref() == Some(source.as_path()))
    );

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn failed_method_is_kept_without_edges() -> anyhow::Result<()> {
    let root = counter_project("failure")?;
    let tree = build(&root, BuildOptions::default())?;

    let class = example_package(&tree)
        .child(NodeType::Class, "Counter")
        .expect("Counter class");
    let broken = class
        .child(NodeType::MethodPrivate, "broken()V")
        .expect("broken method");
    assert!(broken.children.is_empty());
    assert_eq!(class.children.len(), 2);
    assert_eq!(tree.stats.failed_methods, 1);
    assert_eq!(tree.stats.chains, 4);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn malformed_sibling_is_skipped_and_empty_package_tagged() -> anyhow::Result<()> {
    let root = counter_project("malformed")?;
    let tree = build(&root, BuildOptions::default())?;

    let package = example_package(&tree);
    assert_eq!(package.count(NodeType::Class), 2);
    assert!(package.child(NodeType::Class, "Junk").is_none());
    assert_eq!(tree.stats.class_files, 3);
    assert_eq!(tree.stats.classes, 2);
    assert_eq!(tree.stats.skipped_files, 1);

    let org = tree
        .root
        .child(NodeType::SourceFolder, "classes")
        .and_then(|f| f.child(NodeType::Package, "org"))
        .expect("org package");
    assert!(org.child(NodeType::EmptyPackage, "org.empty").is_some());

    // only class-level nodes point at a source file
    for node in tree.root.iter() {
        match node.kind {
            NodeType::Project
            | NodeType::SourceFolder
            | NodeType::Package
            | NodeType::EmptyPackage => assert!(node.source.is_none(), "{}", node.label),
            _ => {}
        }
    }

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn rebuilding_unchanged_tree_is_identical() -> anyhow::Result<()> {
    let root = counter_project("idempotent")?;
    let first = build(&root, BuildOptions::default())?;
    let second = build(&root, BuildOptions::default())?;
    assert_eq!(first, second);

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn group_by_source_collects_inner_classes() -> anyhow::Result<()> {
    let root = counter_project("grouped")?;
    let options = BuildOptions {
        group_by_source: true,
        ..BuildOptions::default()
    };
    let tree = build(&root, options)?;

    let file = example_package(&tree)
        .child(NodeType::SourceFile, "Counter.java")
        .expect("Counter.java node");
    let mut classes: Vec<_> = file.children.iter().map(|c| c.label.as_str()).collect();
    classes.sort_unstable();
    assert_eq!(classes, vec!["Counter", "Counter$Inner"]);
    assert!(example_package(&tree).child(NodeType::Class, "Counter").is_none());

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn cli_prints_chain_rows_as_json() -> anyhow::Result<()> {
    let root = counter_project("cli_json")?;
    let output = Command::new(env!("CARGO_BIN_EXE_defuse-viz"))
        .args(["chains", "-c", "classes", "-s", "src", "-f", "json"])
        .arg(&root)
        .output()?;
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let rows: Value = serde_json::from_slice(&output.stdout)?;
    let rows = rows.as_array().expect("array of rows");
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[3]["class"], "org.example.Counter");
    assert_eq!(rows[3]["method"], "tick(I)V");
    assert_eq!(rows[3]["def_line"], 11);
    assert_eq!(rows[3]["use_line"], 12);
    assert_eq!(rows[3]["var"], "counter");

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn cli_prints_text_tree() -> anyhow::Result<()> {
    let root = counter_project("cli_text")?;
    let output = Command::new(env!("CARGO_BIN_EXE_defuse-viz"))
        .args(["tree", "-c", "classes", "-s", "src"])
        .arg(&root)
        .output()?;
    assert!(output.status.success());

    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Counter [class]"));
    assert!(text.contains("tick(I)V [public]"));
    assert!(text.contains("(11, 12, counter) [def-use]"));
    assert!(text.contains("org.empty [empty package]"));

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}

#[test]
fn cli_rejects_missing_class_directory() -> anyhow::Result<()> {
    let root = temp_dir("cli_missing");
    std::fs::create_dir_all(&root)?;
    let output = Command::new(env!("CARGO_BIN_EXE_defuse-viz"))
        .args(["tree", "-c", "does-not-exist"])
        .arg(&root)
        .output()?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("does-not-exist"));

    let _ = std::fs::remove_dir_all(root);
    Ok(())
}
