use anyhow::{Context, Result};
use clap::Parser;
use defuse_viz::builder::{BuildOptions, ProjectTree, build_project_tree};
use defuse_viz::cli::{Cli, Commands, OutputFormat, ProjectArgs};
use defuse_viz::config::{LOG_FILTER_ENV, resolve_build_options, resolve_matcher, resolve_project};
use defuse_viz::tree::{ExplorerNode, NodeType};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    match &cli.command {
        Commands::Tree { project } => {
            let tree = build(project)?;
            let content = match project.format {
                OutputFormat::Json => serde_json::to_string_pretty(&tree)?,
                OutputFormat::Text => tree
                    .root
                    .render_text()
                    .context("failed to render explorer tree")?,
            };
            write_output(&content);
        }
        Commands::Chains { project } => {
            let tree = build(project)?;
            let rows = chain_rows(&tree.root);
            let content = match project.format {
                OutputFormat::Json => serde_json::to_string_pretty(&rows)?,
                OutputFormat::Text => render_rows(&rows),
            };
            write_output(&content);
        }
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "debug",
            _ => "trace",
        }
    };
    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build(args: &ProjectArgs) -> Result<ProjectTree> {
    let project = resolve_project(args).context("invalid project layout")?;
    let matcher = resolve_matcher(args)?;

    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed))
        .context("failed to install Ctrl-C handler")?;

    let options = BuildOptions {
        cancel: Some(cancel),
        ..resolve_build_options(args)
    };
    build_project_tree(&project, &matcher, options)
        .with_context(|| format!("failed to build tree for {}", project.root().display()))
}

fn write_output(content: &str) {
    print!("{content}");
    if !content.ends_with('\n') {
        println!();
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
struct ChainRow {
    class: String,
    method: String,
    def_line: u32,
    use_line: u32,
    var: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source: Option<PathBuf>,
}

fn chain_rows(root: &ExplorerNode) -> Vec<ChainRow> {
    let mut rows = Vec::new();
    collect_rows(root, "", &mut rows);
    rows
}

fn collect_rows(node: &ExplorerNode, package: &str, rows: &mut Vec<ChainRow>) {
    match node.kind {
        NodeType::Class => {
            let class = if package.is_empty() {
                node.label.clone()
            } else {
                format!("{package}.{}", node.label)
            };
            for method in node.children.iter().filter(|m| m.kind.is_method()) {
                for edge in &method.children {
                    let Some(dua) = &edge.dua else {
                        continue;
                    };
                    rows.push(ChainRow {
                        class: class.clone(),
                        method: method.label.clone(),
                        def_line: dua.def_line,
                        use_line: dua.use_line,
                        var: dua.var.clone(),
                        source: edge.source.clone(),
                    });
                }
            }
        }
        NodeType::Package => {
            for child in &node.children {
                collect_rows(child, &node.label, rows);
            }
        }
        _ => {
            for child in &node.children {
                collect_rows(child, package, rows);
            }
        }
    }
}

fn render_rows(rows: &[ChainRow]) -> String {
    let mut out = String::new();
    for row in rows {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            row.class,
            row.method,
            row.def_line,
            row.use_line,
            row.var,
            row.source
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        ));
    }
    out
}
