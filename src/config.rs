use std::path::{Path, PathBuf};

use crate::builder::BuildOptions;
use crate::cli::ProjectArgs;
use crate::error::{Result, VizError};
use crate::scan::FileMatcher;

pub const DEFAULT_CLASS_DIR: &str = "target/classes";
pub const DEFAULT_SOURCE_DIR: &str = "src/main/java";
pub const DEFAULT_INCLUDE: &str = "*.class";
pub const LOG_FILTER_ENV: &str = "DEFUSE_VIZ_LOG";

/// Validated project layout: an absolute root plus class and source
/// directories that all live under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRoots {
    root: PathBuf,
    class_dirs: Vec<PathBuf>,
    source_dirs: Vec<PathBuf>,
}

impl ProjectRoots {
    pub fn new(
        root: impl Into<PathBuf>,
        class_dirs: &[PathBuf],
        source_dirs: &[PathBuf],
    ) -> Result<Self> {
        let root = root.into();
        if !root.is_absolute() {
            return Err(VizError::configuration(&root, "should be an absolute directory"));
        }
        if !root.is_dir() {
            return Err(VizError::configuration(&root, "should be a directory"));
        }

        let class_dirs = absolutize(&root, class_dirs)?;
        let source_dirs = absolutize(&root, source_dirs)?;
        Ok(Self {
            root,
            class_dirs,
            source_dirs,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn class_dirs(&self) -> &[PathBuf] {
        &self.class_dirs
    }

    pub fn source_dirs(&self) -> &[PathBuf] {
        &self.source_dirs
    }

    pub fn is_class_root(&self, dir: &Path) -> bool {
        self.class_dirs.iter().any(|d| d == dir)
    }
}

fn absolutize(root: &Path, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut result = Vec::with_capacity(paths.len());
    for path in paths {
        let resolved = if path.is_absolute() {
            if !path.starts_with(root) {
                return Err(VizError::configuration(
                    path,
                    format!("should be under '{}'", root.display()),
                ));
            }
            path.clone()
        } else {
            let joined = root.join(path);
            if !joined.exists() {
                return Err(VizError::configuration(
                    &joined,
                    format!("should exist relative to '{}'", root.display()),
                ));
            }
            joined
        };

        if !resolved.is_dir() {
            return Err(VizError::configuration(&resolved, "should be a valid directory"));
        }
        result.push(resolved);
    }
    Ok(result)
}

pub fn resolve_project(args: &ProjectArgs) -> Result<ProjectRoots> {
    let root = match args.root.clone() {
        Some(p) => p,
        None => std::env::current_dir().map_err(|e| VizError::io(".", e))?,
    };
    let root = std::path::absolute(&root).map_err(|e| VizError::io(&root, e))?;

    let classes = or_default(&args.classes, DEFAULT_CLASS_DIR);
    let sources = or_default(&args.sources, DEFAULT_SOURCE_DIR);
    ProjectRoots::new(root, &classes, &sources)
}

pub fn resolve_matcher(args: &ProjectArgs) -> Result<FileMatcher> {
    let include = if args.include.is_empty() {
        vec![DEFAULT_INCLUDE.to_string()]
    } else {
        args.include.clone()
    };
    FileMatcher::new(&include, &args.exclude)
}

pub fn resolve_build_options(args: &ProjectArgs) -> BuildOptions {
    BuildOptions {
        group_by_source: args.group_by_source,
        ..BuildOptions::default()
    }
}

fn or_default(paths: &[PathBuf], default: &str) -> Vec<PathBuf> {
    if paths.is_empty() {
        vec![PathBuf::from(default)]
    } else {
        paths.to_vec()
    }
}
