//! Depth-first directory walk with file-name include/exclude globs.
//!
//! Backed by `ignore::WalkBuilder` with all ignore-file filters switched off
//! and entries sorted by file name, so repeated walks of an unchanged tree
//! produce the same hook sequence.

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::error::{Result, VizError};

/// Hooks invoked by [`walk_filtered`].
pub trait DirectoryVisitor {
    fn enter_directory(&mut self, dir: &Path) -> Result<()>;
    fn visit_file(&mut self, file: &Path) -> Result<()>;
    fn leave_directory(&mut self, dir: &Path) -> Result<()>;
}

/// File-name predicates. Directories are tested against `exclude` only.
#[derive(Debug, Clone)]
pub struct FileMatcher {
    include: GlobSet,
    exclude: GlobSet,
}

impl FileMatcher {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    pub fn includes(&self, name: &OsStr) -> bool {
        self.include.is_match(name) && !self.exclude.is_match(name)
    }

    pub fn excludes_dir(&self, name: &OsStr) -> bool {
        self.exclude.is_match(name)
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|source| VizError::Pattern {
            pattern: pattern.clone(),
            source,
        })?;
        builder.add(glob);
    }
    builder.build().map_err(|source| VizError::Pattern {
        pattern: patterns.join(","),
        source,
    })
}

/// Walks `root` depth-first. Every entered directory is left exactly once,
/// after all of its descendants. Walker errors abort the walk.
pub fn walk_filtered<V: DirectoryVisitor>(
    root: &Path,
    matcher: &FileMatcher,
    visitor: &mut V,
) -> Result<()> {
    if root.file_name().is_some_and(|n| matcher.excludes_dir(n)) {
        return Ok(());
    }

    let exclude = matcher.exclude.clone();
    let walker = WalkBuilder::new(root)
        .standard_filters(false)
        .follow_links(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && exclude.is_match(entry.file_name()))
        })
        .build();

    let mut open: Vec<(usize, PathBuf)> = Vec::new();
    for entry in walker {
        let entry = entry?;
        let depth = entry.depth();

        while open.last().is_some_and(|(d, _)| *d >= depth) {
            if let Some((_, dir)) = open.pop() {
                visitor.leave_directory(&dir)?;
            }
        }

        let Some(file_type) = entry.file_type() else {
            continue;
        };
        if file_type.is_dir() {
            visitor.enter_directory(entry.path())?;
            open.push((depth, entry.path().to_path_buf()));
        } else if file_type.is_file() && matcher.includes(entry.file_name()) {
            visitor.visit_file(entry.path())?;
        }
    }

    while let Some((_, dir)) = open.pop() {
        visitor.leave_directory(&dir)?;
    }
    Ok(())
}
