//! Error types for the def-use explorer.
//!
//! Only [`VizError`] aborts a build. [`ClassFormatError`], [`AnalysisError`]
//! and [`NameResolutionError`] are recovered where they occur: a bad class
//! file is skipped, a method that cannot be analyzed keeps no chains, and an
//! unresolved local falls back to a generic name.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, VizError>;

/// Errors fatal to a whole build.
#[derive(Error, Debug)]
pub enum VizError {
    /// Invalid project root, class directory or source directory.
    #[error("invalid project configuration: '{}' {expected}", path.display())]
    Configuration { path: PathBuf, expected: String },

    /// Invalid include/exclude glob.
    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// Unreadable file or directory.
    #[error("I/O failure on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failure reported by the directory walker.
    #[error("I/O failure while walking class directories: {0}")]
    Walk(#[from] ignore::Error),

    #[error("build cancelled")]
    Cancelled,
}

impl VizError {
    pub(crate) fn configuration(path: impl Into<PathBuf>, expected: impl Into<String>) -> Self {
        Self::Configuration {
            path: path.into(),
            expected: expected.into(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Malformed class file structure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("bad magic number 0x{0:08X}")]
    BadMagic(u32),

    #[error("unexpected end of data at offset {offset}")]
    Truncated { offset: usize },

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownConstantTag { tag: u8, index: usize },

    #[error("constant pool index {index} is not a {expected}")]
    BadConstant { index: u16, expected: &'static str },
}

/// A method whose data flow cannot be analyzed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("unsupported opcode 0x{opcode:02X} at offset {offset}")]
    UnsupportedOpcode { opcode: u8, offset: u32 },

    #[error("truncated instruction at offset {offset}")]
    TruncatedInstruction { offset: u32 },

    #[error("offset {target} referenced at offset {offset} is not an instruction boundary")]
    BadTarget { target: i64, offset: u32 },

    #[error("execution can fall off the end of the code")]
    FallOffEnd,

    #[error("subroutine instruction at offset {offset} is not supported")]
    Subroutine { offset: u32 },

    #[error("malformed method descriptor '{0}'")]
    BadDescriptor(String),

    #[error(transparent)]
    ClassFormat(#[from] ClassFormatError),
}

/// No declared local-variable scope covers the probed instruction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no scope for local slot {slot} covers instruction {probe}")]
pub struct NameResolutionError {
    pub slot: u16,
    pub probe: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_names_path_and_relationship() {
        let err = VizError::configuration("/tmp/other", "should be under '/tmp/project'");
        let msg = err.to_string();
        assert!(msg.contains("/tmp/other"));
        assert!(msg.contains("should be under '/tmp/project'"));
    }

    #[test]
    fn io_error_keeps_source() {
        let err = VizError::io(
            "/tmp/A.class",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied"),
        );
        assert!(err.to_string().contains("access denied"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn class_format_error_converts_into_analysis_error() {
        let err: AnalysisError = ClassFormatError::Truncated { offset: 4 }.into();
        assert!(matches!(err, AnalysisError::ClassFormat(_)));
        assert!(err.to_string().contains("offset 4"));
    }
}
