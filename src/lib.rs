//! # defuse-viz
//!
//! Maps the global definition-use chains of compiled Java classes back to
//! source lines and arranges them in a project explorer tree.
//!
//! ## Architecture
//!
//! - **classfile**: Class-file parsing into constant pool and method binaries
//! - **bytecode**: Decoding of Code attributes into labelled instruction lists
//! - **analysis**: Data-flow facts, control flow and basic blocks per method
//! - **chains**: Def-use chain search and the global-chain filter
//! - **resolve**: Line and variable-name resolution of chains
//! - **visitor**: Per-class visiting and line reconstruction
//! - **scan**: Filtered depth-first directory walk
//! - **builder**: Stack-based explorer tree construction
//! - **tree**: Explorer node model with text and JSON renderings
//! - **config**: Project root validation and CLI-derived settings
//! - **error**: Error types shared by the library

pub mod analysis;
pub mod builder;
pub mod bytecode;
pub mod chains;
pub mod classfile;
pub mod cli;
pub mod config;
pub mod error;
pub mod resolve;
pub mod scan;
pub mod tree;
pub mod visitor;
