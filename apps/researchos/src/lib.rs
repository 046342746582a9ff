//! # researchos
//!
//! Library half of the `ros` binary: command-line definition, command
//! implementations and settings loading. The engine itself lives in
//! `researchos-core`.

pub mod cli;
pub mod settings;

pub use settings::{Backend, Settings};
