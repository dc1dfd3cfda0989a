//! # I/O Module
//!
//! Plain-text matrix and report formats for the CLI.

pub mod plain;

pub use plain::{read_matrix, write_intervals, write_matrix};
