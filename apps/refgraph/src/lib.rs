//! # refgraph
//!
//! Library half of the refgraph binary: argument parsing, configuration and
//! the command implementations, exposed for integration tests.

pub mod cli;
pub mod config;
