//! # CLI Behavior
//!
//! This is **one possible client** for spectra, not the engine itself. Deployments
//! usually front the library with a service; the CLI exists for inspection and
//! maintenance of a store.
//!
//! Every command prints one JSON document on stdout, so output can be piped to
//! `jq`. Errors go to stderr and the process exits with status 1.
//!
//! ## Module Structure
//!
//! - `setup`: Argument parsing via clap
//! - `commands`: Context initialization, logging and per-command handlers

mod commands;
pub mod setup;

pub use commands::run;
