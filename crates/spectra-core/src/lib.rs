//! # Spectra Architecture
//!
//! Spectra is a **UI-agnostic metadata engine** for spectral measurement campaigns.
//! Measurement records ("spectra") live in per-campaign folder hierarchies and carry
//! an open-ended set of typed attributes stored Entity-Attribute-Value style, instead
//! of a fixed schema. The REST, GUI and import/export layers that surround it in a
//! deployment are clients of this library, not part of it.
//!
//! ## The Three-Layer Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  API Layer (api.rs)                                         │
//! │  - Thin facade over commands, owns the Session              │
//! │  - Returns structured Result types                          │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Command Layer (commands/*.rs, query/)                      │
//! │  - EAV reads and writes, hierarchy cascades, queries,       │
//! │    conflict detection, taxonomy lookups, links              │
//! │  - One transaction per top-level operation                  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Storage Layer (store/)                                     │
//! │  - SQLite database behind a shared connection               │
//! │  - Schema creation, transactions, error mapping             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Sessions
//!
//! Everything that is cached lives in an explicit [`session::Session`]: the attribute
//! registry (name ⇄ id ⇄ kind) and the redundancy memo of values known to be stored.
//! Both are rebuilt or cleared through explicit calls, never through process-wide
//! singletons, so concurrent sessions (and tests) never share stale state.
//!
//! ## Key Principle: No I/O Assumptions in Core
//!
//! From `api.rs` inward, code takes regular Rust values and returns regular Rust types.
//! It never writes to stdout/stderr and never exits the process. Logging goes through
//! `tracing`; installing a subscriber is the client's job.
//!
//! ## Testing Strategy
//!
//! 1. **Commands** (`commands/*.rs`): thorough unit tests against an in-memory database.
//! 2. **Query compiler** (`query/compiler.rs`): SQL shape tests (join counts, parameters).
//! 3. **API** (`tests/`): end-to-end scenarios through the facade.
//!
//! ## Module Overview
//!
//! - [`api`]: The API facade, entry point for all operations
//! - [`commands`]: Business logic for each operation family
//! - [`query`]: Predicate trees and the predicate-to-SQL compiler
//! - [`attributes`]: Value kinds, typed values and the attribute registry
//! - [`store`]: Database handle, schema and error mapping
//! - [`session`]: Session-scoped caches, visibility and progress reporting
//! - [`model`]: Core data types (`Campaign`, `HierarchyNode`, `Record`, ids)
//! - [`config`]: Configuration management
//! - [`init`]: Context initialization for clients
//! - [`error`]: Error types

pub mod api;
pub mod attributes;
pub mod commands;
pub mod config;
pub mod error;
pub mod init;
pub mod model;
pub mod query;
pub mod session;
pub mod store;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
