//! `dossier` crate (library surface).
//!
//! The primary entrypoint for end users is the `dossier` binary. This library
//! module exists to support embedding and integration tests without depending
//! on internal crate layout.

pub use dossier_core as core;

pub mod fetch;
pub mod filter;
pub mod pipeline;
pub mod report;
pub mod summarize;
