//! build-intercept - observe and rewrite every compiler call of a build
//!
//! This library resolves layered fuzzer/sanitizer configuration into
//! compiler rewrite rules, serves them to intercepted compiler processes
//! over a small JSON-lines protocol, collects what each process actually
//! ran and turns those reports into a `compile_commands.json` database.

pub mod classify;
pub mod cli;
pub mod client;
pub mod compilation_db;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod protocol;
pub mod rewrite;
pub mod service;
pub mod settings;
pub mod shim;

pub use error::{InterceptError, Result};
