//! Cassandra Layer Core - Platform-independent process supervision building blocks
//!
//! This crate provides the output channels, process handle, readiness parsers,
//! configuration and error types that are shared by the platform-specific
//! database drivers and the top-level supervisor.

mod command;
mod config;
mod database;
mod error;
mod ladder;
mod output;
mod parser;
mod process;
mod readiness;
mod settings;
mod version;

pub use command::*;
pub use config::*;
pub use database::*;
pub use error::*;
pub use ladder::*;
pub use output::*;
pub use parser::*;
pub use process::*;
pub use readiness::*;
pub use settings::*;
pub use version::*;
