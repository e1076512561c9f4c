//! Line consumers attached to a running server's output.
//!
//! Parsers classify lines into a small per-concern state (transport bound,
//! disabled or failed; startup complete). Collectors keep a bounded history
//! used only to build diagnostic messages. Every one of them detaches from
//! its outputs when closed or dropped.

mod collector;
mod logger;
mod startup;
mod transport;

pub use collector::{ErrorCollector, OUTPUT_COLLECTOR_CAPACITY, OutputCollector};
pub use logger::OutputLogger;
pub use startup::StartupParser;
pub use transport::{NativeTransportParser, TransportStatus};

use crate::output::{LineConsumer, Subscription};
use crate::process::ProcessHandle;
use std::sync::Arc;

/// Which output streams of a process a consumer listens to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Streams {
    Stdout,
    Stderr,
    Both,
}

pub(crate) fn attach(
    process: &ProcessHandle,
    consumer: Arc<dyn LineConsumer>,
    streams: Streams,
) -> Vec<Subscription> {
    let mut subscriptions = Vec::with_capacity(2);
    if matches!(streams, Streams::Stdout | Streams::Both) {
        subscriptions.push(process.stdout().attach(consumer.clone()));
    }
    if matches!(streams, Streams::Stderr | Streams::Both) {
        subscriptions.push(process.stderr().attach(consumer));
    }
    subscriptions
}
