use super::{Streams, attach};
use crate::output::{LineConsumer, Subscription};
use crate::process::ProcessHandle;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};

static STARTUP_COMPLETE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)startup\s+complete").expect("valid startup pattern"));

#[derive(Default)]
struct State {
    complete: AtomicBool,
}

impl LineConsumer for State {
    fn accept(&self, line: &str) {
        if !self.complete.load(Ordering::Acquire) && STARTUP_COMPLETE.is_match(line) {
            self.complete.store(true, Ordering::Release);
        }
    }
}

/// Waits for the server's "Startup complete" marker
pub struct StartupParser {
    state: Arc<State>,
    _subscriptions: Vec<Subscription>,
}

impl StartupParser {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State::default()),
            _subscriptions: Vec::new(),
        }
    }

    pub fn attach(process: &ProcessHandle) -> Self {
        let mut parser = Self::new();
        parser._subscriptions = attach(process, parser.state.clone(), Streams::Both);
        parser
    }

    pub fn accept(&self, line: &str) {
        self.state.accept(line);
    }

    pub fn is_complete(&self) -> bool {
        self.state.complete.load(Ordering::Acquire)
    }

    pub fn close(self) {}
}

impl Default for StartupParser {
    fn default() -> Self {
        Self::new()
    }
}
