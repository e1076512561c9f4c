use super::{Streams, attach};
use crate::output::{LineConsumer, Subscription};
use crate::process::ProcessHandle;
use std::sync::Arc;
use tracing::{error, info};

struct Forward {
    instance: String,
    stderr: bool,
}

impl LineConsumer for Forward {
    fn accept(&self, line: &str) {
        if self.stderr {
            error!(instance = %self.instance, "{}", line);
        } else {
            info!(instance = %self.instance, "{}", line);
        }
    }
}

/// Forwards server output to `tracing` or to a caller-supplied consumer for
/// as long as it is kept alive
pub struct OutputLogger {
    _subscriptions: Vec<Subscription>,
}

impl OutputLogger {
    /// Log stdout lines at info and stderr lines at error, tagged with `instance`
    pub fn attach(instance: &str, process: &ProcessHandle) -> Self {
        let mut subscriptions = attach(
            process,
            Arc::new(Forward {
                instance: instance.to_string(),
                stderr: false,
            }),
            Streams::Stdout,
        );
        subscriptions.extend(attach(
            process,
            Arc::new(Forward {
                instance: instance.to_string(),
                stderr: true,
            }),
            Streams::Stderr,
        ));
        Self {
            _subscriptions: subscriptions,
        }
    }

    /// Hand every line of both streams to `consumer`
    pub fn attach_consumer(process: &ProcessHandle, consumer: Arc<dyn LineConsumer>) -> Self {
        Self {
            _subscriptions: attach(process, consumer, Streams::Both),
        }
    }
}
