use super::{Streams, attach};
use crate::output::{LineConsumer, Subscription};
use crate::process::ProcessHandle;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// Number of stdout lines kept for diagnostics
pub const OUTPUT_COLLECTOR_CAPACITY: usize = 30;

#[derive(Default)]
struct Lines {
    capacity: Option<usize>,
    lines: Mutex<VecDeque<String>>,
}

impl Lines {
    fn snapshot(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

impl LineConsumer for Lines {
    fn accept(&self, line: &str) {
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(capacity) = self.capacity {
            while lines.len() >= capacity {
                lines.pop_front();
            }
        }
        lines.push_back(line.to_string());
    }
}

/// Keeps the most recent stdout lines, dropping the oldest
pub struct OutputCollector {
    lines: Arc<Lines>,
    _subscriptions: Vec<Subscription>,
}

impl OutputCollector {
    pub fn new() -> Self {
        Self::with_capacity(OUTPUT_COLLECTOR_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Lines {
                capacity: Some(capacity.max(1)),
                ..Lines::default()
            }),
            _subscriptions: Vec::new(),
        }
    }

    pub fn attach(process: &ProcessHandle) -> Self {
        let mut collector = Self::new();
        collector._subscriptions = attach(process, collector.lines.clone(), Streams::Stdout);
        collector
    }

    pub fn accept(&self, line: &str) {
        self.lines.accept(line);
    }

    /// Collected lines, oldest first
    pub fn lines(&self) -> Vec<String> {
        self.lines.snapshot()
    }

    pub fn close(self) {}
}

impl Default for OutputCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps every stderr line of the current attempt
pub struct ErrorCollector {
    lines: Arc<Lines>,
    _subscriptions: Vec<Subscription>,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self {
            lines: Arc::new(Lines::default()),
            _subscriptions: Vec::new(),
        }
    }

    pub fn attach(process: &ProcessHandle) -> Self {
        let mut collector = Self::new();
        collector._subscriptions = attach(process, collector.lines.clone(), Streams::Stderr);
        collector
    }

    pub fn accept(&self, line: &str) {
        self.lines.accept(line);
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.snapshot()
    }

    pub fn close(self) {}
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_collector_keeps_last_thirty_lines() {
        let collector = OutputCollector::new();
        for i in 0..45 {
            collector.accept(&format!("line {i}"));
        }

        let lines = collector.lines();
        assert_eq!(lines.len(), OUTPUT_COLLECTOR_CAPACITY);
        assert_eq!(lines.first().map(String::as_str), Some("line 15"));
        assert_eq!(lines.last().map(String::as_str), Some("line 44"));
        assert!(!lines.contains(&"line 14".to_string()));
        let expected: Vec<String> = (15..45).map(|i| format!("line {i}")).collect();
        assert_eq!(lines, expected);
    }

    #[test]
    fn test_output_collector_below_capacity() {
        let collector = OutputCollector::new();
        collector.accept("a");
        collector.accept("b");
        assert_eq!(collector.lines(), vec!["a", "b"]);
    }

    #[test]
    fn test_error_collector_is_unbounded() {
        let collector = ErrorCollector::new();
        for i in 0..100 {
            collector.accept(&format!("error {i}"));
        }
        assert_eq!(collector.lines().len(), 100);
    }
}
