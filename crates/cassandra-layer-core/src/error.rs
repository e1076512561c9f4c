use std::error::Error as StdError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Supervisor level error types.
///
/// Every failure of `start()` or `stop()` is reported as exactly one of these,
/// carrying the original failure as its source. Failures of best-effort
/// cleanup that happened while an operation was already failing are attached
/// as `suppressed` instead of being reported separately.
#[derive(Error, Debug)]
pub enum CassandraError {
    #[error("Unable to start {instance}: {source}")]
    StartFailed {
        instance: String,
        #[source]
        source: BoxError,
        suppressed: Vec<anyhow::Error>,
    },

    #[error("Unable to stop {instance}: {source}")]
    StopFailed {
        instance: String,
        #[source]
        source: BoxError,
        suppressed: Vec<anyhow::Error>,
    },

    #[error("start() had not been called")]
    NotStarted,
}

impl CassandraError {
    pub fn start_failed(instance: impl Into<String>, source: anyhow::Error) -> Self {
        CassandraError::StartFailed {
            instance: instance.into(),
            source: source.into(),
            suppressed: Vec::new(),
        }
    }

    pub fn stop_failed(instance: impl Into<String>, source: anyhow::Error) -> Self {
        CassandraError::StopFailed {
            instance: instance.into(),
            source: source.into(),
            suppressed: Vec::new(),
        }
    }

    /// Attach an error raised by cleanup while this error was being handled
    pub fn suppress(&mut self, error: anyhow::Error) {
        match self {
            CassandraError::StartFailed { suppressed, .. }
            | CassandraError::StopFailed { suppressed, .. } => suppressed.push(error),
            CassandraError::NotStarted => {}
        }
    }

    pub fn suppressed(&self) -> &[anyhow::Error] {
        match self {
            CassandraError::StartFailed { suppressed, .. }
            | CassandraError::StopFailed { suppressed, .. } => suppressed,
            CassandraError::NotStarted => &[],
        }
    }

    /// The readiness failure that caused this error, if any
    pub fn readiness_error(&self) -> Option<&ReadinessError> {
        let mut current: Option<&(dyn StdError + 'static)> = self.source();
        while let Some(error) = current {
            if let Some(readiness) = error.downcast_ref::<ReadinessError>() {
                return Some(readiness);
            }
            current = error.source();
        }
        None
    }

    /// Check if the instance never came up within its startup timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self.readiness_error(), Some(ReadinessError::Timeout { .. }))
    }

    /// Check if the instance came up (or tried to) and then failed
    pub fn is_readiness_failure(&self) -> bool {
        matches!(
            self.readiness_error(),
            Some(ReadinessError::NotAlive { .. } | ReadinessError::TransportFailed { .. })
        )
    }
}

/// Failures observed while waiting for a launched instance to become ready.
#[derive(Error, Debug)]
pub enum ReadinessError {
    #[error("'{instance}' is not alive. Please see logs for more details.{diagnostics}")]
    NotAlive {
        instance: String,
        diagnostics: String,
    },

    #[error(
        "'{instance}' native transport failed to bind. Please see logs for more details.{diagnostics}"
    )]
    TransportFailed {
        instance: String,
        diagnostics: String,
    },

    #[error(
        "'{instance}' has not been started, seems like ({}) milliseconds is not enough",
        .timeout.as_millis()
    )]
    Timeout { instance: String, timeout: Duration },

    #[error("'{instance}' reported a malformed native transport address '{address}'")]
    MalformedAddress { instance: String, address: String },
}

/// Driver level errors raised by the platform database implementations.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("'{}' is not found", .0.display())]
    ExecutableNotFound(PathBuf),

    #[error("Unable to launch '{command}'")]
    LaunchFailed {
        command: String,
        #[source]
        source: BoxError,
    },

    #[error("'{0}' has already been started")]
    AlreadyStarted(String),
}
