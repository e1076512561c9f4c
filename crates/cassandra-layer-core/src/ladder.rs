use crate::process::ProcessHandle;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{debug, info};

/// How long each rung waits for the process to exit after its action succeeded
pub const STOP_STEP_TIMEOUT: Duration = Duration::from_secs(10);

type StepFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<bool>> + Send + 'a>>;

struct StopStep<'a> {
    description: String,
    action: StepFuture<'a>,
}

/// An ordered sequence of increasingly forceful termination attempts.
///
/// Each step is an action resolving to `Ok(true)` when it worked (e.g. the
/// control command exited with code zero). After a step worked the ladder
/// waits for the process to exit; the first step after which the process is
/// gone ends the ladder. Failed steps silently escalate to the next one.
/// Step futures are lazy, so steps after the successful one never run.
pub struct StopLadder<'a> {
    process: &'a ProcessHandle,
    wait: Duration,
    steps: Vec<StopStep<'a>>,
}

impl<'a> StopLadder<'a> {
    pub fn new(process: &'a ProcessHandle) -> Self {
        Self {
            process,
            wait: STOP_STEP_TIMEOUT,
            steps: Vec::new(),
        }
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn step<F>(mut self, description: impl Into<String>, action: F) -> Self
    where
        F: Future<Output = anyhow::Result<bool>> + Send + 'a,
    {
        self.steps.push(StopStep {
            description: description.into(),
            action: Box::pin(action),
        });
        self
    }

    /// Walk the ladder; returns `true` once the process is known to be gone
    pub async fn run(self) -> bool {
        let pid = self.process.pid();
        for step in self.steps {
            if !self.process.is_alive() {
                return true;
            }
            match step.action.await {
                Ok(true) => {
                    if self.process.wait_for(self.wait).await.is_some() {
                        info!("Process {} stopped after: {}", pid, step.description);
                        return true;
                    }
                    debug!(
                        "Process {} is still alive {:?} after: {}",
                        pid, self.wait, step.description
                    );
                }
                Ok(false) => debug!("Step did not succeed for process {}: {}", pid, step.description),
                Err(e) => debug!("Step failed for process {}: {}: {:#}", pid, step.description, e),
            }
        }
        !self.process.is_alive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn spawn_sleep() -> ProcessHandle {
        ProcessHandle::spawn(
            "sh",
            &["-c".to_string(), "exec sleep 30".to_string()],
            &std::env::temp_dir(),
            &HashMap::new(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_escalates_past_failed_steps_and_stops_early() {
        let process = spawn_sleep();
        let last_step_ran = Arc::new(AtomicBool::new(false));
        let flag = last_step_ran.clone();

        let stopped = StopLadder::new(&process)
            .with_wait(Duration::from_secs(5))
            .step("graceful", async { Ok(false) })
            .step("broken", async { Err(anyhow::anyhow!("control command missing")) })
            .step("forceful", async {
                process.destroy_forcibly();
                Ok(true)
            })
            .step("last resort", async move {
                flag.store(true, Ordering::SeqCst);
                Ok(true)
            })
            .run()
            .await;

        assert!(stopped);
        assert!(!process.is_alive());
        assert!(!last_step_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_successful_step_without_exit_escalates() {
        let process = spawn_sleep();

        let stopped = StopLadder::new(&process)
            .with_wait(Duration::from_millis(200))
            .step("no-op", async { Ok(true) })
            .step("destroy", async {
                process.destroy();
                Ok(true)
            })
            .run()
            .await;

        assert!(stopped);
    }

    #[tokio::test]
    async fn test_exhausted_ladder_reports_alive_process() {
        let process = spawn_sleep();

        let stopped = StopLadder::new(&process)
            .with_wait(Duration::from_millis(100))
            .step("no-op", async { Ok(true) })
            .run()
            .await;

        assert!(!stopped);
        process.destroy_forcibly();
    }
}
