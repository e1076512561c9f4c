//! Stop nodes when the host process is asked to terminate.
//!
//! Installing a signal handler replaces the default disposition for the
//! rest of the process, so a single listener is installed on first use and
//! hooks register and deregister with it. On SIGINT, SIGTERM or SIGQUIT
//! (Ctrl-C on Windows) every registered hook runs on the runtime it was
//! registered from, then the process exits with `128 + signal`. With no
//! hooks left the signal still terminates the process with that code.

use anyhow::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::{LazyLock, Mutex, MutexGuard, PoisonError};
use tokio::runtime::Handle;
use tracing::{info, warn};

const SIGINT: i32 = 2;

type Action = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

struct Registered {
    id: u64,
    name: String,
    runtime: Handle,
    action: Action,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    hooks: Vec<Registered>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(Mutex::default);

static LISTENER: LazyLock<bool> = LazyLock::new(spawn_listener);

fn registry() -> MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<i32> {
    use tokio::signal::unix::{SignalKind, signal};

    const SIGQUIT: i32 = 3;
    const SIGTERM: i32 = 15;

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    let signo = tokio::select! {
        _ = sigint.recv() => SIGINT,
        _ = sigterm.recv() => SIGTERM,
        _ = sigquit.recv() => SIGQUIT,
    };
    Ok(signo)
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<i32> {
    tokio::signal::ctrl_c().await?;
    Ok(SIGINT)
}

// the listener owns its runtime so it outlives any runtime hooks come from
fn spawn_listener() -> bool {
    let spawned = std::thread::Builder::new()
        .name("cassandra-shutdown".to_string())
        .spawn(|| {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    warn!("Unable to create the shutdown listener runtime: {}", e);
                    return;
                }
            };
            runtime.block_on(async {
                match wait_for_shutdown_signal().await {
                    Ok(signo) => std::process::exit(run_hooks(signo).await),
                    Err(e) => warn!("Unable to listen for shutdown signals: {}", e),
                }
            });
        });
    match spawned {
        Ok(_) => true,
        Err(e) => {
            warn!("Unable to spawn the shutdown listener: {}", e);
            false
        }
    }
}

/// Run and deregister every hook; returns the exit code for `signo`
async fn run_hooks(signo: i32) -> i32 {
    let hooks = std::mem::take(&mut registry().hooks);
    for hook in hooks {
        info!("Received signal {}, stopping '{}'", signo, hook.name);
        if let Err(e) = hook.runtime.spawn((hook.action)()).await {
            warn!("Shutdown hook '{}' did not complete: {}", hook.name, e);
        }
    }
    128 + signo
}

/// Registration of one shutdown action; dropping it deregisters the action
pub struct ShutdownHook {
    id: u64,
    name: String,
}

impl ShutdownHook {
    /// Run `on_shutdown` on the current runtime when a termination signal arrives
    pub fn register<F, Fut>(name: impl Into<String>, on_shutdown: F) -> Result<Self>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let runtime = Handle::try_current()
            .with_context(|| format!("Shutdown hook '{name}' needs a tokio runtime"))?;
        if !*LISTENER {
            warn!("No shutdown listener is running, '{}' will not be stopped on signals", name);
        }

        let mut registry = registry();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.hooks.push(Registered {
            id,
            name: name.clone(),
            runtime,
            action: Box::new(move || Box::pin(on_shutdown())),
        });
        Ok(Self { id, name })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deregister the action; a no-op once it has run
    pub fn remove(&self) {
        registry().hooks.retain(|hook| hook.id != self.id);
    }

    pub fn is_removed(&self) -> bool {
        !registry().hooks.iter().any(|hook| hook.id == self.id)
    }
}

impl Drop for ShutdownHook {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHook")
            .field("name", &self.name)
            .field("removed", &self.is_removed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SIGTERM: i32 = 15;

    // hooks live in one process-wide registry
    static SERIAL: tokio::sync::Mutex<()> = tokio::sync::Mutex::const_new(());

    fn counting(name: &str, runs: &Arc<AtomicUsize>) -> ShutdownHook {
        let runs = runs.clone();
        ShutdownHook::register(name, move || async move {
            runs.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_signal_runs_registered_hooks_only() {
        let _serial = SERIAL.lock().await;
        let kept_runs = Arc::new(AtomicUsize::new(0));
        let removed_runs = Arc::new(AtomicUsize::new(0));
        let kept = counting("kept", &kept_runs);
        let removed = counting("removed", &removed_runs);

        assert_eq!(kept.name(), "kept");
        assert!(!removed.is_removed());
        removed.remove();
        removed.remove();
        assert!(removed.is_removed());

        assert_eq!(run_hooks(SIGTERM).await, 143);
        assert_eq!(kept_runs.load(Ordering::SeqCst), 1);
        assert_eq!(removed_runs.load(Ordering::SeqCst), 0);
        assert!(kept.is_removed());

        // a later signal terminates with the conventional code and runs nothing
        assert_eq!(run_hooks(SIGINT).await, 130);
        assert_eq!(kept_runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_hook_is_deregistered() {
        let _serial = SERIAL.lock().await;
        let runs = Arc::new(AtomicUsize::new(0));
        let hook = counting("dropped", &runs);
        let id = hook.id;

        drop(hook);

        assert!(!registry().hooks.iter().any(|hook| hook.id == id));
        run_hooks(SIGTERM).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_register_requires_runtime() {
        let result = ShutdownHook::register("outside", || async {});
        assert!(result.is_err());
    }
}
