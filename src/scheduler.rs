//! Cancellable self-rescheduling background tasks
//!
//! Every agent loop (monitoring samplers, the throttle controller, the
//! availability probe, the DOS evictor and the instance enforcer) runs as one
//! tokio task whose step decides the delay before the next step.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// What a step wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run the next step after this delay
    After(Duration),
    /// End the task
    Stop,
}

/// Handle to a scheduled task; dropping it stops the task
#[derive(Debug)]
pub struct ScheduledHandle {
    name: String,
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
}

impl ScheduledHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ask the task to stop; a running step completes first
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Stop the task and wait for it to exit
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }
}

/// Spawn a task that runs `step` after `initial_delay`, then after whatever
/// delay each step returns, until it returns [`Schedule::Stop`] or is stopped.
pub fn spawn_scheduled<F, Fut>(
    name: impl Into<String>,
    initial_delay: Duration,
    mut step: F,
) -> ScheduledHandle
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Schedule> + Send + 'static,
{
    let name = name.into();
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let task_name = name.clone();

    let join = tokio::spawn(async move {
        let mut delay = initial_delay;
        debug!("Scheduled task {} started", task_name);

        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    match step().await {
                        Schedule::After(next) => {
                            debug!("{} next run in {:?}", task_name, next);
                            delay = next;
                        }
                        Schedule::Stop => {
                            info!("Scheduled task {} finished", task_name);
                            break;
                        }
                    }
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() || *shutdown_rx.borrow() {
                        debug!("Scheduled task {} shutting down", task_name);
                        break;
                    }
                }
            }
        }
    });

    ScheduledHandle {
        name,
        shutdown: shutdown_tx,
        join,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runs_until_stop() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_scheduled("counter", Duration::ZERO, move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    Schedule::Stop
                } else {
                    Schedule::After(Duration::from_millis(1))
                }
            }
        });

        handle.join.await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_sleep() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_scheduled("sleepy", Duration::from_secs(3600), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Schedule::Stop
            }
        });

        assert_eq!(handle.name(), "sleepy");
        handle.shutdown().await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_dropping_handle_stops_task() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();
        let handle = spawn_scheduled("dropped", Duration::from_millis(50), move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Schedule::After(Duration::from_millis(50))
            }
        });
        drop(handle);
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
