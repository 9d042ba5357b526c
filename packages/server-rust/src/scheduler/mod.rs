//! Periodic background tasks sharing the request path's [`EntityBinder`].
//!
//! Each scheduled task gets its own timer loop. A tick that fires while the
//! previous run of the same task is still executing is skipped, never queued.
//! Runs execute on their own Tokio task, so an error or a panic in a run is
//! logged and counted without stopping the timer.

pub mod tasks;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::binding::EntityBinder;
use crate::service::{ManagedService, ServiceContext};

pub use tasks::AbandonedOrderSweep;

// ---------------------------------------------------------------------------
// ScheduledTask trait
// ---------------------------------------------------------------------------

/// A unit of recurring background work.
#[async_trait]
pub trait ScheduledTask: Send + Sync + 'static {
    /// Execute one run. Errors are logged by the scheduler.
    async fn run(&self, binder: &EntityBinder) -> anyhow::Result<()>;
}

/// Per-task counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    /// Completed runs, successful or not.
    pub runs: u64,
    pub failures: u64,
    /// Ticks dropped because a run was still in progress.
    pub skipped: u64,
}

#[derive(Default)]
struct TaskState {
    in_flight: AtomicBool,
    runs: AtomicU64,
    failures: AtomicU64,
    skipped: AtomicU64,
}

impl TaskState {
    fn stats(&self) -> TaskStats {
        TaskStats {
            runs: self.runs.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Clears the in-flight flag when the run's supervisor finishes, however it
/// finishes.
struct InFlightReset(Arc<TaskState>);

impl Drop for InFlightReset {
    fn drop(&mut self) {
        self.0.in_flight.store(false, Ordering::Release);
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ScheduleError {
    #[error("task '{name}' is already scheduled")]
    Duplicate { name: String },
    #[error("task '{name}' needs a non-zero interval")]
    ZeroInterval { name: String },
    #[error("scheduler is shut down")]
    ShutDown,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

pub struct Scheduler {
    binder: EntityBinder,
    tasks: Mutex<HashMap<String, Arc<TaskState>>>,
    timers: Mutex<Vec<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl Scheduler {
    #[must_use]
    pub fn new(binder: EntityBinder) -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            binder,
            tasks: Mutex::new(HashMap::new()),
            timers: Mutex::new(Vec::new()),
            stop,
        }
    }

    /// Registers `task` to run every `interval`, first after one interval.
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Rejects duplicate names, a zero interval, and calls after shutdown.
    pub fn schedule(
        &self,
        name: &str,
        interval: Duration,
        task: Arc<dyn ScheduledTask>,
    ) -> Result<(), ScheduleError> {
        if *self.stop.borrow() {
            return Err(ScheduleError::ShutDown);
        }
        if interval.is_zero() {
            return Err(ScheduleError::ZeroInterval {
                name: name.to_string(),
            });
        }

        let state = Arc::new(TaskState::default());
        {
            let mut tasks = self.tasks.lock();
            if tasks.contains_key(name) {
                return Err(ScheduleError::Duplicate {
                    name: name.to_string(),
                });
            }
            tasks.insert(name.to_string(), Arc::clone(&state));
        }

        let timer = tokio::spawn(timer_loop(
            name.to_string(),
            interval,
            task,
            self.binder.clone(),
            state,
            self.stop.subscribe(),
        ));
        self.timers.lock().push(timer);
        info!(task = name, interval_ms = interval.as_millis(), "task scheduled");
        Ok(())
    }

    #[must_use]
    pub fn stats(&self, name: &str) -> Option<TaskStats> {
        self.tasks.lock().get(name).map(|state| state.stats())
    }

    /// Whether a run of `name` is executing right now.
    #[must_use]
    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .get(name)
            .is_some_and(|state| state.in_flight.load(Ordering::Acquire))
    }

    /// Scheduled task names, sorted.
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tasks.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Stops every timer. Runs already executing are left to finish.
    pub async fn shutdown(&self) {
        self.stop.send_replace(true);
        let timers = std::mem::take(&mut *self.timers.lock());
        for timer in timers {
            let _ = timer.await;
        }
    }
}

async fn timer_loop(
    name: String,
    interval: Duration,
    task: Arc<dyn ScheduledTask>,
    binder: EntityBinder,
    state: Arc<TaskState>,
    mut stop: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = stop.wait_for(|stopped| *stopped) => break,
        }

        if state.in_flight.swap(true, Ordering::AcqRel) {
            state.skipped.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("storefront_scheduler_skipped_total", "task" => name.clone()).increment(1);
            debug!(task = %name, "previous run still in progress, tick skipped");
            continue;
        }

        let reset = InFlightReset(Arc::clone(&state));
        let run = {
            let task = Arc::clone(&task);
            let binder = binder.clone();
            tokio::spawn(async move { task.run(&binder).await })
        };
        let name = name.clone();
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            let _reset = reset;
            let started = Instant::now();
            let outcome = run.await;
            state.runs.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("storefront_scheduler_runs_total", "task" => name.clone()).increment(1);

            let failed = match outcome {
                Ok(Ok(())) => {
                    debug!(task = %name, elapsed_ms = started.elapsed().as_millis(), "run finished");
                    false
                }
                Ok(Err(err)) => {
                    let message = format!("{err:#}");
                    warn!(task = %name, error = %message, "run failed");
                    true
                }
                Err(join) if join.is_panic() => {
                    error!(task = %name, "run panicked");
                    true
                }
                Err(_) => {
                    warn!(task = %name, "run cancelled");
                    true
                }
            };
            if failed {
                state.failures.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("storefront_scheduler_failures_total", "task" => name).increment(1);
            }
        });
    }
    debug!(task = %name, "timer stopped");
}

pub const ABANDONED_ORDER_SWEEP: &str = "abandoned-order-sweep";

#[async_trait]
impl ManagedService for Scheduler {
    fn name(&self) -> &'static str {
        "scheduler"
    }

    async fn init(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        let sweep = AbandonedOrderSweep::new(ctx.config.domain_names(), ctx.config.abandon_after);
        self.schedule(ABANDONED_ORDER_SWEEP, ctx.config.sweep_interval, Arc::new(sweep))?;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Scheduler::shutdown(self).await;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use storefront_core::SchemaCatalog;

    use super::*;
    use crate::binding::{ConnectionRegistry, RegistryConfig};
    use crate::storage::{ConnectionSpec, MemoryDriver};

    fn binder() -> EntityBinder {
        let registry = ConnectionRegistry::new(
            Arc::new(MemoryDriver::new()),
            Vec::<(String, ConnectionSpec)>::new(),
            None,
            RegistryConfig::default(),
        );
        EntityBinder::new(Arc::new(registry), SchemaCatalog::storefront())
    }

    /// Records `(start, end)` of every run.
    struct SlowTask {
        duration: Duration,
        runs: Mutex<Vec<(Instant, Instant)>>,
    }

    #[async_trait]
    impl ScheduledTask for SlowTask {
        async fn run(&self, _binder: &EntityBinder) -> anyhow::Result<()> {
            let start = Instant::now();
            tokio::time::sleep(self.duration).await;
            self.runs.lock().push((start, Instant::now()));
            Ok(())
        }
    }

    struct FailingTask {
        panic: bool,
    }

    #[async_trait]
    impl ScheduledTask for FailingTask {
        async fn run(&self, _binder: &EntityBinder) -> anyhow::Result<()> {
            if self.panic {
                panic!("task exploded");
            }
            anyhow::bail!("task failed")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_skip_ticks_instead_of_overlapping() {
        let scheduler = Scheduler::new(binder());
        let task = Arc::new(SlowTask {
            duration: Duration::from_millis(250),
            runs: Mutex::new(Vec::new()),
        });
        scheduler
            .schedule("slow", Duration::from_millis(100), task.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        scheduler.shutdown().await;

        let runs = task.runs.lock().clone();
        assert!(runs.len() >= 2, "expected several runs, got {}", runs.len());
        for pair in runs.windows(2) {
            assert!(pair[1].0 >= pair[0].1, "runs overlapped: {pair:?}");
        }
        let stats = scheduler.stats("slow").unwrap();
        assert!(stats.skipped >= 2, "{stats:?}");
        assert_eq!(stats.failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_and_panics_do_not_stop_the_timer() {
        let scheduler = Scheduler::new(binder());
        scheduler
            .schedule("failing", Duration::from_millis(100), Arc::new(FailingTask { panic: false }))
            .unwrap();
        scheduler
            .schedule("panicking", Duration::from_millis(100), Arc::new(FailingTask { panic: true }))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(550)).await;

        for name in ["failing", "panicking"] {
            let stats = scheduler.stats(name).unwrap();
            assert!(stats.runs >= 4, "{name}: {stats:?}");
            assert_eq!(stats.runs, stats.failures, "{name}: {stats:?}");
            assert!(!scheduler.is_running(name));
        }
        scheduler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_timers() {
        let scheduler = Scheduler::new(binder());
        let task = Arc::new(SlowTask {
            duration: Duration::from_millis(10),
            runs: Mutex::new(Vec::new()),
        });
        scheduler
            .schedule("quick", Duration::from_millis(100), task.clone())
            .unwrap();

        tokio::time::sleep(Duration::from_millis(250)).await;
        scheduler.shutdown().await;
        let before = task.runs.lock().len();
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(task.runs.lock().len(), before);
        assert_eq!(
            scheduler.schedule("late", Duration::from_secs(1), task),
            Err(ScheduleError::ShutDown)
        );
    }

    #[tokio::test]
    async fn rejects_duplicate_and_zero_interval() {
        let scheduler = Scheduler::new(binder());
        let task: Arc<dyn ScheduledTask> = Arc::new(FailingTask { panic: false });

        scheduler
            .schedule("sweep", Duration::from_secs(60), Arc::clone(&task))
            .unwrap();
        assert_eq!(
            scheduler.schedule("sweep", Duration::from_secs(60), Arc::clone(&task)),
            Err(ScheduleError::Duplicate {
                name: "sweep".to_string()
            })
        );
        assert_eq!(
            scheduler.schedule("zero", Duration::ZERO, task),
            Err(ScheduleError::ZeroInterval {
                name: "zero".to_string()
            })
        );
        assert_eq!(scheduler.task_names(), vec!["sweep"]);
        assert_eq!(scheduler.stats("sweep"), Some(TaskStats::default()));
        scheduler.shutdown().await;
    }
}
