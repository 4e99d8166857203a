//! Heartbeat scheduler: the agent's sense of passing time.
//!
//! A periodic tick drives everything time-dependent: emotional decay, memory
//! consolidation, journal flushes, snapshot writes. Each tick carries the
//! *actual* elapsed time since the previous one, so a stalled process decays
//! by wall-clock time rather than by tick count. Maintenance callbacks run in
//! registration order under a per-callback time budget; a slow or failing
//! callback degrades health and is skipped past, never crashing the loop.

use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::bus::{Event, EventBus};
use crate::error::SchedulerError;
use crate::health::HealthMonitor;

/// Event kind published on every tick.
pub const TICK_EVENT: &str = "heartbeat.tick";

/// Per-tick context handed to maintenance callbacks.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    pub tick_count: u64,
    /// Actual elapsed time since the previous tick, not the nominal interval.
    pub elapsed: Duration,
}

/// A maintenance callback. Runs on the blocking pool, so it may do file I/O.
pub type MaintenanceCallback = Arc<dyn Fn(TickContext) -> anyhow::Result<()> + Send + Sync>;

struct NamedCallback {
    name: String,
    callback: MaintenanceCallback,
}

struct HeartbeatState {
    tick_count: u64,
    last_tick_at: Option<Instant>,
    running: bool,
}

pub struct HeartbeatScheduler {
    bus: Arc<EventBus>,
    health: Arc<HealthMonitor>,
    callback_timeout: Duration,
    callbacks: Mutex<Vec<NamedCallback>>,
    state: Mutex<HeartbeatState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatScheduler {
    pub fn new(bus: Arc<EventBus>, health: Arc<HealthMonitor>, callback_timeout: Duration) -> Self {
        Self {
            bus,
            health,
            callback_timeout,
            callbacks: Mutex::new(Vec::new()),
            state: Mutex::new(HeartbeatState {
                tick_count: 0,
                last_tick_at: None,
                running: false,
            }),
            task: Mutex::new(None),
        }
    }

    /// Restore the tick counter from a persisted snapshot. Call before
    /// [`start`](Self::start).
    pub fn resume(&self, tick_count: u64) {
        self.lock_state().tick_count = tick_count;
    }

    /// Register a maintenance callback. Callbacks run every tick in the order
    /// they were registered.
    pub fn register_callback(
        &self,
        name: impl Into<String>,
        callback: MaintenanceCallback,
    ) {
        let name = name.into();
        debug!(callback = %name, "Maintenance callback registered");
        self.callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(NamedCallback { name, callback });
    }

    pub fn tick_count(&self) -> u64 {
        self.lock_state().tick_count
    }

    pub fn is_running(&self) -> bool {
        self.lock_state().running
    }

    /// Start the periodic tick task. Fails when a tick task is already live.
    pub fn start(self: &Arc<Self>, interval: Duration) -> Result<(), SchedulerError> {
        {
            let mut state = self.lock_state();
            if state.running {
                return Err(SchedulerError::AlreadyRunning);
            }
            state.running = true;
            state.last_tick_at = None;
        }
        info!(interval_ms = interval.as_millis() as u64, "Heartbeat started");

        let weak: Weak<Self> = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // An interval's first tick completes immediately; skip it so the
            // first real tick lands one full interval after start.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                if !scheduler.is_running() {
                    break;
                }
                let elapsed = {
                    let mut state = scheduler.lock_state();
                    let now = Instant::now();
                    let elapsed = state
                        .last_tick_at
                        .map(|prev| now.duration_since(prev))
                        .unwrap_or(interval);
                    state.last_tick_at = Some(now);
                    elapsed
                };
                scheduler.run_tick(elapsed).await;
            }
        });

        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        *task = Some(handle);
        Ok(())
    }

    /// Stop the tick task. Idempotent; a stopped scheduler may be started
    /// again.
    pub fn stop(&self) {
        let was_running = {
            let mut state = self.lock_state();
            let was = state.running;
            state.running = false;
            state.last_tick_at = None;
            was
        };
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            handle.abort();
        }
        if was_running {
            info!(tick_count = self.tick_count(), "Heartbeat stopped");
        }
    }

    /// Execute one tick: bump the counter, publish [`TICK_EVENT`], then run
    /// every maintenance callback in registration order. Returns the new tick
    /// count.
    ///
    /// Callable directly in tests to drive time-dependent behavior without a
    /// live ticker.
    pub async fn run_tick(&self, elapsed: Duration) -> u64 {
        let tick_count = {
            let mut state = self.lock_state();
            state.tick_count += 1;
            state.tick_count
        };

        match Event::new(
            TICK_EVENT,
            json!({
                "tick_count": tick_count,
                "elapsed_ms": elapsed.as_millis() as u64,
            }),
            "heartbeat",
        ) {
            Ok(event) => {
                self.bus.publish(&event);
            }
            Err(e) => warn!(error = %e, "Failed to build tick event"),
        }

        let callbacks: Vec<(String, MaintenanceCallback)> = self
            .callbacks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|c| (c.name.clone(), Arc::clone(&c.callback)))
            .collect();

        let ctx = TickContext {
            tick_count,
            elapsed,
        };
        for (name, callback) in callbacks {
            let component = format!("heartbeat.{name}");
            let cb = Arc::clone(&callback);
            let join = tokio::task::spawn_blocking(move || cb(ctx));
            match tokio::time::timeout(self.callback_timeout, join).await {
                Ok(Ok(Ok(()))) => self.health.report_ok(&component),
                Ok(Ok(Err(e))) => {
                    warn!(callback = %name, tick_count, error = %e, "Maintenance callback failed");
                    self.health.report_degraded(&component, e.to_string());
                }
                Ok(Err(join_err)) => {
                    warn!(callback = %name, tick_count, error = %join_err, "Maintenance callback panicked");
                    self.health
                        .report_degraded(&component, join_err.to_string());
                }
                Err(_) => {
                    let err = SchedulerError::CallbackTimeout {
                        name: name.clone(),
                        budget_ms: self.callback_timeout.as_millis() as u64,
                    };
                    // The blocking task keeps running detached; we move on so
                    // one stuck callback cannot stall the whole tick.
                    warn!(callback = %name, tick_count, "Maintenance callback exceeded budget, abandoned");
                    self.health.report_degraded(&component, err.to_string());
                }
            }
        }
        tick_count
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, HeartbeatState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
