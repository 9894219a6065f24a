//! The tick engine: clock, event store, and dispatcher behind one handle.
//!
//! [`Engine`] is a cheaply clonable handle that owns all scheduling state.
//! Construct it once at process start and pass it to whatever needs to
//! schedule events or control time.
//!
//! # Tick anatomy
//!
//! 1. **Synchronous phase** (under the state lock): advance the clock,
//!    then repeatedly take the earliest due event, record its firing, and
//!    either reschedule it (`due_at += interval`) or remove it. A recurring
//!    event that is still due after rescheduling fires again in the same
//!    tick, so a large time jump fires every skipped occurrence once, in
//!    order, up to `max_firings_per_tick`.
//! 2. **Emission phase**: each fired occurrence is handed to the
//!    [`Dispatcher`] in firing order. Listener work runs on the dispatcher's
//!    delivery worker, in that same order, and never touches the store
//!    directly.
//!
//! Ticks are single-flight: a tick gate is held for the whole tick, so a
//! second tick queues ([`Engine::tick_once`]) or is rejected
//! ([`Engine::try_tick_once`]). Each tick runs on its own task, so a
//! caller that stops waiting does not cut a tick short.
//!
//! # Cancellation race
//!
//! [`Scheduler::cancel`] takes the same state lock as the synchronous
//! phase. Cancelling before a tick selects an event prevents it from
//! firing; cancelling after selection (e.g. from inside a listener) does
//! not recall the occurrence already handed out. For a recurring event it
//! removes the following occurrences.
//!
//! [`Scheduler::cancel`]: crate::scheduler::Scheduler::cancel

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::TimeDelta;
use tempo_types::{EngineSnapshot, EngineStatus, SimTime, TickReport};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{ClockError, SimulatedClock};
use crate::config::{DriverMode, EngineConfig, TempoConfig};
use crate::dispatcher::Dispatcher;
use crate::runner;
use crate::scheduler::Scheduler;
use crate::store::{EventStore, ScheduleError};

/// Errors returned by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A clock operation failed.
    #[error("clock error: {source}")]
    Clock {
        /// The underlying clock error.
        #[from]
        source: ClockError,
    },

    /// A schedule request was malformed.
    #[error("schedule error: {source}")]
    Schedule {
        /// The underlying schedule error.
        #[from]
        source: ScheduleError,
    },

    /// The engine is stopped; start it before ticking.
    #[error("engine is stopped")]
    Stopped,

    /// Another tick is in flight.
    #[error("a tick is already in flight")]
    ConcurrentTick,

    /// The timer driver needs a Tokio runtime and none is active.
    #[error("no Tokio runtime available to run the tick timer")]
    NoRuntime,

    /// The task running a tick ended without producing a report.
    #[error("tick task failed: {message}")]
    TickTask {
        /// Why the task ended.
        message: String,
    },
}

/// State mutated only under the engine's state lock.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub(crate) clock: SimulatedClock,
    pub(crate) store: EventStore,
}

#[derive(Debug)]
struct TimerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Everything an [`Engine`] handle points at.
#[derive(Debug)]
pub(crate) struct Shared {
    state: Mutex<EngineState>,
    tick_gate: Arc<tokio::sync::Mutex<()>>,
    dispatcher: Dispatcher,
    driver: DriverMode,
    max_firings_per_tick: usize,
    tick_count: AtomicU64,
    timer: Mutex<Option<TimerHandle>>,
}

impl Shared {
    /// Lock clock and store. Never hold the guard across an `.await`.
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_timer(&self) -> MutexGuard<'_, Option<TimerHandle>> {
        self.timer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Handle to a game-clock and event-scheduling engine.
#[derive(Debug, Clone)]
pub struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    /// Create a stopped engine around `clock`.
    pub fn new(clock: SimulatedClock, config: &EngineConfig) -> Self {
        let state = EngineState {
            clock,
            store: EventStore::new(),
        };
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                tick_gate: Arc::new(tokio::sync::Mutex::new(())),
                dispatcher: Dispatcher::new(config.max_concurrent_deliveries),
                driver: config.driver,
                max_firings_per_tick: config.max_firings_per_tick.max(1),
                tick_count: AtomicU64::new(0),
                timer: Mutex::new(None),
            }),
        }
    }

    /// Create a stopped engine from the full configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if the clock settings are invalid.
    pub fn from_config(config: &TempoConfig) -> Result<Self, EngineError> {
        let clock = SimulatedClock::new(&config.clock)?;
        Ok(Self::new(clock, &config.engine))
    }

    /// Facade for creating, cancelling, and listing scheduled events.
    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(Arc::clone(&self.shared))
    }

    /// The listener registry.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.shared.dispatcher
    }

    /// How this engine is driven.
    pub fn driver(&self) -> DriverMode {
        self.shared.driver
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start accepting ticks. With the timer driver this also spawns the
    /// real-time tick loop.
    ///
    /// Returns `false` (and does nothing) if the engine is already running.
    /// Does not change the pause flag.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NoRuntime`] if the timer driver is configured
    /// and no Tokio runtime is active.
    pub fn start(&self) -> Result<bool, EngineError> {
        let mut timer = self.shared.lock_timer();
        if self.shared.lock_state().clock.is_running() {
            return Ok(false);
        }

        let runtime = match self.shared.driver {
            DriverMode::Timer => Some(
                tokio::runtime::Handle::try_current().map_err(|_err| EngineError::NoRuntime)?,
            ),
            DriverMode::External => None,
        };

        let now = {
            let mut state = self.shared.lock_state();
            state.clock.set_running(true);
            state.clock.now()
        };

        if let Some(runtime) = runtime {
            if let Some(stale) = timer.take() {
                signal_shutdown(&stale);
            }
            let (shutdown, receiver) = watch::channel(false);
            let task = runtime.spawn(runner::run_timer(self.clone(), receiver));
            *timer = Some(TimerHandle { shutdown, task });
        }

        info!(driver = ?self.shared.driver, time = %now, "Engine started");
        Ok(true)
    }

    /// Stop accepting ticks and signal the timer to exit after its current
    /// tick. Pending events stay in the store.
    ///
    /// Returns whether the engine was running.
    pub fn stop(&self) -> bool {
        let (was_running, timer) = self.halt();
        if let Some(timer) = timer {
            signal_shutdown(&timer);
        }
        was_running
    }

    /// Stop, wait for the timer task to exit, then wait for in-flight
    /// deliveries to finish.
    pub async fn shutdown(&self) {
        let (_, timer) = self.halt();
        if let Some(timer) = timer {
            signal_shutdown(&timer);
            if let Err(err) = timer.task.await {
                warn!(%err, "Tick timer task ended abnormally");
            }
        }
        self.wait_idle().await;
        info!("Engine shut down");
    }

    fn halt(&self) -> (bool, Option<TimerHandle>) {
        let timer = self.shared.lock_timer().take();
        let was_running = {
            let mut state = self.shared.lock_state();
            let was_running = state.clock.is_running();
            state.clock.set_running(false);
            was_running
        };
        if was_running {
            info!("Engine stopped");
        }
        (was_running, timer)
    }

    /// Current lifecycle state.
    pub fn status(&self) -> EngineStatus {
        status_of(&self.shared.lock_state().clock)
    }

    // -----------------------------------------------------------------------
    // Admin controls
    // -----------------------------------------------------------------------

    /// Freeze simulated time. Ticks keep firing already-due events.
    pub fn pause(&self) {
        self.shared.lock_state().clock.pause();
        info!("Simulated clock paused");
    }

    /// Unfreeze simulated time without catching up.
    pub fn resume(&self) {
        self.shared.lock_state().clock.resume();
        info!("Simulated clock resumed");
    }

    /// Current simulated time.
    pub fn now(&self) -> SimTime {
        self.shared.lock_state().clock.now()
    }

    /// Replace simulated time. Returns the previous time.
    ///
    /// Moving backward does not un-fire anything; moving forward makes
    /// every event due by the new time fire on the next tick.
    pub fn set_time(&self, time: SimTime) -> SimTime {
        let previous = self.shared.lock_state().clock.set_time(time);
        info!(from = %previous, to = %time, "Simulated time set");
        previous
    }

    /// Jump forward by `delta`. Returns the new time.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] for a negative or out-of-range jump.
    pub fn fast_forward(&self, delta: TimeDelta) -> Result<SimTime, EngineError> {
        let now = self.shared.lock_state().clock.fast_forward(delta)?;
        info!(by_secs = delta.num_seconds(), to = %now, "Simulated time fast-forwarded");
        Ok(now)
    }

    /// Change the simulated-to-real time ratio. Returns the previous ratio.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if the resulting tick step overflows.
    pub fn set_time_multiplier(&self, multiplier: u32) -> Result<u32, EngineError> {
        let previous = self
            .shared
            .lock_state()
            .clock
            .set_time_multiplier(multiplier)?;
        info!(from = previous, to = multiplier, "Time multiplier changed");
        Ok(previous)
    }

    /// Change the real-time tick interval. Takes effect before the timer's
    /// next sleep. Returns the previous interval.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Clock`] if the interval is too small or the
    /// resulting tick step overflows.
    pub fn set_tick_interval(&self, interval: Duration) -> Result<Duration, EngineError> {
        let previous = self
            .shared
            .lock_state()
            .clock
            .set_tick_interval(interval)?;
        info!(
            from_ms = previous.as_millis(),
            to_ms = interval.as_millis(),
            "Tick interval changed"
        );
        Ok(previous)
    }

    /// Real-time interval between automatic ticks.
    pub fn tick_interval(&self) -> Duration {
        self.shared.lock_state().clock.tick_interval()
    }

    /// Number of ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.shared.tick_count.load(Ordering::Acquire)
    }

    // -----------------------------------------------------------------------
    // Ticking
    // -----------------------------------------------------------------------

    /// Run one tick, waiting behind any tick already in flight.
    ///
    /// This is the entry point for both the timer and external triggers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Stopped`] if the engine is not running and
    /// [`EngineError::Clock`] if the clock cannot advance.
    pub async fn tick_once(&self) -> Result<TickReport, EngineError> {
        let engine = self.clone();
        run_detached(async move {
            let _gate = engine.shared.tick_gate.lock().await;
            engine.run_tick().await
        })
        .await
    }

    /// Run one tick unless another tick is in flight.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ConcurrentTick`] if a tick is in flight, plus
    /// everything [`Engine::tick_once`] can return.
    pub async fn try_tick_once(&self) -> Result<TickReport, EngineError> {
        let gate = Arc::clone(&self.shared.tick_gate)
            .try_lock_owned()
            .map_err(|_err| EngineError::ConcurrentTick)?;
        let engine = self.clone();
        run_detached(async move {
            let _gate = gate;
            engine.run_tick().await
        })
        .await
    }

    /// Wait until no delivery is in flight.
    pub async fn wait_idle(&self) {
        self.shared.dispatcher.wait_idle().await;
    }

    async fn run_tick(&self) -> Result<TickReport, EngineError> {
        let report = self.collect_due()?;
        for event in &report.fired {
            self.shared.dispatcher.emit(event.clone()).await;
        }
        Ok(report)
    }

    /// Synchronous phase: advance, select, reschedule or remove.
    fn collect_due(&self) -> Result<TickReport, EngineError> {
        let mut state = self.shared.lock_state();
        if !state.clock.is_running() {
            return Err(EngineError::Stopped);
        }

        let advanced = state.clock.advance()?;
        let now = state.clock.now();
        let cap = self.shared.max_firings_per_tick;

        let mut fired = Vec::new();
        while fired.len() < cap {
            let Some(event) = state.store.next_due(now).cloned() else {
                break;
            };
            fired.push(event.fire(now));

            match event.next_occurrence() {
                Some(next) => {
                    if let Err(err) = state.store.reschedule(event.id, next) {
                        warn!(event_id = %event.id, %err, "Reschedule failed; dropping event");
                        state.store.remove(event.id);
                    }
                }
                None => {
                    if event.is_recurring() {
                        warn!(
                            event_id = %event.id,
                            event_type = %event.event_type,
                            "Next occurrence is out of range; dropping recurring event"
                        );
                    }
                    state.store.remove(event.id);
                }
            }
        }
        let deferred = state.store.count_due(now);
        drop(state);

        let tick = self
            .shared
            .tick_count
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1);

        if deferred > 0 {
            warn!(tick, deferred, cap, "Firing cap reached; remaining due events deferred");
        }
        if fired.is_empty() {
            debug!(tick, time = %now, advanced, "Tick");
        } else {
            info!(tick, time = %now, advanced, fired = fired.len(), "Tick fired events");
        }

        Ok(TickReport {
            tick,
            time: now,
            advanced,
            fired,
            deferred,
        })
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Point-in-time view for operators.
    pub fn snapshot(&self) -> EngineSnapshot {
        let state = self.shared.lock_state();
        EngineSnapshot {
            status: status_of(&state.clock),
            current_time: state.clock.now(),
            tick_count: self.tick_count(),
            time_multiplier: state.clock.time_multiplier(),
            tick_interval_ms: u64::try_from(state.clock.tick_interval().as_millis())
                .unwrap_or(u64::MAX),
            pending_events: state.store.len(),
            next_due: state.store.next_due_time(),
            in_flight_deliveries: self.shared.dispatcher.in_flight(),
            dispatch: self.shared.dispatcher.stats(),
        }
    }
}

const fn status_of(clock: &SimulatedClock) -> EngineStatus {
    if !clock.is_running() {
        EngineStatus::Stopped
    } else if clock.is_paused() {
        EngineStatus::Paused
    } else {
        EngineStatus::Running
    }
}

fn signal_shutdown(timer: &TimerHandle) {
    if timer.shutdown.send(true).is_err() {
        debug!("Tick timer already exited");
    }
}

async fn run_detached<F>(tick: F) -> Result<TickReport, EngineError>
where
    F: std::future::Future<Output = Result<TickReport, EngineError>> + Send + 'static,
{
    tokio::spawn(tick)
        .await
        .map_err(|err| EngineError::TickTask {
            message: err.to_string(),
        })?
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use chrono::DateTime;
    use tempo_types::EventType;

    use super::*;

    fn day(n: i64) -> SimTime {
        DateTime::UNIX_EPOCH + TimeDelta::days(n)
    }

    fn external_engine() -> Engine {
        let clock = SimulatedClock::from_parts(day(0), Duration::from_secs(1), 86_400).unwrap();
        let config = EngineConfig {
            driver: DriverMode::External,
            ..EngineConfig::default()
        };
        Engine::new(clock, &config)
    }

    #[tokio::test]
    async fn new_engine_is_stopped_and_rejects_ticks() {
        let engine = external_engine();
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(matches!(engine.tick_once().await, Err(EngineError::Stopped)));
        assert_eq!(engine.now(), day(0));
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let engine = external_engine();
        assert!(engine.start().unwrap());
        assert!(!engine.start().unwrap());
        assert_eq!(engine.status(), EngineStatus::Running);
    }

    #[tokio::test]
    async fn pause_is_reported_while_running() {
        let engine = external_engine();
        engine.start().unwrap();
        engine.pause();
        assert_eq!(engine.status(), EngineStatus::Paused);
        engine.resume();
        assert_eq!(engine.status(), EngineStatus::Running);
        engine.stop();
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn tick_advances_one_step() {
        let engine = external_engine();
        engine.start().unwrap();
        let report = engine.tick_once().await.unwrap();
        assert_eq!(report.tick, 1);
        assert!(report.advanced);
        assert_eq!(report.time, day(1));
        assert_eq!(engine.tick_count(), 1);
    }

    #[tokio::test]
    async fn stop_keeps_pending_events() {
        let engine = external_engine();
        engine.start().unwrap();
        engine
            .scheduler()
            .schedule_once(EventType::Payroll, day(1), serde_json::Value::Null)
            .unwrap();
        assert!(engine.stop());
        assert!(engine.tick_once().await.is_err());
        assert_eq!(engine.snapshot().pending_events, 1);

        engine.start().unwrap();
        let report = engine.tick_once().await.unwrap();
        assert_eq!(report.fired.len(), 1);
        assert_eq!(engine.snapshot().pending_events, 0);
    }

    #[test]
    fn timer_driver_needs_runtime() {
        let clock = SimulatedClock::from_parts(day(0), Duration::from_secs(1), 1).unwrap();
        let engine = Engine::new(clock, &EngineConfig::default());
        assert!(matches!(engine.start(), Err(EngineError::NoRuntime)));
        assert_eq!(engine.status(), EngineStatus::Stopped);
    }

    #[tokio::test]
    async fn snapshot_reports_clock_settings() {
        let engine = external_engine();
        engine.set_time_multiplier(60).unwrap();
        engine.set_tick_interval(Duration::from_millis(500)).unwrap();
        let snapshot = engine.snapshot();
        assert_eq!(snapshot.time_multiplier, 60);
        assert_eq!(snapshot.tick_interval_ms, 500);
        assert_eq!(snapshot.status, EngineStatus::Stopped);
        assert_eq!(snapshot.next_due, None);
    }

    #[tokio::test]
    async fn fast_forward_rejects_negative_delta() {
        let engine = external_engine();
        assert!(engine.fast_forward(TimeDelta::days(-2)).is_err());
        assert_eq!(engine.fast_forward(TimeDelta::days(2)).unwrap(), day(2));
    }
}
