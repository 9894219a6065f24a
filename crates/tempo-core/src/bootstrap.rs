//! One-time wiring of listeners and recurring jobs.
//!
//! A [`Bootstrapper`] holds a [`BootstrapPlan`] and an explicit
//! initialization state. [`Bootstrapper::initialize`] subscribes every
//! planned listener, installs every planned recurring job, and starts the
//! engine. Calling it again after success is a no-op, so listeners are
//! never registered twice.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::TimeDelta;
use tempo_types::{EventId, EventType, ListenerId};
use tracing::{info, warn};

use crate::config::{ConfigError, JobConfig};
use crate::dispatcher::EventHandler;
use crate::engine::{Engine, EngineError};
use crate::store::{ScheduleError, validate_interval};

/// Errors raised while bootstrapping.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    /// A job definition from configuration is unusable.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// A planned job cannot be scheduled.
    #[error("job '{event_type}' cannot be scheduled: {source}")]
    InvalidJob {
        /// Event type of the offending job.
        event_type: EventType,
        /// Why it was rejected.
        source: ScheduleError,
    },

    /// The engine refused to start.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: EngineError,
    },
}

/// A listener to subscribe at bootstrap.
#[derive(Clone)]
pub struct ListenerSpec {
    /// Event type to listen for.
    pub event_type: EventType,
    /// Name used in logs.
    pub name: String,
    /// The handler.
    pub handler: Arc<dyn EventHandler>,
}

impl std::fmt::Debug for ListenerSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSpec")
            .field("event_type", &self.event_type)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A recurring job to install at bootstrap.
#[derive(Debug, Clone, PartialEq)]
pub struct JobSpec {
    /// Event type fired by the job.
    pub event_type: EventType,
    /// Simulated time between runs.
    pub interval: TimeDelta,
    /// Payload attached to every run.
    pub payload: serde_json::Value,
}

impl JobSpec {
    /// Build a job with an empty payload.
    pub const fn new(event_type: EventType, interval: TimeDelta) -> Self {
        Self {
            event_type,
            interval,
            payload: serde_json::Value::Null,
        }
    }

    /// Build a job from its configuration entry.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] if the interval is unusable.
    pub fn from_config(config: &JobConfig) -> Result<Self, BootstrapError> {
        Ok(Self {
            event_type: config.event_type.clone(),
            interval: config.interval()?,
            payload: config.payload.clone(),
        })
    }
}

/// Listeners and jobs to install.
#[derive(Debug, Clone, Default)]
pub struct BootstrapPlan {
    listeners: Vec<ListenerSpec>,
    jobs: Vec<JobSpec>,
}

impl BootstrapPlan {
    /// An empty plan.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a listener.
    #[must_use]
    pub fn listener(
        mut self,
        event_type: EventType,
        name: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.listeners.push(ListenerSpec {
            event_type,
            name: name.into(),
            handler,
        });
        self
    }

    /// Add a recurring job.
    #[must_use]
    pub fn job(mut self, job: JobSpec) -> Self {
        self.jobs.push(job);
        self
    }

    /// Add every job from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::Config`] for the first unusable entry.
    pub fn jobs_from_config(mut self, jobs: &[JobConfig]) -> Result<Self, BootstrapError> {
        for job in jobs {
            self.jobs.push(JobSpec::from_config(job)?);
        }
        Ok(self)
    }

    /// Planned listeners.
    pub fn listeners(&self) -> &[ListenerSpec] {
        &self.listeners
    }

    /// Planned jobs.
    pub fn jobs(&self) -> &[JobSpec] {
        &self.jobs
    }
}

/// What a successful initialization installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapRecord {
    /// Subscribed listeners, in plan order.
    pub listeners: Vec<ListenerId>,
    /// Installed recurring jobs, in plan order.
    pub jobs: Vec<EventId>,
}

/// Result of [`Bootstrapper::initialize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapOutcome {
    /// This call did the wiring.
    Initialized(BootstrapRecord),
    /// An earlier call already did; nothing changed.
    AlreadyInitialized(BootstrapRecord),
}

impl BootstrapOutcome {
    /// What is installed, regardless of which call installed it.
    pub const fn record(&self) -> &BootstrapRecord {
        match self {
            Self::Initialized(record) | Self::AlreadyInitialized(record) => record,
        }
    }
}

#[derive(Debug)]
enum BootstrapState {
    Uninitialized,
    /// Listeners are subscribed but jobs or startup failed.
    Wired(Vec<ListenerId>),
    Initialized(BootstrapRecord),
}

/// Idempotent installer for a [`BootstrapPlan`].
#[derive(Debug)]
pub struct Bootstrapper {
    plan: BootstrapPlan,
    state: Mutex<BootstrapState>,
}

impl Bootstrapper {
    /// Create an uninitialized bootstrapper.
    pub const fn new(plan: BootstrapPlan) -> Self {
        Self {
            plan,
            state: Mutex::new(BootstrapState::Uninitialized),
        }
    }

    /// Whether [`Bootstrapper::initialize`] has succeeded.
    pub fn is_initialized(&self) -> bool {
        matches!(
            *self.state.lock().unwrap_or_else(PoisonError::into_inner),
            BootstrapState::Initialized(_)
        )
    }

    /// Subscribe listeners, install jobs, and start `engine`.
    ///
    /// Jobs are validated before anything is wired. If scheduling or
    /// startup fails, the jobs installed by this call are cancelled and the
    /// error returned; subscribed listeners are kept and not subscribed
    /// again on the next attempt.
    ///
    /// # Errors
    ///
    /// Returns [`BootstrapError::InvalidJob`] for an unschedulable job and
    /// [`BootstrapError::Engine`] if the engine cannot start.
    pub fn initialize(&self, engine: &Engine) -> Result<BootstrapOutcome, BootstrapError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let listeners = match &*state {
            BootstrapState::Initialized(record) => {
                info!("Bootstrap already complete; skipping");
                return Ok(BootstrapOutcome::AlreadyInitialized(record.clone()));
            }
            BootstrapState::Wired(listeners) => listeners.clone(),
            BootstrapState::Uninitialized => {
                self.validate_jobs(engine)?;
                let listeners = self.subscribe_listeners(engine);
                *state = BootstrapState::Wired(listeners.clone());
                listeners
            }
        };

        let jobs = self.install_jobs(engine)?;

        if let Err(err) = engine.start() {
            cancel_all(engine, &jobs);
            return Err(err.into());
        }

        let record = BootstrapRecord { listeners, jobs };
        *state = BootstrapState::Initialized(record.clone());
        info!(
            listeners = record.listeners.len(),
            jobs = record.jobs.len(),
            time = %engine.now(),
            "Bootstrap complete"
        );
        Ok(BootstrapOutcome::Initialized(record))
    }

    fn validate_jobs(&self, engine: &Engine) -> Result<(), BootstrapError> {
        let now = engine.now();
        for job in &self.plan.jobs {
            let invalid = |source: ScheduleError| BootstrapError::InvalidJob {
                event_type: job.event_type.clone(),
                source,
            };
            validate_interval(job.interval).map_err(invalid)?;
            if now.checked_add_signed(job.interval).is_none() {
                return Err(invalid(ScheduleError::TimeOverflow {
                    context: "first occurrence of bootstrap job".to_owned(),
                }));
            }
        }
        Ok(())
    }

    fn subscribe_listeners(&self, engine: &Engine) -> Vec<ListenerId> {
        let dispatcher = engine.dispatcher();
        self.plan
            .listeners
            .iter()
            .map(|spec| {
                dispatcher.subscribe(
                    spec.event_type.clone(),
                    spec.name.clone(),
                    Arc::clone(&spec.handler),
                )
            })
            .collect()
    }

    fn install_jobs(&self, engine: &Engine) -> Result<Vec<EventId>, BootstrapError> {
        let scheduler = engine.scheduler();
        let mut installed = Vec::with_capacity(self.plan.jobs.len());
        for job in &self.plan.jobs {
            match scheduler.schedule_recurring(
                job.event_type.clone(),
                job.interval,
                job.payload.clone(),
            ) {
                Ok(id) => installed.push(id),
                Err(source) => {
                    cancel_all(engine, &installed);
                    return Err(BootstrapError::InvalidJob {
                        event_type: job.event_type.clone(),
                        source,
                    });
                }
            }
        }
        Ok(installed)
    }
}

fn cancel_all(engine: &Engine, jobs: &[EventId]) {
    let scheduler = engine.scheduler();
    for id in jobs {
        scheduler.cancel(*id);
    }
    if !jobs.is_empty() {
        warn!(jobs = jobs.len(), "Bootstrap rolled back installed jobs");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;
    use tempo_types::{EngineStatus, FiredEvent};

    use super::*;
    use crate::clock::SimulatedClock;
    use crate::config::{DriverMode, EngineConfig};
    use crate::dispatcher::handler_fn;

    fn engine(driver: DriverMode) -> Engine {
        let clock =
            SimulatedClock::from_parts(DateTime::UNIX_EPOCH, Duration::from_secs(1), 86_400)
                .unwrap();
        let config = EngineConfig {
            driver,
            ..EngineConfig::default()
        };
        Engine::new(clock, &config)
    }

    fn noop() -> Arc<dyn EventHandler> {
        Arc::new(handler_fn(|_event: FiredEvent| async { Ok(()) }))
    }

    fn plan() -> BootstrapPlan {
        BootstrapPlan::new()
            .listener(EventType::Payroll, "payroll", noop())
            .listener(EventType::SkillDecay, "skill-decay", noop())
            .job(JobSpec::new(EventType::Payroll, TimeDelta::days(7)))
            .job(JobSpec::new(EventType::SkillDecay, TimeDelta::days(7)))
    }

    #[tokio::test]
    async fn initialize_wires_and_starts() {
        let engine = engine(DriverMode::External);
        let bootstrapper = Bootstrapper::new(plan());

        let outcome = bootstrapper.initialize(&engine).unwrap();
        assert!(matches!(outcome, BootstrapOutcome::Initialized(_)));
        let record = outcome.record();
        assert_eq!(record.listeners.len(), 2);
        assert_eq!(record.jobs.len(), 2);
        assert!(bootstrapper.is_initialized());
        assert_eq!(engine.status(), EngineStatus::Running);
        assert_eq!(engine.scheduler().list().len(), 2);
    }

    #[tokio::test]
    async fn second_initialize_is_a_no_op() {
        let engine = engine(DriverMode::External);
        let bootstrapper = Bootstrapper::new(plan());

        bootstrapper.initialize(&engine).unwrap();
        let again = bootstrapper.initialize(&engine).unwrap();

        assert!(matches!(again, BootstrapOutcome::AlreadyInitialized(_)));
        assert_eq!(again.record().jobs.len(), 2);
        assert_eq!(engine.dispatcher().listener_count(&EventType::Payroll), 1);
        assert_eq!(engine.scheduler().list().len(), 2);
    }

    #[tokio::test]
    async fn invalid_job_wires_nothing() {
        let engine = engine(DriverMode::External);
        let bootstrapper = Bootstrapper::new(
            plan().job(JobSpec::new(EventType::ContractDeadline, TimeDelta::zero())),
        );

        let err = bootstrapper.initialize(&engine).unwrap_err();
        assert!(matches!(err, BootstrapError::InvalidJob { .. }));
        assert_eq!(engine.dispatcher().listener_count(&EventType::Payroll), 0);
        assert!(engine.scheduler().list().is_empty());
        assert_eq!(engine.status(), EngineStatus::Stopped);
        assert!(!bootstrapper.is_initialized());
    }

    #[test]
    fn failed_start_rolls_back_jobs_and_keeps_listeners() {
        // Timer driver without a runtime cannot start.
        let engine = engine(DriverMode::Timer);
        let bootstrapper = Bootstrapper::new(plan());

        let err = bootstrapper.initialize(&engine).unwrap_err();
        assert!(matches!(
            err,
            BootstrapError::Engine {
                source: EngineError::NoRuntime
            }
        ));
        assert!(engine.scheduler().list().is_empty());
        assert_eq!(engine.dispatcher().listener_count(&EventType::Payroll), 1);

        // A retry does not subscribe twice.
        assert!(bootstrapper.initialize(&engine).is_err());
        assert_eq!(engine.dispatcher().listener_count(&EventType::Payroll), 1);
    }

    #[test]
    fn jobs_from_config_rejects_zero_interval() {
        let jobs = [JobConfig::new(EventType::Payroll, 0)];
        let err = BootstrapPlan::new().jobs_from_config(&jobs).unwrap_err();
        assert!(matches!(err, BootstrapError::Config { .. }));
    }

    #[test]
    fn jobs_from_config_converts_seconds() {
        let jobs = [JobConfig::new(EventType::SkillDecay, 604_800)];
        let plan = BootstrapPlan::new().jobs_from_config(&jobs).unwrap();
        assert_eq!(plan.jobs().len(), 1);
        assert_eq!(plan.jobs().first().unwrap().interval, TimeDelta::days(7));
    }
}
