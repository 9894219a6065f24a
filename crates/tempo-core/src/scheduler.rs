//! Public scheduling API over an engine's event store.

use std::sync::Arc;

use chrono::TimeDelta;
use tempo_types::{EventId, EventType, ScheduledEvent, SimTime};
use tracing::{debug, info};

use crate::engine::Shared;
use crate::store::{ScheduleError, validate_interval};

/// Creates, cancels, and lists scheduled events.
///
/// Obtained from [`Engine::scheduler`](crate::engine::Engine::scheduler).
/// Every call takes the engine's state lock, so it is safe to use from
/// listeners and admin handlers while ticks run.
///
/// Event types are not checked against registered listeners: an event of
/// a type nobody listens for still fires and is counted as unhandled.
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

impl Scheduler {
    pub(crate) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Schedule `event_type` to fire every `interval`, first at
    /// `now + interval`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NonPositiveInterval`] if `interval` is zero
    /// or negative, or [`ScheduleError::TimeOverflow`] if the first due time
    /// is out of range. Nothing is stored on error.
    pub fn schedule_recurring(
        &self,
        event_type: EventType,
        interval: TimeDelta,
        payload: serde_json::Value,
    ) -> Result<EventId, ScheduleError> {
        self.schedule_recurring_event(event_type, interval, payload)
            .map(|event| event.id)
    }

    /// [`Scheduler::schedule_recurring`], returning the event as it was
    /// stored. The copy is taken under the same lock as the insert, so it is
    /// available even if a tick fires the event straight away.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::schedule_recurring`].
    pub fn schedule_recurring_event(
        &self,
        event_type: EventType,
        interval: TimeDelta,
        payload: serde_json::Value,
    ) -> Result<ScheduledEvent, ScheduleError> {
        validate_interval(interval)?;
        let mut state = self.shared.lock_state();
        let first_due = state
            .clock
            .now()
            .checked_add_signed(interval)
            .ok_or_else(|| ScheduleError::TimeOverflow {
                context: "first occurrence of recurring event".to_owned(),
            })?;
        let event = ScheduledEvent::recurring(event_type, first_due, interval, payload);
        let stored = state.store.insert(event)?.clone();
        drop(state);

        info!(
            event_id = %stored.id,
            event_type = %stored.event_type,
            interval_secs = interval.num_seconds(),
            first_due = %first_due,
            "Recurring event scheduled"
        );
        Ok(stored)
    }

    /// Schedule `event_type` to fire once at `due_at`.
    ///
    /// A `due_at` at or before the current time fires on the next tick.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::DuplicateId`] only if an id collides, which
    /// freshly generated ids do not.
    pub fn schedule_once(
        &self,
        event_type: EventType,
        due_at: SimTime,
        payload: serde_json::Value,
    ) -> Result<EventId, ScheduleError> {
        self.schedule_once_event(event_type, due_at, payload)
            .map(|event| event.id)
    }

    /// [`Scheduler::schedule_once`], returning the event as it was stored.
    ///
    /// # Errors
    ///
    /// Same as [`Scheduler::schedule_once`].
    pub fn schedule_once_event(
        &self,
        event_type: EventType,
        due_at: SimTime,
        payload: serde_json::Value,
    ) -> Result<ScheduledEvent, ScheduleError> {
        let event = ScheduledEvent::one_shot(event_type, due_at, payload);
        let stored = self.shared.lock_state().store.insert(event)?.clone();
        info!(
            event_id = %stored.id,
            event_type = %stored.event_type,
            due_at = %due_at,
            "One-shot event scheduled"
        );
        Ok(stored)
    }

    /// Schedule `event_type` to fire once, `delay` after the current time.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::TimeOverflow`] if the due time is out of
    /// range.
    pub fn schedule_after(
        &self,
        event_type: EventType,
        delay: TimeDelta,
        payload: serde_json::Value,
    ) -> Result<EventId, ScheduleError> {
        let due_at = self
            .shared
            .lock_state()
            .clock
            .now()
            .checked_add_signed(delay)
            .ok_or_else(|| ScheduleError::TimeOverflow {
                context: "delayed one-shot event".to_owned(),
            })?;
        self.schedule_once(event_type, due_at, payload)
    }

    /// Remove a pending event. Returns `false` if it was unknown or a
    /// one-shot that already fired.
    pub fn cancel(&self, id: EventId) -> bool {
        let removed = self.shared.lock_state().store.remove(id);
        if removed {
            info!(event_id = %id, "Event cancelled");
        } else {
            debug!(event_id = %id, "Cancel requested for unknown event");
        }
        removed
    }

    /// A pending event by id.
    pub fn get(&self, id: EventId) -> Option<ScheduledEvent> {
        self.shared.lock_state().store.get(id).cloned()
    }

    /// All pending events in due order.
    pub fn list(&self) -> Vec<ScheduledEvent> {
        self.shared.lock_state().store.list()
    }

    /// Current simulated time, for computing due times.
    pub fn now(&self) -> SimTime {
        self.shared.lock_state().clock.now()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use std::time::Duration;

    use chrono::DateTime;

    use super::*;
    use crate::clock::SimulatedClock;
    use crate::config::{DriverMode, EngineConfig};
    use crate::engine::Engine;

    fn day(n: i64) -> SimTime {
        DateTime::UNIX_EPOCH + TimeDelta::days(n)
    }

    fn scheduler_at(start: SimTime) -> Scheduler {
        let clock = SimulatedClock::from_parts(start, Duration::from_secs(1), 86_400).unwrap();
        let config = EngineConfig {
            driver: DriverMode::External,
            ..EngineConfig::default()
        };
        Engine::new(clock, &config).scheduler()
    }

    #[test]
    fn recurring_first_due_is_one_interval_out() {
        let scheduler = scheduler_at(day(3));
        let id = scheduler
            .schedule_recurring(EventType::Payroll, TimeDelta::days(7), serde_json::Value::Null)
            .unwrap();
        let event = scheduler.get(id).unwrap();
        assert_eq!(event.due_at, day(10));
        assert!(event.is_recurring());
    }

    #[test]
    fn non_positive_interval_is_rejected() {
        let scheduler = scheduler_at(day(0));
        for interval in [TimeDelta::zero(), TimeDelta::days(-1)] {
            let result = scheduler.schedule_recurring(
                EventType::SkillDecay,
                interval,
                serde_json::Value::Null,
            );
            assert!(matches!(
                result,
                Err(ScheduleError::NonPositiveInterval { .. })
            ));
        }
        assert!(scheduler.list().is_empty());
    }

    #[test]
    fn once_in_the_past_is_accepted() {
        let scheduler = scheduler_at(day(50));
        let id = scheduler
            .schedule_once(EventType::TrainingComplete, day(10), serde_json::json!({"id": 4}))
            .unwrap();
        assert_eq!(scheduler.get(id).unwrap().due_at, day(10));
    }

    #[test]
    fn after_is_relative_to_now() {
        let scheduler = scheduler_at(day(5));
        let id = scheduler
            .schedule_after(EventType::ContractDeadline, TimeDelta::days(2), serde_json::Value::Null)
            .unwrap();
        assert_eq!(scheduler.get(id).unwrap().due_at, day(7));
        assert_eq!(scheduler.now(), day(5));
    }

    #[test]
    fn unknown_types_are_accepted() {
        let scheduler = scheduler_at(day(0));
        let id = scheduler
            .schedule_once(
                EventType::Custom("seasonEnd".to_owned()),
                day(1),
                serde_json::Value::Null,
            )
            .unwrap();
        assert!(scheduler.get(id).is_some());
    }

    #[test]
    fn cancel_removes_once() {
        let scheduler = scheduler_at(day(0));
        let id = scheduler
            .schedule_once(EventType::Payroll, day(1), serde_json::Value::Null)
            .unwrap();
        assert!(scheduler.cancel(id));
        assert!(!scheduler.cancel(id));
        assert!(scheduler.get(id).is_none());
    }

    #[test]
    fn list_is_in_due_order() {
        let scheduler = scheduler_at(day(0));
        let late = scheduler
            .schedule_once(EventType::Payroll, day(9), serde_json::Value::Null)
            .unwrap();
        let early = scheduler
            .schedule_once(EventType::Payroll, day(2), serde_json::Value::Null)
            .unwrap();
        let ids: Vec<EventId> = scheduler.list().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![early, late]);
    }

    #[tokio::test]
    async fn stored_copy_outlives_an_immediate_firing() {
        let clock = SimulatedClock::from_parts(day(50), Duration::from_secs(1), 86_400).unwrap();
        let config = EngineConfig {
            driver: DriverMode::External,
            ..EngineConfig::default()
        };
        let engine = Engine::new(clock, &config);
        engine.start().unwrap();
        let scheduler = engine.scheduler();

        let stored = scheduler
            .schedule_once_event(EventType::TrainingComplete, day(10), serde_json::json!({"id": 4}))
            .unwrap();
        let report = engine.tick_once().await.unwrap();

        assert_eq!(report.fired.len(), 1);
        assert_eq!(report.fired.first().unwrap().event_id, stored.id);
        assert!(scheduler.get(stored.id).is_none());
        assert_eq!(stored.due_at, day(10));
        assert_eq!(stored.event_type, EventType::TrainingComplete);
    }

    #[test]
    fn stored_copy_carries_the_assigned_sequence() {
        let scheduler = scheduler_at(day(0));
        let first = scheduler
            .schedule_recurring_event(EventType::Payroll, TimeDelta::days(7), serde_json::Value::Null)
            .unwrap();
        let second = scheduler
            .schedule_once_event(EventType::Payroll, day(7), serde_json::Value::Null)
            .unwrap();
        assert!(first.sequence < second.sequence);
        assert_eq!(scheduler.get(first.id).unwrap(), first);
    }
}
