//! Pending scheduled events, indexed by due time.
//!
//! The store keeps every live [`ScheduledEvent`] keyed by ID, plus an
//! ordered due-index keyed by `(due_at, sequence, id)`. The sequence is
//! assigned on insertion and kept across reschedules, so events with equal
//! `due_at` always come out in insertion order regardless of hashing.
//!
//! Peeking the earliest event and inserting or removing one are all
//! `O(log n)`; a tick never scans events that are not due.

use std::collections::{BTreeMap, HashMap};

use chrono::TimeDelta;
use tempo_types::{EventId, ScheduledEvent, SimTime};

/// Errors raised for malformed schedule requests.
///
/// These are always returned to the caller immediately.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// A recurring event needs a strictly positive interval.
    #[error("recurring interval must be positive (got {interval_ms}ms)")]
    NonPositiveInterval {
        /// The rejected interval in milliseconds.
        interval_ms: i64,
    },

    /// A due time could not be represented.
    #[error("simulated timestamp out of range: {context}")]
    TimeOverflow {
        /// What was being computed.
        context: String,
    },

    /// An event with this ID is already pending.
    #[error("event {id} is already scheduled")]
    DuplicateId {
        /// The conflicting ID.
        id: EventId,
    },

    /// No pending event has this ID.
    #[error("no pending event with id {id}")]
    UnknownEvent {
        /// The missing ID.
        id: EventId,
    },
}

/// Reject non-positive recurrence intervals.
///
/// # Errors
///
/// Returns [`ScheduleError::NonPositiveInterval`] if `interval <= 0`.
pub fn validate_interval(interval: TimeDelta) -> Result<(), ScheduleError> {
    if interval <= TimeDelta::zero() {
        return Err(ScheduleError::NonPositiveInterval {
            interval_ms: interval.num_milliseconds(),
        });
    }
    Ok(())
}

type DueKey = (SimTime, u64, EventId);

/// Keyed collection of pending one-shot and recurring events.
#[derive(Debug, Default)]
pub struct EventStore {
    events: HashMap<EventId, ScheduledEvent>,
    due_index: BTreeMap<DueKey, EventId>,
    next_sequence: u64,
}

impl EventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a validated event. The store assigns its `sequence`.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::NonPositiveInterval`] for a recurring event
    /// with `interval <= 0` and [`ScheduleError::DuplicateId`] if the ID is
    /// already pending.
    pub fn add(&mut self, event: ScheduledEvent) -> Result<EventId, ScheduleError> {
        self.insert(event).map(|stored| stored.id)
    }

    /// Like [`EventStore::add`], but returns the event as stored, with its
    /// assigned `sequence`.
    ///
    /// # Errors
    ///
    /// Same as [`EventStore::add`].
    pub fn insert(&mut self, mut event: ScheduledEvent) -> Result<&ScheduledEvent, ScheduleError> {
        if let Some(rule) = event.recurrence {
            validate_interval(rule.interval)?;
        }
        if self.events.contains_key(&event.id) {
            return Err(ScheduleError::DuplicateId { id: event.id });
        }

        event.sequence = self.next_sequence;
        self.next_sequence = self.next_sequence.saturating_add(1);

        let id = event.id;
        self.due_index.insert(key_of(&event), id);
        Ok(self.events.entry(id).or_insert(event))
    }

    /// Remove an event. Returns whether it was present.
    pub fn remove(&mut self, id: EventId) -> bool {
        match self.events.remove(&id) {
            Some(event) => {
                self.due_index.remove(&key_of(&event));
                true
            }
            None => false,
        }
    }

    /// Move a pending event to a new due time, keeping its sequence.
    ///
    /// # Errors
    ///
    /// Returns [`ScheduleError::UnknownEvent`] if the ID is not pending.
    pub fn reschedule(&mut self, id: EventId, new_due_at: SimTime) -> Result<(), ScheduleError> {
        let event = self
            .events
            .get_mut(&id)
            .ok_or(ScheduleError::UnknownEvent { id })?;
        self.due_index.remove(&key_of(event));
        event.due_at = new_due_at;
        self.due_index.insert(key_of(event), id);
        Ok(())
    }

    /// Look up a pending event.
    pub fn get(&self, id: EventId) -> Option<&ScheduledEvent> {
        self.events.get(&id)
    }

    /// All events with `due_at <= as_of`, in firing order.
    pub fn due_events(&self, as_of: SimTime) -> Vec<ScheduledEvent> {
        self.iter_due(as_of).cloned().collect()
    }

    /// The first event in firing order if it is due at `as_of`.
    pub fn next_due(&self, as_of: SimTime) -> Option<&ScheduledEvent> {
        self.iter_due(as_of).next()
    }

    /// Number of events with `due_at <= as_of`.
    pub fn count_due(&self, as_of: SimTime) -> usize {
        self.iter_due(as_of).count()
    }

    /// Due time of the earliest pending event.
    pub fn next_due_time(&self) -> Option<SimTime> {
        self.due_index.keys().next().map(|(due_at, _, _)| *due_at)
    }

    /// All pending events, in firing order.
    pub fn list(&self) -> Vec<ScheduledEvent> {
        self.due_index
            .values()
            .filter_map(|id| self.events.get(id))
            .cloned()
            .collect()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether no events are pending.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    fn iter_due(&self, as_of: SimTime) -> impl Iterator<Item = &ScheduledEvent> {
        self.due_index
            .iter()
            .take_while(move |((due_at, _, _), _)| *due_at <= as_of)
            .filter_map(|(_, id)| self.events.get(id))
    }
}

const fn key_of(event: &ScheduledEvent) -> DueKey {
    (event.due_at, event.sequence, event.id)
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

    fn once(event_type: EventType, due: i64) -> ScheduledEvent {
        ScheduledEvent::one_shot(event_type, day(due), serde_json::Value::Null)
    }

    #[test]
    fn due_events_respects_as_of() {
        let mut store = EventStore::new();
        store.add(once(EventType::Payroll, 5)).unwrap();
        store.add(once(EventType::SkillDecay, 10)).unwrap();

        assert!(store.due_events(day(4)).is_empty());
        assert_eq!(store.due_events(day(5)).len(), 1);
        assert_eq!(store.due_events(day(10)).len(), 2);
        assert_eq!(store.count_due(day(7)), 1);
    }

    #[test]
    fn equal_due_times_keep_insertion_order() {
        let mut store = EventStore::new();
        let ids: Vec<EventId> = (0..20)
            .map(|_| store.add(once(EventType::Payroll, 3)).unwrap())
            .collect();
        let due: Vec<EventId> = store.due_events(day(3)).iter().map(|e| e.id).collect();
        assert_eq!(due, ids);
    }

    #[test]
    fn earlier_due_time_fires_first() {
        let mut store = EventStore::new();
        let late = store.add(once(EventType::Payroll, 9)).unwrap();
        let early = store.add(once(EventType::Payroll, 2)).unwrap();
        let due: Vec<EventId> = store.due_events(day(10)).iter().map(|e| e.id).collect();
        assert_eq!(due, vec![early, late]);
        assert_eq!(store.next_due_time(), Some(day(2)));
    }

    #[test]
    fn rejects_non_positive_interval() {
        let mut store = EventStore::new();
        let zero = ScheduledEvent::recurring(
            EventType::Payroll,
            day(1),
            TimeDelta::zero(),
            serde_json::Value::Null,
        );
        let negative = ScheduledEvent::recurring(
            EventType::Payroll,
            day(1),
            TimeDelta::days(-1),
            serde_json::Value::Null,
        );
        assert!(matches!(
            store.add(zero),
            Err(ScheduleError::NonPositiveInterval { interval_ms: 0 })
        ));
        assert!(store.add(negative).is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn rejects_duplicate_id() {
        let mut store = EventStore::new();
        let event = once(EventType::Payroll, 1);
        store.add(event.clone()).unwrap();
        assert!(matches!(
            store.add(event),
            Err(ScheduleError::DuplicateId { .. })
        ));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let mut store = EventStore::new();
        let id = store.add(once(EventType::Payroll, 1)).unwrap();
        assert!(store.remove(id));
        assert!(!store.remove(id));
        assert!(store.due_events(day(100)).is_empty());
    }

    #[test]
    fn reschedule_moves_event_and_keeps_sequence() {
        let mut store = EventStore::new();
        let first = store.add(once(EventType::Payroll, 1)).unwrap();
        let second = store.add(once(EventType::Payroll, 4)).unwrap();
        store.reschedule(first, day(4)).unwrap();

        assert!(store.due_events(day(3)).is_empty());
        let due: Vec<EventId> = store.due_events(day(4)).iter().map(|e| e.id).collect();
        assert_eq!(due, vec![first, second]);
        assert_eq!(store.get(first).unwrap().due_at, day(4));
    }

    #[test]
    fn reschedule_unknown_is_an_error() {
        let mut store = EventStore::new();
        let result = store.reschedule(EventId::new(), day(1));
        assert!(matches!(result, Err(ScheduleError::UnknownEvent { .. })));
    }

    #[test]
    fn list_returns_everything_in_order() {
        let mut store = EventStore::new();
        store.add(once(EventType::Payroll, 30)).unwrap();
        store.add(once(EventType::SkillDecay, 10)).unwrap();
        let listed: Vec<SimTime> = store.list().iter().map(|e| e.due_at).collect();
        assert_eq!(listed, vec![day(10), day(30)]);
    }
}
