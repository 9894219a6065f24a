//! Scheduled and fired event records.
//!
//! A [`ScheduledEvent`] is a pending trigger owned by the event store. When
//! the engine selects it as due, it produces a [`FiredEvent`] that is
//! delivered to every listener registered for the event's [`EventType`].

use core::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;

/// A point in simulated ("game") time.
pub type SimTime = DateTime<Utc>;

/// Domain trigger names understood by the engine.
///
/// The well-known variants cover the jobs installed at bootstrap. Any
/// other name is carried as [`EventType::Custom`], so collaborators can
/// schedule new trigger kinds without a code change here. Serialized as
/// a plain string (e.g. `"payroll"`, `"trainingComplete"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventType {
    /// Periodic payroll run.
    Payroll,
    /// Sweep of contracts whose deadline has passed.
    ContractDeadline,
    /// Periodic skill-decay pass.
    SkillDecay,
    /// A single entity's training has completed.
    TrainingComplete,
    /// Any other trigger name.
    Custom(String),
}

impl EventType {
    /// Return the wire name of this event type.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Payroll => "payroll",
            Self::ContractDeadline => "contractDeadline",
            Self::SkillDecay => "skillDecay",
            Self::TrainingComplete => "trainingComplete",
            Self::Custom(name) => name.as_str(),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for EventType {
    fn from(name: &str) -> Self {
        match name {
            "payroll" => Self::Payroll,
            "contractDeadline" => Self::ContractDeadline,
            "skillDecay" => Self::SkillDecay,
            "trainingComplete" => Self::TrainingComplete,
            other => Self::Custom(other.to_owned()),
        }
    }
}

impl From<String> for EventType {
    fn from(name: String) -> Self {
        match Self::from(name.as_str()) {
            Self::Custom(_) => Self::Custom(name),
            known => known,
        }
    }
}

impl From<EventType> for String {
    fn from(event_type: EventType) -> Self {
        match event_type {
            EventType::Custom(name) => name,
            known => known.as_str().to_owned(),
        }
    }
}

/// Repetition rule for a recurring event.
///
/// The interval is a simulated-time duration. The store rejects
/// non-positive intervals, so a `Recurrence` held by a live event always
/// moves the event strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recurrence {
    /// Simulated time between consecutive occurrences.
    #[serde(rename = "interval_ms", with = "delta_millis")]
    pub interval: TimeDelta,
}

impl Recurrence {
    /// Create a recurrence with the given interval.
    pub const fn every(interval: TimeDelta) -> Self {
        Self { interval }
    }
}

/// A pending trigger in the event store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// Unique identifier across all live events.
    pub id: EventId,
    /// Which listeners receive this event when it fires.
    pub event_type: EventType,
    /// Simulated time at which the (next) occurrence is due.
    pub due_at: SimTime,
    /// Opaque domain data handed to listeners (e.g. `{"entityId": ...}`).
    pub payload: serde_json::Value,
    /// Present iff the event reschedules itself after firing.
    pub recurrence: Option<Recurrence>,
    /// Insertion sequence assigned by the store; breaks ties between
    /// events with equal `due_at`.
    pub sequence: u64,
}

impl ScheduledEvent {
    /// Build a one-shot event with a fresh ID.
    pub fn one_shot(event_type: EventType, due_at: SimTime, payload: serde_json::Value) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            due_at,
            payload,
            recurrence: None,
            sequence: 0,
        }
    }

    /// Build a recurring event with a fresh ID whose first occurrence is
    /// at `first_due_at`.
    pub fn recurring(
        event_type: EventType,
        first_due_at: SimTime,
        interval: TimeDelta,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            due_at: first_due_at,
            payload,
            recurrence: Some(Recurrence::every(interval)),
            sequence: 0,
        }
    }

    /// Whether this event reschedules itself after firing.
    pub const fn is_recurring(&self) -> bool {
        self.recurrence.is_some()
    }

    /// Due time of the occurrence after the current one, measured from
    /// the current `due_at` (not from "now").
    ///
    /// Returns `None` for one-shot events and when the addition leaves
    /// the representable time range.
    pub fn next_occurrence(&self) -> Option<SimTime> {
        self.recurrence
            .and_then(|rule| self.due_at.checked_add_signed(rule.interval))
    }

    /// Produce the record delivered to listeners for the current occurrence.
    pub fn fire(&self, fired_at: SimTime) -> FiredEvent {
        FiredEvent {
            event_id: self.id,
            event_type: self.event_type.clone(),
            payload: self.payload.clone(),
            scheduled_for: self.due_at,
            fired_at,
            recurring: self.is_recurring(),
        }
    }
}

/// One occurrence of a scheduled event, as seen by listeners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiredEvent {
    /// ID of the scheduled event that produced this occurrence.
    pub event_id: EventId,
    /// The event type that selected the listeners.
    pub event_type: EventType,
    /// Domain payload copied from the scheduled event.
    pub payload: serde_json::Value,
    /// The `due_at` of this occurrence.
    pub scheduled_for: SimTime,
    /// Simulated time of the tick that fired this occurrence.
    pub fired_at: SimTime,
    /// Whether the source event is recurring.
    pub recurring: bool,
}

/// Serde adapter encoding a [`TimeDelta`] as whole milliseconds.
mod delta_millis {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(delta: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(delta.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        let millis = i64::deserialize(deserializer)?;
        TimeDelta::try_milliseconds(millis)
            .ok_or_else(|| serde::de::Error::custom("interval out of range"))
    }
}
