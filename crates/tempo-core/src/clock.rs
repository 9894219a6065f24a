//! Simulated clock for the Tempo engine.
//!
//! The clock is the single source of truth for simulated ("game") time.
//! Each tick advances it by `tick_interval * time_multiplier`, unless it is
//! paused. Administrative overrides ([`SimulatedClock::set_time`] and
//! [`SimulatedClock::fast_forward`]) move it discontinuously and are not
//! ticks.
//!
//! # Design Principles
//!
//! - All time arithmetic is checked; leaving chrono's representable range
//!   is an error, never a wrap.
//! - Resuming does not catch up: simulated time lost while paused is gone.
//! - The clock is plain data. Serialization of access is the engine's job.

use std::time::Duration;

use chrono::TimeDelta;
use tempo_types::SimTime;

use crate::config::ClockConfig;

/// Smallest real-time tick interval the clock accepts.
pub const MIN_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Errors that can occur during clock operations.
#[derive(Debug, thiserror::Error)]
pub enum ClockError {
    /// Simulated time would leave the representable range.
    #[error("simulated time overflow: cannot move past {current}")]
    TimeOverflow {
        /// Simulated time at the point of failure.
        current: SimTime,
    },

    /// Invalid clock configuration (e.g. a zero tick interval).
    #[error("invalid clock configuration: {reason}")]
    InvalidConfig {
        /// Explanation of what is wrong with the configuration.
        reason: String,
    },

    /// A fast-forward was requested with a negative duration.
    #[error("fast-forward requires a non-negative duration (got {millis}ms)")]
    NegativeJump {
        /// The rejected duration in milliseconds.
        millis: i64,
    },
}

/// Clock tracking simulated time and its relation to real time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulatedClock {
    /// Current simulated time.
    current_time: SimTime,

    /// Simulated milliseconds per real millisecond.
    time_multiplier: u32,

    /// Real-time duration between automatic ticks.
    tick_interval: Duration,

    /// Whether simulated time is frozen.
    paused: bool,

    /// Whether the engine owning this clock is accepting ticks.
    running: bool,
}

impl SimulatedClock {
    /// Create a clock from configuration. The clock starts stopped and
    /// unpaused.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the tick interval is below
    /// [`MIN_TICK_INTERVAL`] or the per-tick step does not fit in a
    /// [`TimeDelta`].
    pub fn new(config: &ClockConfig) -> Result<Self, ClockError> {
        Self::from_parts(
            config.start_time,
            Duration::from_millis(config.tick_interval_ms),
            config.time_multiplier,
        )
    }

    /// Create a clock from explicit parameters (useful for tests).
    ///
    /// # Errors
    ///
    /// Same as [`SimulatedClock::new`].
    pub fn from_parts(
        current_time: SimTime,
        tick_interval: Duration,
        time_multiplier: u32,
    ) -> Result<Self, ClockError> {
        validate_tick_interval(tick_interval)?;
        step_for(tick_interval, time_multiplier)?;
        Ok(Self {
            current_time,
            time_multiplier,
            tick_interval,
            paused: false,
            running: false,
        })
    }

    /// Advance simulated time by one tick's worth, unless paused.
    ///
    /// Returns `true` if time moved. Call at most once per tick.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::TimeOverflow`] if the new time is out of range.
    /// The clock is unchanged on error.
    pub fn advance(&mut self) -> Result<bool, ClockError> {
        if self.paused {
            return Ok(false);
        }
        let step = self.step()?;
        self.current_time = self
            .current_time
            .checked_add_signed(step)
            .ok_or(ClockError::TimeOverflow {
                current: self.current_time,
            })?;
        Ok(true)
    }

    /// Simulated time covered by one tick: `tick_interval * time_multiplier`.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the product overflows.
    pub fn step(&self) -> Result<TimeDelta, ClockError> {
        step_for(self.tick_interval, self.time_multiplier)
    }

    /// Return the current simulated time.
    pub const fn now(&self) -> SimTime {
        self.current_time
    }

    /// Replace the current time unconditionally. Returns the previous time.
    ///
    /// This is a discontinuity: it may make future events instantly due or
    /// push due events further away.
    pub const fn set_time(&mut self, new_time: SimTime) -> SimTime {
        let previous = self.current_time;
        self.current_time = new_time;
        previous
    }

    /// Jump forward by `delta`. Returns the new time.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::NegativeJump`] for a negative `delta` and
    /// [`ClockError::TimeOverflow`] if the target is out of range.
    pub fn fast_forward(&mut self, delta: TimeDelta) -> Result<SimTime, ClockError> {
        if delta < TimeDelta::zero() {
            return Err(ClockError::NegativeJump {
                millis: delta.num_milliseconds(),
            });
        }
        let target = self
            .current_time
            .checked_add_signed(delta)
            .ok_or(ClockError::TimeOverflow {
                current: self.current_time,
            })?;
        self.current_time = target;
        Ok(target)
    }

    /// Freeze simulated time.
    pub const fn pause(&mut self) {
        self.paused = true;
    }

    /// Unfreeze simulated time. Missed time is not caught up.
    pub const fn resume(&mut self) {
        self.paused = false;
    }

    /// Whether simulated time is frozen.
    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    /// Whether the owning engine is accepting ticks.
    pub const fn is_running(&self) -> bool {
        self.running
    }

    /// Set the running flag (engine start/stop).
    pub const fn set_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Return the simulated-to-real time ratio.
    pub const fn time_multiplier(&self) -> u32 {
        self.time_multiplier
    }

    /// Change the simulated-to-real time ratio. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the resulting step would
    /// overflow. The clock is unchanged on error.
    pub fn set_time_multiplier(&mut self, multiplier: u32) -> Result<u32, ClockError> {
        step_for(self.tick_interval, multiplier)?;
        let previous = self.time_multiplier;
        self.time_multiplier = multiplier;
        Ok(previous)
    }

    /// Return the real-time interval between automatic ticks.
    pub const fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Change the real-time tick interval. Returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns [`ClockError::InvalidConfig`] if the interval is below
    /// [`MIN_TICK_INTERVAL`] or the resulting step would overflow.
    pub fn set_tick_interval(&mut self, interval: Duration) -> Result<Duration, ClockError> {
        validate_tick_interval(interval)?;
        step_for(interval, self.time_multiplier)?;
        let previous = self.tick_interval;
        self.tick_interval = interval;
        Ok(previous)
    }
}

fn validate_tick_interval(interval: Duration) -> Result<(), ClockError> {
    if interval < MIN_TICK_INTERVAL {
        return Err(ClockError::InvalidConfig {
            reason: format!(
                "tick interval must be at least {}ms (got {}ms)",
                MIN_TICK_INTERVAL.as_millis(),
                interval.as_millis()
            ),
        });
    }
    Ok(())
}

fn step_for(tick_interval: Duration, multiplier: u32) -> Result<TimeDelta, ClockError> {
    let overflow = || ClockError::InvalidConfig {
        reason: format!(
            "tick step overflows: {}ms x {multiplier}",
            tick_interval.as_millis()
        ),
    };
    let real = TimeDelta::from_std(tick_interval).map_err(|_err| overflow())?;
    let factor = i32::try_from(multiplier).map_err(|_err| overflow())?;
    real.checked_mul(factor).ok_or_else(overflow)
}
