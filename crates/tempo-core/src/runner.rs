//! Real-time tick driver.
//!
//! [`run_timer`] is spawned by [`Engine::start`] when the engine is
//! configured with [`DriverMode::Timer`]. It sleeps for the current tick
//! interval, runs one tick, and repeats until told to shut down or the
//! engine stops. The interval is re-read before every sleep, so speed
//! changes apply from the next tick.
//!
//! [`Engine::start`]: crate::engine::Engine::start
//! [`DriverMode::Timer`]: crate::config::DriverMode::Timer

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::engine::{Engine, EngineError};

/// Why the timer loop exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerExit {
    Shutdown,
    EngineStopped,
}

/// Drive `engine` in real time until `shutdown` flips to `true` (or its
/// sender is dropped) or the engine reports it is stopped.
pub(crate) async fn run_timer(engine: Engine, mut shutdown: watch::Receiver<bool>) {
    let mut total_ticks: u64 = 0;

    info!(
        tick_interval_ms = engine.tick_interval().as_millis(),
        "Tick timer starting"
    );

    let exit = loop {
        if *shutdown.borrow() {
            break TimerExit::Shutdown;
        }

        let interval = engine.tick_interval();
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break TimerExit::Shutdown;
                }
                continue;
            }
            () = tokio::time::sleep(interval) => {}
        }

        match engine.tick_once().await {
            Ok(report) => {
                total_ticks = total_ticks.saturating_add(1);
                debug!(tick = report.tick, fired = report.fired.len(), "Timer tick complete");
            }
            Err(EngineError::Stopped) => break TimerExit::EngineStopped,
            Err(err) => {
                // A failed tick leaves state untouched; try again next interval.
                error!(%err, "Timer tick failed");
            }
        }
    };

    info!(reason = ?exit, total_ticks, "Tick timer stopped");
}
