//! Shared state for admin handlers.

use tempo_core::Engine;

/// State shared by every admin handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The engine under control.
    pub engine: Engine,
}

impl AppState {
    /// Wrap an engine handle.
    pub const fn new(engine: Engine) -> Self {
        Self { engine }
    }
}
