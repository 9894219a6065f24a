//! Error types for the Tempo engine binary.
//!
//! [`ServerError`] is the top-level error type that wraps all possible
//! failure modes during startup and shutdown.

/// Top-level error for the Tempo engine binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: tempo_core::ConfigError,
    },

    /// Engine construction failed.
    #[error("engine error: {source}")]
    Engine {
        /// The underlying engine error.
        #[from]
        source: tempo_core::EngineError,
    },

    /// Listener or job wiring failed.
    #[error("bootstrap error: {source}")]
    Bootstrap {
        /// The underlying bootstrap error.
        #[from]
        source: tempo_core::BootstrapError,
    },

    /// The collaborator HTTP client could not be built.
    #[error("HTTP client error: {source}")]
    Http {
        /// The underlying client error.
        #[from]
        source: reqwest::Error,
    },

    /// The admin API server failed to start.
    #[error("admin server error: {source}")]
    Admin {
        /// The underlying server error.
        #[from]
        source: tempo_admin::ServerError,
    },

    /// Waiting for the shutdown signal failed.
    #[error("signal error: {source}")]
    Signal {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },
}
