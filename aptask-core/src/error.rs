use std::fmt;

/// Top-level error alias for fallible internal operations (binding a socket,
/// spawning a worker, loading the config file). Wire-facing errors are never
/// represented this way — see `crate::manager`, which always produces a JSON
/// response, never a `Report` (the error type, not the one in `report.rs`).
pub type DaemonResult<T> = color_eyre::Result<T>;

/// A small set of named failures raised at configuration-validation time,
/// distinct from the generic `color_eyre::Report` used everywhere else: the
/// daemon's exit code depends on which of these was hit.
#[derive(Debug)]
pub enum DaemonError {
    Config(String),
    Bind(String),
}

impl fmt::Display for DaemonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaemonError::Config(msg) => write!(f, "configuration error: {}", msg),
            DaemonError::Bind(msg) => write!(f, "bind error: {}", msg),
        }
    }
}

impl std::error::Error for DaemonError {}
