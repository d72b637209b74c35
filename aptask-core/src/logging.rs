use tracing_subscriber::EnvFilter;

/// Normalizes a `loglevel` config value into a `tracing` filter directive.
/// Unrecognized values fall back to `WARNING` with a single logged warning.
fn normalize(loglevel: &str) -> &'static str {
    match loglevel.to_ascii_uppercase().as_str() {
        "TRACE" => "trace",
        "DEBUG" => "debug",
        "INFO" => "info",
        "WARNING" | "WARN" => "warn",
        "ERROR" => "error",
        other => {
            eprintln!(
                "[logging] unrecognized loglevel {:?}, falling back to WARNING",
                other
            );
            "warn"
        }
    }
}

/// Initializes the global `tracing` subscriber once, at process start. Both
/// `aptaskd` and `aptask-worker` call this before doing anything else.
pub fn init(loglevel: &str) {
    let filter = EnvFilter::try_new(normalize(loglevel)).unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        // a subscriber was already installed (e.g. in tests); not fatal.
        eprintln!("[logging] global subscriber already set");
    }
}
