use std::time::Instant;

/// Dependency targets that are too chatty at the default level.
const NOISY_TARGETS: &[(&str, &str)] = &[
    ("sqlx::query", "warn"),
    ("sqlx::pool", "warn"),
    ("actix_server", "warn"),
];

/// Build the env_logger filter string for the given verbosity.
pub fn default_filter(verbose: bool) -> String {
    let base = if verbose { "debug" } else { "info" };
    let mut directives = vec![base.to_string()];
    for (target, level) in NOISY_TARGETS {
        directives.push(format!("{target}={level}"));
    }
    directives.join(",")
}

/// Install the process logger. `RUST_LOG` takes precedence over `verbose`.
/// Calling this more than once is harmless.
pub fn init(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or(default_filter(verbose));
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .try_init();
}

/// A timer for measuring durations in diagnostics.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn start() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }
}
