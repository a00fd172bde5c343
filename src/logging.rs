use tracing_subscriber::EnvFilter;

/// Target used by every event this crate emits.
pub const LOG_TARGET: &str = "sql_user_backend";

/// Context tag attached to every event so host logs can attribute them.
pub const BACKEND_ID: &str = "user_backend_sql_raw";

/// Log at the critical severity.
///
/// `tracing` has no level above ERROR, so critical events are ERROR events
/// carrying `critical = true`.
#[macro_export]
macro_rules! critical {
    ($($arg:tt)+) => {
        ::tracing::error!(
            target: $crate::logging::LOG_TARGET,
            backend = $crate::logging::BACKEND_ID,
            critical = true,
            $($arg)+
        )
    };
}

/// Install the global fmt subscriber.
///
/// `RUST_LOG` wins when set; otherwise the verbosity count picks the level
/// for this crate and everything else stays at WARN.
pub fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,{}={}", LOG_TARGET, level)));

    // A subscriber may already be installed by an embedding host.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
