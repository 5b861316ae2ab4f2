use tracing_subscriber::EnvFilter;

/// Install a fmt subscriber for hosts that have none.
///
/// `RUST_LOG` wins over `level`. Returns `false` if a global subscriber was
/// already set.
pub fn init(level: &str) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
