use tracing_subscriber::EnvFilter;

/// Initializes stderr diagnostics. `RUST_LOG` wins when set; otherwise the
/// level defaults to WARN, raised to DEBUG by `--verbose`. Operator-facing
/// progress goes through the run log, not through tracing.
pub fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
