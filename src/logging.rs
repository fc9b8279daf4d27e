use tracing_subscriber::EnvFilter;

/// Install the stderr log subscriber. `STATASH_LOG` wins over `RUST_LOG`;
/// `--trace` turns on debug output for the interpreter.
pub(crate) fn init(default_level: &str, trace: bool) {
    let filter = if trace {
        EnvFilter::new("statash=debug")
    } else {
        env_filter("STATASH_LOG")
            .or_else(|| env_filter("RUST_LOG"))
            .unwrap_or_else(|| EnvFilter::new(default_level))
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn env_filter(var: &str) -> Option<EnvFilter> {
    let directives = std::env::var(var).ok()?;
    EnvFilter::try_new(directives).ok()
}
