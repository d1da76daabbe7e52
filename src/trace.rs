use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

/// Installs the global subscriber. `levels` uses the `EnvFilter` syntax, e.g.
/// `info` or `gatebench=debug,gate=trace`.
///
/// Calling it more than once is harmless, only the first call wins.
pub fn init(color: bool, levels: &str) {
    let filter = EnvFilter::try_new(levels).unwrap_or_else(|err| {
        #[allow(clippy::print_stderr)]
        {
            eprintln!("invalid log level {levels:?}, fallback to \"info\", {err}");
        }

        EnvFilter::new("info")
    });

    let _ = tracing_subscriber::fmt::SubscriberBuilder::default()
        .with_ansi(color)
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish()
        .try_init();
}
