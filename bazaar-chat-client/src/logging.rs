use shared::config::{LogFormat, LoggingConfig};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{self, MakeWriter},
};

/// Install the global subscriber. Logs go to stderr so command output on
/// stdout stays clean.
///
/// Returns the configured level. Installing twice is a no-op.
pub fn initialize_tracing(config: &LoggingConfig) -> String {
    let subscriber = build_subscriber(config, std::io::stderr);
    let _ = tracing::subscriber::set_global_default(subscriber);
    config.level.clone()
}

/// Subscriber honouring `RUST_LOG` first, then the configured level.
pub fn build_subscriber<W>(config: &LoggingConfig, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let builder = fmt::fmt()
        .with_env_filter(build_env_filter(config))
        .with_target(false)
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(writer);

    if matches!(config.format, LogFormat::Json) {
        Box::new(builder.json().with_ansi(false).finish())
    } else {
        Box::new(builder.with_ansi(false).finish())
    }
}

fn build_env_filter(config: &LoggingConfig) -> EnvFilter {
    let default_level = config
        .level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);

    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::builder()
            .with_default_directive(default_level.into())
            .from_env_lossy()
    })
}
