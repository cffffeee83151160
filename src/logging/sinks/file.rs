use tracing_appender::{non_blocking, non_blocking::WorkerGuard, rolling::daily};
use tracing_subscriber::{fmt, registry::LookupSpan, Layer};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Файловый слой с ежедневной ротацией.
///
/// Запись идёт через фоновый поток; guard должен жить, пока нужны логи.
pub fn layer_with_config<S>(config: &LoggingConfig) -> (Box<dyn Layer<S> + Send + Sync>, WorkerGuard)
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let appender = daily(&config.log_dir, &config.file.filename);
    let (writer, guard) = non_blocking(appender);

    let layer: Box<dyn Layer<S> + Send + Sync> = match config.format {
        LogFormat::Json => Box::new(fmt::layer().json().with_ansi(false).with_writer(writer)),
        LogFormat::Pretty | LogFormat::Compact => {
            Box::new(fmt::layer().with_ansi(false).with_writer(writer))
        }
    };

    (layer, guard)
}
