use std::io::{self, Stdout};

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::Layer as LayerTrait,
    registry::LookupSpan,
};

use crate::logging::config::{LogFormat, LoggingConfig};

/// Консольный слой в заданном формате.
///
/// Возвращается boxed trait-объект, чтобы стереть конкретный тип формата.
pub fn build_formatter_from_config<S>(
    config: &LoggingConfig,
    format: LogFormat,
    with_ansi: bool,
) -> Box<dyn LayerTrait<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
{
    let writer: fn() -> Stdout = io::stdout;
    let console = &config.console;

    match format {
        LogFormat::Json => {
            let layer = fmt::layer()
                .event_format(fmt::format().json().with_current_span(true))
                .with_writer(writer)
                .with_ansi(false)
                .with_target(console.with_target)
                .with_thread_ids(console.with_thread_ids)
                .with_line_number(console.with_line_numbers);
            Box::new(layer)
        }
        LogFormat::Pretty => {
            let layer = fmt::layer()
                .event_format(fmt::format().pretty())
                .with_span_events(FmtSpan::CLOSE)
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(console.with_target)
                .with_thread_ids(console.with_thread_ids)
                .with_line_number(console.with_line_numbers);
            Box::new(layer)
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .event_format(fmt::format().compact())
                .with_writer(writer)
                .with_ansi(with_ansi)
                .with_target(console.with_target)
                .with_thread_ids(console.with_thread_ids)
                .with_line_number(console.with_line_numbers);
            Box::new(layer)
        }
    }
}
