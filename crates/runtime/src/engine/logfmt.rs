//! Wire-format log lines
//!
//! Engine workers log in a fixed line format that downstream tailing depends
//! on:
//!
//! ```text
//! YYYY-MM-DD HH:mm:ss.SSS | LEVEL | target:line - body
//! ```
//!
//! The level column, the `nodes.summary_node` target of the summary nodes,
//! and the `Cleaned output:` bodies are all recognition anchors for the
//! forum tailer; changing this format breaks the pipeline.

use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Event formatter producing the engine wire format.
pub struct WireFormat;

fn level_str(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "TRACE",
        Level::DEBUG => "DEBUG",
        Level::INFO => "INFO",
        Level::WARN => "WARNING",
        Level::ERROR => "ERROR",
    }
}

impl<S, N> FormatEvent<S, N> for WireFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let meta = event.metadata();
        let now = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        write!(
            writer,
            "{} | {:<8} | {}:{} - ",
            now,
            level_str(meta.level()),
            meta.target(),
            meta.line().unwrap_or(0)
        )?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Install the wire-format subscriber writing to stdout.
///
/// The supervisor pumps the worker's stdout into `logs/{engine}.log`, so
/// stdout is the log file for a supervised worker.
pub fn init_engine_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .event_format(WireFormat)
        .with_env_filter(filter)
        .with_writer(std::io::stdout)
        .init();
}
