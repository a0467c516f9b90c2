//! Console log format for the poller binary.
//!
//! `2026-02-08T06:50:24.120Z  INFO vatsim_feed::poller: poll: VATSIM poller started`
//!
//! Timestamps are UTC so lines line up with the network's own `last_updated`
//! stamps. Colour is optional so the same format can be piped into files.

use chrono::{SecondsFormat, Utc};
use std::fmt;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::fmt::FmtContext;
use tracing_subscriber::fmt::format::{self, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

pub struct FeedLogFormat {
    ansi: bool,
}

impl FeedLogFormat {
    pub fn new(ansi: bool) -> Self {
        Self { ansi }
    }
}

fn level_colour(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "\x1b[31m",
        Level::WARN => "\x1b[33m",
        Level::INFO => "\x1b[32m",
        Level::DEBUG => "\x1b[34m",
        Level::TRACE => "\x1b[35m",
    }
}

impl<S, N> FormatEvent<S, N> for FeedLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();
        let level = metadata.level();

        write!(
            writer,
            "{} ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
        )?;
        if self.ansi {
            write!(writer, "{}{:>5}\x1b[0m ", level_colour(level), level)?;
        } else {
            write!(writer, "{:>5} ", level)?;
        }
        write!(writer, "{}: ", metadata.target())?;

        if let Some(scope) = ctx.event_scope() {
            let names: Vec<&str> = scope.from_root().map(|span| span.name()).collect();
            if !names.is_empty() {
                write!(writer, "{}: ", names.join(":"))?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}
