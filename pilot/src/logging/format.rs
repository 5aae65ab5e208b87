use crate::config::LogFormat;
use std::fmt;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{
    fmt::{
        format::Writer,
        time::{FormatTime, SystemTime},
        FmtContext, FormatEvent, FormatFields,
    },
    registry::LookupSpan,
};

/// Line layout shared by the console and file sinks, timestamps are always UTC
#[derive(Debug, Clone, Copy)]
pub struct PilotFormat {
    format: LogFormat,
    verbose: bool,
}

impl PilotFormat {
    pub fn new(format: LogFormat, verbose: bool) -> Self {
        Self { format, verbose }
    }
}

impl<S, N> FormatEvent<S, N> for PilotFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let metadata = event.metadata();

        match self.format {
            LogFormat::Pipe => {
                SystemTime.format_time(&mut writer)?;
                write!(writer, " | {:<8}", metadata.level().as_str())?;
                if self.verbose {
                    write!(writer, " | {:<32}", metadata.target())?;
                }
                write!(writer, " | ")?;
                ctx.field_format().format_fields(writer.by_ref(), event)?;
            }
            LogFormat::KeyValue => {
                write!(writer, "ts=")?;
                SystemTime.format_time(&mut writer)?;
                write!(
                    writer,
                    " level={:<8} event={:<32}",
                    metadata.level().as_str(),
                    metadata.target()
                )?;

                let mut fields = KeyValueFields::default();
                event.record(&mut fields);
                write!(writer, " msg=\"{}\"", escape(&fields.message))?;
                for (name, value) in fields.fields {
                    write!(writer, " {name}=")?;
                    write_value(&mut writer, &value)?;
                }
            }
        }

        writeln!(writer)
    }
}

/// Message and structured fields of one event, kept apart for the key-value layout
#[derive(Default)]
struct KeyValueFields {
    message: String,
    fields: Vec<(&'static str, String)>,
}

impl Visit for KeyValueFields {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_owned();
        } else {
            self.fields.push((field.name(), value.to_owned()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let text = format!("{value:?}");

        if field.name() == "message" {
            self.message = text;
        } else {
            self.fields.push((field.name(), text));
        }
    }
}

fn escape(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// bare when the value is a single token, quoted otherwise
fn write_value(writer: &mut Writer<'_>, value: &str) -> fmt::Result {
    let bare = !value.is_empty()
        && !value
            .chars()
            .any(|c| c.is_whitespace() || c == '"' || c == '=' || c == '\\');

    if bare {
        write!(writer, "{value}")
    } else {
        write!(writer, "\"{}\"", escape(value))
    }
}
