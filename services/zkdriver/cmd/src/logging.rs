use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

/// ANSI color codes for console output
const COLOR_RESET: &str = "\x1b[0m";
const COLOR_CYAN: &str = "\x1b[36m";
const COLOR_GREEN: &str = "\x1b[32m";
const COLOR_BRIGHT_YELLOW: &str = "\x1b[93m";
const COLOR_BRIGHT_RED: &str = "\x1b[91m";
const COLOR_BRIGHT_GRAY: &str = "\x1b[90m";

/// Column widths for aligned output
const SERVICE_NAME_WIDTH: usize = 20;
const LOG_LEVEL_WIDTH: usize = 7;

/// Line formatter: `[timestamp] [service-component] [level] message`
pub struct ZkDriverLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log with a component tag
#[macro_export]
macro_rules! component_info {
    ($component:expr, $($arg:tt)*) => {
        tracing::info!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_warn {
    ($component:expr, $($arg:tt)*) => {
        tracing::warn!(component = $component, $($arg)*)
    };
}

#[macro_export]
macro_rules! component_error {
    ($component:expr, $($arg:tt)*) => {
        tracing::error!(component = $component, $($arg)*)
    };
}

impl ZkDriverLogFormatter {
    pub fn new(service_name: String) -> Self {
        Self {
            service_name,
            color_enabled: is_terminal(),
        }
    }

    /// Component tag if present, else the crate the event came from
    fn format_service_name(&self, component: Option<&str>, target: &str) -> String {
        let name = match component {
            Some(comp) => format!("{}-{}", self.service_name, comp),
            None => {
                let krate = target.split("::").next().unwrap_or(target);
                match krate.strip_prefix("zkdriver_") {
                    Some(suffix) => format!("{}-{}", self.service_name, suffix),
                    None => self.service_name.clone(),
                }
            }
        };

        if name.chars().count() > SERVICE_NAME_WIDTH {
            let truncated: String = name.chars().take(SERVICE_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = SERVICE_NAME_WIDTH)
        }
    }

    fn format_log_level(&self, level: &tracing::Level) -> String {
        let level_str = match *level {
            tracing::Level::ERROR => "✗ ERROR",
            tracing::Level::WARN => "⚠ WARN",
            tracing::Level::INFO => "ℹ INFO",
            tracing::Level::DEBUG => "◦ DEBUG",
            tracing::Level::TRACE => "◦ TRACE",
        };

        format!("{:<width$}", level_str, width = LOG_LEVEL_WIDTH + 2)
    }

    fn color_for_level(&self, level: &tracing::Level) -> &'static str {
        if !self.color_enabled {
            return "";
        }

        match *level {
            tracing::Level::ERROR => COLOR_BRIGHT_RED,
            tracing::Level::WARN => COLOR_BRIGHT_YELLOW,
            tracing::Level::INFO => COLOR_GREEN,
            tracing::Level::DEBUG | tracing::Level::TRACE => COLOR_BRIGHT_GRAY,
        }
    }
}

impl<S, N> FormatEvent<S, N> for ZkDriverLogFormatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        _ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
        let metadata = event.metadata();
        let level = metadata.level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let service = self.format_service_name(visitor.component.as_deref(), metadata.target());
        let formatted_level = self.format_log_level(level);

        let color = self.color_for_level(level);
        let (reset, cyan) = if self.color_enabled {
            (COLOR_RESET, COLOR_CYAN)
        } else {
            ("", "")
        };

        write!(
            writer,
            "{}[{}] [{}] [{}{}{}] ",
            cyan, timestamp, service, color, formatted_level, reset
        )?;
        writeln!(writer, "{}{}", visitor.message, reset)
    }
}

/// Collects the message and component fields of an event
#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

fn unquote(value: String) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value
    }
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        match field.name() {
            "message" => self.message = unquote(format!("{:?}", value)),
            "component" => self.component = Some(unquote(format!("{:?}", value))),
            _ => {}
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        match field.name() {
            "message" => self.message = value.to_string(),
            "component" => self.component = Some(value.to_string()),
            _ => {}
        }
    }
}

/// Color only when stderr is a terminal that is not `dumb`
fn is_terminal() -> bool {
    if std::env::var("TERM").unwrap_or_default() == "dumb" {
        return false;
    }
    std::io::stderr().is_terminal()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter() -> ZkDriverLogFormatter {
        ZkDriverLogFormatter {
            service_name: "zkdriver".to_string(),
            color_enabled: false,
        }
    }

    #[test]
    fn test_service_name_from_target() {
        let f = formatter();
        assert_eq!(
            f.format_service_name(None, "zkdriver_pool::pool").trim_end(),
            "zkdriver-pool"
        );
        assert_eq!(
            f.format_service_name(None, "redb_zkdriver").trim_end(),
            "zkdriver"
        );
        assert_eq!(
            f.format_service_name(Some("cli"), "anything").trim_end(),
            "zkdriver-cli"
        );
    }

    #[test]
    fn test_service_name_width() {
        let f = formatter();
        assert_eq!(
            f.format_service_name(None, "zkdriver_pool").chars().count(),
            SERVICE_NAME_WIDTH
        );
        let long = f.format_service_name(Some("a-very-long-component"), "x");
        assert_eq!(long.chars().count(), SERVICE_NAME_WIDTH);
        assert!(long.ends_with('…'));
    }

    #[test]
    fn test_unquote() {
        assert_eq!(unquote("\"cli\"".to_string()), "cli");
        assert_eq!(unquote("\"".to_string()), "\"");
        assert_eq!(unquote("plain".to_string()), "plain");
    }
}
