use std::fmt;
use std::io::IsTerminal;
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::{format::Writer, FmtContext, FormatEvent, FormatFields};
use tracing_subscriber::registry::LookupSpan;

const RESET: &str = "\x1b[0m";
const TIMESTAMP_COLOR: &str = "\x1b[36m";

const COMPONENT_NAME_WIDTH: usize = 16;
const LEVEL_WIDTH: usize = 5;

/// Line formatter: `[timestamp] [component] [level] message`
pub struct TaplinkLogFormatter {
    service_name: String,
    color_enabled: bool,
}

/// Log with a `component` field, rendered as `taplink-<component>`
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

impl TaplinkLogFormatter {
    pub fn new(service_name: String) -> Self {
        // logs go to stderr; stdout may be the agent pipe
        let color_enabled = std::io::stderr().is_terminal()
            && std::env::var("TERM").unwrap_or_default() != "dumb";
        Self {
            service_name,
            color_enabled,
        }
    }

    /// Format component name with fixed width
    fn format_component_name(&self, component: Option<&str>) -> String {
        let name = if let Some(comp) = component {
            format!("{}-{}", self.service_name, comp)
        } else {
            self.service_name.clone()
        };

        if name.chars().count() > COMPONENT_NAME_WIDTH {
            let truncated: String = name.chars().take(COMPONENT_NAME_WIDTH - 1).collect();
            format!("{}…", truncated)
        } else {
            format!("{:<width$}", name, width = COMPONENT_NAME_WIDTH)
        }
    }

    fn paint(&self, color: &'static str) -> &'static str {
        if self.color_enabled {
            color
        } else {
            ""
        }
    }
}

/// Label and ANSI color for a level
fn level_style(level: &tracing::Level) -> (&'static str, &'static str) {
    match *level {
        tracing::Level::ERROR => ("ERROR", "\x1b[91m"),
        tracing::Level::WARN => ("WARN", "\x1b[93m"),
        tracing::Level::INFO => ("INFO", "\x1b[32m"),
        tracing::Level::DEBUG => ("DEBUG", "\x1b[90m"),
        tracing::Level::TRACE => ("TRACE", "\x1b[90m"),
    }
}

impl<S, N> FormatEvent<S, N> for TaplinkLogFormatter
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
        let level = event.metadata().level();

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        // library events carry no component field; fall back to the crate
        let component = visitor
            .component
            .as_deref()
            .or_else(|| crate_component(event.metadata().target()));
        let formatted_component = self.format_component_name(component);
        let (label, color) = level_style(level);

        write!(
            writer,
            "{}[{}]{} [{}] [{}{:<width$}{}] ",
            self.paint(TIMESTAMP_COLOR),
            timestamp,
            self.paint(RESET),
            formatted_component,
            self.paint(color),
            label,
            self.paint(RESET),
            width = LEVEL_WIDTH
        )?;

        writeln!(writer, "{}", visitor.message)
    }
}

/// Map a target like `taplink_wire::frame` to `wire`
fn crate_component(target: &str) -> Option<&str> {
    target
        .split("::")
        .next()
        .and_then(|krate| krate.strip_prefix("taplink_"))
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    component: Option<String>,
}

impl tracing::field::Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn fmt::Debug) {
        let rendered = format!("{:?}", value);
        let unquoted = rendered
            .strip_prefix('"')
            .and_then(|s| s.strip_suffix('"'))
            .map(str::to_string)
            .unwrap_or(rendered);

        match field.name() {
            "message" => self.message = unquoted,
            "component" => self.component = Some(unquoted),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_component_from_target() {
        assert_eq!(crate_component("taplink_wire::frame"), Some("wire"));
        assert_eq!(crate_component("taplink_session"), Some("session"));
        assert_eq!(crate_component("tokio::io"), None);
    }

    #[test]
    fn test_level_labels_fit_column() {
        for level in [tracing::Level::ERROR, tracing::Level::TRACE, tracing::Level::WARN] {
            assert!(level_style(&level).0.len() <= LEVEL_WIDTH);
        }
    }

    #[test]
    fn test_component_name_width() {
        let formatter = TaplinkLogFormatter::new("taplink".to_string());
        assert_eq!(formatter.format_component_name(None).len(), COMPONENT_NAME_WIDTH);
        let long = formatter.format_component_name(Some("a-very-long-component"));
        assert_eq!(long.chars().count(), COMPONENT_NAME_WIDTH);
        assert!(long.ends_with('…'));
    }
}
