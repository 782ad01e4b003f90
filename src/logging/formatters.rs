use std::str::FromStr;

use yansi::{Condition, Paint};

use super::{level::Severity, record::Record, LogFormatter};

const ASCTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S,%3f";
const HEAVY_DATE_FORMAT: &str = "%d%H:%M:%S";

/// How much call-site detail the file formatters print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    Void,
    #[default]
    Simple,
    Light,
    Medium,
    Heavy,
}

impl FromStr for Style {
    type Err = std::convert::Infallible;

    /// Unknown names fall back to `Heavy`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "VOID" => Style::Void,
            "SIMPLE" => Style::Simple,
            "LIGHT" => Style::Light,
            "MEDIUM" => Style::Medium,
            _ => Style::Heavy,
        })
    }
}

impl core::fmt::Display for Style {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Style::Void => "VOID",
            Style::Simple => "SIMPLE",
            Style::Light => "LIGHT",
            Style::Medium => "MEDIUM",
            Style::Heavy => "HEAVY",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsoleStyle {
    /// Message only.
    #[default]
    Minimal,
    /// Message prefixed with line and file.
    Located,
}

impl FromStr for ConsoleStyle {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "MINIMAL" => ConsoleStyle::Minimal,
            _ => ConsoleStyle::Located,
        })
    }
}

fn asctime(record: &Record) -> String {
    record.time.format(ASCTIME_FORMAT).to_string()
}

fn render_verbose(record: &Record) -> String {
    format!(
        "{} {} {} | {}(..) | line {} @ {} -- {}",
        asctime(record),
        record.level,
        record.logger_name(),
        record.function(),
        record.line_number(),
        record.file_name(),
        record.display_message(),
    )
}

fn render_style(style: Style, record: &Record) -> String {
    match style {
        Style::Void => record.display_message(),
        Style::Simple => format!(
            "{} {} {} -- {}",
            asctime(record),
            record.level,
            record.logger_name(),
            record.display_message(),
        ),
        Style::Light => format!(
            "{} {} | line {} @ {} -- {}",
            asctime(record),
            record.level,
            record.line_number(),
            record.file_name(),
            record.display_message(),
        ),
        Style::Medium => render_verbose(record),
        Style::Heavy => {
            let level = record.level.name();
            format!(
                "{}.{:03} {:.1}|{:>4}.{:<10.10} -- {}",
                record.time.format(HEAVY_DATE_FORMAT),
                record.time.timestamp_subsec_millis(),
                level,
                record.line_number(),
                record.file_name(),
                record.display_message(),
            )
        }
    }
}

/// Uses the style's template below ERROR and the verbose template at ERROR and above.
#[derive(Debug, Clone, Copy)]
pub struct LevelBasedFormatter {
    style: Style,
}

impl LevelBasedFormatter {
    pub fn new(style: Style) -> Self {
        Self { style }
    }
}

impl LogFormatter for LevelBasedFormatter {
    fn format(&self, record: &Record) -> String {
        if record.level >= Severity::ERROR {
            render_verbose(record)
        } else {
            render_style(self.style, record)
        }
    }
}

pub struct ConsoleFormatter {
    style: ConsoleStyle,
    use_ansi: bool,
}

impl ConsoleFormatter {
    pub fn new(style: ConsoleStyle, use_ansi: bool) -> Self {
        Self { style, use_ansi }
    }

    fn format_msg(&self, record: &Record) -> String {
        let msg = record.display_message();
        if self.use_ansi && record.level.is_error() {
            msg.red().whenever(Condition::STDOUT_IS_TTY).to_string()
        } else {
            msg
        }
    }
}

impl LogFormatter for ConsoleFormatter {
    fn format(&self, record: &Record) -> String {
        match self.style {
            ConsoleStyle::Minimal => self.format_msg(record),
            ConsoleStyle::Located => format!(
                "line {} in @ {} -- {}",
                record.line_number(),
                record.file_name(),
                self.format_msg(record),
            ),
        }
    }
}

/// Installed on file sinks once an uncaught error is being reported.
pub struct ExceptionFormatter;

impl LogFormatter for ExceptionFormatter {
    fn format(&self, record: &Record) -> String {
        format!("{} STDERR EXCEPTION -- {}", asctime(record), record.display_message())
    }
}
