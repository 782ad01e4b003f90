use std::{fmt::Display, path::PathBuf, str::FromStr};

use chrono::NaiveDate;
use eyre::{eyre, Context};
use serde_json::Value;

use crate::{
    logging::{ConsoleStyle, FileMode, Style},
    utils::expand_tilde,
};

pub const DEFAULT_LOG_DIR: &str = "~/logs";
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Which log file the main file sink writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileTarget {
    /// `{prefix}{YYMMDD}_{pid}.log`
    #[default]
    Process,
    /// `{prefix}{YYMMDD}.log`, shared by every process of the day.
    Same,
    None,
}

impl FromStr for FileTarget {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_uppercase().as_str() {
            "SAME" | "DAILY" => FileTarget::Same,
            "NONE" => FileTarget::None,
            _ => FileTarget::Process,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileHandlerKind {
    #[default]
    Plain,
    Rotating,
    Timed,
}

impl FromStr for FileHandlerKind {
    type Err = eyre::Report;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FILE" | "FILEHANDLER" | "PLAIN" => Ok(FileHandlerKind::Plain),
            "ROTATING" | "ROTATINGFILEHANDLER" => Ok(FileHandlerKind::Rotating),
            "TIMED" | "TIMEDROTATINGFILEHANDLER" => Ok(FileHandlerKind::Timed),
            other => Err(eyre!("Unknown FILE_HANDLER_CLASS {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingConfig {
    pub style: Style,
    pub console_style: ConsoleStyle,
    pub file: FileTarget,
    pub file_name: Option<String>,
    pub path: String,
    pub file_handler: FileHandlerKind,
    pub max_file_size: u64,
    pub file_mode: FileMode,
    pub errors_file: bool,
    pub print_to_console: bool,
    pub stderr_to_console: bool,
    pub root_to_console: bool,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            style: Style::Simple,
            console_style: ConsoleStyle::Minimal,
            file: FileTarget::Process,
            file_name: None,
            path: DEFAULT_LOG_DIR.to_string(),
            file_handler: FileHandlerKind::Plain,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            file_mode: FileMode::Append,
            errors_file: false,
            print_to_console: false,
            stderr_to_console: false,
            root_to_console: true,
            file_prefix: String::new(),
        }
    }
}

fn flag(value: &str) -> bool {
    matches!(value.trim().to_uppercase().as_str(), "TRUE" | "1")
}

impl LoggingConfig {
    /// Builds a config from a flat key/value mapping. Keys are case-insensitive,
    /// unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> eyre::Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut config = Self::default();
        for (key, value) in pairs {
            config.set(key.as_ref(), value.as_ref())?;
        }
        Ok(config)
    }

    /// Same as [`LoggingConfig::from_pairs`] for a flat JSON object. Scalars of any
    /// type are accepted as values.
    pub fn from_json(value: &Value) -> eyre::Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| eyre!("Logging config must be a JSON object"))?;

        let pairs = object
            .iter()
            .map(|(key, value)| match value {
                Value::String(s) => Ok((key.clone(), s.clone())),
                Value::Bool(_) | Value::Number(_) => Ok((key.clone(), value.to_string())),
                other => Err(eyre!("Unsupported value for {}: {}", key, other)),
            })
            .collect::<eyre::Result<Vec<_>>>()?;

        Self::from_pairs(pairs)
    }

    pub fn from_json_file(path: impl AsRef<std::path::Path>) -> eyre::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed reading logging config {}", path.display()))?;
        let value: Value = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON in logging config {}", path.display()))?;
        Self::from_json(&value)
    }

    /// Applies a single option.
    pub fn set(&mut self, key: &str, value: &str) -> eyre::Result<()> {
        match key.trim().to_uppercase().as_str() {
            "STYLE" => self.style = parse(value),
            "CONSOLE_STYLE" => self.console_style = parse(value),
            "FILE" => self.file = parse(value),
            "FILE_NAME" => self.file_name = Some(value.to_string()),
            "PATH" => self.path = value.to_string(),
            "FILE_HANDLER_CLASS" => self.file_handler = value.parse()?,
            "MAX_FILE_SIZE" => {
                self.max_file_size = value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid MAX_FILE_SIZE {}", value))?
            }
            "FILE_MODE" => self.file_mode = parse(value),
            "ERRORS_FILE" => self.errors_file = flag(value),
            "PRINT_TO_CONSOLE" => self.print_to_console = flag(value),
            "STDERR_TO_CONSOLE" => self.stderr_to_console = flag(value),
            "ROOT_TO_CONSOLE" => self.root_to_console = flag(value),
            "FILE_PREFIX" => self.file_prefix = value.split_whitespace().collect(),
            _ => {}
        }
        Ok(())
    }

    pub fn log_dir(&self) -> PathBuf {
        expand_tilde(&self.path)
    }

    /// Main log file for a process started on `date`, `None` when file logging is off.
    pub fn log_file_path(&self, date: NaiveDate, pid: u32) -> Option<PathBuf> {
        if let Some(name) = &self.file_name {
            return Some(self.log_dir().join(name));
        }

        let day = date.format("%y%m%d");
        match self.file {
            FileTarget::None => None,
            FileTarget::Same => Some(self.log_dir().join(format!("{}{}.log", self.file_prefix, day))),
            FileTarget::Process => Some(
                self.log_dir()
                    .join(format!("{}{}_{}.log", self.file_prefix, day, pid)),
            ),
        }
    }

    pub fn entries(&self) -> Vec<(&'static str, String)> {
        vec![
            ("STYLE", self.style.to_string()),
            ("CONSOLE_STYLE", format!("{:?}", self.console_style).to_uppercase()),
            ("FILE", format!("{:?}", self.file).to_uppercase()),
            ("FILE_NAME", self.file_name.clone().unwrap_or_default()),
            ("PATH", self.path.clone()),
            ("FILE_HANDLER_CLASS", format!("{:?}", self.file_handler).to_uppercase()),
            ("MAX_FILE_SIZE", self.max_file_size.to_string()),
            ("FILE_MODE", format!("{:?}", self.file_mode).to_uppercase()),
            ("ERRORS_FILE", display_flag(self.errors_file)),
            ("PRINT_TO_CONSOLE", display_flag(self.print_to_console)),
            ("STDERR_TO_CONSOLE", display_flag(self.stderr_to_console)),
            ("ROOT_TO_CONSOLE", display_flag(self.root_to_console)),
            ("FILE_PREFIX", self.file_prefix.clone()),
        ]
    }
}

fn parse<T: FromStr<Err = std::convert::Infallible>>(value: &str) -> T {
    match value.parse() {
        Ok(parsed) => parsed,
        Err(never) => match never {},
    }
}

fn display_flag(value: impl Display) -> String {
    value.to_string().to_uppercase()
}

/// `app.log` becomes `app-ERR.log`.
pub fn error_file_path(path: &std::path::Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}-ERR.log", stem))
}
