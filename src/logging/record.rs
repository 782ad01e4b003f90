use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Local};

use super::level::Severity;

/// Fields shared by every record a context dispatches (`user`, `host`).
pub type ContextFields = Arc<BTreeMap<String, String>>;

/// A single log event on its way to the sinks.
#[derive(Debug, Clone)]
pub struct Record {
    pub logger: String,
    pub level: Severity,
    pub message: String,
    pub time: DateTime<Local>,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub module_path: Option<String>,
    /// Key/value pairs supplied at the call site.
    pub fields: Vec<(String, String)>,
    pub context: ContextFields,
}

impl Record {
    pub fn new(logger: impl Into<String>, level: Severity, message: impl Into<String>) -> Self {
        Self {
            logger: logger.into(),
            level,
            message: message.into(),
            time: Local::now(),
            file: None,
            line: None,
            module_path: None,
            fields: Vec::new(),
            context: ContextFields::default(),
        }
    }

    pub fn at(self, time: DateTime<Local>) -> Self {
        Self { time, ..self }
    }

    pub fn with_location(self, file: Option<&str>, line: Option<u32>, module_path: Option<&str>) -> Self {
        Self {
            file: file.map(str::to_string),
            line,
            module_path: module_path.map(str::to_string),
            ..self
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    /// Logger name as printed, the root logger has the empty name.
    pub fn logger_name(&self) -> &str {
        if self.logger.is_empty() {
            "root"
        } else {
            &self.logger
        }
    }

    /// Base name of the source file, `?` when unknown.
    pub fn file_name(&self) -> &str {
        match &self.file {
            Some(path) => path.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(path),
            None => "?",
        }
    }

    pub fn line_number(&self) -> String {
        self.line.map_or_else(|| "?".to_string(), |l| l.to_string())
    }

    pub fn function(&self) -> &str {
        self.module_path.as_deref().unwrap_or("?")
    }

    /// Message followed by the call-site fields as ` key=value`.
    pub fn display_message(&self) -> String {
        let mut msg = self.message.clone();
        for (key, value) in &self.fields {
            msg.push_str(&format!(" {}={}", key, value));
        }
        msg
    }

    /// Looks up a call-site field first, then the context fields.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .or_else(|| self.context.get(key).map(String::as_str))
    }
}
