use core::fmt;

/// Ordinal log severity. Gates compare with `<=`/`>=`, `NOTSET` lets everything through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Severity(u8);

impl Severity {
    pub const NOTSET: Severity = Severity(0);
    pub const TRACE: Severity = Severity(5);
    pub const DEBUG: Severity = Severity(10);
    pub const INFO: Severity = Severity(20);
    pub const WARNING: Severity = Severity(30);
    pub const ERROR: Severity = Severity(40);
    pub const CRITICAL: Severity = Severity(50);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    pub fn name(self) -> String {
        match self {
            Severity::NOTSET => "NOTSET".to_string(),
            Severity::TRACE => "TRACE".to_string(),
            Severity::DEBUG => "DEBUG".to_string(),
            Severity::INFO => "INFO".to_string(),
            Severity::WARNING => "WARNING".to_string(),
            Severity::ERROR => "ERROR".to_string(),
            Severity::CRITICAL => "CRITICAL".to_string(),
            Severity(n) => format!("Level {}", n),
        }
    }

    pub fn is_error(self) -> bool {
        self >= Severity::ERROR
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl From<log::Level> for Severity {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Severity::ERROR,
            log::Level::Warn => Severity::WARNING,
            log::Level::Info => Severity::INFO,
            log::Level::Debug => Severity::DEBUG,
            log::Level::Trace => Severity::TRACE,
        }
    }
}

impl From<&tracing::Level> for Severity {
    fn from(level: &tracing::Level) -> Self {
        if *level == tracing::Level::ERROR {
            Severity::ERROR
        } else if *level == tracing::Level::WARN {
            Severity::WARNING
        } else if *level == tracing::Level::INFO {
            Severity::INFO
        } else if *level == tracing::Level::DEBUG {
            Severity::DEBUG
        } else {
            Severity::TRACE
        }
    }
}
