use std::io::Write;

mod bridge;
mod capture;
mod context;
mod formatters;
mod hook;
mod init;
mod level;
mod logger;
mod record;
mod sinks;

pub use bridge::{ContextLayer, LogBridge};
pub use capture::{ConsoleStream, SharedBuffer, StreamCapture};
pub use context::{Builder, Capture, LoggingContext, SinkFactory};
pub use formatters::{ConsoleFormatter, ConsoleStyle, ExceptionFormatter, LevelBasedFormatter, Style};
pub use hook::{install_panic_hook, ExceptionReport};
pub use init::{init, installed, Init, InitGuard};
pub use level::Severity;
pub use logger::{Logger, Registry};
pub use record::{ContextFields, Record};
pub use sinks::{ConsoleSink, ErrorFileSink, FileMode, FileSink, MemorySink, Rotation};

pub trait LogFormatter: Sync + Send {
    fn format(&self, record: &Record) -> String;
}

pub trait LogSink: Sync + Send {
    fn level(&self) -> Severity;
    fn set_level(&self, level: Severity);
    fn set_formatter(&self, formatter: Box<dyn LogFormatter>);
    fn write_log(&self, record: &Record) -> eyre::Result<()>;
    fn flush(&self);

    /// File sinks get the exception formatter when an uncaught error is reported.
    fn is_file(&self) -> bool {
        false
    }

    fn handle(&self, record: &Record) {
        if record.level < self.level() {
            return;
        }

        if let Err(err) = self.write_log(record) {
            let _ = writeln!(std::io::stderr(), "adlog: sink error: {:#}", err);
        }
    }
}
