use std::{
    backtrace::{Backtrace, BacktraceStatus},
    io::Write,
    panic::PanicHookInfo,
    sync::Arc,
};

use super::{context::LoggingContext, formatters::ExceptionFormatter, level::Severity};

/// An uncaught error as it is written to the error stream: the trace lines,
/// then a single `{kind}: {message}` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionReport {
    pub kind: String,
    pub message: String,
    pub frames: Vec<String>,
}

impl ExceptionReport {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frames<I, S>(self, frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            frames: frames.into_iter().map(Into::into).collect(),
            ..self
        }
    }

    pub fn from_panic(info: &PanicHookInfo<'_>) -> Self {
        let payload = info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "Box<dyn Any>".to_string()
        };

        let thread = std::thread::current();
        let location = info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "<unknown>".to_string());

        let mut frames = vec![format!(
            "thread '{}' panicked at {}",
            thread.name().unwrap_or("<unnamed>"),
            location
        )];

        let backtrace = Backtrace::capture();
        if backtrace.status() == BacktraceStatus::Captured {
            frames.extend(backtrace.to_string().lines().map(str::to_string));
        }

        Self::new("panic", message).with_frames(frames)
    }

    pub fn from_error(err: &eyre::Report) -> Self {
        Self::new("Error", err.to_string())
            .with_frames(err.chain().skip(1).map(|cause| format!("caused by: {}", cause)))
    }

    /// Non-empty trace lines followed by the summary line.
    pub fn lines(&self) -> Vec<String> {
        self.frames
            .iter()
            .flat_map(|frame| frame.lines())
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .chain(std::iter::once(format!("{}: {}", self.kind, self.message)))
            .collect()
    }
}

impl LoggingContext {
    /// Writes `report` to the stderr capture. Each step is best effort, a
    /// failing sink or a held stderr lock never turns into a panic here.
    pub fn report_exception(&self, report: &ExceptionReport) {
        for sink in self.root().sinks() {
            if sink.is_file() {
                sink.set_formatter(Box::new(ExceptionFormatter));
            }
        }

        let lines = report.lines();
        match self.try_stderr() {
            Some(mut stderr) => {
                stderr.set_write_level(Severity::ERROR, false);
                for line in &lines {
                    let _ = stderr.write_all(format!("{}\n", line).as_bytes());
                }
                let _ = stderr.flush();
            }
            None => {
                let mut fallback = std::io::stderr();
                for line in &lines {
                    let _ = writeln!(fallback, "{}", line);
                }
            }
        }
    }

    pub fn report_error(&self, err: &eyre::Report) {
        self.report_exception(&ExceptionReport::from_error(err))
    }
}

/// Routes every panic through [`LoggingContext::report_exception`].
pub fn install_panic_hook(context: Arc<LoggingContext>) {
    std::panic::set_hook(Box::new(move |info| {
        context.report_exception(&ExceptionReport::from_panic(info));
    }));
}

#[cfg(test)]
mod tests {
    use eyre::eyre;
    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::LoggingConfig,
        logging::{
            capture::SharedBuffer,
            context::Builder,
            formatters::{LevelBasedFormatter, Style},
            record::Record,
            sinks::MemorySink,
            LogFormatter, LogSink,
        },
    };

    struct BrokenSink;

    impl LogSink for BrokenSink {
        fn level(&self) -> Severity {
            Severity::NOTSET
        }
        fn set_level(&self, _level: Severity) {}
        fn set_formatter(&self, _formatter: Box<dyn LogFormatter>) {}
        fn write_log(&self, _record: &Record) -> eyre::Result<()> {
            Err(eyre!("disk on fire"))
        }
        fn flush(&self) {}
        fn is_file(&self) -> bool {
            true
        }
    }

    fn context() -> (Arc<LoggingContext>, Arc<MemorySink>) {
        let ctx = Builder::new()
            .with_config(LoggingConfig::from_pairs([("FILE", "NONE"), ("ROOT_TO_CONSOLE", "FALSE")]).unwrap())
            .with_stdout(SharedBuffer::new())
            .with_stderr(SharedBuffer::new())
            .build()
            .unwrap();
        let memory = Arc::new(MemorySink::new(Box::new(LevelBasedFormatter::new(Style::Void))));
        ctx.root().add_sink(memory.clone());
        (ctx, memory)
    }

    #[test]
    fn report_lines_skip_blank_frames() {
        let report = ExceptionReport::new("ValueError", "bad input")
            .with_frames(["  File \"main\", line 3\n    run()\n", "", "  at parse"]);
        assert_eq!(
            report.lines(),
            vec![
                "  File \"main\", line 3".to_string(),
                "    run()".to_string(),
                "  at parse".to_string(),
                "ValueError: bad input".to_string(),
            ]
        );
    }

    #[test]
    fn one_record_per_frame_then_summary() {
        let (ctx, memory) = context();
        ctx.stderr().set_write_level(Severity::INFO, false);

        let report = ExceptionReport::new("ValueError", "bad input")
            .with_frames(["frame one", "frame two", "frame three"]);
        ctx.report_exception(&report);

        let records = memory.records();
        assert_eq!(records.len(), 4);
        assert!(records.iter().all(|r| r.logger == "stderr" && r.level == Severity::ERROR));
        assert_eq!(records[3].message, "ValueError: bad input");
        assert_eq!(
            records.iter().filter(|r| r.message.contains(": bad input")).count(),
            1
        );
    }

    #[test]
    fn broken_sink_does_not_escape_the_hook() {
        let (ctx, memory) = context();
        ctx.root().add_sink(Arc::new(BrokenSink));

        ctx.report_exception(&ExceptionReport::new("panic", "boom").with_frames(["frame"]));

        let messages: Vec<_> = memory.records().into_iter().map(|r| r.message).collect();
        assert_eq!(messages, vec!["frame".to_string(), "panic: boom".to_string()]);
    }

    #[test]
    fn held_stderr_lock_falls_back_to_process_stderr() {
        let (ctx, memory) = context();
        let _held = ctx.stderr();

        ctx.report_exception(&ExceptionReport::new("panic", "while writing"));

        assert!(memory.lines().is_empty());
    }

    #[test]
    fn file_sinks_switch_to_exception_template() {
        let temp = TempDir::new().unwrap();
        let mut config = LoggingConfig::from_pairs([("FILE_NAME", "app.log"), ("ROOT_TO_CONSOLE", "FALSE")]).unwrap();
        config.path = temp.path().display().to_string();
        let ctx = Builder::new()
            .with_config(config)
            .with_stdout(SharedBuffer::new())
            .with_stderr(SharedBuffer::new())
            .build()
            .unwrap();

        ctx.report_exception(&ExceptionReport::new("KeyError", "'missing'"));

        let content = std::fs::read_to_string(temp.path().join("app.log")).unwrap();
        assert!(content
            .trim_end()
            .ends_with("STDERR EXCEPTION -- KeyError: 'missing'"));
    }

    #[test]
    fn error_chain_becomes_frames() {
        let err = eyre!("connection refused").wrap_err("Failed loading profile");
        let report = ExceptionReport::from_error(&err);

        assert_eq!(report.kind, "Error");
        assert_eq!(report.message, "Failed loading profile");
        assert_eq!(report.frames, vec!["caused by: connection refused".to_string()]);
    }
}
