use std::{
    collections::BTreeMap,
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError},
};

use chrono::{Local, NaiveDate};

use crate::{
    config::{error_file_path, FileHandlerKind, FileTarget, LoggingConfig},
    utils::{command_line, current_user, host_name},
};

use super::{
    capture::{ConsoleStream, StreamCapture},
    formatters::{ConsoleFormatter, ConsoleStyle, LevelBasedFormatter},
    level::Severity,
    logger::{Logger, Registry},
    record::{ContextFields, Record},
    sinks::{ConsoleSink, ErrorFileSink, FileMode, FileSink, Rotation},
    LogSink,
};

/// Builds the main file sink in place of the built-in ones.
pub type SinkFactory = Arc<dyn Fn(&Path, FileMode) -> eyre::Result<Arc<dyn LogSink>> + Send + Sync>;

type ConsoleFactory = Arc<dyn Fn() -> Box<dyn Write + Send> + Send + Sync>;

/// A stdout or stderr replacement owned by the context.
pub type Capture = StreamCapture<Box<dyn ConsoleStream>>;

/// Everything one logging setup owns: the logger tree, the stdout/stderr
/// captures and the configuration they were wired from.
pub struct LoggingContext {
    registry: Arc<Registry>,
    stdout: Mutex<Capture>,
    stderr: Mutex<Capture>,
    config: RwLock<Option<LoggingConfig>>,
    log_file: RwLock<Option<PathBuf>>,
    console: ConsoleFactory,
    file_sink_factory: Option<SinkFactory>,
    use_ansi: bool,
    pid: u32,
    date: Option<NaiveDate>,
}

impl LoggingContext {
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn root(&self) -> Arc<Logger> {
        self.registry.root()
    }

    pub fn logger(&self, name: &str) -> Arc<Logger> {
        self.registry.logger(name)
    }

    pub fn log(&self, name: &str, level: Severity, message: impl Into<String>) {
        self.registry.log(name, level, message)
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.registry.log("", Severity::WARNING, message)
    }

    /// The capture standing in for stdout, feeding the `print` logger.
    pub fn stdout(&self) -> MutexGuard<'_, Capture> {
        self.stdout.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The capture standing in for stderr, feeding the `stderr` logger.
    pub fn stderr(&self) -> MutexGuard<'_, Capture> {
        self.stderr.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Like [`LoggingContext::stderr`] but gives up instead of waiting on a held lock.
    pub(crate) fn try_stderr(&self) -> Option<MutexGuard<'_, Capture>> {
        match self.stderr.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn config(&self) -> Option<LoggingConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Path of the main log file of the current configuration.
    pub fn log_file(&self) -> Option<PathBuf> {
        self.log_file
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn today(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn flush(&self) {
        let _ = self.stdout().flush();
        let _ = self.stderr().flush();
        self.registry.flush();
    }

    /// Wires new sinks from `config` in place of the current ones. The old
    /// sinks stay attached when any new sink fails to open.
    pub fn configure(&self, config: &LoggingConfig) -> eyre::Result<()> {
        let mut warnings = Vec::new();
        let log_file = config.log_file_path(self.today(), self.pid);
        let mut file_sinks: Vec<Arc<dyn LogSink>> = Vec::new();

        if let Some(path) = &log_file {
            let dir = path.parent().map(Path::to_path_buf).unwrap_or_else(|| config.log_dir());
            if let Err(err) = create_log_dir(&dir) {
                warnings.push(format!("Failed creating log directory {}: {}", dir.display(), err));
            }

            if config.file != FileTarget::None {
                file_sinks.push(self.file_sink(config, path)?);
            }

            if config.errors_file {
                let sink = ErrorFileSink::new(
                    error_file_path(path),
                    config.file_mode,
                    Box::new(LevelBasedFormatter::new(config.style)),
                )?;
                file_sinks.push(Arc::new(sink));
            }
        } else if config.errors_file {
            warnings.push("ERRORS_FILE needs a log file, no error file is written".to_string());
        }

        let console = self.console_sink(config.console_style);

        for logger in self.registry.loggers() {
            logger.clear_sinks();
            logger.set_level(Severity::NOTSET);
            logger.set_propagate(true);
        }

        let root = self.registry.root();
        for sink in file_sinks {
            root.add_sink(sink);
        }
        if config.print_to_console {
            self.registry.logger("print").add_sink(console.clone());
        }
        if config.stderr_to_console {
            self.registry.logger("stderr").add_sink(console.clone());
        }
        if config.root_to_console {
            root.add_sink(console);
        }

        *self.config.write().unwrap_or_else(PoisonError::into_inner) = Some(config.clone());
        *self.log_file.write().unwrap_or_else(PoisonError::into_inner) = log_file;

        for warning in warnings {
            self.warning(warning);
        }
        Ok(())
    }

    fn file_sink(&self, config: &LoggingConfig, path: &Path) -> eyre::Result<Arc<dyn LogSink>> {
        let formatter = Box::new(LevelBasedFormatter::new(config.style));

        if let Some(factory) = &self.file_sink_factory {
            let sink = factory(path, config.file_mode)?;
            sink.set_formatter(formatter);
            return Ok(sink);
        }

        let rotation = match config.file_handler {
            FileHandlerKind::Plain => Rotation::Never,
            FileHandlerKind::Rotating => Rotation::Size(config.max_file_size),
            FileHandlerKind::Timed => Rotation::Daily,
        };
        let sink = FileSink::new(path, config.file_mode, formatter)?.with_rotation(rotation);
        Ok(Arc::new(sink))
    }

    fn console_sink(&self, style: ConsoleStyle) -> Arc<dyn LogSink> {
        Arc::new(ConsoleSink::new(
            (self.console)(),
            Box::new(ConsoleFormatter::new(style, self.use_ansi)),
        ))
    }

    /// One INFO line on root describing who started the process and how.
    pub fn announce_start(&self) {
        let context = self.registry.context();
        let field = |key: &str| context.get(key).cloned().unwrap_or_default();

        self.registry.dispatch(Record::new(
            "",
            Severity::INFO,
            format!(
                "Logging start: {} @ {} | {}:{} {}/{} | pid:{} | cmd:{}",
                field("user"),
                field("host"),
                env!("CARGO_PKG_NAME"),
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS,
                std::env::consts::ARCH,
                self.pid,
                command_line(),
            ),
        ));
    }
}

impl Drop for LoggingContext {
    fn drop(&mut self) {
        self.flush();
    }
}

fn create_log_dir(dir: &Path) -> std::io::Result<()> {
    if dir.as_os_str().is_empty() || dir.is_dir() {
        return Ok(());
    }

    std::fs::create_dir_all(dir)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o770))?;
    }

    Ok(())
}

pub struct Builder {
    config: Option<LoggingConfig>,
    stdout: Box<dyn ConsoleStream>,
    stderr: Box<dyn ConsoleStream>,
    console: ConsoleFactory,
    file_sink_factory: Option<SinkFactory>,
    use_ansi: bool,
    pid: u32,
    date: Option<NaiveDate>,
}

impl Builder {
    pub fn new() -> Self {
        Self {
            config: None,
            stdout: Box::new(std::io::stdout()),
            stderr: Box::new(std::io::stderr()),
            console: Arc::new(|| Box::new(std::io::stdout())),
            file_sink_factory: None,
            use_ansi: true,
            pid: std::process::id(),
            date: None,
        }
    }

    pub fn with_config(self, config: LoggingConfig) -> Self {
        Self {
            config: Some(config),
            ..self
        }
    }

    /// Original stream behind the stdout capture.
    pub fn with_stdout(self, stream: impl ConsoleStream + 'static) -> Self {
        Self {
            stdout: Box::new(stream),
            ..self
        }
    }

    /// Original stream behind the stderr capture.
    pub fn with_stderr(self, stream: impl ConsoleStream + 'static) -> Self {
        Self {
            stderr: Box::new(stream),
            ..self
        }
    }

    /// Where console sinks write, stdout by default.
    pub fn with_console<W, F>(self, make_writer: F) -> Self
    where
        W: Write + Send + 'static,
        F: Fn() -> W + Send + Sync + 'static,
    {
        Self {
            console: Arc::new(move || Box::new(make_writer())),
            ..self
        }
    }

    pub fn with_file_sink_factory<F>(self, factory: F) -> Self
    where
        F: Fn(&Path, FileMode) -> eyre::Result<Arc<dyn LogSink>> + Send + Sync + 'static,
    {
        Self {
            file_sink_factory: Some(Arc::new(factory)),
            ..self
        }
    }

    pub fn with_ansi(self, use_ansi: bool) -> Self {
        Self { use_ansi, ..self }
    }

    pub fn with_pid(self, pid: u32) -> Self {
        Self { pid, ..self }
    }

    /// Fixes the date used in log file names.
    pub fn with_date(self, date: NaiveDate) -> Self {
        Self {
            date: Some(date),
            ..self
        }
    }

    pub fn build(self) -> eyre::Result<Arc<LoggingContext>> {
        let mut fields = BTreeMap::new();
        fields.insert("user".to_string(), current_user());
        fields.insert("host".to_string(), host_name());
        let context: ContextFields = Arc::new(fields);

        let registry = Arc::new(Registry::new(context));
        let stdout = StreamCapture::new(self.stdout, "print", registry.clone())
            .with_levels(Severity::NOTSET, Severity::INFO);
        let stderr = StreamCapture::new(self.stderr, "stderr", registry.clone())
            .with_levels(Severity::NOTSET, Severity::ERROR);

        let ctx = LoggingContext {
            registry,
            stdout: Mutex::new(stdout),
            stderr: Mutex::new(stderr),
            config: RwLock::new(None),
            log_file: RwLock::new(None),
            console: self.console,
            file_sink_factory: self.file_sink_factory,
            use_ansi: self.use_ansi,
            pid: self.pid,
            date: self.date,
        };

        match &self.config {
            Some(config) => ctx.configure(config)?,
            None => {
                let sink = ctx.console_sink(ConsoleStyle::Minimal);
                sink.set_level(Severity::INFO);
                ctx.root().add_sink(sink);
            }
        }

        Ok(Arc::new(ctx))
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;
    use crate::logging::{
        capture::SharedBuffer,
        formatters::{LevelBasedFormatter, Style},
        sinks::MemorySink,
    };

    struct Fixture {
        _temp: TempDir,
        dir: PathBuf,
        console: SharedBuffer,
        stdout: SharedBuffer,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let dir = temp.path().join("logs");
            Self {
                _temp: temp,
                dir,
                console: SharedBuffer::new(),
                stdout: SharedBuffer::new(),
            }
        }

        fn build(&self, pairs: &[(&str, &str)]) -> Arc<LoggingContext> {
            let mut config = LoggingConfig::from_pairs(pairs.iter().copied()).unwrap();
            config.path = self.dir.display().to_string();
            let console = self.console.clone();

            Builder::new()
                .with_config(config)
                .with_stdout(self.stdout.clone())
                .with_stderr(SharedBuffer::new())
                .with_console(move || console.clone())
                .with_ansi(false)
                .with_pid(4242)
                .with_date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap())
                .build()
                .unwrap()
        }
    }

    #[test]
    fn process_file_is_created_in_new_directory() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("STYLE", "VOID"), ("ROOT_TO_CONSOLE", "FALSE")]);

        let path = fixture.dir.join("240305_4242.log");
        assert_eq!(ctx.log_file(), Some(path.clone()));

        ctx.log("app", Severity::INFO, "stored");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "stored\n");

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&fixture.dir).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o770);
        }
    }

    #[test]
    fn error_file_only_gets_errors() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[
            ("STYLE", "VOID"),
            ("FILE", "SAME"),
            ("ERRORS_FILE", "TRUE"),
            ("ROOT_TO_CONSOLE", "FALSE"),
        ]);
        for sink in ctx.root().sinks() {
            sink.set_level(Severity::NOTSET);
        }

        ctx.log("app", Severity::DEBUG, "details");
        ctx.log("app", Severity::ERROR, "failed");

        let main = std::fs::read_to_string(fixture.dir.join("240305.log")).unwrap();
        let errors = std::fs::read_to_string(fixture.dir.join("240305-ERR.log")).unwrap();
        assert_eq!(main.lines().count(), 2);
        assert_eq!(errors.lines().count(), 1);
        assert!(errors.trim_end().ends_with("-- failed"));
    }

    #[test]
    fn console_routing_per_logger() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[
            ("FILE", "NONE"),
            ("ROOT_TO_CONSOLE", "FALSE"),
            ("PRINT_TO_CONSOLE", "TRUE"),
        ]);

        ctx.log("app", Severity::WARNING, "not on console");
        writeln!(ctx.stdout(), "printed").unwrap();
        writeln!(ctx.stderr(), "complained").unwrap();

        assert_eq!(fixture.console.contents(), "printed\n");
        // the capture itself does not echo: pass level is NOTSET
        assert_eq!(fixture.stdout.contents(), "");
    }

    #[test]
    fn root_console_sees_propagated_captures() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("FILE", "NONE"), ("STDERR_TO_CONSOLE", "TRUE")]);

        writeln!(ctx.stderr(), "broken pipe").unwrap();

        // once from the stderr logger, once more from root
        assert_eq!(fixture.console.contents(), "broken pipe\nbroken pipe\n");
    }

    #[test]
    fn stderr_capture_logs_at_error() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("FILE", "NONE"), ("ROOT_TO_CONSOLE", "FALSE")]);
        let memory = Arc::new(MemorySink::new(Box::new(LevelBasedFormatter::new(Style::Void))));
        ctx.root().add_sink(memory.clone());

        writeln!(ctx.stderr(), "oops").unwrap();
        writeln!(ctx.stdout(), "fine").unwrap();

        let records = memory.records();
        assert_eq!(records[0].logger, "stderr");
        assert_eq!(records[0].level, Severity::ERROR);
        assert_eq!(records[1].logger, "print");
        assert_eq!(records[1].level, Severity::INFO);
        assert!(records[0].field("host").is_some());
    }

    #[test]
    fn configure_rebuilds_sinks() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("FILE", "NONE")]);
        assert_eq!(ctx.root().sinks().len(), 1);

        let mut config = LoggingConfig::from_pairs([("FILE", "SAME"), ("ERRORS_FILE", "TRUE")]).unwrap();
        config.path = fixture.dir.display().to_string();
        ctx.configure(&config).unwrap();

        assert_eq!(ctx.root().sinks().len(), 3);
        assert!(ctx.logger("print").sinks().is_empty());
        assert_eq!(ctx.config(), Some(config));
    }

    #[test]
    fn failed_configure_keeps_previous_sinks() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("FILE_NAME", "app.log"), ("ROOT_TO_CONSOLE", "FALSE")]);
        let before = ctx.config();
        assert_eq!(ctx.root().sinks().len(), 1);

        std::fs::create_dir_all(fixture.dir.join("taken")).unwrap();
        let mut config = LoggingConfig::from_pairs([("FILE_NAME", "taken")]).unwrap();
        config.path = fixture.dir.display().to_string();

        assert!(ctx.configure(&config).is_err());
        assert_eq!(ctx.root().sinks().len(), 1);
        assert_eq!(ctx.config(), before);

        ctx.log("app", Severity::INFO, "still written");
        let content = std::fs::read_to_string(fixture.dir.join("app.log")).unwrap();
        assert!(content.trim_end().ends_with("-- still written"));
    }

    #[test]
    fn rotating_handler_uses_max_file_size() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[
            ("STYLE", "VOID"),
            ("FILE_NAME", "app.log"),
            ("FILE_HANDLER_CLASS", "ROTATING"),
            ("MAX_FILE_SIZE", "8"),
            ("ROOT_TO_CONSOLE", "FALSE"),
        ]);

        ctx.log("app", Severity::INFO, "first line");
        ctx.log("app", Severity::INFO, "second");

        let old = std::fs::read_to_string(fixture.dir.join("app.log.old")).unwrap();
        assert_eq!(old, "first line\n");
        assert_eq!(std::fs::read_to_string(fixture.dir.join("app.log")).unwrap(), "second\n");
    }

    #[test]
    fn custom_file_sink_factory_is_used() {
        let fixture = Fixture::new();
        let memory = Arc::new(MemorySink::new(Box::new(LevelBasedFormatter::new(Style::Void))));
        let captured = memory.clone();

        let mut config = LoggingConfig::from_pairs([("STYLE", "SIMPLE"), ("ROOT_TO_CONSOLE", "FALSE")]).unwrap();
        config.path = fixture.dir.display().to_string();

        let ctx = Builder::new()
            .with_config(config)
            .with_stdout(SharedBuffer::new())
            .with_stderr(SharedBuffer::new())
            .with_file_sink_factory(move |_path, _mode| Ok(captured.clone() as Arc<dyn LogSink>))
            .build()
            .unwrap();

        ctx.log("app", Severity::INFO, "custom");
        assert!(memory.lines()[0].ends_with("INFO app -- custom"));
    }

    #[test]
    fn banner_names_the_process() {
        let fixture = Fixture::new();
        let ctx = fixture.build(&[("FILE", "NONE")]);

        ctx.announce_start();

        let console = fixture.console.contents();
        assert!(console.starts_with("Logging start: "));
        assert!(console.contains("| pid:4242 | cmd:"));
    }

    #[test]
    fn no_config_keeps_a_message_only_console() {
        let console = SharedBuffer::new();
        let sink_console = console.clone();
        let ctx = Builder::new()
            .with_stdout(SharedBuffer::new())
            .with_stderr(SharedBuffer::new())
            .with_console(move || sink_console.clone())
            .build()
            .unwrap();

        ctx.log("app", Severity::DEBUG, "hidden");
        ctx.log("app", Severity::INFO, "shown");
        assert_eq!(console.contents(), "shown\n");
        assert_eq!(ctx.config(), None);
    }
}
