use std::{
    fs::{File, OpenOptions},
    io::{LineWriter, Write},
    path::{Path, PathBuf},
    str::FromStr,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex, PoisonError, RwLock,
    },
};

use chrono::{Local, NaiveDate};
use eyre::Context;

use super::{level::Severity, record::Record, LogFormatter, LogSink};

/// Level and formatter state every sink carries.
struct SinkCore {
    level: AtomicU8,
    formatter: RwLock<Arc<dyn LogFormatter>>,
}

impl SinkCore {
    fn new(formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            level: AtomicU8::new(Severity::NOTSET.value()),
            formatter: RwLock::new(Arc::from(formatter)),
        }
    }

    fn level(&self) -> Severity {
        Severity::new(self.level.load(Ordering::Relaxed))
    }

    fn set_level(&self, level: Severity) {
        self.level.store(level.value(), Ordering::Relaxed);
    }

    fn set_formatter(&self, formatter: Box<dyn LogFormatter>) {
        *self.formatter.write().unwrap_or_else(PoisonError::into_inner) = Arc::from(formatter);
    }

    /// The lock is released before formatting, so a formatter may panic
    /// without blocking a later `set_formatter` on the same thread.
    fn format(&self, record: &Record) -> String {
        let formatter = self
            .formatter
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        formatter.format(record)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileMode {
    #[default]
    Append,
    Overwrite,
}

impl FromStr for FileMode {
    type Err = std::convert::Infallible;

    /// `A...` appends, `O...` overwrites, anything else appends.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        if s.starts_with('O') {
            Ok(FileMode::Overwrite)
        } else {
            Ok(FileMode::Append)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Rotation {
    #[default]
    Never,
    /// Move the file aside once it grows past this many bytes.
    Size(u64),
    /// Move the file aside on the first write of a new day.
    Daily,
}

struct OpenFile {
    writer: LineWriter<File>,
    opened_on: NaiveDate,
}

pub struct FileSink {
    file: Mutex<OpenFile>,
    file_path: PathBuf,
    rotation: Rotation,
    core: SinkCore,
}

impl FileSink {
    pub fn new(
        path: impl Into<PathBuf>,
        mode: FileMode,
        formatter: Box<dyn LogFormatter>,
    ) -> eyre::Result<Self> {
        let file_path: PathBuf = path.into();
        let file = open_log_file(&file_path, mode)?;

        Ok(Self {
            file: Mutex::new(OpenFile {
                writer: LineWriter::new(file),
                opened_on: Local::now().date_naive(),
            }),
            file_path,
            rotation: Rotation::Never,
            core: SinkCore::new(formatter),
        })
    }

    pub fn with_rotation(self, rotation: Rotation) -> Self {
        Self { rotation, ..self }
    }

    fn rotate_if_needed(&self, file: &mut OpenFile) -> eyre::Result<()> {
        let backup = match self.rotation {
            Rotation::Never => return Ok(()),
            Rotation::Size(max_file_size) => {
                let md = file
                    .writer
                    .get_ref()
                    .metadata()
                    .context("Can't read log file metadata")?;
                if md.len() <= max_file_size {
                    return Ok(());
                }
                free_backup_name(format!("{}.old", self.file_path.display()))
            }
            Rotation::Daily => {
                if Local::now().date_naive() == file.opened_on {
                    return Ok(());
                }
                free_backup_name(format!(
                    "{}.{}",
                    self.file_path.display(),
                    file.opened_on.format("%y%m%d")
                ))
            }
        };

        file.writer.flush().context("Can't flush log file before rotating")?;
        std::fs::rename(&self.file_path, &backup)
            .with_context(|| format!("Failed rotating log file to {}", backup))?;

        let new_file = open_log_file(&self.file_path, FileMode::Overwrite)?;
        *file = OpenFile {
            writer: LineWriter::new(new_file),
            opened_on: Local::now().date_naive(),
        };
        Ok(())
    }

    #[cfg(test)]
    fn backdate(&self, days: i64) {
        let mut file = self.file.lock().unwrap();
        file.opened_on = file.opened_on - chrono::Duration::days(days);
    }
}

fn open_log_file(path: &Path, mode: FileMode) -> eyre::Result<File> {
    let mut options = OpenOptions::new();
    options.create(true);
    match mode {
        FileMode::Append => options.append(true),
        FileMode::Overwrite => options.write(true).truncate(true),
    };

    options
        .open(path)
        .with_context(|| format!("Failed opening or creating log file {}", path.display()))
}

fn free_backup_name(base: String) -> String {
    let mut new_path = base.clone();
    let mut counter = 1;
    while std::fs::metadata(&new_path).is_ok() {
        new_path = format!("{}{}", base, counter);
        counter += 1;
    }
    new_path
}

impl LogSink for FileSink {
    fn level(&self) -> Severity {
        self.core.level()
    }

    fn set_level(&self, level: Severity) {
        self.core.set_level(level)
    }

    fn set_formatter(&self, formatter: Box<dyn LogFormatter>) {
        self.core.set_formatter(formatter)
    }

    fn write_log(&self, record: &Record) -> eyre::Result<()> {
        let line = self.core.format(record);
        let mut file = self.file.lock().map_err(|e| eyre::eyre!(e.to_string()))?;

        self.rotate_if_needed(&mut file)?;
        writeln!(file.writer, "{}", line)?;
        file.writer.flush().context("Can't flush file")
    }

    fn flush(&self) {
        if let Ok(mut file) = self.file.lock() {
            let _ = file.writer.flush();
        }
    }

    fn is_file(&self) -> bool {
        true
    }
}

/// File sink that drops everything below ERROR, whatever its own level is set to.
pub struct ErrorFileSink {
    inner: FileSink,
}

impl ErrorFileSink {
    pub fn new(
        path: impl Into<PathBuf>,
        mode: FileMode,
        formatter: Box<dyn LogFormatter>,
    ) -> eyre::Result<Self> {
        Ok(Self {
            inner: FileSink::new(path, mode, formatter)?,
        })
    }
}

impl LogSink for ErrorFileSink {
    fn level(&self) -> Severity {
        self.inner.level()
    }

    fn set_level(&self, level: Severity) {
        self.inner.set_level(level)
    }

    fn set_formatter(&self, formatter: Box<dyn LogFormatter>) {
        self.inner.set_formatter(formatter)
    }

    fn write_log(&self, record: &Record) -> eyre::Result<()> {
        if record.level < Severity::ERROR {
            return Ok(());
        }
        self.inner.write_log(record)
    }

    fn flush(&self) {
        self.inner.flush()
    }

    fn is_file(&self) -> bool {
        true
    }
}

/// Writes formatted lines to a console stream, stdout unless told otherwise.
pub struct ConsoleSink<W: Write + Send> {
    handle: Mutex<W>,
    core: SinkCore,
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(handle: W, formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            handle: Mutex::new(handle),
            core: SinkCore::new(formatter),
        }
    }
}

impl<W: Write + Send> LogSink for ConsoleSink<W> {
    fn level(&self) -> Severity {
        self.core.level()
    }

    fn set_level(&self, level: Severity) {
        self.core.set_level(level)
    }

    fn set_formatter(&self, formatter: Box<dyn LogFormatter>) {
        self.core.set_formatter(formatter)
    }

    fn write_log(&self, record: &Record) -> eyre::Result<()> {
        let line = self.core.format(record);
        let mut writer = self.handle.lock().map_err(|e| eyre::eyre!(e.to_string()))?;

        writeln!(writer, "{}", line)?;
        writer.flush().context("Can't flush console")
    }

    fn flush(&self) {
        if let Ok(mut writer) = self.handle.lock() {
            let _ = writer.flush();
        }
    }
}

/// Keeps records and their formatted lines in memory.
pub struct MemorySink {
    entries: Mutex<Vec<(Record, String)>>,
    core: SinkCore,
}

impl MemorySink {
    pub fn new(formatter: Box<dyn LogFormatter>) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            core: SinkCore::new(formatter),
        }
    }

    pub fn records(&self) -> Vec<Record> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(record, _)| record.clone())
            .collect()
    }

    pub fn lines(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, line)| line.clone())
            .collect()
    }
}

impl LogSink for MemorySink {
    fn level(&self) -> Severity {
        self.core.level()
    }

    fn set_level(&self, level: Severity) {
        self.core.set_level(level)
    }

    fn set_formatter(&self, formatter: Box<dyn LogFormatter>) {
        self.core.set_formatter(formatter)
    }

    fn write_log(&self, record: &Record) -> eyre::Result<()> {
        let line = self.core.format(record);
        self.entries
            .lock()
            .map_err(|e| eyre::eyre!(e.to_string()))?
            .push((record.clone(), line));
        Ok(())
    }

    fn flush(&self) {}
}
