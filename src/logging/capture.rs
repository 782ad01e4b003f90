use std::{
    io::{self, Write},
    sync::{Arc, Mutex, PoisonError},
};

use super::{level::Severity, logger::Registry, record::Record};

/// A console stream a [`StreamCapture`] can wrap. Streams that are captures
/// themselves accept level changes passed down from the outer capture.
pub trait ConsoleStream: Write + Send {
    fn set_level(&mut self, _level: Severity, _propagate: bool) {}
    fn set_write_level(&mut self, _level: Severity, _propagate: bool) {}
}

impl ConsoleStream for io::Stdout {}
impl ConsoleStream for io::Stderr {}
impl ConsoleStream for Vec<u8> {}

impl<S: ConsoleStream + ?Sized> ConsoleStream for Box<S> {
    fn set_level(&mut self, level: Severity, propagate: bool) {
        (**self).set_level(level, propagate)
    }

    fn set_write_level(&mut self, level: Severity, propagate: bool) {
        (**self).set_write_level(level, propagate)
    }
}

/// Cloneable in-memory console, handy to observe what a capture echoes.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap_or_else(PoisonError::into_inner)).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl ConsoleStream for SharedBuffer {}

/// Stands in for stdout/stderr: every write is echoed to the original stream
/// when `write_level <= pass_level` and always logged to the logger named
/// after the stream at `write_level`.
pub struct StreamCapture<W: ConsoleStream> {
    inner: W,
    name: String,
    pass_level: Severity,
    write_level: Severity,
    pending: Vec<u8>,
    registry: Arc<Registry>,
}

impl<W: ConsoleStream> StreamCapture<W> {
    pub fn new(inner: W, name: impl Into<String>, registry: Arc<Registry>) -> Self {
        Self {
            inner,
            name: name.into(),
            pass_level: Severity::INFO,
            write_level: Severity::INFO,
            pending: Vec::new(),
            registry,
        }
    }

    pub fn with_levels(mut self, pass_level: Severity, write_level: Severity) -> Self {
        self.pass_level = pass_level;
        self.write_level = write_level;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Severity {
        self.pass_level
    }

    pub fn write_level(&self) -> Severity {
        self.write_level
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn set_level(&mut self, level: Severity, propagate: bool) {
        self.pass_level = level;
        if propagate {
            self.inner.set_level(level, propagate);
        }
    }

    pub fn set_write_level(&mut self, level: Severity, propagate: bool) {
        // a held partial line belongs to the writes made before the change
        self.forward_pending();
        self.write_level = level;
        if propagate {
            self.inner.set_write_level(level, propagate);
        }
    }

    fn forward_lines(&mut self, buf: &[u8]) {
        self.pending.extend_from_slice(buf);
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            self.forward(&line[..line.len() - 1]);
        }
    }

    fn forward_pending(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let line = std::mem::take(&mut self.pending);
        self.forward(&line);
    }

    fn forward(&self, line: &[u8]) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        let message = String::from_utf8_lossy(line);
        self.registry
            .dispatch(Record::new(self.name.as_str(), self.write_level, message));
    }
}

impl<W: ConsoleStream> Write for StreamCapture<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_level <= self.pass_level {
            let _ = self.inner.write_all(buf);
        }
        self.forward_lines(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.forward_pending();
        let _ = self.inner.flush();
        Ok(())
    }
}

impl<W: ConsoleStream> ConsoleStream for StreamCapture<W> {
    fn set_level(&mut self, level: Severity, propagate: bool) {
        StreamCapture::set_level(self, level, propagate)
    }

    fn set_write_level(&mut self, level: Severity, propagate: bool) {
        StreamCapture::set_write_level(self, level, propagate)
    }
}

impl<W: ConsoleStream> Drop for StreamCapture<W> {
    fn drop(&mut self) {
        self.forward_pending();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{
        formatters::{LevelBasedFormatter, Style},
        record::ContextFields,
        sinks::MemorySink,
    };

    fn setup() -> (Arc<Registry>, Arc<MemorySink>) {
        let registry = Arc::new(Registry::new(ContextFields::default()));
        let sink = Arc::new(MemorySink::new(Box::new(LevelBasedFormatter::new(Style::Void))));
        registry.root().add_sink(sink.clone());
        (registry, sink)
    }

    fn levels(sink: &MemorySink) -> Vec<(String, Severity, String)> {
        sink.records()
            .into_iter()
            .map(|r| (r.logger, r.level, r.message))
            .collect()
    }

    #[test]
    fn echoes_and_forwards_when_write_level_within_gate() {
        let (registry, sink) = setup();
        let console = SharedBuffer::new();
        let mut capture = StreamCapture::new(console.clone(), "print", registry);

        writeln!(capture, "hello").unwrap();

        assert_eq!(console.contents(), "hello\n");
        assert_eq!(
            levels(&sink),
            vec![("print".to_string(), Severity::INFO, "hello".to_string())]
        );
    }

    #[test]
    fn closed_gate_silences_console_but_still_logs() {
        let (registry, sink) = setup();
        let console = SharedBuffer::new();
        let mut capture = StreamCapture::new(console.clone(), "print", registry)
            .with_levels(Severity::NOTSET, Severity::INFO);

        writeln!(capture, "quiet").unwrap();

        assert_eq!(console.contents(), "");
        assert_eq!(sink.lines(), vec!["quiet".to_string()]);
    }

    #[test]
    fn gate_is_inclusive() {
        let (registry, _sink) = setup();
        let console = SharedBuffer::new();
        let mut capture = StreamCapture::new(console.clone(), "stderr", registry)
            .with_levels(Severity::ERROR, Severity::ERROR);

        writeln!(capture, "boom").unwrap();
        capture.set_write_level(Severity::CRITICAL, false);
        writeln!(capture, "worse").unwrap();

        assert_eq!(console.contents(), "boom\n");
    }

    #[test]
    fn write_level_applies_to_future_writes_only() {
        let (registry, sink) = setup();
        let mut capture = StreamCapture::new(SharedBuffer::new(), "stderr", registry);

        writeln!(capture, "before").unwrap();
        write!(capture, "partial").unwrap();
        capture.set_write_level(Severity::ERROR, false);
        writeln!(capture, "after").unwrap();

        assert_eq!(
            levels(&sink),
            vec![
                ("stderr".to_string(), Severity::INFO, "before".to_string()),
                ("stderr".to_string(), Severity::INFO, "partial".to_string()),
                ("stderr".to_string(), Severity::ERROR, "after".to_string()),
            ]
        );
    }

    #[test]
    fn partial_lines_wait_for_newline_or_flush() {
        let (registry, sink) = setup();
        let console = SharedBuffer::new();
        let mut capture = StreamCapture::new(console.clone(), "print", registry);

        capture.write_all(b"par").unwrap();
        capture.write_all(b"tial\r\nnext").unwrap();
        assert_eq!(sink.lines(), vec!["partial".to_string()]);

        capture.flush().unwrap();
        assert_eq!(sink.lines(), vec!["partial".to_string(), "next".to_string()]);
        assert_eq!(console.contents(), "partial\r\nnext");
    }

    #[test]
    fn level_changes_propagate_to_wrapped_capture() {
        let (registry, _sink) = setup();
        let inner = StreamCapture::new(SharedBuffer::new(), "print", registry.clone());
        let mut outer = StreamCapture::new(inner, "print", registry);

        outer.set_level(Severity::WARNING, true);
        outer.set_write_level(Severity::ERROR, true);
        assert_eq!(outer.get_ref().level(), Severity::WARNING);
        assert_eq!(outer.get_ref().write_level(), Severity::ERROR);

        outer.set_level(Severity::DEBUG, false);
        assert_eq!(outer.level(), Severity::DEBUG);
        assert_eq!(outer.get_ref().level(), Severity::WARNING);
    }

    #[test]
    fn failing_console_never_fails_the_writer() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
            fn flush(&mut self) -> io::Result<()> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "closed"))
            }
        }
        impl ConsoleStream for Broken {}

        let (registry, sink) = setup();
        let mut capture = StreamCapture::new(Broken, "print", registry);

        assert!(writeln!(capture, "still logged").is_ok());
        assert!(capture.flush().is_ok());
        assert_eq!(sink.lines(), vec!["still logged".to_string()]);
    }

    #[test]
    fn drop_forwards_pending_text() {
        let (registry, sink) = setup();
        {
            let mut capture = StreamCapture::new(SharedBuffer::new(), "print", registry);
            capture.write_all(b"unterminated").unwrap();
        }
        assert_eq!(sink.lines(), vec!["unterminated".to_string()]);
    }
}
