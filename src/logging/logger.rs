use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU8, Ordering},
        Arc, PoisonError, RwLock,
    },
};

use super::{
    level::Severity,
    record::{ContextFields, Record},
    LogSink,
};

/// A named node of the logger tree.
pub struct Logger {
    name: String,
    level: AtomicU8,
    propagate: AtomicBool,
    sinks: RwLock<Vec<Arc<dyn LogSink>>>,
}

impl Logger {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            level: AtomicU8::new(Severity::NOTSET.value()),
            propagate: AtomicBool::new(true),
            sinks: RwLock::new(Vec::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn level(&self) -> Severity {
        Severity::new(self.level.load(Ordering::Relaxed))
    }

    pub fn set_level(&self, level: Severity) {
        self.level.store(level.value(), Ordering::Relaxed);
    }

    pub fn propagate(&self) -> bool {
        self.propagate.load(Ordering::Relaxed)
    }

    pub fn set_propagate(&self, propagate: bool) {
        self.propagate.store(propagate, Ordering::Relaxed);
    }

    pub fn add_sink(&self, sink: Arc<dyn LogSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    pub fn sinks(&self) -> Vec<Arc<dyn LogSink>> {
        self.sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Detaches every sink, flushing them on the way out.
    pub fn clear_sinks(&self) {
        let old = std::mem::take(&mut *self.sinks.write().unwrap_or_else(PoisonError::into_inner));
        for sink in old {
            sink.flush();
        }
    }
}

/// Process-wide logger tree. Names nest on `.` and `::`, the root logger is `""`.
pub struct Registry {
    loggers: RwLock<HashMap<String, Arc<Logger>>>,
    context: ContextFields,
}

impl Registry {
    pub fn new(context: ContextFields) -> Self {
        let mut loggers = HashMap::new();
        loggers.insert(String::new(), Arc::new(Logger::new("")));
        Self {
            loggers: RwLock::new(loggers),
            context,
        }
    }

    pub fn context(&self) -> &ContextFields {
        &self.context
    }

    pub fn root(&self) -> Arc<Logger> {
        self.logger("")
    }

    /// Returns the logger with this name, creating it on first use.
    pub fn logger(&self, name: &str) -> Arc<Logger> {
        if let Some(logger) = self.find(name) {
            return logger;
        }

        self.loggers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Logger::new(name)))
            .clone()
    }

    fn find(&self, name: &str) -> Option<Arc<Logger>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn loggers(&self) -> Vec<Arc<Logger>> {
        self.loggers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Existing loggers from `name` up to root, nearest first.
    fn chain(&self, name: &str) -> Vec<Arc<Logger>> {
        let mut chain = Vec::new();
        let mut current = name;
        loop {
            if let Some(logger) = self.find(current) {
                chain.push(logger);
            }
            if current.is_empty() {
                break;
            }
            current = parent_name(current);
        }
        chain
    }

    /// First level set on the way from `name` to root.
    pub fn effective_level(&self, name: &str) -> Severity {
        self.chain(name)
            .iter()
            .map(|logger| logger.level())
            .find(|level| *level != Severity::NOTSET)
            .unwrap_or(Severity::NOTSET)
    }

    pub fn is_enabled_for(&self, name: &str, level: Severity) -> bool {
        level >= self.effective_level(name)
    }

    /// Hands the record to every sink from its logger up to root, stopping
    /// at the first logger that does not propagate.
    pub fn dispatch(&self, mut record: Record) {
        if !self.is_enabled_for(&record.logger, record.level) {
            return;
        }

        record.context = self.context.clone();
        for logger in self.chain(&record.logger) {
            for sink in logger.sinks() {
                sink.handle(&record);
            }
            if !logger.propagate() {
                break;
            }
        }
    }

    pub fn log(&self, name: &str, level: Severity, message: impl Into<String>) {
        self.dispatch(Record::new(name, level, message));
    }

    pub fn flush(&self) {
        for logger in self.loggers() {
            for sink in logger.sinks() {
                sink.flush();
            }
        }
    }
}

fn parent_name(name: &str) -> &str {
    match (name.rfind("::"), name.rfind('.')) {
        (Some(colons), Some(dot)) if dot > colons => &name[..dot],
        (Some(colons), _) => &name[..colons],
        (None, Some(dot)) => &name[..dot],
        (None, None) => "",
    }
}
