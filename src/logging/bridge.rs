use core::fmt;
use std::sync::Arc;

use eyre::Context as _;
use log::{LevelFilter, Log};
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::layer::{Context, Layer};

use super::{context::LoggingContext, level::Severity, record::Record};

/// `log` facade backend: records are dispatched to the logger named by their target.
pub struct LogBridge {
    context: Arc<LoggingContext>,
}

impl LogBridge {
    pub fn new(context: Arc<LoggingContext>) -> Self {
        Self { context }
    }

    pub fn init(self) -> eyre::Result<()> {
        log::set_max_level(LevelFilter::Trace);
        log::set_boxed_logger(Box::new(self)).context("Failed registering boxed logger")?;

        Ok(())
    }
}

impl Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.context
            .registry()
            .is_enabled_for(metadata.target(), Severity::from(metadata.level()))
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let rec = Record::new(
            record.target(),
            Severity::from(record.level()),
            record.args().to_string(),
        )
        .with_location(record.file(), record.line(), record.module_path());

        self.context.registry().dispatch(rec);
    }

    fn flush(&self) {
        self.context.flush()
    }
}

/// `tracing` layer feeding events into a [`LoggingContext`]; event fields
/// other than `message` travel as call-site fields.
pub struct ContextLayer {
    context: Arc<LoggingContext>,
}

impl ContextLayer {
    pub fn new(context: Arc<LoggingContext>) -> Self {
        Self { context }
    }
}

impl<S: Subscriber> Layer<S> for ContextLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let mut record = Record::new(meta.target(), Severity::from(meta.level()), visitor.message)
            .with_location(meta.file(), meta.line(), meta.module_path());
        record.fields = visitor.fields;

        self.context.registry().dispatch(record);
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push((field.name().to_string(), format!("{:?}", value)));
        }
    }
}
