//! Process-wide logging setup: file and console sinks wired from a flat
//! configuration mapping, stdout/stderr capture that feeds named loggers,
//! severity-dependent formatting and a panic hook that writes the trace to the
//! captured error stream.
//!
//! ```no_run
//! use adlog::config::LoggingConfig;
//!
//! let config = LoggingConfig::from_pairs([("STYLE", "SIMPLE"), ("FILE", "SAME")])?;
//! let logging = adlog::init(Some(config))?;
//!
//! log::info!("written to ~/logs/YYMMDD.log");
//! use std::io::Write;
//! writeln!(logging.stdout(), "captured by the print logger")?;
//! # Ok::<(), eyre::Report>(())
//! ```

pub mod config;
pub mod logging;
pub mod utils;

pub use config::LoggingConfig;
pub use logging::{init, Builder, LoggingContext, Severity};
