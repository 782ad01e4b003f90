use std::{fmt::Display, path::PathBuf, process::ExitCode};

use adlog::config::LoggingConfig;
use clap::{command, Parser, Subcommand};
use eyre::Context;

mod exec;
mod info;
mod path;

#[derive(Subcommand, Debug)]
pub enum AdlogCmd {
    Path(path::Cmd),

    Info(info::Cmd),

    Exec(exec::Cmd),
}

impl Display for AdlogCmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdlogCmd::Path(_cmd) => write!(f, "path"),
            AdlogCmd::Info(_cmd) => write!(f, "info"),
            AdlogCmd::Exec(cmd) => write!(f, "exec {}", cmd),
        }
    }
}

fn parse_key_value(option: &str) -> eyre::Result<(String, String)> {
    let (key, value) = option
        .split_once('=')
        .ok_or_else(|| eyre::eyre!("Expected KEY=VALUE, got {}", option))?;
    Ok((key.trim().to_string(), value.to_string()))
}

#[derive(Parser)]
#[command(version, long_version = "")]
#[command(about = "Sets up process logging: log files per process or per day, console routing and stdout/stderr capture.", long_about = None, disable_help_subcommand = true)]
pub struct Adlog {
    #[arg(
        global = true,
        long,
        help = "JSON file holding a flat logging configuration object.",
        display_order = 0
    )]
    pub config: Option<PathBuf>,

    #[arg(
        global = true,
        short = 'o',
        long = "option",
        value_name = "KEY=VALUE",
        value_parser = parse_key_value,
        help = "Set a single configuration option, e.g. -o ERRORS_FILE=TRUE. Can be repeated.",
        display_order = 1
    )]
    pub options: Vec<(String, String)>,

    #[arg(
        global = true,
        long,
        help = "Logging style: VOID, SIMPLE, LIGHT, MEDIUM or HEAVY.",
        display_order = 2
    )]
    pub style: Option<String>,

    #[arg(
        global = true,
        long,
        help = "Log file selection: PROCESS, SAME or NONE.",
        display_order = 2
    )]
    pub file: Option<String>,

    #[arg(
        global = true,
        long,
        help = "Directory holding the log files, ~/logs by default.",
        display_order = 2
    )]
    pub path: Option<String>,

    #[command(subcommand)]
    pub cmd: AdlogCmd,
}

impl Adlog {
    /// JSON file first, then `-o` pairs, then the dedicated flags.
    fn logging_config(&self) -> eyre::Result<LoggingConfig> {
        let mut config = match &self.config {
            Some(path) => LoggingConfig::from_json_file(path)?,
            None => LoggingConfig::default(),
        };

        for (key, value) in &self.options {
            config
                .set(key, value)
                .with_context(|| format!("Invalid option {}={}", key, value))?;
        }

        let flags = [("STYLE", &self.style), ("FILE", &self.file), ("PATH", &self.path)];
        for (key, value) in flags {
            if let Some(value) = value {
                config.set(key, value)?;
            }
        }

        Ok(config)
    }

    pub fn run(self) -> eyre::Result<ExitCode> {
        let config = self.logging_config()?;

        match &self.cmd {
            AdlogCmd::Path(path) => path.run(&config),
            AdlogCmd::Info(info) => info.run(&config),
            AdlogCmd::Exec(exec) => exec.run(config),
        }
    }
}
