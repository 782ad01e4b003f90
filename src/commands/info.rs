use std::process::ExitCode;

use adlog::{
    config::{error_file_path, LoggingConfig},
    utils::{current_user, host_name},
};
use chrono::Local;
use clap::{Args, CommandFactory};

use crate::commands::Adlog;

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {}

impl Cmd {
    pub fn run(&self, config: &LoggingConfig) -> eyre::Result<ExitCode> {
        let log_file = config.log_file_path(Local::now().date_naive(), std::process::id());

        println!(
            "Version:        {}",
            Adlog::command().get_version().unwrap_or("")
        );
        println!("User:           {}", current_user());
        println!("Host:           {}", host_name());
        println!("Log Directory:  {}", config.log_dir().display());
        println!(
            "Log File:       {}",
            log_file
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "-".to_string())
        );
        if config.errors_file {
            if let Some(path) = &log_file {
                println!("Errors File:    {}", error_file_path(path).display());
            }
        }

        println!();
        for (key, value) in config.entries() {
            println!("{:<18} {}", key, value);
        }
        Ok(ExitCode::SUCCESS)
    }
}
