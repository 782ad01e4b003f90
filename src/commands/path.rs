use std::process::ExitCode;

use adlog::config::{error_file_path, LoggingConfig};
use chrono::Local;
use clap::Args;

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cmd {
    #[arg(
        long,
        help = "Resolve the per-process file name for this pid instead of the current one."
    )]
    pub pid: Option<u32>,

    #[arg(long, help = "Also print the path of the errors file.")]
    pub errors: bool,
}

impl Cmd {
    pub fn run(&self, config: &LoggingConfig) -> eyre::Result<ExitCode> {
        let pid = self.pid.unwrap_or_else(std::process::id);

        let Some(path) = config.log_file_path(Local::now().date_naive(), pid) else {
            eprintln!("File logging is disabled (FILE=NONE)");
            return Ok(ExitCode::from(1));
        };

        println!("{}", path.display());
        if self.errors {
            println!("{}", error_file_path(&path).display());
        }
        Ok(ExitCode::SUCCESS)
    }
}
