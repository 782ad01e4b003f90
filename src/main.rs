mod commands;

use crate::commands::Adlog;
use clap::Parser;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Adlog::parse();

    match cli.run() {
        Err(err) => {
            // Once logging is installed the error goes through the stderr
            // capture, so it lands in the log files as well.
            if let Some(ctx) = adlog::logging::installed() {
                ctx.report_error(&err);
                ctx.flush();
                return ExitCode::from(1);
            }

            let root = err.root_cause();

            eprint!("\x1b[31m");
            eprintln!("Error: {}", err);
            eprintln!();
            eprintln!("Caused by:");
            eprint!("  {}", root);
            eprintln!("\x1b[0m");
            ExitCode::from(1)
        }
        Ok(code) => code,
    }
}
