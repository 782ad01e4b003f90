use std::{fmt::Display, io::Write, process::ExitCode, process::Stdio, sync::Arc};

use adlog::{config::LoggingConfig, LoggingContext};
use clap::Args;
use eyre::Context;
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Command,
};

/// Which capture a child stream is forwarded into.
#[derive(Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

#[derive(Args, Debug)]
pub struct Cmd {
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "COMMAND",
        help = "Program and arguments to run. Its stdout and stderr are captured into the configured loggers."
    )]
    pub command: Vec<String>,
}

impl Display for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.command.join(" "))
    }
}

impl Cmd {
    pub fn run(&self, config: LoggingConfig) -> eyre::Result<ExitCode> {
        let ctx = adlog::init(Some(config))?;

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .context("Failed building the async runtime")?;

        let code = runtime.block_on(self.spawn_and_forward(ctx.clone()))?;
        ctx.flush();

        Ok(ExitCode::from(code))
    }

    async fn spawn_and_forward(&self, ctx: Arc<LoggingContext>) -> eyre::Result<u8> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| eyre::eyre!("No command given"))?;

        log::debug!("spawning {}", self);

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("Failed spawning {}", program))?;

        let stdout = child.stdout.take().ok_or_else(|| eyre::eyre!("Child stdout was not piped"))?;
        let stderr = child.stderr.take().ok_or_else(|| eyre::eyre!("Child stderr was not piped"))?;

        let (out, err, status) = tokio::join!(
            forward_lines(stdout, &ctx, Channel::Stdout),
            forward_lines(stderr, &ctx, Channel::Stderr),
            child.wait(),
        );
        out?;
        err?;
        let status = status.context("Failed waiting for child process")?;

        log::debug!("{} exited with {}", program, status);

        // Killed by a signal: no code, report a generic failure.
        Ok(status.code().map(|c| (c & 0xff) as u8).unwrap_or(1))
    }
}

async fn forward_lines<R>(reader: R, ctx: &LoggingContext, channel: Channel) -> eyre::Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        let mut capture = match channel {
            Channel::Stdout => ctx.stdout(),
            Channel::Stderr => ctx.stderr(),
        };
        capture.write_all(line.as_bytes())?;
        capture.write_all(b"\n")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use adlog::{
        logging::{LevelBasedFormatter, MemorySink, SharedBuffer, Style},
        Builder, Severity,
    };

    use super::*;

    #[tokio::test]
    async fn child_lines_reach_named_loggers() {
        let ctx = Builder::new()
            .with_stdout(SharedBuffer::new())
            .with_stderr(SharedBuffer::new())
            .with_console(Vec::<u8>::new)
            .build()
            .unwrap();
        let memory = Arc::new(MemorySink::new(Box::new(LevelBasedFormatter::new(Style::Void))));
        ctx.root().add_sink(memory.clone());

        let out: &[u8] = b"first\nsecond\n";
        let err: &[u8] = b"oops\n";
        forward_lines(out, &ctx, Channel::Stdout).await.unwrap();
        forward_lines(err, &ctx, Channel::Stderr).await.unwrap();

        let records = memory.records();
        let summary: Vec<_> = records
            .iter()
            .map(|r| (r.logger.as_str(), r.level, r.message.as_str()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("print", Severity::INFO, "first"),
                ("print", Severity::INFO, "second"),
                ("stderr", Severity::ERROR, "oops"),
            ]
        );
    }
}
