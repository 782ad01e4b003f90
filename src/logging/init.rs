use std::sync::{Arc, Mutex, PoisonError};

use tracing_subscriber::prelude::*;

use crate::config::LoggingConfig;

use super::{
    bridge::{ContextLayer, LogBridge},
    context::{Builder, LoggingContext},
    hook::install_panic_hook,
};

/// What an initialization call ended up doing.
pub enum Init {
    /// First call: context built and global hooks installed.
    Installed(Arc<LoggingContext>),
    /// Later call without a config, nothing changed.
    AlreadyConfigured(Arc<LoggingContext>),
    /// Later call with a config, sinks rebuilt.
    Reconfigured(Arc<LoggingContext>),
}

impl Init {
    pub fn context(&self) -> &Arc<LoggingContext> {
        match self {
            Init::Installed(ctx) | Init::AlreadyConfigured(ctx) | Init::Reconfigured(ctx) => ctx,
        }
    }

    pub fn into_context(self) -> Arc<LoggingContext> {
        match self {
            Init::Installed(ctx) | Init::AlreadyConfigured(ctx) | Init::Reconfigured(ctx) => ctx,
        }
    }
}

/// Makes sure hooks are installed once, however often initialization is requested.
pub struct InitGuard {
    state: Mutex<Option<Arc<LoggingContext>>>,
}

impl InitGuard {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(None),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.context().is_some()
    }

    pub fn context(&self) -> Option<Arc<LoggingContext>> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn init_with<B, I>(&self, config: Option<LoggingConfig>, build: B, install: I) -> eyre::Result<Init>
    where
        B: FnOnce(Option<&LoggingConfig>) -> eyre::Result<Arc<LoggingContext>>,
        I: FnOnce(&Arc<LoggingContext>) -> eyre::Result<()>,
    {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(ctx) = state.as_ref() {
            return match config {
                None => {
                    ctx.warning("logging is already configured");
                    Ok(Init::AlreadyConfigured(ctx.clone()))
                }
                Some(config) => {
                    ctx.warning("re-configure logging now...");
                    ctx.configure(&config)?;
                    Ok(Init::Reconfigured(ctx.clone()))
                }
            };
        }

        let ctx = build(config.as_ref())?;
        install(&ctx)?;
        if config.is_some() {
            ctx.announce_start();
        }

        *state = Some(ctx.clone());
        Ok(Init::Installed(ctx))
    }
}

impl Default for InitGuard {
    fn default() -> Self {
        Self::new()
    }
}

static GUARD: InitGuard = InitGuard::new();

/// Sets up process-wide logging. The first call installs the `log` logger,
/// the `tracing` subscriber and the panic hook; later calls only warn, or
/// rebuild the sinks when given a config.
pub fn init(config: Option<LoggingConfig>) -> eyre::Result<Arc<LoggingContext>> {
    GUARD
        .init_with(config, build_context, install_global_hooks)
        .map(Init::into_context)
}

/// The context installed by [`init`], if any.
pub fn installed() -> Option<Arc<LoggingContext>> {
    GUARD.context()
}

fn build_context(config: Option<&LoggingConfig>) -> eyre::Result<Arc<LoggingContext>> {
    let mut builder = Builder::new();
    if let Some(config) = config {
        builder = builder.with_config(config.clone());
    }
    builder.build()
}

fn install_global_hooks(ctx: &Arc<LoggingContext>) -> eyre::Result<()> {
    LogBridge::new(ctx.clone()).init()?;

    let subscriber = tracing_subscriber::registry().with(ContextLayer::new(ctx.clone()));
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        ctx.warning("a global tracing subscriber is already set, tracing events are not captured");
    }

    install_panic_hook(ctx.clone());
    Ok(())
}
