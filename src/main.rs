//! WiBed node agent
//!
//! Runs a single tick per invocation: report the node status to the
//! controller, apply whatever it answers and persist the result. An external
//! scheduler (cron) provides the periodic loop.

mod agent;
mod artifact;
mod command;
mod config;
mod lifecycle;
mod node;
mod poll;
mod results;
mod settings;
#[cfg(test)]
mod testutil;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use wibed_shared::keys;

use agent::{Agent, TickOutcome};
use artifact::{HttpFetcher, InstallHook};
use command::{CommandChannel, ExecutorConfig, PipeSink};
use config::{open_store, resolve_backend, Backend, BackendKind};
use poll::HttpController;
use results::ResultStore;
use settings::AgentSettings;

/// WiBed testbed node agent
#[derive(Parser, Debug)]
#[command(name = "wibed-node", version)]
struct Cli {
    /// Directory of the flat-file config backend
    #[arg(long, env = "WIBED_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Config backend
    #[arg(long, env = "WIBED_CONFIG_BACKEND", value_enum, default_value_t = BackendKind::Auto)]
    config_backend: BackendKind,

    /// Directory the executor writes results into
    #[arg(long, env = "WIBED_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Named pipe shared with the executor
    #[arg(long, env = "WIBED_PIPE")]
    pipe: Option<PathBuf>,

    /// Executor program
    #[arg(long, env = "WIBED_EXECUTOR")]
    executor: Option<PathBuf>,

    /// File receiving the executor's log output
    #[arg(long, env = "WIBED_EXECUTOR_LOG")]
    executor_log: Option<PathBuf>,

    /// Where firmware images are downloaded
    #[arg(long, env = "WIBED_FIRMWARE_DIR")]
    firmware_dir: Option<PathBuf>,

    /// Where experiment overlays are downloaded
    #[arg(long, env = "WIBED_OVERLAY_DIR")]
    overlay_dir: Option<PathBuf>,

    /// Base URL for artifact downloads (defaults to the controller URL)
    #[arg(long, env = "WIBED_ARTIFACT_URL")]
    artifact_url: Option<String>,

    /// Program installing a downloaded firmware image
    #[arg(long, env = "WIBED_FIRMWARE_HOOK")]
    firmware_hook: Option<PathBuf>,

    /// Program installing a downloaded overlay
    #[arg(long, env = "WIBED_OVERLAY_HOOK")]
    overlay_hook: Option<PathBuf>,

    /// Timeout for controller requests and downloads
    #[arg(long, env = "WIBED_HTTP_TIMEOUT_SECS")]
    http_timeout_secs: Option<u64>,

    /// How long to wait for the executor to come up
    #[arg(long, env = "WIBED_EXECUTOR_START_TIMEOUT_SECS")]
    executor_start_timeout_secs: Option<u64>,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn into_settings(self) -> AgentSettings {
        let defaults = AgentSettings::default();
        AgentSettings {
            config_dir: self.config_dir.unwrap_or(defaults.config_dir),
            config_backend: self.config_backend,
            results_dir: self.results_dir.unwrap_or(defaults.results_dir),
            pipe: self.pipe.unwrap_or(defaults.pipe),
            executor: self.executor.unwrap_or(defaults.executor),
            executor_log: self.executor_log.or(defaults.executor_log),
            firmware_dir: self.firmware_dir.unwrap_or(defaults.firmware_dir),
            overlay_dir: self.overlay_dir.unwrap_or(defaults.overlay_dir),
            artifact_url: self.artifact_url.or(defaults.artifact_url),
            firmware_hook: self.firmware_hook.or(defaults.firmware_hook),
            overlay_hook: self.overlay_hook.or(defaults.overlay_hook),
            http_timeout: self
                .http_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            executor_start_timeout: self
                .executor_start_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.executor_start_timeout),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    match run(cli.into_settings()).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(settings: AgentSettings) -> anyhow::Result<ExitCode> {
    let backend = resolve_backend(settings.config_backend, &settings.config_dir);
    let store = open_store(&backend);
    match &backend {
        Backend::File(dir) => info!("Using {} config backend at {}", store.name(), dir.display()),
        Backend::Uci(program) => info!("Using {} config backend via {}", store.name(), program.display()),
    }

    let api_url = store
        .require(keys::API_URL)
        .await
        .context("loading controller URL")?;

    let controller = HttpController::new(api_url.clone(), settings.http_timeout)
        .context("building controller client")?;
    let fetcher = HttpFetcher::new(
        settings.artifact_base(&api_url),
        &settings.firmware_dir,
        &settings.overlay_dir,
        settings.http_timeout,
    )
    .context("building artifact client")?;

    let sink = PipeSink::new(
        &settings.pipe,
        ExecutorConfig {
            program: settings.executor.clone(),
            results_dir: settings.results_dir.clone(),
            log_file: settings.executor_log.clone(),
        },
        settings.executor_start_timeout,
    );

    let mut agent = Agent::new(
        store,
        Box::new(controller),
        Box::new(fetcher),
        ResultStore::new(&settings.results_dir),
        CommandChannel::new(Box::new(sink)),
    )
    .with_hooks(
        InstallHook::new("firmware", settings.firmware_hook.clone()),
        InstallHook::new("overlay", settings.overlay_hook.clone()),
    );

    match agent.tick().await {
        Ok(TickOutcome::Completed(applied)) => {
            info!("Node now {}", applied.to);
            Ok(ExitCode::SUCCESS)
        }
        Ok(TickOutcome::Unreachable(e)) => {
            warn!("Controller unreachable this tick: {}", e);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            error!("Tick failed: {}", e);
            Ok(ExitCode::from(e.exit_code()))
        }
    }
}
