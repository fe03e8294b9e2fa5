//! CLI entry point (spec §6): parses the `serve` subcommand, builds the
//! `TopicRegistry` and `WorkerConfig`, and runs the scheduler until SIGINT
//! or SIGTERM.
//!
//! Exit codes: `0` clean shutdown, `1` configuration error, `2` fatal
//! runtime error — matching the teacher's convention of `anyhow::Result`
//! at the CLI boundary only, with typed errors everywhere beneath it.

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use task_worker::config::{Cli, Command, ServeArgs, WorkerConfig};
use task_worker::engine::HttpEngineClient;
use task_worker::logging;
use task_worker::package::PackageRef;
use task_worker::registry::TopicRegistry;
use task_worker::runner::ExecutorRunner;
use task_worker::scheduler::Scheduler;
use task_worker::secrets::{EmptyProvider, Provider};

const EXIT_CONFIG_ERROR: i32 = 1;
const EXIT_RUNTIME_ERROR: i32 = 2;

fn main() {
    let _ = dotenvy::dotenv();
    let log_writer = logging::init();

    let cli = Cli::parse();
    let Command::Serve(args) = cli.command;

    match run(args, log_writer) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            tracing::error!(error = %e, "fatal error");
            std::process::exit(exit_code_for(&e));
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let is_config_error = err
        .chain()
        .any(|cause| cause.downcast_ref::<task_worker::error::ConfigError>().is_some());
    if is_config_error {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_RUNTIME_ERROR
    }
}

fn run(args: ServeArgs, log_writer: Arc<logging::RedactingWriter>) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("failed to start async runtime")?;
    runtime.block_on(run_async(args, log_writer))
}

async fn run_async(args: ServeArgs, log_writer: Arc<logging::RedactingWriter>) -> anyhow::Result<()> {
    let config = WorkerConfig::from_serve_args(&args).context("invalid worker configuration")?;

    let package_refs: Vec<PackageRef> = args
        .packages
        .iter()
        .cloned()
        .map(PackageRef::classify)
        .collect();
    let registry = Arc::new(
        TopicRegistry::build(&package_refs).context("failed to load worker packages")?,
    );
    if registry.is_empty() {
        anyhow::bail!(task_worker::error::ConfigError::ManifestMissing(
            "no topics declared across the given packages".into()
        ));
    }
    tracing::info!(topics = ?registry.topic_keys(), "loaded topic registry");

    let engine = Arc::new(HttpEngineClient::new(
        config.engine_url.clone(),
        config.authorization.clone(),
        config.call_timeout,
    ));

    registry
        .validate_secret_profiles(&config.secret_profiles)
        .context("unresolvable secrets provider")?;

    let mut secret_providers: std::collections::HashMap<String, Arc<dyn Provider>> =
        std::collections::HashMap::new();
    for profile in &config.secret_profiles {
        secret_providers.insert(profile.clone(), Arc::new(EmptyProvider) as Arc<dyn Provider>);
    }

    let executor_binary = std::env::var("TASK_EXECUTOR_BINARY")
        .unwrap_or_else(|_| "task-executor".to_string())
        .into();

    let runner = Arc::new(
        ExecutorRunner::new(
            engine.clone(),
            secret_providers,
            config.clone(),
            executor_binary,
        )
        .with_log_writer(log_writer),
    );

    let scheduler = Scheduler::new(engine, registry, runner, config);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, draining in-flight leases gracefully");
        let _ = shutdown_tx.send(true);

        // A second signal during the graceful drain means the operator
        // wants out now rather than waiting on in-flight subprocesses.
        wait_for_shutdown_signal().await;
        tracing::warn!("second shutdown signal received, aborting immediately");
        std::process::exit(EXIT_RUNTIME_ERROR);
    });

    scheduler.run(shutdown_rx).await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
