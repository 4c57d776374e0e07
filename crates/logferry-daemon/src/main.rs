// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logferry::config::{config_path, Config};

#[tokio::main]
pub async fn main() -> ExitCode {
    let path = config_path();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            // no subscriber yet
            eprintln!("logferry: cannot load {}: {e}", path.display());
            return ExitCode::FAILURE;
        }
    };

    let env_filter = config.log_level.as_ref().to_string();

    #[allow(clippy::expect_used)]
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).expect("could not parse log level in configuration"),
        )
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .without_time()
        .finish();

    #[allow(clippy::expect_used)]
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    debug!("Logging subsystem enabled");
    info!("Loaded configuration from {}", path.display());

    let mut scheduler = match config.build_scheduler() {
        Ok(scheduler) => scheduler,
        Err(e) => {
            error!("Unable to build the pipeline: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let cancel_token = CancellationToken::new();
    tokio::spawn(wait_for_signal(cancel_token.clone()));

    scheduler.init_all();
    scheduler.start_all();
    scheduler.run(cancel_token).await;

    info!("logferry stopped");
    ExitCode::SUCCESS
}

#[cfg(unix)]
async fn wait_for_signal(cancel_token: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(e) => {
            error!("Unable to listen for SIGTERM: {e}");
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Unable to listen for ctrl-c: {e}");
            }
            cancel_token.cancel();
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Received interrupt, shutting down"),
        _ = terminate.recv() => info!("Received SIGTERM, shutting down"),
    }
    cancel_token.cancel();
}

#[cfg(not(unix))]
async fn wait_for_signal(cancel_token: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received interrupt, shutting down"),
        Err(e) => error!("Unable to listen for ctrl-c: {e}"),
    }
    cancel_token.cancel();
}
