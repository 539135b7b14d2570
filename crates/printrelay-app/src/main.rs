// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printrelay — platform print events in, printer output out.
//
// Entry point. Loads configuration, initialises logging, wires the services
// and runs the subscription until interrupted.

mod services;

use std::process::ExitCode;

use printrelay_core::AppConfig;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use services::{CONFIG_ENV, Relay, config_path, run_until_interrupted};

#[tokio::main]
async fn main() -> ExitCode {
    let path = config_path(std::env::args().nth(1), std::env::var(CONFIG_ENV).ok());
    let config = match AppConfig::load(&path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("printrelay: {e}");
            return ExitCode::FAILURE;
        }
    };

    // RUST_LOG wins over the configured level.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), config = %path.display(), "Printrelay starting");
    printrelay_stream::install_crypto_provider();

    let relay = match Relay::init(config) {
        Ok(relay) => relay,
        Err(e) => {
            error!(error = %e, "startup failed");
            return ExitCode::FAILURE;
        }
    };
    let stop = relay.stop_handle();

    #[cfg(unix)]
    spawn_cache_reset(relay.probe());

    let outcome = run_until_interrupted(relay.run(), stop, || async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    })
    .await;
    match outcome {
        Some(Ok(())) => ExitCode::SUCCESS,
        Some(Err(e)) => {
            error!(error = %e, "subscription ended");
            ExitCode::FAILURE
        }
        None => ExitCode::FAILURE,
    }
}

/// SIGHUP forgets every probed printer, for operators who changed a device.
#[cfg(unix)]
fn spawn_cache_reset(probe: std::sync::Arc<printrelay_print::AutoConfigProbe>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            error!(error = %e, "cannot listen for SIGHUP");
            return;
        }
    };
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            probe.clear_cache(None, None);
        }
    });
}
