// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Service wiring: builds the session, transport, engine, drivers and job
// pipeline from one `AppConfig`, and runs them under the reconnect
// supervisor.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use printrelay_core::error::{RelayError, Result};
use printrelay_core::session::{Session, StaticTokenProvider, TokenProvider, redact_token};
use printrelay_core::AppConfig;
use printrelay_jobs::{ContentResolver, JobProcessor};
use printrelay_print::{AutoConfigProbe, DriverRegistry, DriverSettings};
use printrelay_stream::{
    EngineOptions, GrpcTransport, ReconnectPolicy, StopHandle, SubscriptionEngine, Supervisor,
};
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "PRINTRELAY_CONFIG";

/// Config file used when neither an argument nor `PRINTRELAY_CONFIG` is given.
pub const DEFAULT_CONFIG_FILE: &str = "printrelay.toml";

/// First CLI argument, else `PRINTRELAY_CONFIG`, else `printrelay.toml`.
pub fn config_path(arg: Option<String>, env: Option<String>) -> PathBuf {
    arg.or(env)
        .filter(|p| !p.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

/// Drive `run` to completion, stopping it gracefully on the first
/// interrupt.  The batch in hand is finished and the subscription winds
/// down; a second interrupt abandons it and yields `None`.
pub async fn run_until_interrupted<R, I, F>(
    run: R,
    stop: StopHandle,
    mut interrupt: I,
) -> Option<Result<()>>
where
    R: Future<Output = Result<()>>,
    I: FnMut() -> F,
    F: Future<Output = ()>,
{
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => return Some(result),
        _ = interrupt() => {
            info!("interrupt received, finishing current work (interrupt again to exit now)");
            stop.stop();
        }
    }
    tokio::select! {
        result = &mut run => Some(result),
        _ = interrupt() => {
            warn!("second interrupt, exiting without waiting");
            None
        }
    }
}

/// The running connector.
pub struct Relay {
    channel: String,
    engine: SubscriptionEngine,
    processor: JobProcessor,
    probe: Arc<AutoConfigProbe>,
    supervisor: Supervisor,
}

impl Relay {
    /// Wire every component.  Nothing touches the network yet.
    pub fn init(config: AppConfig) -> Result<Self> {
        if config.auth.access_token.is_empty() {
            return Err(RelayError::Config(
                "no access token: set auth.access_token or PRINTRELAY_ACCESS_TOKEN".into(),
            ));
        }
        let tokens: Arc<dyn TokenProvider> =
            Arc::new(StaticTokenProvider::new(config.auth.access_token.clone()));
        let session = Arc::new(Session::from_config(&config, tokens.clone())?);
        info!(
            instance = %session.instance_url(),
            tenant = %session.tenant_id(),
            token = %redact_token(&session.access_token()),
            "session ready"
        );

        let transport = Arc::new(GrpcTransport::new(&config.platform.endpoint, session.clone())?);
        let engine = SubscriptionEngine::new(
            transport,
            EngineOptions {
                window_size: config.platform.window_size,
                num_requested: config.platform.num_requested,
            },
        );

        let printing = &config.printing;
        let probe = Arc::new(AutoConfigProbe::new(Duration::from_secs(printing.probe_timeout_secs)));
        let drivers = Arc::new(DriverRegistry::new(DriverSettings::from(printing)));
        let resolver = ContentResolver::new(
            Duration::from_secs(printing.download_timeout_secs),
            Some(session),
        )?;
        let processor = JobProcessor::new(resolver, drivers, probe.clone())
            .with_auto_config(printing.auto_config);

        let supervisor = Supervisor::new(ReconnectPolicy::from(&config.reconnect), tokens);

        Ok(Self {
            channel: config.platform.channel,
            engine,
            processor,
            probe,
            supervisor,
        })
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.engine.stop_handle()
    }

    pub fn probe(&self) -> Arc<AutoConfigProbe> {
        self.probe.clone()
    }

    /// Subscribe and print until stopped or a non-recoverable error.
    pub async fn run(&self) -> Result<()> {
        info!(channel = %self.channel, "starting subscription");
        self.supervisor
            .run(&self.engine, &self.channel, &self.processor)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_precedence() {
        assert_eq!(
            config_path(Some("a.toml".into()), Some("b.toml".into())),
            PathBuf::from("a.toml")
        );
        assert_eq!(config_path(None, Some("b.toml".into())), PathBuf::from("b.toml"));
        assert_eq!(config_path(None, None), PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(config_path(None, Some("  ".into())), PathBuf::from(DEFAULT_CONFIG_FILE));
    }

    #[test]
    fn init_requires_token() {
        let mut config = AppConfig::default();
        config.platform.instance_url = "https://acme.my.salesforce.com".into();
        config.platform.tenant_id = "00D000000000001".into();
        let err = Relay::init(config).err().unwrap();
        assert!(matches!(err, RelayError::Config(_)));
    }

    #[test]
    fn init_requires_instance_url() {
        let mut config = AppConfig::default();
        config.auth.access_token = "00Dtoken".into();
        config.platform.tenant_id = "00D000000000001".into();
        let err = Relay::init(config).err().unwrap();
        assert!(matches!(err, RelayError::Config(msg) if msg.contains("instance_url")));
    }

    #[test]
    fn init_builds_with_complete_config() {
        let mut config = AppConfig::default();
        config.platform.instance_url = "https://acme.my.salesforce.com".into();
        config.platform.tenant_id = "00D000000000001".into();
        config.auth.access_token = "00Dtoken".into();
        let relay = Relay::init(config).unwrap();
        assert!(!relay.stop_handle().is_stopped());
    }

    #[tokio::test]
    async fn first_interrupt_lets_work_finish() {
        use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

        let stop = StopHandle::new();
        let finished = Arc::new(AtomicBool::new(false));
        let run = {
            let stop = stop.clone();
            let finished = finished.clone();
            async move {
                stop.stopped().await;
                // Work still in hand when the stop arrived.
                tokio::time::sleep(Duration::from_millis(50)).await;
                finished.store(true, Ordering::SeqCst);
                Ok::<(), RelayError>(())
            }
        };
        let calls = Arc::new(AtomicUsize::new(0));
        let interrupts = calls.clone();
        let outcome = run_until_interrupted(run, stop.clone(), move || {
            let n = interrupts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n > 0 {
                    std::future::pending::<()>().await;
                }
            }
        })
        .await;

        assert!(matches!(outcome, Some(Ok(()))));
        assert!(finished.load(Ordering::SeqCst));
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn second_interrupt_abandons_the_run() {
        let stop = StopHandle::new();
        let outcome = run_until_interrupted(
            std::future::pending::<Result<()>>(),
            stop.clone(),
            || async {},
        )
        .await;
        assert!(outcome.is_none());
        assert!(stop.is_stopped());
    }

    #[tokio::test]
    async fn run_ending_on_its_own_is_returned() {
        let stop = StopHandle::new();
        let outcome = run_until_interrupted(
            async { Err::<(), _>(RelayError::Transport("reset".into())) },
            stop.clone(),
            || std::future::pending::<()>(),
        )
        .await;
        assert!(matches!(outcome, Some(Err(RelayError::Transport(_)))));
        assert!(!stop.is_stopped());
    }
}
