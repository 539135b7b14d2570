// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reconnect supervisor with exponential backoff + jitter.
//
// Transient failures reconnect and resume from the last replay cursor.
// Auth failures get one token refresh per attempt.  Permanent failures
// propagate to the caller.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, info, warn};

use printrelay_core::config::ReconnectConfig;
use printrelay_core::error::{ErrorClass, RelayError, Result, classify_error};
use printrelay_core::session::TokenProvider;

use crate::engine::{EventHandler, SubscriptionEngine};
use crate::proto::ReplayFrom;

/// Reconnect settings.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub enabled: bool,
    /// Consecutive failed attempts before giving up.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

/// What to do after a failed session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Reconnect after this delay.
    RetryAfter(Duration),
    /// Refresh credentials, then reconnect.
    RefreshAndRetry,
    /// Error is not recoverable by reconnecting.
    GiveUp(ErrorClass),
    /// Maximum consecutive attempts used up.
    Exhausted,
}

/// Decide whether to reconnect after `err` on the given attempt (0-based).
pub fn should_retry(err: &RelayError, attempt: u32, policy: &ReconnectPolicy) -> RetryDecision {
    if !policy.enabled {
        return RetryDecision::GiveUp(classify_error(err));
    }
    match classify_error(err) {
        ErrorClass::Permanent => {
            info!("permanent error, not reconnecting");
            RetryDecision::GiveUp(ErrorClass::Permanent)
        }
        _ if attempt >= policy.max_retries => {
            warn!(attempt, max = policy.max_retries, "reconnect limit exhausted");
            RetryDecision::Exhausted
        }
        ErrorClass::Auth => RetryDecision::RefreshAndRetry,
        ErrorClass::Transient => {
            let delay = compute_delay(attempt, policy);
            debug!(attempt, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
            RetryDecision::RetryAfter(delay)
        }
    }
}

/// delay = min(base * 2^attempt + jitter, max_delay), jitter in [0, base).
pub fn compute_delay(attempt: u32, policy: &ReconnectPolicy) -> Duration {
    let base_ms = policy.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(16));
    let jitter_ms = if base_ms == 0 {
        0
    } else {
        rand::thread_rng().gen_range(0..base_ms)
    };
    let capped_ms = exp_ms
        .saturating_add(jitter_ms)
        .min(policy.max_delay.as_millis() as u64);
    Duration::from_millis(capped_ms)
}

/// Runs a subscription and keeps it alive across transient failures.
pub struct Supervisor {
    policy: ReconnectPolicy,
    tokens: Arc<dyn TokenProvider>,
}

impl Supervisor {
    pub fn new(policy: ReconnectPolicy, tokens: Arc<dyn TokenProvider>) -> Self {
        Self { policy, tokens }
    }

    /// Subscribe to `topic`, reconnecting per policy.  Returns `Ok` once the
    /// engine is stopped, or the error that ended the last session.
    pub async fn run(
        &self,
        engine: &SubscriptionEngine,
        topic: &str,
        handler: &dyn EventHandler,
    ) -> Result<()> {
        let mut attempt: u32 = 0;
        loop {
            let replay = match engine.latest_replay_id() {
                Some(cursor) => ReplayFrom::Cursor(cursor),
                None => ReplayFrom::Latest,
            };
            let batches_before = engine.batches_received();

            let err = match engine.subscribe_from(topic, handler, replay).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };

            if engine.batches_received() > batches_before {
                attempt = 0;
            }

            match should_retry(&err, attempt, &self.policy) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        error = %err,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "subscription lost, reconnecting"
                    );
                    let stop = engine.stop_handle();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = stop.stopped() => return Ok(()),
                    }
                }
                RetryDecision::RefreshAndRetry => {
                    warn!(error = %err, "credentials rejected, refreshing token");
                    if !self.tokens.refresh().await {
                        error!("token refresh failed");
                        return Err(err);
                    }
                }
                RetryDecision::GiveUp(class) => {
                    error!(error = %err, ?class, "subscription ended");
                    return Err(err);
                }
                RetryDecision::Exhausted => {
                    error!(error = %err, attempts = attempt, "giving up after repeated failures");
                    return Err(err);
                }
            }
            attempt += 1;
        }
    }
}
