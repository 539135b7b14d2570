// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Job pipeline: event routing, idempotency, content resolution, ZPL
// auto-configuration and driver dispatch.
//
// Runs synchronously per event on the subscription task.  Every failure is
// logged and reported as `false`; nothing here ends the subscription.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{Instrument, debug, error, info, info_span, warn};

use printrelay_core::error::{RelayError, Result};
use printrelay_core::types::{ContentType, EventRecord, PRINT_JOB_EVENT, PrintJob, PrinterType};
use printrelay_print::driver::{Capability, DriverSource, PrinterDriver};
use printrelay_print::zpl::{self, AutoConfigProbe, ZplSetup};
use printrelay_stream::engine::EventHandler;

use crate::content::ContentResolver;
use crate::idempotency::IdempotencyGuard;

pub struct JobProcessor {
    guard: IdempotencyGuard,
    resolver: ContentResolver,
    drivers: Arc<dyn DriverSource>,
    probe: Arc<AutoConfigProbe>,
    auto_config: bool,
}

impl JobProcessor {
    pub fn new(
        resolver: ContentResolver,
        drivers: Arc<dyn DriverSource>,
        probe: Arc<AutoConfigProbe>,
    ) -> Self {
        Self {
            guard: IdempotencyGuard::new(),
            resolver,
            drivers,
            probe,
            auto_config: true,
        }
    }

    /// Enable or disable probing ZPL printers for a setup block.
    pub fn with_auto_config(mut self, enabled: bool) -> Self {
        self.auto_config = enabled;
        self
    }

    pub fn idempotency(&self) -> &IdempotencyGuard {
        &self.guard
    }

    pub fn probe(&self) -> &AutoConfigProbe {
        &self.probe
    }

    /// Handle one decoded event.  `true` means printed, already printed, or
    /// nothing to do; `false` means the event was ignored or the job failed.
    pub async fn process(&self, record: &EventRecord) -> bool {
        let event_type = record.event_type();
        if event_type != PRINT_JOB_EVENT {
            info!(event_type = %event_type, "ignoring event");
            return false;
        }

        let job = PrintJob::from_event(record);
        let span = info_span!(
            "job",
            job_id = %job.job_id,
            correlation = %job.correlation_id,
            printer = %job.printer_addr(),
        );

        async {
            if self.guard.check_and_record(&job.correlation_id) {
                info!("duplicate print job, already handled");
                return true;
            }
            info!(%job, "print job received");

            match self.run(&job).await {
                Ok(()) => {
                    info!(copies = job.qty, "print job completed");
                    true
                }
                Err(e) => {
                    error!(error = %e, "print job failed");
                    false
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn run(&self, job: &PrintJob) -> Result<()> {
        if job.printer_host.is_empty() {
            return Err(RelayError::InvalidJob("printer host is empty".into()));
        }
        if job.content.trim().is_empty() {
            return Err(RelayError::InvalidJob("content is empty".into()));
        }
        if job.is_expired(Utc::now()) {
            warn!(expire_after = job.expire_after, "job past its expiry window, printing anyway");
        }

        let driver = self
            .drivers
            .get_driver(&job.printer_host, job.printer_port, &job.printer_type);
        check_route(job, driver.as_ref())?;

        let payload = self.resolver.resolve(job).await?;
        info!(
            bytes = payload.len(),
            sha256 = %hex::encode(Sha256::digest(&payload)),
            "content resolved"
        );

        let payload = if job.printer_type == PrinterType::Zpl && job.content_type.is_raw() {
            self.prepare_zpl(job, payload).await
        } else {
            payload
        };

        if job.content_type.is_raw() {
            for copy in 1..=job.qty {
                debug!(copy, of = job.qty, target = %driver.target(), "sending copy");
                driver.print_raw(&payload).await.map_err(|e| {
                    RelayError::Printer(format!("copy {copy} of {}: {e}", job.qty))
                })?;
            }
        } else {
            driver
                .print_document(&payload, &job.title, &job.options)
                .await?;
        }
        Ok(())
    }

    /// Prepend a setup block unless the payload already sets label geometry.
    async fn prepare_zpl(&self, job: &PrintJob, payload: Vec<u8>) -> Vec<u8> {
        if !zpl::validate_zpl(&payload) {
            warn!("payload does not look like ZPL (^XA ... ^XZ)");
        }
        if zpl::has_setup_commands(&payload) {
            debug!("payload carries ^PW/^LL, skipping auto-config");
            return payload;
        }

        let setup = match ZplSetup::from_options(&job.options) {
            Some(explicit) => {
                debug!("using explicit zpl options");
                explicit
            }
            None if self.auto_config => {
                let info = self.probe.get_info(&job.printer_host, job.printer_port).await;
                ZplSetup::from_info(&info)
            }
            None => return payload,
        };
        if !setup.is_empty() {
            info!(setup = ?setup, "prepending ZPL setup block");
        }
        setup.apply(payload)
    }
}

/// Reject content the selected driver cannot take.
fn check_route(job: &PrintJob, driver: &dyn PrinterDriver) -> Result<()> {
    match (&job.content_type, driver.capability()) {
        (ContentType::Unsupported(other), _) => Err(RelayError::UnsupportedContent(other.clone())),
        (ct, _) if ct.is_raw() => Ok(()),
        (_, Capability::DocumentQueue) => Ok(()),
        (ct, Capability::ByteStream) => Err(RelayError::InvalidJob(format!(
            "{ct} content cannot go to {} printer {}",
            job.printer_type,
            driver.target()
        ))),
    }
}

#[async_trait]
impl EventHandler for JobProcessor {
    async fn handle(&self, record: EventRecord) -> Result<()> {
        self.process(&record).await;
        Ok(())
    }
}
