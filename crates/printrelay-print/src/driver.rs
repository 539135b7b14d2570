// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer drivers and the registry that picks one per job.
//
// There are exactly two capability profiles:
//   - byte stream (`raw`, `zpl`): raw TCP socket, no document options
//   - document queue (`cups`, `ipp`): local queue command with options
//
// Unknown printer types get the byte-stream driver; printers are assumed
// raw-capable unless told otherwise.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use printrelay_core::config::PrintingConfig;
use printrelay_core::error::{RelayError, Result};
use printrelay_core::types::PrinterType;

use crate::ipp_client::IppClient;
use crate::lp_client::{self, DocumentOptions, LpRequest};
use crate::raw_client;

/// What a driver can accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    ByteStream,
    DocumentQueue,
}

/// Operations every printer driver offers.
#[async_trait]
pub trait PrinterDriver: Send + Sync {
    fn capability(&self) -> Capability;

    /// `host:port` or queue destination, for logs.
    fn target(&self) -> String;

    /// Send bytes that need no document processing.
    async fn print_raw(&self, payload: &[u8]) -> Result<()>;

    /// Send a document with print options.
    async fn print_document(
        &self,
        payload: &[u8],
        title: &str,
        options: &Map<String, Value>,
    ) -> Result<()>;

    /// Whether the printer is reachable right now.
    async fn test_connection(&self) -> bool;
}

/// Byte-stream printer on a raw TCP port.
#[derive(Debug, Clone)]
pub struct RawSocketDriver {
    host: String,
    port: u16,
    timeout: Duration,
}

impl RawSocketDriver {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout,
        }
    }
}

#[async_trait]
impl PrinterDriver for RawSocketDriver {
    fn capability(&self) -> Capability {
        Capability::ByteStream
    }

    fn target(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    async fn print_raw(&self, payload: &[u8]) -> Result<()> {
        raw_client::send_raw(&self.host, self.port, payload, self.timeout).await
    }

    async fn print_document(
        &self,
        _payload: &[u8],
        _title: &str,
        _options: &Map<String, Value>,
    ) -> Result<()> {
        Err(RelayError::UnsupportedOperation(format!(
            "raw socket printer {} cannot print documents; route document content to a cups/ipp printer",
            self.target()
        )))
    }

    async fn test_connection(&self) -> bool {
        raw_client::check_connection(&self.host, self.port).await
    }
}

/// Document printer managed by the local print queue.
#[derive(Debug, Clone)]
pub struct QueueDriver {
    device_uri: String,
    command: String,
    timeout: Duration,
}

impl QueueDriver {
    pub fn new(host: &str, port: u16, command: &str, timeout: Duration) -> Self {
        Self {
            device_uri: lp_client::device_uri(host, port),
            command: command.to_string(),
            timeout,
        }
    }

    pub fn device_uri(&self) -> &str {
        &self.device_uri
    }

    async fn submit(&self, payload: &[u8], title: &str, options: &DocumentOptions, raw: bool) -> Result<()> {
        let request = LpRequest {
            command: &self.command,
            destination: &self.device_uri,
            title,
            options,
            raw,
            timeout: self.timeout,
        };
        lp_client::submit(&request, payload).await.map(|_| ())
    }
}

#[async_trait]
impl PrinterDriver for QueueDriver {
    fn capability(&self) -> Capability {
        Capability::DocumentQueue
    }

    fn target(&self) -> String {
        self.device_uri.clone()
    }

    async fn print_raw(&self, payload: &[u8]) -> Result<()> {
        self.submit(payload, "", &DocumentOptions::default(), true).await
    }

    async fn print_document(
        &self,
        payload: &[u8],
        title: &str,
        options: &Map<String, Value>,
    ) -> Result<()> {
        let options = DocumentOptions::from_map(options);
        self.submit(payload, title, &options, false).await
    }

    async fn test_connection(&self) -> bool {
        let client = match IppClient::new(&self.device_uri) {
            Ok(client) => client,
            Err(e) => {
                debug!(error = %e, "cannot build IPP client for connection test");
                return false;
            }
        };
        match client.get_printer_attributes().await {
            Ok(_) => true,
            Err(e) => {
                debug!(uri = %self.device_uri, error = %e, "queue printer connection test failed");
                false
            }
        }
    }
}

/// Closed set of drivers.
#[derive(Debug, Clone)]
pub enum Driver {
    Raw(RawSocketDriver),
    Queue(QueueDriver),
}

#[async_trait]
impl PrinterDriver for Driver {
    fn capability(&self) -> Capability {
        match self {
            Self::Raw(d) => d.capability(),
            Self::Queue(d) => d.capability(),
        }
    }

    fn target(&self) -> String {
        match self {
            Self::Raw(d) => d.target(),
            Self::Queue(d) => d.target(),
        }
    }

    async fn print_raw(&self, payload: &[u8]) -> Result<()> {
        match self {
            Self::Raw(d) => d.print_raw(payload).await,
            Self::Queue(d) => d.print_raw(payload).await,
        }
    }

    async fn print_document(
        &self,
        payload: &[u8],
        title: &str,
        options: &Map<String, Value>,
    ) -> Result<()> {
        match self {
            Self::Raw(d) => d.print_document(payload, title, options).await,
            Self::Queue(d) => d.print_document(payload, title, options).await,
        }
    }

    async fn test_connection(&self) -> bool {
        match self {
            Self::Raw(d) => d.test_connection().await,
            Self::Queue(d) => d.test_connection().await,
        }
    }
}

/// Supplies a driver for a job's printer.
pub trait DriverSource: Send + Sync {
    fn get_driver(&self, host: &str, port: u16, printer_type: &PrinterType) -> Arc<dyn PrinterDriver>;
}

/// Timeouts and commands shared by every driver the registry builds.
#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub raw_timeout: Duration,
    pub lp_command: String,
    pub lp_timeout: Duration,
}

impl Default for DriverSettings {
    fn default() -> Self {
        Self {
            raw_timeout: raw_client::RAW_TIMEOUT,
            lp_command: lp_client::LP_COMMAND.to_string(),
            lp_timeout: lp_client::LP_TIMEOUT,
        }
    }
}

impl From<&PrintingConfig> for DriverSettings {
    fn from(config: &PrintingConfig) -> Self {
        Self {
            raw_timeout: Duration::from_secs(config.raw_timeout_secs),
            lp_command: config.lp_command.clone(),
            lp_timeout: Duration::from_secs(config.lp_timeout_secs),
        }
    }
}

/// Builds the right driver for a printer type.
#[derive(Debug, Clone, Default)]
pub struct DriverRegistry {
    settings: DriverSettings,
}

impl DriverRegistry {
    pub fn new(settings: DriverSettings) -> Self {
        Self { settings }
    }

    pub fn driver(&self, host: &str, port: u16, printer_type: &PrinterType) -> Driver {
        match printer_type {
            PrinterType::Raw | PrinterType::Zpl => {
                Driver::Raw(RawSocketDriver::new(host, port, self.settings.raw_timeout))
            }
            PrinterType::Cups | PrinterType::Ipp => Driver::Queue(QueueDriver::new(
                host,
                port,
                &self.settings.lp_command,
                self.settings.lp_timeout,
            )),
            PrinterType::Unknown(name) => {
                warn!(printer_type = %name, "unknown printer type, using raw TCP driver");
                Driver::Raw(RawSocketDriver::new(host, port, self.settings.raw_timeout))
            }
        }
    }
}

impl DriverSource for DriverRegistry {
    fn get_driver(&self, host: &str, port: u16, printer_type: &PrinterType) -> Arc<dyn PrinterDriver> {
        Arc::new(self.driver(host, port, printer_type))
    }
}
