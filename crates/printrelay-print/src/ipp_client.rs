// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal async IPP client used to check that a queue-managed printer is
// reachable and answering (Get-Printer-Attributes, RFC 8011 §4.2.5).
// Document submission goes through the local queue command instead.

use std::collections::HashMap;
use std::time::Duration;

use ipp::prelude::*;
use tracing::{debug, error, instrument};

use printrelay_core::error::{RelayError, Result};

/// Bound on a single attribute query.
const IPP_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Flattened attribute-name → display-value map.
pub type PrinterAttributes = HashMap<String, String>;

/// IPP client bound to a single printer URI.
pub struct IppClient {
    uri: Uri,
}

impl IppClient {
    pub fn new(uri: &str) -> Result<Self> {
        let parsed: Uri = uri
            .parse()
            .map_err(|e| RelayError::Printer(format!("invalid URI '{uri}': {e}")))?;
        Ok(Self { uri: parsed })
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Query the printer for its current attributes.
    #[instrument(skip(self), fields(uri = %self.uri))]
    pub async fn get_printer_attributes(&self) -> Result<PrinterAttributes> {
        let operation = IppOperationBuilder::get_printer_attributes(self.uri.clone()).build();
        let client = AsyncIppClient::new(self.uri.clone());

        debug!("sending Get-Printer-Attributes");
        let response = tokio::time::timeout(IPP_QUERY_TIMEOUT, client.send(operation))
            .await
            .map_err(|_| RelayError::Printer("Get-Printer-Attributes timed out".into()))?
            .map_err(|e| RelayError::Printer(format!("Get-Printer-Attributes: {e}")))?;

        if !response.header().status_code().is_success() {
            let code = response.header().status_code();
            error!(status = ?code, "Get-Printer-Attributes failed");
            return Err(RelayError::Printer(format!(
                "Get-Printer-Attributes returned status {code:?}"
            )));
        }

        let mut attrs = HashMap::new();
        for group in response.attributes().groups() {
            for (name, attr) in group.attributes() {
                attrs.insert(name.clone(), format!("{}", attr.value()));
            }
        }
        debug!(count = attrs.len(), "received printer attributes");
        Ok(attrs)
    }
}
