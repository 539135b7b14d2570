// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// ZPL auto-configuration.
//
// Zebra printers answer SGD `getvar` queries on the same raw port used for
// printing.  Before a ZPL job we read the printer's resolution, print width,
// and darkness, cache them per `host:port`, and prepend a setup block so the
// label renders with the device's real geometry.
//
// Probing never fails a job: an offline or non-Zebra device simply yields
// an empty result and the payload goes out unmodified.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, instrument, warn};

use crate::raw_client;

/// Bound on one probe exchange (connect, query, read).
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum bytes read from a probe response.
const PROBE_READ_BUDGET: usize = 1024;

/// Batch query, answered positionally: dpi, width, darkness.
const PROBE_QUERY: &[u8] = b"! U1 getvar \"head.resolution.in_dpi\"\r\n\
! U1 getvar \"ezpl.print_width\"\r\n\
! U1 getvar \"print.tone\"\r\n";

/// Number of quoted values the probe waits for.
const PROBE_FIELDS: usize = 3;

/// Settings learned from a device probe.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PrinterInfo {
    pub dpi: Option<u32>,
    pub width_dots: Option<u32>,
    pub darkness: Option<i32>,
}

impl PrinterInfo {
    pub fn is_empty(&self) -> bool {
        self.dpi.is_none() && self.width_dots.is_none() && self.darkness.is_none()
    }

    /// Parse quoted values positionally (dpi, width, darkness).  A value that
    /// is not an integer is left out.
    pub fn parse_response(response: &str) -> Self {
        let values: Vec<&str> = response
            .split('"')
            .skip(1)
            .step_by(2)
            .map(str::trim)
            .collect();
        Self {
            dpi: values.first().and_then(|v| v.parse().ok()),
            width_dots: values.get(1).and_then(|v| v.parse().ok()),
            darkness: values.get(2).and_then(|v| v.parse().ok()),
        }
    }

    /// Map view (`dpi`, `width_dots`, `darkness`), omitting unknown fields.
    pub fn to_map(&self) -> Map<String, Value> {
        let mut map = Map::new();
        if let Some(dpi) = self.dpi {
            map.insert("dpi".into(), dpi.into());
        }
        if let Some(width) = self.width_dots {
            map.insert("width_dots".into(), width.into());
        }
        if let Some(darkness) = self.darkness {
            map.insert("darkness".into(), darkness.into());
        }
        map
    }
}

/// Probe results keyed by `host:port`.
///
/// Entries never expire on their own; operators evict them after changing
/// a device's physical configuration.
#[derive(Debug, Default)]
pub struct PrinterInfoCache {
    entries: Mutex<HashMap<String, PrinterInfo>>,
}

impl PrinterInfoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn key(host: &str, port: u16) -> String {
        format!("{host}:{port}")
    }

    pub fn get(&self, host: &str, port: u16) -> Option<PrinterInfo> {
        self.lock().get(&Self::key(host, port)).copied()
    }

    pub fn insert(&self, host: &str, port: u16, info: PrinterInfo) {
        self.lock().insert(Self::key(host, port), info);
    }

    pub fn remove(&self, host: &str, port: u16) -> bool {
        self.lock().remove(&Self::key(host, port)).is_some()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, PrinterInfo>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Queries ZPL printers for their settings, with a per-device cache.
#[derive(Debug)]
pub struct AutoConfigProbe {
    cache: PrinterInfoCache,
    timeout: Duration,
}

impl Default for AutoConfigProbe {
    fn default() -> Self {
        Self::new(PROBE_TIMEOUT)
    }
}

impl AutoConfigProbe {
    pub fn new(timeout: Duration) -> Self {
        Self {
            cache: PrinterInfoCache::new(),
            timeout,
        }
    }

    pub fn cache(&self) -> &PrinterInfoCache {
        &self.cache
    }

    /// Device settings for `host:port`, probing on a cache miss.
    ///
    /// Empty results are not cached, so an unresponsive device is probed
    /// again on its next job.
    #[instrument(skip(self))]
    pub async fn get_info(&self, host: &str, port: u16) -> PrinterInfo {
        if let Some(info) = self.cache.get(host, port) {
            debug!("printer info cache hit");
            return info;
        }

        let info = match query_device(host, port, self.timeout).await {
            Ok(response) => PrinterInfo::parse_response(&response),
            Err(e) => {
                debug!(error = %e, "printer probe failed");
                PrinterInfo::default()
            }
        };

        if info.is_empty() {
            info!("printer did not report settings, skipping auto-config");
        } else {
            info!(dpi = ?info.dpi, width = ?info.width_dots, darkness = ?info.darkness, "printer settings probed");
            self.cache.insert(host, port, info);
        }
        info
    }

    /// Evict one device (`Some(host)`, port defaulting to 9100) or everything.
    pub fn clear_cache(&self, host: Option<&str>, port: Option<u16>) {
        match host {
            Some(host) => {
                let port = port.unwrap_or(raw_client::RAW_PORT);
                let removed = self.cache.remove(host, port);
                info!(host, port, removed, "printer info evicted");
            }
            None => {
                self.cache.clear();
                info!("printer info cache cleared");
            }
        }
    }
}

/// Ask the device for its settings.  The whole exchange shares one
/// deadline; a reply cut short by it is returned as far as it got.
async fn query_device(host: &str, port: u16, limit: Duration) -> std::io::Result<String> {
    let deadline = Instant::now() + limit;
    let mut stream = raw_client::connect(host, port, limit)
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    timeout_at(deadline, async {
        stream.write_all(PROBE_QUERY).await?;
        stream.flush().await
    })
    .await
    .map_err(|_| std::io::Error::from(std::io::ErrorKind::TimedOut))??;

    let mut response = Vec::with_capacity(PROBE_READ_BUDGET);
    let mut buf = [0u8; 256];
    while response.len() < PROBE_READ_BUDGET {
        let n = match timeout_at(deadline, stream.read(&mut buf)).await {
            Ok(read) => read?,
            Err(_) => {
                debug!(bytes = response.len(), "device reply incomplete at deadline");
                break;
            }
        };
        if n == 0 {
            break;
        }
        let take = n.min(PROBE_READ_BUDGET - response.len());
        response.extend_from_slice(&buf[..take]);
        if response.iter().filter(|b| **b == b'"').count() >= PROBE_FIELDS * 2 {
            break;
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Label setup to prepend to a ZPL payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ZplSetup {
    /// `^PW` print width in dots.
    pub width: Option<u32>,
    /// `^LL` label length in dots.
    pub length: Option<u32>,
    /// `~SD` darkness, 0–30.
    pub darkness: Option<i32>,
    /// Literal ZPL inserted before the end marker.
    pub prefix: Option<String>,
}

impl ZplSetup {
    pub fn from_info(info: &PrinterInfo) -> Self {
        Self {
            width: info.width_dots,
            length: None,
            darkness: info.darkness,
            prefix: None,
        }
    }

    /// Explicit per-job setup from the `zpl` job option, if present.
    pub fn from_options(options: &Map<String, Value>) -> Option<Self> {
        let Value::Object(zpl) = options.get("zpl")? else {
            warn!("zpl option is not an object, ignoring");
            return None;
        };
        let int = |key: &str| -> Option<i64> {
            match zpl.get(key)? {
                Value::Number(n) => n.as_i64(),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            }
        };
        Some(Self {
            width: int("width").and_then(|v| u32::try_from(v).ok()),
            length: int("length").and_then(|v| u32::try_from(v).ok()),
            darkness: int("darkness").and_then(|v| i32::try_from(v).ok()),
            prefix: zpl
                .get("prefix")
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|p| !p.is_empty()),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.width.is_none() && self.length.is_none() && self.darkness.is_none() && self.prefix.is_none()
    }

    /// `^XA … ^XZ` block, or `None` when there is nothing to set.
    pub fn build_block(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        let mut lines = vec!["^XA".to_string()];
        if let Some(width) = self.width {
            lines.push(format!("^PW{width}"));
        }
        if let Some(length) = self.length {
            lines.push(format!("^LL{length}"));
        }
        if let Some(darkness) = self.darkness {
            lines.push(format!("~SD{:02}", darkness.clamp(0, 30)));
        }
        if let Some(prefix) = &self.prefix {
            lines.push(prefix.clone());
        }
        lines.push("^XZ".to_string());
        Some(lines.join("\n"))
    }

    /// Payload with the setup block in front, or the payload untouched.
    pub fn apply(&self, payload: Vec<u8>) -> Vec<u8> {
        match self.build_block() {
            Some(block) => {
                let mut out = Vec::with_capacity(block.len() + 1 + payload.len());
                out.extend_from_slice(block.as_bytes());
                out.push(b'\n');
                out.extend_from_slice(&payload);
                out
            }
            None => payload,
        }
    }
}

/// Whether the payload already sets label geometry (`^PW` / `^LL`), making
/// it a self-contained template.
pub fn has_setup_commands(payload: &[u8]) -> bool {
    payload.windows(3).any(|w| {
        w[0] == b'^'
            && matches!(
                [w[1].to_ascii_uppercase(), w[2].to_ascii_uppercase()],
                [b'P', b'W'] | [b'L', b'L']
            )
    })
}

/// Basic ZPL sanity check: `^XA` present and before `^XZ`.
pub fn validate_zpl(payload: &[u8]) -> bool {
    let upper = String::from_utf8_lossy(payload).to_ascii_uppercase();
    match (upper.find("^XA"), upper.find("^XZ")) {
        (Some(start), Some(end)) => start < end,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    /// Fake Zebra answering one query per connection with `reply`, then
    /// closing.  The counter tracks accepted connections.
    async fn fake_printer(reply: &'static [u8], connections: usize) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            for _ in 0..connections {
                let (mut socket, _) = listener.accept().await.unwrap();
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 512];
                let _ = socket.read(&mut buf).await;
                socket.write_all(reply).await.unwrap();
            }
        });
        (port, accepted)
    }

    #[test]
    fn parses_quoted_values_in_order() {
        let info = PrinterInfo::parse_response("\"203\"\"812\"\"15\"");
        assert_eq!(info.dpi, Some(203));
        assert_eq!(info.width_dots, Some(812));
        assert_eq!(info.darkness, Some(15));
    }

    #[test]
    fn non_integer_values_are_omitted() {
        let info = PrinterInfo::parse_response("\"203\" \"?\" \"15.0\"");
        assert_eq!(info.dpi, Some(203));
        assert_eq!(info.width_dots, None);
        assert_eq!(info.darkness, None);
        assert_eq!(info.to_map(), json!({ "dpi": 203 }).as_object().unwrap().clone());
        assert!(PrinterInfo::parse_response("").is_empty());
    }

    #[test]
    fn setup_block_layout() {
        let setup = ZplSetup {
            width: Some(812),
            length: Some(1218),
            darkness: Some(7),
            prefix: Some("^MNY".into()),
        };
        assert_eq!(
            setup.build_block().unwrap(),
            "^XA\n^PW812\n^LL1218\n~SD07\n^MNY\n^XZ"
        );
        assert_eq!(ZplSetup::default().build_block(), None);
    }

    #[test]
    fn apply_prepends_block() {
        let setup = ZplSetup::from_info(&PrinterInfo {
            dpi: Some(203),
            width_dots: Some(812),
            darkness: None,
        });
        let out = setup.apply(b"^XA^FDHi^XZ".to_vec());
        assert_eq!(out, b"^XA\n^PW812\n^XZ\n^XA^FDHi^XZ".to_vec());
        assert_eq!(ZplSetup::default().apply(b"x".to_vec()), b"x".to_vec());
    }

    #[test]
    fn detects_existing_setup_commands() {
        assert!(has_setup_commands(b"^XA^PW400^FDHi^XZ"));
        assert!(has_setup_commands(b"^xa^ll300^xz"));
        assert!(!has_setup_commands(b"^XA^FO50,50^FDHi^XZ"));
        assert!(!has_setup_commands(b"PW LL"));
    }

    #[test]
    fn explicit_options_override() {
        let options = json!({ "zpl": { "width": "600", "darkness": 20, "prefix": "^LH0,0" } });
        let setup = ZplSetup::from_options(options.as_object().unwrap()).unwrap();
        assert_eq!(setup.width, Some(600));
        assert_eq!(setup.length, None);
        assert_eq!(setup.darkness, Some(20));
        assert_eq!(setup.prefix.as_deref(), Some("^LH0,0"));
        assert!(ZplSetup::from_options(&Map::new()).is_none());
    }

    #[test]
    fn zpl_validation() {
        assert!(validate_zpl(b"^XA^FDHi^XZ"));
        assert!(!validate_zpl(b"^XZ^XA"));
        assert!(!validate_zpl(b"^XA^FDHi"));
    }

    #[tokio::test]
    async fn probe_result_is_cached() {
        let (port, accepted) = fake_printer(b"\"300\"\"1200\"\"12\"", 1).await;
        let probe = AutoConfigProbe::new(Duration::from_secs(2));

        let first = probe.get_info("127.0.0.1", port).await;
        assert_eq!(first.width_dots, Some(1200));
        assert_eq!(probe.cache().len(), 1);

        // The fake accepted only one connection; a second probe would fail.
        let second = probe.get_info("127.0.0.1", port).await;
        assert_eq!(second, first);
        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_result_is_not_cached() {
        let (port, accepted) = fake_printer(b"no quotes here", 2).await;
        let probe = AutoConfigProbe::new(Duration::from_millis(500));

        assert!(probe.get_info("127.0.0.1", port).await.is_empty());
        assert!(probe.cache().is_empty());
        assert!(probe.get_info("127.0.0.1", port).await.is_empty());
        assert!(probe.cache().is_empty());
        // Both lookups reached the device.
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn partial_reply_is_kept_at_deadline() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 512];
            let _ = socket.read(&mut buf).await;
            // Two of three values, then silence with the socket held open.
            socket.write_all(b"\"203\"\"812\"").await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let probe = AutoConfigProbe::new(Duration::from_millis(300));
        let info = probe.get_info("127.0.0.1", port).await;
        assert_eq!(info.dpi, Some(203));
        assert_eq!(info.width_dots, Some(812));
        assert_eq!(info.darkness, None);
        assert_eq!(probe.cache().get("127.0.0.1", port), Some(info));
    }

    #[tokio::test]
    async fn offline_device_yields_empty_info() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let probe = AutoConfigProbe::new(Duration::from_millis(500));
        assert!(probe.get_info("127.0.0.1", port).await.is_empty());
    }

    #[test]
    fn clear_cache_single_and_all() {
        let probe = AutoConfigProbe::default();
        let info = PrinterInfo {
            dpi: Some(203),
            ..Default::default()
        };
        probe.cache().insert("a", 9100, info);
        probe.cache().insert("b", 6101, info);

        probe.clear_cache(Some("a"), None);
        assert_eq!(probe.cache().get("a", 9100), None);
        assert_eq!(probe.cache().len(), 1);

        probe.clear_cache(None, None);
        assert!(probe.cache().is_empty());
    }
}
