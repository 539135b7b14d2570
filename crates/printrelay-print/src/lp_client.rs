// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Local print-queue client (CUPS `lp`).
//
// The payload is spooled to a temporary file and handed to the queue
// command with a constructed `ipp://host:port/ipp/print` destination.
// The temporary file is removed when the guard drops, which covers
// success, command failure, and timeout alike.

use std::io::Write;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

use printrelay_core::error::{RelayError, Result};

/// Default queue command.
pub const LP_COMMAND: &str = "lp";

/// Default bound on one queue command invocation.
pub const LP_TIMEOUT: Duration = Duration::from_secs(30);

/// Device URI for a network printer behind the local queue.
pub fn device_uri(host: &str, port: u16) -> String {
    format!("ipp://{host}:{port}/ipp/print")
}

/// Duplex mode requested in the job options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Duplex {
    Simplex,
    LongEdge,
    ShortEdge,
}

impl Duplex {
    fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(true) => Some(Self::LongEdge),
            Value::Bool(false) => Some(Self::Simplex),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "simplex" | "one-sided" | "none" | "off" => Some(Self::Simplex),
                "long-edge" | "long_edge" | "longedge" | "duplex" | "two-sided-long-edge" => {
                    Some(Self::LongEdge)
                }
                "short-edge" | "short_edge" | "shortedge" | "two-sided-short-edge" => {
                    Some(Self::ShortEdge)
                }
                _ => None,
            },
            _ => None,
        }
    }

    /// IPP `sides` keyword.
    pub fn ipp_sides_keyword(&self) -> &'static str {
        match self {
            Self::Simplex => "one-sided",
            Self::LongEdge => "two-sided-long-edge",
            Self::ShortEdge => "two-sided-short-edge",
        }
    }
}

/// Declarative document options (`Options__c`), leniently parsed.
///
/// Unrecognised keys are ignored; values of the wrong shape are dropped
/// with a warning rather than failing the job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentOptions {
    pub copies: Option<u32>,
    pub duplex: Option<Duplex>,
    pub paper_size: Option<String>,
    pub resolution_dpi: Option<u32>,
    pub tray: Option<String>,
    pub collate: Option<bool>,
    pub color: Option<bool>,
    pub fit_to_page: bool,
    pub page_ranges: Option<String>,
    pub number_up: Option<u32>,
    /// Rotation in degrees (0, 90, 180, 270).
    pub rotation: Option<u32>,
}

impl DocumentOptions {
    pub fn from_map(options: &Map<String, Value>) -> Self {
        let mut parsed = Self::default();
        for (key, value) in options {
            match key.to_ascii_lowercase().as_str() {
                "copies" => parsed.copies = as_u32(key, value).filter(|c| *c >= 1),
                "duplex" | "sides" => {
                    parsed.duplex = Duplex::parse(value);
                    if parsed.duplex.is_none() {
                        warn!(key = %key, "unrecognised duplex value ignored");
                    }
                }
                "paper_size" | "media" => parsed.paper_size = as_text(value),
                "resolution" | "dpi" => parsed.resolution_dpi = as_u32(key, value),
                "tray" | "input_tray" | "input_slot" => parsed.tray = as_text(value),
                "collate" => parsed.collate = as_bool(value),
                "color" => parsed.color = as_bool(value),
                "fit_to_page" => parsed.fit_to_page = as_bool(value).unwrap_or(false),
                "page_ranges" | "pages" => parsed.page_ranges = as_text(value),
                "nup" | "number_up" => parsed.number_up = as_u32(key, value),
                "rotation" | "rotate" => {
                    parsed.rotation = as_u32(key, value).filter(|r| matches!(r, 0 | 90 | 180 | 270));
                }
                _ => debug!(key = %key, "ignoring unknown print option"),
            }
        }
        parsed
    }

    /// Queue command flags for these options.
    pub fn to_lp_args(&self) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        if let Some(copies) = self.copies {
            push_flag(&mut args, "-n", copies.to_string());
        }
        if let Some(duplex) = self.duplex {
            push_flag(&mut args, "-o", format!("sides={}", duplex.ipp_sides_keyword()));
        }
        if let Some(media) = &self.paper_size {
            push_flag(&mut args, "-o", format!("media={media}"));
        }
        if let Some(dpi) = self.resolution_dpi {
            push_flag(&mut args, "-o", format!("printer-resolution={dpi}dpi"));
        }
        if let Some(tray) = &self.tray {
            push_flag(&mut args, "-o", format!("InputSlot={tray}"));
        }
        if let Some(collate) = self.collate {
            push_flag(&mut args, "-o", format!("collate={collate}"));
        }
        if let Some(color) = self.color {
            let mode = if color { "color" } else { "monochrome" };
            push_flag(&mut args, "-o", format!("print-color-mode={mode}"));
        }
        if self.fit_to_page {
            push_flag(&mut args, "-o", "fit-to-page".to_string());
        }
        if let Some(ranges) = &self.page_ranges {
            push_flag(&mut args, "-P", ranges.clone());
        }
        if let Some(n) = self.number_up {
            push_flag(&mut args, "-o", format!("number-up={n}"));
        }
        if let Some(rotation) = self.rotation {
            // IPP orientation-requested: 3 portrait, 4 landscape,
            // 5 reverse-landscape, 6 reverse-portrait.
            let orientation = match rotation {
                90 => 4,
                180 => 6,
                270 => 5,
                _ => 3,
            };
            push_flag(&mut args, "-o", format!("orientation-requested={orientation}"));
        }
        args
    }
}

fn push_flag(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_string());
    args.push(value);
}

fn as_u32(key: &str, value: &Value) -> Option<u32> {
    let parsed = match value {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    if parsed.is_none() {
        warn!(key, "print option is not a valid integer");
    }
    parsed
}

fn as_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" | "on" => Some(true),
            "false" | "no" | "0" | "off" => Some(false),
            _ => None,
        },
        Value::Number(n) => n.as_i64().map(|v| v != 0),
        _ => None,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// One queue submission.
#[derive(Debug, Clone)]
pub struct LpRequest<'a> {
    pub command: &'a str,
    pub destination: &'a str,
    pub title: &'a str,
    pub options: &'a DocumentOptions,
    /// Pass bytes through unfiltered (`-o raw`).
    pub raw: bool,
    pub timeout: Duration,
}

impl LpRequest<'_> {
    /// Arguments excluding the spooled file path.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec!["-d".to_string(), self.destination.to_string()];
        if !self.title.is_empty() {
            push_flag(&mut args, "-t", self.title.to_string());
        }
        args.extend(self.options.to_lp_args());
        if self.raw {
            push_flag(&mut args, "-o", "raw".to_string());
        }
        args
    }
}

/// Spool `payload` to a temporary file and submit it with the queue command.
pub async fn submit(request: &LpRequest<'_>, payload: &[u8]) -> Result<String> {
    let mut spool = tempfile::Builder::new().prefix("printrelay-").tempfile()?;
    spool.write_all(payload)?;
    spool.flush()?;

    let mut args = request.args();
    args.push(spool.path().display().to_string());
    info!(command = request.command, args = ?args, "submitting to print queue");

    let output = tokio::time::timeout(
        request.timeout,
        Command::new(request.command)
            .args(&args)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| {
        error!(destination = request.destination, "print queue command timed out");
        RelayError::Printer(format!(
            "{} timed out after {}s",
            request.command,
            request.timeout.as_secs()
        ))
    })?
    .map_err(|e| RelayError::Printer(format!("cannot run {}: {e}", request.command)))?;

    // `spool` drops at the end of this scope on every path above and below.
    if output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        info!(destination = request.destination, response = %stdout, "print queue accepted job");
        Ok(stdout)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        error!(destination = request.destination, status = ?output.status.code(), stderr = %stderr, "print queue rejected job");
        Err(RelayError::Printer(format!(
            "{} exited with {:?}: {stderr}",
            request.command,
            output.status.code()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(m) => m,
            _ => Map::new(),
        }
    }

    #[test]
    fn device_uri_format() {
        assert_eq!(device_uri("10.0.0.7", 631), "ipp://10.0.0.7:631/ipp/print");
    }

    #[test]
    fn maps_all_options_to_flags() {
        let options = DocumentOptions::from_map(&map(json!({
            "copies": 2,
            "duplex": "long-edge",
            "paper_size": "A4",
            "resolution": "600",
            "tray": "Tray2",
            "collate": true,
            "color": false,
            "fit_to_page": true,
            "page_ranges": "1-3,5",
            "nup": 2,
            "rotation": 90,
        })));
        let args = options.to_lp_args();
        let joined = args.join(" ");
        assert!(joined.contains("-n 2"));
        assert!(joined.contains("-o sides=two-sided-long-edge"));
        assert!(joined.contains("-o media=A4"));
        assert!(joined.contains("-o printer-resolution=600dpi"));
        assert!(joined.contains("-o InputSlot=Tray2"));
        assert!(joined.contains("-o collate=true"));
        assert!(joined.contains("-o print-color-mode=monochrome"));
        assert!(joined.contains("-o fit-to-page"));
        assert!(joined.contains("-P 1-3,5"));
        assert!(joined.contains("-o number-up=2"));
        assert!(joined.contains("-o orientation-requested=4"));
    }

    #[test]
    fn bad_values_are_dropped() {
        let options = DocumentOptions::from_map(&map(json!({
            "copies": "many",
            "duplex": "sideways",
            "rotation": 45,
            "unknown": "x",
        })));
        assert_eq!(options, DocumentOptions::default());
        assert!(options.to_lp_args().is_empty());
    }

    #[test]
    fn raw_flag_and_title_in_args() {
        let options = DocumentOptions::default();
        let request = LpRequest {
            command: LP_COMMAND,
            destination: "ipp://h:631/ipp/print",
            title: "Invoice 42",
            options: &options,
            raw: true,
            timeout: LP_TIMEOUT,
        };
        assert_eq!(
            request.args(),
            vec!["-d", "ipp://h:631/ipp/print", "-t", "Invoice 42", "-o", "raw"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_failure_is_printer_error() {
        let options = DocumentOptions::default();
        let request = LpRequest {
            command: "false",
            destination: "ipp://h:631/ipp/print",
            title: "",
            options: &options,
            raw: false,
            timeout: LP_TIMEOUT,
        };
        let err = submit(&request, b"%PDF-1.4").await.unwrap_err();
        assert!(matches!(err, RelayError::Printer(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn successful_command_returns_stdout() {
        let options = DocumentOptions::default();
        let request = LpRequest {
            command: "echo",
            destination: "queue",
            title: "",
            options: &options,
            raw: false,
            timeout: LP_TIMEOUT,
        };
        let out = submit(&request, b"data").await.unwrap();
        assert!(out.starts_with("-d queue "));
    }

    #[tokio::test]
    async fn missing_command_is_printer_error() {
        let options = DocumentOptions::default();
        let request = LpRequest {
            command: "printrelay-no-such-command",
            destination: "queue",
            title: "",
            options: &options,
            raw: false,
            timeout: LP_TIMEOUT,
        };
        assert!(submit(&request, b"data").await.is_err());
    }
}
