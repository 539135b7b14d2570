// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Printrelay connector.
//
// Event payload field names are the platform's own (`Printer_Host__c` etc.)
// and must not be renamed; they are part of the wire contract.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// Discriminator value of the only event type the connector acts on.
pub const PRINT_JOB_EVENT: &str = "print_job";

/// Default raw TCP port (HP JetDirect / Zebra).
pub const DEFAULT_PRINTER_PORT: u16 = 9100;

pub const FIELD_TYPE: &str = "Type__c";
pub const FIELD_PRINTER_HOST: &str = "Printer_Host__c";
pub const FIELD_PRINTER_PORT: &str = "Printer_Port__c";
pub const FIELD_PRINTER_TYPE: &str = "Printer_Type__c";
pub const FIELD_CONTENT_TYPE: &str = "Content_Type__c";
pub const FIELD_CONTENT: &str = "Content__c";
pub const FIELD_JOB_TITLE: &str = "Job_Title__c";
pub const FIELD_SOURCE: &str = "Source__c";
pub const FIELD_QTY: &str = "Qty__c";
pub const FIELD_EXPIRE_AFTER: &str = "Expire_After__c";
pub const FIELD_OPTIONS: &str = "Options__c";
pub const FIELD_AUTH_CONFIG: &str = "Auth_Config__c";
pub const FIELD_CORRELATION_ID: &str = "Correlation_Id__c";

/// A decoded, typed event as delivered by the bus.
///
/// Lives only for the duration of one dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventRecord(pub Map<String, Value>);

impl EventRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Lower-cased, trimmed `Type__c` discriminator (empty if absent).
    pub fn event_type(&self) -> String {
        self.text(FIELD_TYPE).trim().to_ascii_lowercase()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Field rendered as text. Numbers and booleans are stringified, null
    /// and missing fields yield an empty string.
    pub fn text(&self, field: &str) -> String {
        match self.0.get(field) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    /// Integer field with a fallback for missing or malformed values.
    pub fn int_or(&self, field: &str, default: i64) -> i64 {
        match self.0.get(field) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                s.trim().parse().unwrap_or(default)
            }
            _ => default,
        }
    }

    /// JSON-object field (the platform sends these as JSON text).
    ///
    /// Unparseable text degrades to an empty map with a warning.
    pub fn json_map(&self, field: &str) -> Map<String, Value> {
        match self.0.get(field) {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::String(s)) if !s.trim().is_empty() => {
                match serde_json::from_str::<Value>(s) {
                    Ok(Value::Object(map)) => map,
                    Ok(_) | Err(_) => {
                        warn!(field, "could not parse JSON object field");
                        Map::new()
                    }
                }
            }
            _ => Map::new(),
        }
    }
}

impl From<Map<String, Value>> for EventRecord {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// How a printer is addressed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrinterType {
    /// Raw TCP byte stream.
    Raw,
    /// Zebra label printer (raw TCP, ZPL, supports auto-config).
    Zpl,
    /// Local CUPS queue.
    Cups,
    /// IPP printer reached through the local queue command.
    Ipp,
    /// Anything else. Treated as raw-capable by the driver registry.
    Unknown(String),
}

impl PrinterType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "raw" => Self::Raw,
            "zpl" => Self::Zpl,
            "cups" => Self::Cups,
            "ipp" => Self::Ipp,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Raw => "raw",
            Self::Zpl => "zpl",
            Self::Cups => "cups",
            Self::Ipp => "ipp",
            Self::Unknown(name) => name,
        }
    }
}

impl std::fmt::Display for PrinterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the job's bytes come from and what they are.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    PdfUri,
    PdfBase64,
    RawUri,
    RawBase64,
    Unsupported(String),
}

impl ContentType {
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "pdf_uri" => Self::PdfUri,
            "pdf_base64" => Self::PdfBase64,
            "raw_uri" => Self::RawUri,
            "raw_base64" => Self::RawBase64,
            other => Self::Unsupported(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::PdfUri => "pdf_uri",
            Self::PdfBase64 => "pdf_base64",
            Self::RawUri => "raw_uri",
            Self::RawBase64 => "raw_base64",
            Self::Unsupported(name) => name,
        }
    }

    /// Byte-stream content, sent `qty` times.
    pub fn is_raw(&self) -> bool {
        matches!(self, Self::RawUri | Self::RawBase64)
    }

    /// Document content, sent once with options.
    pub fn is_document(&self) -> bool {
        matches!(self, Self::PdfUri | Self::PdfBase64)
    }

    pub fn is_uri(&self) -> bool {
        matches!(self, Self::PdfUri | Self::RawUri)
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully-described print job, derived from one print-job event.
///
/// Constructed once per event, consumed by the pipeline, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    /// Locally generated id for log correlation.
    pub job_id: Uuid,
    pub printer_host: String,
    pub printer_port: u16,
    pub printer_type: PrinterType,
    pub content_type: ContentType,
    /// URI or base64 payload, depending on `content_type`.
    pub content: String,
    pub title: String,
    pub source: String,
    /// Repeat count for raw/ZPL content. Always ≥ 1.
    pub qty: u32,
    /// Advisory lifetime in seconds (0 = none). Never enforced.
    pub expire_after: u64,
    /// Document-print options (`Options__c`).
    pub options: Map<String, Value>,
    /// Per-job HTTP auth override (`Auth_Config__c`).
    pub auth_config: Map<String, Value>,
    pub correlation_id: String,
    pub received_at: DateTime<Utc>,
}

impl PrintJob {
    /// Build a job from a decoded print-job event.
    ///
    /// Missing or malformed optional fields fall back to defaults; this
    /// never fails.
    pub fn from_event(record: &EventRecord) -> Self {
        let port = record.int_or(FIELD_PRINTER_PORT, i64::from(DEFAULT_PRINTER_PORT));
        let printer_port = u16::try_from(port).unwrap_or_else(|_| {
            warn!(port, "printer port out of range, using default");
            DEFAULT_PRINTER_PORT
        });

        let qty = record.int_or(FIELD_QTY, 1).clamp(1, i64::from(u32::MAX)) as u32;
        let expire_after = record.int_or(FIELD_EXPIRE_AFTER, 0).max(0) as u64;

        Self {
            job_id: Uuid::new_v4(),
            printer_host: record.text(FIELD_PRINTER_HOST).trim().to_string(),
            printer_port,
            printer_type: PrinterType::parse(&record.text(FIELD_PRINTER_TYPE)),
            content_type: ContentType::parse(&record.text(FIELD_CONTENT_TYPE)),
            content: record.text(FIELD_CONTENT),
            title: record.text(FIELD_JOB_TITLE),
            source: record.text(FIELD_SOURCE),
            qty,
            expire_after,
            options: record.json_map(FIELD_OPTIONS),
            auth_config: record.json_map(FIELD_AUTH_CONFIG),
            correlation_id: record.text(FIELD_CORRELATION_ID).trim().to_string(),
            received_at: Utc::now(),
        }
    }

    /// `host:port` key used for logging and the printer-info cache.
    pub fn printer_addr(&self) -> String {
        format!("{}:{}", self.printer_host, self.printer_port)
    }

    /// Whether the advisory `expire_after` window has elapsed.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        if self.expire_after == 0 {
            return false;
        }
        let age = now.signed_duration_since(self.received_at);
        age.num_seconds() >= self.expire_after as i64
    }
}

impl std::fmt::Display for PrintJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PrintJob(host={} type={} content_type={} title={:?} qty={} correlation={})",
            self.printer_addr(),
            self.printer_type,
            self.content_type,
            self.title,
            self.qty,
            self.correlation_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> EventRecord {
        match value {
            Value::Object(map) => EventRecord::new(map),
            _ => panic!("test record must be an object"),
        }
    }

    #[test]
    fn builds_job_with_defaults() {
        let job = PrintJob::from_event(&record(json!({
            "Type__c": "print_job",
            "Printer_Host__c": "10.0.0.5",
            "Content_Type__c": "raw_base64",
            "Content__c": "XlhB",
        })));
        assert_eq!(job.printer_port, 9100);
        assert_eq!(job.printer_type, PrinterType::Raw);
        assert_eq!(job.content_type, ContentType::RawBase64);
        assert_eq!(job.qty, 1);
        assert_eq!(job.expire_after, 0);
        assert!(job.options.is_empty());
        assert!(job.correlation_id.is_empty());
    }

    #[test]
    fn malformed_fields_degrade_to_defaults() {
        let job = PrintJob::from_event(&record(json!({
            "Printer_Host__c": "printer.local",
            "Printer_Port__c": "not-a-port",
            "Qty__c": "-4",
            "Expire_After__c": "soon",
            "Options__c": "{broken json",
            "Auth_Config__c": "[1, 2]",
        })));
        assert_eq!(job.printer_port, 9100);
        assert_eq!(job.qty, 1);
        assert_eq!(job.expire_after, 0);
        assert!(job.options.is_empty());
        assert!(job.auth_config.is_empty());
    }

    #[test]
    fn numeric_fields_accept_numbers_and_strings() {
        let job = PrintJob::from_event(&record(json!({
            "Printer_Port__c": 6101,
            "Qty__c": "3",
            "Printer_Type__c": " ZPL ",
            "Content_Type__c": "PDF_URI",
            "Options__c": "{\"copies\": 2}",
        })));
        assert_eq!(job.printer_port, 6101);
        assert_eq!(job.qty, 3);
        assert_eq!(job.printer_type, PrinterType::Zpl);
        assert_eq!(job.content_type, ContentType::PdfUri);
        assert_eq!(job.options.get("copies"), Some(&json!(2)));
    }

    #[test]
    fn port_out_of_range_uses_default() {
        let job = PrintJob::from_event(&record(json!({ "Printer_Port__c": "70000" })));
        assert_eq!(job.printer_port, DEFAULT_PRINTER_PORT);
    }

    #[test]
    fn event_type_is_normalised() {
        let rec = record(json!({ "Type__c": "  Print_Job " }));
        assert_eq!(rec.event_type(), PRINT_JOB_EVENT);
        assert_eq!(EventRecord::default().event_type(), "");
    }

    #[test]
    fn unknown_printer_type_is_preserved() {
        assert_eq!(
            PrinterType::parse("laser"),
            PrinterType::Unknown("laser".into())
        );
        assert_eq!(
            ContentType::parse("docx_uri"),
            ContentType::Unsupported("docx_uri".into())
        );
    }

    #[test]
    fn expiry_is_advisory_window() {
        let mut job = PrintJob::from_event(&record(json!({ "Expire_After__c": 30 })));
        let now = job.received_at;
        assert!(!job.is_expired(now));
        assert!(job.is_expired(now + chrono::Duration::seconds(31)));
        job.expire_after = 0;
        assert!(!job.is_expired(now + chrono::Duration::days(1)));
    }
}
