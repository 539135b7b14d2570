// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Avro payload decoding.
//
// Event payloads are Avro binary datums written with the topic's schema.
// The decoded record is flattened into an `EventRecord` (a JSON object):
// unions collapse to their branch, bytes become base64 text.

use apache_avro::Schema;
use apache_avro::types::Value as AvroValue;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Map, Number, Value};

use printrelay_core::error::{RelayError, Result};
use printrelay_core::types::EventRecord;

/// Parse a schema returned by `GetSchema`.
pub fn parse_schema(schema_json: &str) -> Result<Schema> {
    Schema::parse_str(schema_json).map_err(|e| RelayError::Schema(format!("invalid Avro schema: {e}")))
}

/// Decode one event payload into a record.
pub fn decode_event(schema: &Schema, payload: &[u8]) -> Result<EventRecord> {
    let mut reader = payload;
    let value = apache_avro::from_avro_datum(schema, &mut reader, None)
        .map_err(|e| RelayError::Decode(format!("Avro datum: {e}")))?;
    match to_json(value) {
        Value::Object(fields) => Ok(EventRecord::new(fields)),
        other => Err(RelayError::Decode(format!(
            "expected a record payload, got {}",
            json_kind(&other)
        ))),
    }
}

fn to_json(value: AvroValue) -> Value {
    match value {
        AvroValue::Null => Value::Null,
        AvroValue::Boolean(b) => Value::Bool(b),
        AvroValue::Int(i) | AvroValue::Date(i) | AvroValue::TimeMillis(i) => Value::from(i),
        AvroValue::Long(l)
        | AvroValue::TimeMicros(l)
        | AvroValue::TimestampMillis(l)
        | AvroValue::TimestampMicros(l)
        | AvroValue::LocalTimestampMillis(l)
        | AvroValue::LocalTimestampMicros(l) => Value::from(l),
        AvroValue::Float(f) => float(f64::from(f)),
        AvroValue::Double(d) => float(d),
        AvroValue::String(s) | AvroValue::Enum(_, s) => Value::String(s),
        AvroValue::Bytes(b) | AvroValue::Fixed(_, b) => Value::String(BASE64.encode(b)),
        AvroValue::Uuid(u) => Value::String(u.to_string()),
        AvroValue::Union(_, inner) => to_json(*inner),
        AvroValue::Array(items) => Value::Array(items.into_iter().map(to_json).collect()),
        AvroValue::Map(entries) => Value::Object(
            entries
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        AvroValue::Record(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, to_json(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => Value::String(format!("{other:?}")),
    }
}

fn float(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use apache_avro::types::Record;

    pub(crate) const PRINT_EVENT_SCHEMA: &str = r#"{
        "type": "record",
        "name": "SF_Printer_Event__e",
        "namespace": "com.sforce.eventbus",
        "fields": [
            {"name": "CreatedDate", "type": "long"},
            {"name": "Type__c", "type": ["null", "string"], "default": null},
            {"name": "Printer_Host__c", "type": ["null", "string"], "default": null},
            {"name": "Printer_Port__c", "type": ["null", "string"], "default": null},
            {"name": "Printer_Type__c", "type": ["null", "string"], "default": null},
            {"name": "Content_Type__c", "type": ["null", "string"], "default": null},
            {"name": "Content__c", "type": ["null", "string"], "default": null},
            {"name": "Qty__c", "type": ["null", "double"], "default": null},
            {"name": "Correlation_Id__c", "type": ["null", "string"], "default": null}
        ]
    }"#;

    /// Encode a print event the way the platform would.
    pub(crate) fn encode_print_event(schema: &Schema, fields: &[(&str, Option<&str>)], qty: Option<f64>) -> Vec<u8> {
        let mut record = Record::new(schema).unwrap();
        record.put("CreatedDate", AvroValue::Long(1_760_000_000_000));
        let text = |v: Option<&str>| match v {
            Some(s) => AvroValue::Union(1, Box::new(AvroValue::String(s.to_string()))),
            None => AvroValue::Union(0, Box::new(AvroValue::Null)),
        };
        for name in [
            "Type__c",
            "Printer_Host__c",
            "Printer_Port__c",
            "Printer_Type__c",
            "Content_Type__c",
            "Content__c",
            "Correlation_Id__c",
        ] {
            let value = fields.iter().find(|(n, _)| *n == name).and_then(|(_, v)| *v);
            record.put(name, text(value));
        }
        record.put(
            "Qty__c",
            match qty {
                Some(q) => AvroValue::Union(1, Box::new(AvroValue::Double(q))),
                None => AvroValue::Union(0, Box::new(AvroValue::Null)),
            },
        );
        apache_avro::to_avro_datum(schema, record).unwrap()
    }

    #[test]
    fn decodes_platform_event() {
        let schema = parse_schema(PRINT_EVENT_SCHEMA).unwrap();
        let payload = encode_print_event(
            &schema,
            &[
                ("Type__c", Some("print_job")),
                ("Printer_Host__c", Some("10.0.0.5")),
                ("Content_Type__c", Some("raw_base64")),
            ],
            Some(2.0),
        );
        let record = decode_event(&schema, &payload).unwrap();
        assert_eq!(record.event_type(), "print_job");
        assert_eq!(record.text("Printer_Host__c"), "10.0.0.5");
        assert_eq!(record.get("Printer_Port__c"), Some(&Value::Null));
        assert_eq!(record.int_or("Qty__c", 1), 2);
        assert_eq!(record.int_or("CreatedDate", 0), 1_760_000_000_000);
    }

    #[test]
    fn truncated_payload_is_decode_error() {
        let schema = parse_schema(PRINT_EVENT_SCHEMA).unwrap();
        let payload = encode_print_event(&schema, &[("Type__c", Some("print_job"))], None);
        let err = decode_event(&schema, &payload[..3]).unwrap_err();
        assert!(matches!(err, RelayError::Decode(_)));
    }

    #[test]
    fn invalid_schema_is_schema_error() {
        assert!(matches!(parse_schema("{not json"), Err(RelayError::Schema(_))));
    }

    #[test]
    fn non_record_payload_is_rejected() {
        let schema = parse_schema(r#""string""#).unwrap();
        let payload = apache_avro::to_avro_datum(&schema, AvroValue::String("hi".into())).unwrap();
        assert!(matches!(decode_event(&schema, &payload), Err(RelayError::Decode(_))));
    }

    #[test]
    fn bytes_become_base64() {
        assert_eq!(
            to_json(AvroValue::Bytes(b"^XA".to_vec())),
            Value::String("XlhB".into())
        );
    }
}
