//! JSON wire format for [`ResourceRequest`]s exchanged between a target and the launcher.
//!
//! Every value on the wire is a string; `time` is always `D-HH:MM:SS`.
use serde_json::{Map, Value};

use crate::duration::parse_duration;
use crate::error::SchemaError;
use crate::resource::{ResourceField, ResourceRequest};

/// Encode a request as a JSON object, omitting absent fields.
pub fn encode(request: &ResourceRequest) -> Value {
    let map: Map<String, Value> = request
        .fields()
        .map(|(f, v)| (f.wire_name().to_string(), Value::String(v.into_owned())))
        .collect();
    Value::Object(map)
}

pub fn to_json_string(request: &ResourceRequest) -> String {
    // Serializing a map of strings cannot fail.
    serde_json::to_string_pretty(&encode(request)).unwrap_or_default()
}

/// Parse and validate a single resource object.
pub fn validate_and_decode(json_text: &str) -> Result<ResourceRequest, SchemaError> {
    let value: Value = serde_json::from_str(json_text)?;
    decode_value(value)
}

fn json_type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn scalar_to_string(field: &str, v: Value) -> Result<String, SchemaError> {
    match v {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        // Node lists and mail types may be given as arrays, which sbatch wants comma-separated.
        Value::Array(items) => {
            let items: Result<Vec<_>, _> = items
                .into_iter()
                .map(|v| match v {
                    Value::Array(_) => Err(SchemaError::InvalidValue {
                        field: field.to_string(),
                        found: "a nested array",
                    }),
                    v => scalar_to_string(field, v),
                })
                .collect();
            Ok(items?.join(","))
        }
        other => Err(SchemaError::InvalidValue {
            field: field.to_string(),
            found: json_type_name(&other),
        }),
    }
}

/// Validate an already-parsed JSON value.
///
/// Missing required fields and unknown fields are collected and reported
/// together.  A `null` value for a known field is treated as absent.
pub fn decode_value(value: Value) -> Result<ResourceRequest, SchemaError> {
    let object = match value {
        Value::Object(m) => m,
        other => {
            return Err(SchemaError::Shape {
                expected: "an object",
                found: json_type_name(&other),
            })
        }
    };

    let mut present = Vec::with_capacity(object.len());
    let mut unknown = vec![];
    for (key, val) in object {
        match key.parse::<ResourceField>() {
            Ok(_) if val.is_null() => {}
            Ok(f) => present.push((f, key, val)),
            Err(key) => unknown.push(key),
        }
    }

    let missing: Vec<String> = ResourceField::required_fields()
        .filter(|r| !present.iter().any(|(f, _, _)| f == r))
        .map(|f| f.wire_name().to_string())
        .collect();

    if !missing.is_empty() || !unknown.is_empty() {
        unknown.sort();
        return Err(SchemaError::Fields { missing, unknown });
    }

    let mut request = ResourceRequest::with_required(String::new(), String::new(), String::new());
    for (field, key, val) in present {
        let s = scalar_to_string(&key, val)?;
        match field {
            ResourceField::Script => request.script = s,
            ResourceField::Out => request.out = s,
            ResourceField::Err => request.err = s,
            ResourceField::Time => {
                request.time = Some(parse_duration(&s).map_err(SchemaError::Time)?);
            }
            f => {
                if let Some(slot) = request.slot_mut(f) {
                    *slot = Some(s);
                }
            }
        }
    }
    Ok(request.normalize())
}

/// Decode the JSON array written by a target answering a batch query.
pub fn validate_and_decode_all(json_text: &str) -> Result<Vec<ResourceRequest>, SchemaError> {
    match serde_json::from_str::<Value>(json_text)? {
        Value::Array(items) => items.into_iter().map(decode_value).collect(),
        other => Err(SchemaError::Shape {
            expected: "an array",
            found: json_type_name(&other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const MINIMAL: &str = r##"{"script": "#!/bin/bash\necho hi", "out": "a.out", "err": "a.err"}"##;

    #[test]
    fn decode_minimal() {
        let r = validate_and_decode(MINIMAL).unwrap();
        assert_eq!(r.script(), "#!/bin/bash\necho hi");
        assert_eq!(r.get(ResourceField::Out).as_deref(), Some("a.out"));
        assert_eq!(r.get(ResourceField::Err).as_deref(), Some("a.err"));
        let others: Vec<_> = r.fields().map(|(f, _)| f).collect();
        assert_eq!(
            others,
            [ResourceField::Script, ResourceField::Out, ResourceField::Err]
        );
    }

    #[test]
    fn decode_missing_fields() {
        for drop in ["script", "out", "err"] {
            let mut v: Value = serde_json::from_str(MINIMAL).unwrap();
            v.as_object_mut().unwrap().remove(drop);
            let err = decode_value(v).unwrap_err();
            assert_eq!(err.missing_fields(), [drop.to_string()]);
            assert!(err.unknown_fields().is_empty());
            assert!(err.to_string().starts_with("missing required fields"));
        }
    }

    #[test]
    fn decode_unknown_fields() {
        let mut v: Value = serde_json::from_str(MINIMAL).unwrap();
        v["bogus"] = json!("x");
        let err = decode_value(v).unwrap_err();
        assert_eq!(err.unknown_fields(), ["bogus".to_string()]);
        assert_eq!(err.to_string(), "unknown fields: bogus");
    }

    #[test]
    fn decode_rejects_null_unknown_fields() {
        let err = validate_and_decode(r#"{"script": "s", "out": "o", "err": "e", "bogus": null}"#)
            .unwrap_err();
        assert_eq!(err.unknown_fields(), ["bogus".to_string()]);
        assert!(err.missing_fields().is_empty());
    }

    #[test]
    fn decode_drops_mail_type_without_user() {
        let r = decode_value(json!({"script": "s", "out": "o", "err": "e", "mail-type": "FAIL"}))
            .unwrap();
        assert_eq!(r.mail_type, None);
        assert_eq!(validate_and_decode(&to_json_string(&r)).unwrap(), r);
    }

    #[test]
    fn decode_reports_missing_and_unknown_together() {
        let err = validate_and_decode(r#"{"script": "x", "tasks-per-node": "1"}"#).unwrap_err();
        assert_eq!(err.missing_fields(), ["out".to_string(), "err".to_string()]);
        assert_eq!(err.unknown_fields(), ["tasks-per-node".to_string()]);
        assert_eq!(
            err.to_string(),
            "missing required fields: out, err; unknown fields: tasks-per-node"
        );
    }

    #[test]
    fn decode_values() {
        let r = decode_value(json!({
            "script": "s", "out": "o", "err": "e",
            "time": "1-00:00:00",
            "nodes": 1,
            "exclude": ["n01", "n02"],
            "mail-user": null
        }))
        .unwrap();
        assert_eq!(r.time(), Some(86400));
        assert_eq!(r.get(ResourceField::Nodes).as_deref(), Some("1"));
        assert_eq!(r.get(ResourceField::Exclude).as_deref(), Some("n01,n02"));
        assert_eq!(r.get(ResourceField::MailUser), None);

        assert!(matches!(
            decode_value(json!({"script": "s", "out": "o", "err": "e", "time": "10 minutes"})),
            Err(SchemaError::Time(_))
        ));
        assert!(matches!(
            decode_value(json!({"script": "s", "out": "o", "err": "e", "mem": true})),
            Err(SchemaError::InvalidValue { .. })
        ));
        assert!(matches!(
            validate_and_decode("[1, 2]"),
            Err(SchemaError::Shape {
                found: "an array",
                ..
            })
        ));
        assert!(matches!(
            validate_and_decode("{not json"),
            Err(SchemaError::Json(_))
        ));
    }

    #[test]
    fn encode_drops_mail_type_without_user() {
        let mut r = validate_and_decode(MINIMAL).unwrap();
        r.mail_type = Some("FAIL".to_string());
        r.time = Some(600);
        let v = encode(&r);
        assert_eq!(
            v,
            json!({
                "script": "#!/bin/bash\necho hi",
                "out": "a.out",
                "err": "a.err",
                "time": "0-00:10:00"
            })
        );

        r.mail_user = Some("me@example.com".to_string());
        assert_eq!(encode(&r)["mail-type"], json!("FAIL"));
    }

    #[test]
    fn decode_batch() {
        let text = format!("[{}, {}]", MINIMAL, MINIMAL);
        assert_eq!(validate_and_decode_all(&text).unwrap().len(), 2);
        assert!(validate_and_decode_all(MINIMAL).is_err());
    }
}
