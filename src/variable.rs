//! Variable Codec (spec §4.B) — bidirectional translation between the
//! engine's typed variable domain and the worker's native JSON value model.
//!
//! Follows the teacher's rule (see `bpmn_integration::types`) of no
//! untyped `serde_json::json!` soup for structured data: every engine kind
//! gets its own variant, and the codec is exhaustive over the sum.

use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default threshold above which an encoded output is uploaded via
/// `setVariable` instead of inlined into the terminal report (spec §4.B).
pub const DEFAULT_INLINE_VARIABLE_LIMIT_BYTES: usize = 4096;

/// A file-valued variable (spec §4.B `File` kind).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileValue {
    pub filename: String,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

/// The engine's closed variable kind, tagged sum type (spec §3 `TypedValue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum TypedValue {
    String {
        value: String,
    },
    Long {
        value: i64,
    },
    Double {
        value: f64,
    },
    Boolean {
        value: bool,
    },
    Date {
        value: DateTime<Utc>,
    },
    Bytes {
        #[serde(with = "base64_bytes")]
        value: Vec<u8>,
    },
    Json {
        value: serde_json::Value,
        serialization_data_format: String,
    },
    Xml {
        value: String,
    },
    File {
        value: FileValue,
    },
    /// Explicit null carrier, distinct from "variable absent".
    Null,
    Object {
        /// Raw serialized payload. `None` when the format was not a
        /// recognized JSON dialect and could not be parsed — the payload
        /// is then carried opaquely in `raw`.
        value: Option<serde_json::Value>,
        raw: String,
        object_type_name: String,
        serialization_data_format: String,
    },
}

mod base64_bytes {
    use base64::Engine as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s)
            .map_err(serde::de::Error::custom)
    }
}

/// The wire encoding of a decoded `TypedValue`: the engine's actual
/// `{type, value, valueInfo}` shape used in fetchAndLock responses and
/// complete/failure/bpmnError request bodies (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireValue {
    #[serde(rename = "type")]
    pub type_name: String,
    pub value: serde_json::Value,
    #[serde(rename = "valueInfo", default, skip_serializing_if = "ValueInfo::is_empty")]
    pub value_info: ValueInfo,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueInfo {
    #[serde(rename = "objectTypeName", skip_serializing_if = "Option::is_none")]
    pub object_type_name: Option<String>,
    #[serde(
        rename = "serializationDataFormat",
        skip_serializing_if = "Option::is_none"
    )]
    pub serialization_data_format: Option<String>,
    #[serde(rename = "filename", skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(rename = "mimeType", skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(rename = "encoding", skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
}

impl ValueInfo {
    fn is_empty(&self) -> bool {
        self.object_type_name.is_none()
            && self.serialization_data_format.is_none()
            && self.filename.is_none()
            && self.mime_type.is_none()
            && self.encoding.is_none()
    }
}

const JSON_DATAFORMAT: &str = "application/json";

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown engine variable type '{0}'")]
    UnknownType(String),
    #[error("variable value for type '{kind}' was not the expected shape: {detail}")]
    ShapeMismatch { kind: String, detail: String },
    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Decode a wire value into a `TypedValue` (spec §4.B decode rules).
pub fn decode(wire: &WireValue) -> Result<TypedValue, CodecError> {
    let mismatch = |detail: &str| CodecError::ShapeMismatch {
        kind: wire.type_name.clone(),
        detail: detail.to_string(),
    };

    Ok(match wire.type_name.as_str() {
        "String" => TypedValue::String {
            value: wire
                .value
                .as_str()
                .ok_or_else(|| mismatch("expected string"))?
                .to_string(),
        },
        "Long" => TypedValue::Long {
            value: wire
                .value
                .as_i64()
                .ok_or_else(|| mismatch("expected integer"))?,
        },
        "Double" => TypedValue::Double {
            value: wire
                .value
                .as_f64()
                .ok_or_else(|| mismatch("expected float"))?,
        },
        "Boolean" => TypedValue::Boolean {
            value: wire
                .value
                .as_bool()
                .ok_or_else(|| mismatch("expected bool"))?,
        },
        "Date" => {
            let raw = wire.value.as_str().ok_or_else(|| mismatch("expected ISO-8601 string"))?;
            let parsed = DateTime::parse_from_rfc3339(raw)
                .map_err(|e| mismatch(&format!("invalid ISO-8601 date: {e}")))?;
            TypedValue::Date {
                value: parsed.with_timezone(&Utc),
            }
        }
        "Bytes" => {
            let raw = wire.value.as_str().ok_or_else(|| mismatch("expected base64 string"))?;
            TypedValue::Bytes {
                value: base64::engine::general_purpose::STANDARD.decode(raw)?,
            }
        }
        "Json" => {
            let raw = wire.value.as_str().ok_or_else(|| mismatch("expected JSON-as-string"))?;
            let parsed: serde_json::Value =
                serde_json::from_str(raw).map_err(|e| mismatch(&format!("invalid JSON: {e}")))?;
            TypedValue::Json {
                value: parsed,
                serialization_data_format: wire
                    .value_info
                    .serialization_data_format
                    .clone()
                    .unwrap_or_else(|| JSON_DATAFORMAT.to_string()),
            }
        }
        "Xml" => TypedValue::Xml {
            value: wire
                .value
                .as_str()
                .ok_or_else(|| mismatch("expected XML string"))?
                .to_string(),
        },
        "File" => {
            let raw = wire.value.as_str().ok_or_else(|| mismatch("expected base64 file payload"))?;
            TypedValue::File {
                value: FileValue {
                    filename: wire.value_info.filename.clone().unwrap_or_default(),
                    mime_type: wire.value_info.mime_type.clone(),
                    encoding: wire.value_info.encoding.clone(),
                    bytes: base64::engine::general_purpose::STANDARD.decode(raw)?,
                },
            }
        }
        "Null" => TypedValue::Null,
        "Object" => {
            let raw = wire
                .value
                .as_str()
                .map(|s| s.to_string())
                .unwrap_or_else(|| wire.value.to_string());
            let format = wire
                .value_info
                .serialization_data_format
                .clone()
                .unwrap_or_default();
            let parsed = if is_json_dialect(&format) {
                serde_json::from_str(&raw).ok()
            } else {
                None
            };
            TypedValue::Object {
                value: parsed,
                raw,
                object_type_name: wire.value_info.object_type_name.clone().unwrap_or_default(),
                serialization_data_format: format,
            }
        }
        other => return Err(CodecError::UnknownType(other.to_string())),
    })
}

fn is_json_dialect(format: &str) -> bool {
    let f = format.to_ascii_lowercase();
    f.contains("json")
}

/// Encode a `TypedValue` back to its wire form (spec §4.B encode, the
/// "tagged" direction — kind is already known).
pub fn encode(value: &TypedValue) -> WireValue {
    match value {
        TypedValue::String { value } => WireValue {
            type_name: "String".to_string(),
            value: serde_json::Value::String(value.clone()),
            value_info: ValueInfo::default(),
        },
        TypedValue::Long { value } => WireValue {
            type_name: "Long".to_string(),
            value: serde_json::json!(value),
            value_info: ValueInfo::default(),
        },
        TypedValue::Double { value } => WireValue {
            type_name: "Double".to_string(),
            value: serde_json::json!(value),
            value_info: ValueInfo::default(),
        },
        TypedValue::Boolean { value } => WireValue {
            type_name: "Boolean".to_string(),
            value: serde_json::Value::Bool(*value),
            value_info: ValueInfo::default(),
        },
        TypedValue::Date { value } => WireValue {
            type_name: "Date".to_string(),
            value: serde_json::Value::String(value.to_rfc3339()),
            value_info: ValueInfo::default(),
        },
        TypedValue::Bytes { value } => WireValue {
            type_name: "Bytes".to_string(),
            value: serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(value),
            ),
            value_info: ValueInfo::default(),
        },
        TypedValue::Json {
            value,
            serialization_data_format,
        } => WireValue {
            type_name: "Json".to_string(),
            value: serde_json::Value::String(value.to_string()),
            value_info: ValueInfo {
                serialization_data_format: Some(serialization_data_format.clone()),
                ..Default::default()
            },
        },
        TypedValue::Xml { value } => WireValue {
            type_name: "Xml".to_string(),
            value: serde_json::Value::String(value.clone()),
            value_info: ValueInfo::default(),
        },
        TypedValue::File { value } => WireValue {
            type_name: "File".to_string(),
            value: serde_json::Value::String(
                base64::engine::general_purpose::STANDARD.encode(&value.bytes),
            ),
            value_info: ValueInfo {
                filename: Some(value.filename.clone()),
                mime_type: value.mime_type.clone(),
                encoding: value.encoding.clone(),
                ..Default::default()
            },
        },
        TypedValue::Null => WireValue {
            type_name: "Null".to_string(),
            value: serde_json::Value::Null,
            value_info: ValueInfo::default(),
        },
        TypedValue::Object {
            value,
            raw,
            object_type_name,
            serialization_data_format,
        } => WireValue {
            type_name: "Object".to_string(),
            value: serde_json::Value::String(
                value
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| raw.clone()),
            ),
            value_info: ValueInfo {
                object_type_name: Some(object_type_name.clone()),
                serialization_data_format: Some(serialization_data_format.clone()),
                ..Default::default()
            },
        },
    }
}

/// Infer a `TypedValue` from an untagged native JSON value, per the
/// ordered inference rules in spec §4.B. Used when the executor result
/// does not pre-tag an output with its intended kind.
pub fn infer(value: serde_json::Value) -> TypedValue {
    match value {
        serde_json::Value::Null => TypedValue::Null,
        serde_json::Value::Bool(b) => TypedValue::Boolean { value: b },
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                TypedValue::Long { value: i }
            } else {
                TypedValue::Double {
                    value: n.as_f64().unwrap_or_default(),
                }
            }
        }
        serde_json::Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(&s) {
                TypedValue::Date {
                    value: dt.with_timezone(&Utc),
                }
            } else {
                TypedValue::String { value: s }
            }
        }
        other @ (serde_json::Value::Array(_) | serde_json::Value::Object(_)) => TypedValue::Json {
            value: other,
            serialization_data_format: JSON_DATAFORMAT.to_string(),
        },
    }
}

/// Decode a full variable map from a fetchAndLock response body.
pub fn decode_all(
    wire: &HashMap<String, WireValue>,
) -> Result<HashMap<String, TypedValue>, CodecError> {
    wire.iter()
        .map(|(name, w)| decode(w).map(|v| (name.clone(), v)))
        .collect()
}

/// Encode a full variable map for a complete/failure/bpmnError request body.
pub fn encode_all(values: &HashMap<String, TypedValue>) -> HashMap<String, WireValue> {
    values.iter().map(|(k, v)| (k.clone(), encode(v))).collect()
}

/// Approximate encoded size in bytes, used against
/// `DEFAULT_INLINE_VARIABLE_LIMIT_BYTES` to decide inline-vs-uploaded (§4.B).
pub fn encoded_size(value: &TypedValue) -> usize {
    serde_json::to_vec(&encode(value)).map(|v| v.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: TypedValue) {
        let wire = encode(&v);
        let back = decode(&wire).expect("decode should succeed");
        assert_eq!(v, back, "decode(encode(v)) must equal v");
    }

    #[test]
    fn string_roundtrips() {
        roundtrip(TypedValue::String {
            value: "Hello, Alice!".to_string(),
        });
    }

    #[test]
    fn long_roundtrips() {
        roundtrip(TypedValue::Long { value: 42 });
    }

    #[test]
    fn double_roundtrips() {
        roundtrip(TypedValue::Double { value: 3.25 });
    }

    #[test]
    fn boolean_roundtrips() {
        roundtrip(TypedValue::Boolean { value: true });
    }

    #[test]
    fn date_roundtrips() {
        roundtrip(TypedValue::Date { value: Utc::now() });
    }

    #[test]
    fn bytes_roundtrips() {
        roundtrip(TypedValue::Bytes {
            value: vec![0, 1, 2, 255],
        });
    }

    #[test]
    fn json_roundtrips() {
        roundtrip(TypedValue::Json {
            value: serde_json::json!({"a": 1, "b": [1,2,3]}),
            serialization_data_format: JSON_DATAFORMAT.to_string(),
        });
    }

    #[test]
    fn xml_roundtrips() {
        roundtrip(TypedValue::Xml {
            value: "<a><b/></a>".to_string(),
        });
    }

    #[test]
    fn file_roundtrips() {
        roundtrip(TypedValue::File {
            value: FileValue {
                filename: "report.txt".to_string(),
                mime_type: Some("text/plain".to_string()),
                encoding: None,
                bytes: b"hello".to_vec(),
            },
        });
    }

    #[test]
    fn null_roundtrips() {
        roundtrip(TypedValue::Null);
    }

    #[test]
    fn object_with_json_dialect_roundtrips_parsed_value() {
        let v = TypedValue::Object {
            value: Some(serde_json::json!({"x": 1})),
            raw: r#"{"x":1}"#.to_string(),
            object_type_name: "com.example.Foo".to_string(),
            serialization_data_format: "application/json".to_string(),
        };
        roundtrip(v);
    }

    #[test]
    fn object_with_opaque_format_is_passed_through() {
        let wire = WireValue {
            type_name: "Object".to_string(),
            value: serde_json::Value::String("<opaque/>".to_string()),
            value_info: ValueInfo {
                object_type_name: Some("com.example.Bar".to_string()),
                serialization_data_format: Some("application/xstream".to_string()),
                ..Default::default()
            },
        };
        let decoded = decode(&wire).unwrap();
        match decoded {
            TypedValue::Object { value, raw, .. } => {
                assert!(value.is_none());
                assert_eq!(raw, "<opaque/>");
            }
            _ => panic!("expected Object"),
        }
    }

    #[test]
    fn infer_picks_null_for_absent() {
        assert!(matches!(infer(serde_json::Value::Null), TypedValue::Null));
    }

    #[test]
    fn infer_picks_long_for_integers_and_double_for_floats() {
        assert!(matches!(
            infer(serde_json::json!(7)),
            TypedValue::Long { value: 7 }
        ));
        assert!(matches!(
            infer(serde_json::json!(7.5)),
            TypedValue::Double { .. }
        ));
    }

    #[test]
    fn infer_picks_json_for_generic_trees() {
        assert!(matches!(
            infer(serde_json::json!({"a": 1})),
            TypedValue::Json { .. }
        ));
        assert!(matches!(
            infer(serde_json::json!([1, 2])),
            TypedValue::Json { .. }
        ));
    }

    #[test]
    fn infer_falls_back_to_string() {
        assert!(matches!(
            infer(serde_json::json!("plain text")),
            TypedValue::String { .. }
        ));
    }

    #[test]
    fn unknown_wire_type_is_rejected() {
        let wire = WireValue {
            type_name: "Frobnicate".to_string(),
            value: serde_json::Value::Null,
            value_info: ValueInfo::default(),
        };
        assert!(matches!(decode(&wire), Err(CodecError::UnknownType(_))));
    }
}
