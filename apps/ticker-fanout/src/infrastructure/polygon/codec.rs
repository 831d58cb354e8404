//! Polygon Frame Codec
//!
//! Decodes inbound text frames into [`PolygonMessage`]s. Polygon sends JSON
//! arrays of events; a bare object is accepted as a one-element array.
//!
//! Any structural failure rejects the whole frame. Callers log and drop it
//! without touching the connection.

use super::messages::{AggregateMessage, PolygonMessage, StatusMessage};

/// Codec errors.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// JSON decoding failed.
    #[error("JSON codec error: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame was valid JSON but not an event or array of events.
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    /// An event object had no `ev` discriminator.
    #[error("event without `ev` field")]
    MissingEventType,
}

/// JSON codec for the Polygon stocks stream.
#[derive(Debug, Default, Clone)]
pub struct JsonCodec;

impl JsonCodec {
    /// Create a new JSON codec.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is not JSON, is not an object or an
    /// array of objects, or contains a malformed known event.
    pub fn decode(&self, text: &str) -> Result<Vec<PolygonMessage>, CodecError> {
        let value: serde_json::Value = serde_json::from_str(text.trim())?;

        match value {
            serde_json::Value::Array(events) => events.into_iter().map(decode_event).collect(),
            object @ serde_json::Value::Object(_) => Ok(vec![decode_event(object)?]),
            other => Err(CodecError::InvalidFormat(format!(
                "expected JSON array or object, got: {}",
                truncate(&other.to_string(), 50)
            ))),
        }
    }
}

fn decode_event(value: serde_json::Value) -> Result<PolygonMessage, CodecError> {
    let ev = value
        .get("ev")
        .and_then(serde_json::Value::as_str)
        .ok_or(CodecError::MissingEventType)?;

    match ev {
        "A" | "AM" => {
            let m: AggregateMessage = serde_json::from_value(value)?;
            Ok(PolygonMessage::Aggregate(m))
        }
        "status" => {
            let m: StatusMessage = serde_json::from_value(value)?;
            Ok(PolygonMessage::Status(m))
        }
        other => Ok(PolygonMessage::Unknown(other.to_string())),
    }
}

fn truncate(s: &str, max_chars: usize) -> &str {
    s.char_indices().nth(max_chars).map_or(s, |(idx, _)| &s[..idx])
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use test_case::test_case;

    use super::*;

    #[test]
    fn decodes_aggregate_array() {
        let codec = JsonCodec::new();
        let frame = r#"[
            {"ev":"AM","sym":"AAPL","o":150,"h":151,"l":149,"c":150.5,"v":100,"s":1},
            {"ev":"A","sym":"MSFT","o":400,"h":401,"l":399,"c":400,"v":50,"e":2}
        ]"#;

        let messages = codec.decode(frame).unwrap();
        assert_eq!(messages.len(), 2);

        let PolygonMessage::Aggregate(first) = &messages[0] else {
            panic!("expected aggregate");
        };
        assert_eq!(first.sym, "AAPL");
        assert_eq!(first.close, dec!(150.5));
    }

    #[test]
    fn decodes_status_events() {
        let codec = JsonCodec::new();
        let frame = r#"[{"ev":"status","status":"auth_success","message":"authenticated"}]"#;

        let messages = codec.decode(frame).unwrap();
        assert!(matches!(
            &messages[0],
            PolygonMessage::Status(s) if s.is_auth_success()
        ));
    }

    #[test]
    fn single_object_is_one_event() {
        let codec = JsonCodec::new();
        let messages = codec
            .decode(r#"{"ev":"status","status":"connected","message":"Connected Successfully"}"#)
            .unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn unknown_event_kind_is_kept_as_unknown() {
        let codec = JsonCodec::new();
        let messages = codec.decode(r#"[{"ev":"T","sym":"AAPL"}]"#).unwrap();
        assert_eq!(messages, vec![PolygonMessage::Unknown("T".to_string())]);
    }

    #[test]
    fn empty_array_decodes_to_nothing() {
        assert!(JsonCodec::new().decode("[]").unwrap().is_empty());
    }

    #[test_case("not json" ; "garbage")]
    #[test_case("[{\"ev\":\"AM\",\"sym\":\"AAPL\"}]" ; "aggregate missing prices")]
    #[test_case("[{\"sym\":\"AAPL\"}]" ; "missing ev")]
    #[test_case("42" ; "scalar")]
    #[test_case("[1, 2]" ; "array of scalars")]
    fn malformed_frames_are_errors(frame: &str) {
        assert!(JsonCodec::new().decode(frame).is_err());
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("ééé", 2), "éé");
        assert_eq!(truncate("ab", 10), "ab");
    }
}
