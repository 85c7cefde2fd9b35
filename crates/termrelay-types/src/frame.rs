//! Frame protocol exchanged between a terminal client and the relay.
//!
//! Every frame is a single JSON object with a required `type` tag:
//!
//! | type   | fields          | direction         |
//! |--------|-----------------|-------------------|
//! | input  | `data`          | client -> relay   |
//! | resize | `cols`, `rows`  | client -> relay   |
//! | output | `data`          | relay -> client   |
//! | status | `message`       | relay -> client   |
//! | error  | `message`       | relay -> client   |
//!
//! Decoding is strict. Unknown tags and mistyped fields produce a typed
//! [`DecodeError`] instead of a silent pass-through, and decoding never panics.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::Geometry;

/// Status message sent once the remote shell is live.
pub const STATUS_CONNECTED: &str = "connected";

/// Status message sent when a streaming session ends.
pub const STATUS_DISCONNECTED: &str = "disconnected";

/// Tags accepted on the wire.
const KNOWN_TYPES: [&str; 5] = ["input", "resize", "output", "status", "error"];

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Keystrokes for the remote shell.
    Input { data: String },
    /// New terminal geometry.
    Resize { cols: u16, rows: u16 },
    /// Bytes produced by the remote shell.
    Output { data: String },
    /// Human-readable lifecycle message.
    Status { message: String },
    /// Human-readable failure message.
    Error { message: String },
}

/// Coarse frame classification, mostly for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Input,
    Resize,
    Output,
    Status,
    Error,
}

impl FrameKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FrameKind::Input => "input",
            FrameKind::Resize => "resize",
            FrameKind::Output => "output",
            FrameKind::Status => "status",
            FrameKind::Error => "error",
        }
    }

    /// Whether clients are allowed to send this kind to the relay.
    pub fn is_client_originated(&self) -> bool {
        matches!(self, FrameKind::Input | FrameKind::Resize)
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a wire payload could not be turned into a [`Frame`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame has no string `type` field")]
    MissingType,

    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("invalid fields for `{kind}` frame: {reason}")]
    InvalidFields { kind: String, reason: String },

    #[error("invalid terminal geometry {cols}x{rows}")]
    InvalidGeometry { cols: u16, rows: u16 },
}

impl Frame {
    pub fn input(data: impl Into<String>) -> Self {
        Frame::Input { data: data.into() }
    }

    pub fn output(data: impl Into<String>) -> Self {
        Frame::Output { data: data.into() }
    }

    pub fn status(message: impl Into<String>) -> Self {
        Frame::Status {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Frame::Error {
            message: message.into(),
        }
    }

    pub fn resize(geometry: Geometry) -> Self {
        Frame::Resize {
            cols: geometry.cols,
            rows: geometry.rows,
        }
    }

    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Input { .. } => FrameKind::Input,
            Frame::Resize { .. } => FrameKind::Resize,
            Frame::Output { .. } => FrameKind::Output,
            Frame::Status { .. } => FrameKind::Status,
            Frame::Error { .. } => FrameKind::Error,
        }
    }

    /// Serialize to one wire unit.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse one wire unit.
    pub fn decode(wire: &str) -> Result<Frame, DecodeError> {
        let value: Value =
            serde_json::from_str(wire).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    /// Parse a binary wire unit. The payload must be UTF-8 JSON.
    pub fn decode_bytes(wire: &[u8]) -> Result<Frame, DecodeError> {
        let value: Value =
            serde_json::from_slice(wire).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        Self::from_value(value)
    }

    fn from_value(value: Value) -> Result<Frame, DecodeError> {
        let object = value
            .as_object()
            .ok_or_else(|| DecodeError::Malformed("frame is not a JSON object".to_string()))?;

        let kind = object
            .get("type")
            .and_then(Value::as_str)
            .ok_or(DecodeError::MissingType)?;

        if !KNOWN_TYPES.contains(&kind) {
            return Err(DecodeError::UnknownType(kind.to_string()));
        }
        let kind = kind.to_string();

        let frame: Frame =
            serde_json::from_value(value).map_err(|e| DecodeError::InvalidFields {
                kind,
                reason: e.to_string(),
            })?;

        if let Frame::Resize { cols, rows } = frame {
            if cols == 0 || rows == 0 {
                return Err(DecodeError::InvalidGeometry { cols, rows });
            }
        }

        Ok(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_wire_shape_matches_protocol() {
        assert_eq!(
            Frame::input("ls\n").encode().unwrap(),
            r#"{"type":"input","data":"ls\n"}"#
        );
        assert_eq!(
            Frame::Resize { cols: 80, rows: 24 }.encode().unwrap(),
            r#"{"type":"resize","cols":80,"rows":24}"#
        );
        assert_eq!(
            Frame::status("Connected").encode().unwrap(),
            r#"{"type":"status","message":"Connected"}"#
        );
    }

    #[test]
    fn test_decode_known_frames() {
        assert_eq!(
            Frame::decode(r#"{"type":"output","data":"$ "}"#).unwrap(),
            Frame::output("$ ")
        );
        assert_eq!(
            Frame::decode(r#"{"type":"error","message":"boom"}"#).unwrap(),
            Frame::error("boom")
        );
        assert_eq!(
            Frame::decode_bytes(br#"{"type":"resize","cols":120,"rows":40}"#).unwrap(),
            Frame::Resize {
                cols: 120,
                rows: 40
            }
        );
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        // Browsers built against older clients may attach unrelated fields.
        let frame = Frame::decode(r#"{"type":"input","data":"x","cols":0}"#).unwrap();
        assert_eq!(frame, Frame::input("x"));
    }

    #[test]
    fn test_decode_unknown_type() {
        assert_eq!(
            Frame::decode(r#"{"type":"ping"}"#),
            Err(DecodeError::UnknownType("ping".to_string()))
        );
    }

    #[test]
    fn test_decode_missing_type() {
        assert_eq!(
            Frame::decode(r#"{"data":"x"}"#),
            Err(DecodeError::MissingType)
        );
        assert_eq!(
            Frame::decode(r#"{"type":7}"#),
            Err(DecodeError::MissingType)
        );
    }

    #[test]
    fn test_decode_wrong_field_types() {
        let err = Frame::decode(r#"{"type":"resize","cols":"80","rows":24}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFields { ref kind, .. } if kind == "resize"));

        let err = Frame::decode(r#"{"type":"input","data":42}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFields { ref kind, .. } if kind == "input"));

        let err = Frame::decode(r#"{"type":"resize","cols":-1,"rows":24}"#).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidFields { .. }));
    }

    #[test]
    fn test_decode_rejects_zero_geometry() {
        assert_eq!(
            Frame::decode(r#"{"type":"resize","cols":0,"rows":24}"#),
            Err(DecodeError::InvalidGeometry { cols: 0, rows: 24 })
        );
    }

    #[test]
    fn test_decode_non_object() {
        assert!(matches!(Frame::decode("[1,2]"), Err(DecodeError::Malformed(_))));
        assert!(matches!(Frame::decode("not json"), Err(DecodeError::Malformed(_))));
        assert!(matches!(Frame::decode(""), Err(DecodeError::Malformed(_))));
        assert!(matches!(
            Frame::decode_bytes(&[0xff, 0xfe]),
            Err(DecodeError::Malformed(_))
        ));
    }

    #[test]
    fn test_frame_kind_direction() {
        assert!(Frame::input("a").kind().is_client_originated());
        assert!(Frame::Resize { cols: 1, rows: 1 }.kind().is_client_originated());
        assert!(!Frame::output("a").kind().is_client_originated());
        assert!(!Frame::status("a").kind().is_client_originated());
        assert!(!Frame::error("a").kind().is_client_originated());
    }

    fn arb_frame() -> impl Strategy<Value = Frame> {
        prop_oneof![
            any::<String>().prop_map(|data| Frame::Input { data }),
            any::<String>().prop_map(|data| Frame::Output { data }),
            any::<String>().prop_map(|message| Frame::Status { message }),
            any::<String>().prop_map(|message| Frame::Error { message }),
            (1u16.., 1u16..).prop_map(|(cols, rows)| Frame::Resize { cols, rows }),
        ]
    }

    proptest! {
        #[test]
        fn prop_roundtrip(frame in arb_frame()) {
            let wire = frame.encode().unwrap();
            prop_assert_eq!(Frame::decode(&wire).unwrap(), frame);
        }

        #[test]
        fn prop_decode_never_panics(wire in any::<String>()) {
            let _ = Frame::decode(&wire);
        }

        #[test]
        fn prop_decode_bytes_never_panics(wire in proptest::collection::vec(any::<u8>(), 0..256)) {
            let _ = Frame::decode_bytes(&wire);
        }

        #[test]
        fn prop_unknown_tags_are_typed(tag in "[a-z]{1,12}") {
            prop_assume!(!KNOWN_TYPES.contains(&tag.as_str()));
            let wire = serde_json::json!({ "type": tag.clone(), "data": "x" }).to_string();
            prop_assert_eq!(Frame::decode(&wire), Err(DecodeError::UnknownType(tag)));
        }
    }
}
