//! JSON control frames exchanged over the terminal socket.
//!
//! Terminal output travels as binary frames of raw pty bytes. Everything
//! else is a JSON object tagged by `type`:
//!
//! ```text
//! {"type":"input","data":"ls\n"}
//! {"type":"resize","cols":120,"rows":40}
//! {"type":"ping"}            -> {"type":"pong"}
//! {"type":"error","data":"..."}
//! ```

use serde::{Deserialize, Serialize};

use crate::error::CoreResult;

/// A single control frame.
///
/// `Input`, `Resize` and `Ping` arrive from the client; `Pong` and `Error`
/// are only ever sent by the server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlFrame {
    /// Keystrokes to write to the terminal verbatim.
    Input {
        #[serde(default)]
        data: String,
    },
    /// New window size. Signed so that nonsense sizes parse and can be
    /// ignored; a missing dimension reads as 0.
    Resize {
        #[serde(default)]
        cols: i64,
        #[serde(default)]
        rows: i64,
    },
    Ping,
    Pong,
    /// Human-readable failure description.
    Error { data: String },
}

impl ControlFrame {
    pub fn error(message: impl Into<String>) -> Self {
        ControlFrame::Error {
            data: message.into(),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> CoreResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Classification of one inbound frame payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A well-formed control frame.
    Control(ControlFrame),
    /// Forwarded to the terminal as literal keystrokes: anything that is not
    /// a JSON object, or an object naming a known `type` with a field of the
    /// wrong JSON type.
    Raw(Vec<u8>),
    /// A JSON object with a missing or unknown `type`. Dropped.
    Unrecognized(String),
}

/// `type` tags of [`ControlFrame`].
const KNOWN_TYPES: [&str; 5] = ["input", "resize", "ping", "pong", "error"];

/// Classify an inbound payload.
///
/// Anything that does not decode as a control frame is raw input, which keeps
/// clients that write bare keystrokes working. A frame of a known type with a
/// wrongly typed field (say, a resize with a string width) therefore reaches
/// the shell as text. Missing fields take their defaults, so an empty `input`
/// or a half-specified `resize` is a no-op. Objects with no recognizable
/// `type` are dropped.
pub fn parse_inbound(payload: &[u8]) -> Inbound {
    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(v) => v,
        Err(_) => return Inbound::Raw(payload.to_vec()),
    };

    let Some(object) = value.as_object() else {
        return Inbound::Raw(payload.to_vec());
    };

    let kind = object.get("type").and_then(|t| t.as_str()).unwrap_or_default();
    if !KNOWN_TYPES.contains(&kind) {
        return Inbound::Unrecognized(format!("unknown control type {kind:?}"));
    }

    match ControlFrame::deserialize(value) {
        Ok(frame) => Inbound::Control(frame),
        Err(_) => Inbound::Raw(payload.to_vec()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_input() {
        assert_eq!(
            parse_inbound(br#"{"type":"input","data":"echo hi\n"}"#),
            Inbound::Control(ControlFrame::Input {
                data: "echo hi\n".into()
            })
        );
    }

    #[test]
    fn parses_resize_including_nonpositive() {
        assert_eq!(
            parse_inbound(br#"{"type":"resize","cols":100,"rows":40}"#),
            Inbound::Control(ControlFrame::Resize { cols: 100, rows: 40 })
        );
        assert_eq!(
            parse_inbound(br#"{"type":"resize","cols":0,"rows":-3}"#),
            Inbound::Control(ControlFrame::Resize { cols: 0, rows: -3 })
        );
    }

    #[test]
    fn parses_ping_with_extra_fields() {
        assert_eq!(
            parse_inbound(br#"{"type":"ping"}"#),
            Inbound::Control(ControlFrame::Ping)
        );
        assert_eq!(
            parse_inbound(br#"{"type":"ping","data":""}"#),
            Inbound::Control(ControlFrame::Ping)
        );
    }

    #[test]
    fn non_objects_are_raw() {
        for payload in [&b"ls -la\n"[..], b"\"just a string\"", b"42", b"[1,2]", b"{oops", b"\x1b[A"] {
            assert_eq!(parse_inbound(payload), Inbound::Raw(payload.to_vec()));
        }
    }

    #[test]
    fn unknown_objects_are_unrecognized() {
        assert!(matches!(
            parse_inbound(br#"{"type":"launch"}"#),
            Inbound::Unrecognized(_)
        ));
        assert!(matches!(parse_inbound(br#"{}"#), Inbound::Unrecognized(_)));
        assert!(matches!(
            parse_inbound(br#"{"type":7}"#),
            Inbound::Unrecognized(_)
        ));
    }

    #[test]
    fn wrongly_typed_fields_fall_back_to_raw() {
        for payload in [
            &br#"{"type":"resize","cols":"80","rows":24}"#[..],
            br#"{"type":"input","data":42}"#,
            br#"{"type":"resize","cols":80.5,"rows":24}"#,
        ] {
            assert_eq!(parse_inbound(payload), Inbound::Raw(payload.to_vec()));
        }
    }

    #[test]
    fn missing_fields_take_defaults() {
        assert_eq!(
            parse_inbound(br#"{"type":"input"}"#),
            Inbound::Control(ControlFrame::Input { data: String::new() })
        );
        assert_eq!(
            parse_inbound(br#"{"type":"resize","cols":80}"#),
            Inbound::Control(ControlFrame::Resize { cols: 80, rows: 0 })
        );
    }

    #[test]
    fn outbound_wire_format() {
        assert_eq!(ControlFrame::Pong.to_json().unwrap(), r#"{"type":"pong"}"#);
        assert_eq!(
            ControlFrame::error("spawn failed").to_json().unwrap(),
            r#"{"type":"error","data":"spawn failed"}"#
        );
    }
}
