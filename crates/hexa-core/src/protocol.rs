// Voice channel wire messages.
//
// Both directions are JSON objects tagged by a `type` field, e.g.
// `{"type":"ping"}` -> `{"type":"pong","timestamp":1712345678901}`.

use serde::{Deserialize, Serialize};

/// Messages sent by the browser over the voice WebSocket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceInbound {
    /// A chunk of recorded audio, base64-encoded by the browser. Browsers
    /// that send the message before any audio is captured omit the field.
    VoiceAudio {
        #[serde(default)]
        audio: String,
    },
    Ping,
}

/// Messages sent back to the browser over the voice WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VoiceOutbound {
    VoiceResponse { text: String, timestamp: i64 },
    Pong { timestamp: i64 },
    Error { message: String },
}

impl VoiceOutbound {
    pub fn error(message: impl Into<String>) -> Self {
        VoiceOutbound::Error {
            message: message.into(),
        }
    }

    /// Serialize to the JSON text sent on the wire.
    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail: all fields are strings or integers.
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"type":"error","message":"Failed to encode message"}"#.to_string()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_ping() {
        let msg: VoiceInbound = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, VoiceInbound::Ping);
    }

    #[test]
    fn parses_voice_audio() {
        let msg: VoiceInbound =
            serde_json::from_str(r#"{"type":"voice_audio","audio":"AAEC"}"#).unwrap();
        assert_eq!(
            msg,
            VoiceInbound::VoiceAudio {
                audio: "AAEC".into()
            }
        );
    }

    #[test]
    fn voice_audio_without_payload_is_empty() {
        let msg: VoiceInbound = serde_json::from_str(r#"{"type":"voice_audio"}"#).unwrap();
        assert_eq!(msg, VoiceInbound::VoiceAudio { audio: String::new() });
    }

    #[test]
    fn unknown_type_is_rejected() {
        let res: Result<VoiceInbound, _> = serde_json::from_str(r#"{"type":"dance"}"#);
        assert!(res.is_err());
    }

    #[test]
    fn outbound_is_tagged() {
        let pong = VoiceOutbound::Pong { timestamp: 42 };
        assert_eq!(pong.to_json(), r#"{"type":"pong","timestamp":42}"#);

        let err = VoiceOutbound::error("Unknown message type");
        assert_eq!(
            err.to_json(),
            r#"{"type":"error","message":"Unknown message type"}"#
        );
    }

    #[test]
    fn voice_response_shape() {
        let v: serde_json::Value = serde_json::from_str(
            &VoiceOutbound::VoiceResponse {
                text: "hi".into(),
                timestamp: 7,
            }
            .to_json(),
        )
        .unwrap();
        assert_eq!(v["type"], "voice_response");
        assert_eq!(v["text"], "hi");
        assert_eq!(v["timestamp"], 7);
    }
}
