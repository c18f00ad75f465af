// Voice channel over WebSocket.
//
// Each text frame is one JSON message tagged by `type`. Audio is not
// transcribed: a configured channel acknowledges every `voice_audio` chunk
// with a fixed reply.

use std::fmt::Display;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::Stream;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use hexa_core::protocol::{VoiceInbound, VoiceOutbound};

/// Text sent back for every audio chunk.
pub const VOICE_ACK: &str = "I heard your audio input. How can I help you with the code?";

/// Whether audio can be answered: both an API key and a realtime model must
/// be configured. Audio on an unready channel is a processing failure, not a
/// distinct error the client can act on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceGate {
    pub ready: bool,
}

/// Reply to one text frame.
pub fn handle_voice_text(text: &str, gate: VoiceGate, now_ms: i64) -> VoiceOutbound {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            warn!("voice message is not JSON: {e}");
            return VoiceOutbound::error("Failed to process message");
        }
    };

    let known = matches!(
        value.get("type").and_then(|t| t.as_str()),
        Some("voice_audio") | Some("ping")
    );
    if !known {
        return VoiceOutbound::error("Unknown message type");
    }

    match serde_json::from_value::<VoiceInbound>(value) {
        Ok(VoiceInbound::Ping) => VoiceOutbound::Pong { timestamp: now_ms },
        Ok(VoiceInbound::VoiceAudio { audio }) => {
            if !gate.ready {
                warn!("voice audio received but realtime voice is not configured");
                return VoiceOutbound::error("Failed to process message");
            }
            debug!(audio_len = audio.len(), "voice audio received");
            VoiceOutbound::VoiceResponse {
                text: VOICE_ACK.to_string(),
                timestamp: now_ms,
            }
        }
        Err(e) => {
            warn!("malformed voice message: {e}");
            VoiceOutbound::error("Failed to process message")
        }
    }
}

/// Answer every text frame from `stream` through `tx` until the client
/// closes, the stream errors, or the receiver is dropped (`Err(())`).
///
/// Generic over the stream so it can be driven by in-memory messages.
pub async fn process_voice_stream<St, E>(
    mut stream: St,
    tx: &mpsc::Sender<VoiceOutbound>,
    gate: VoiceGate,
) -> Result<(), ()>
where
    St: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    while let Some(msg_result) = stream.next().await {
        match msg_result {
            Ok(Message::Text(text)) => {
                let reply = handle_voice_text(text.as_str(), gate, chrono::Utc::now().timestamp_millis());
                if tx.send(reply).await.is_err() {
                    return Err(());
                }
            }
            Ok(Message::Close(_)) => {
                info!("voice client sent close frame");
                break;
            }
            Err(e) => {
                warn!("voice socket error: {e}");
                break;
            }
            _ => {
                // Binary, Ping and Pong frames carry no messages.
            }
        }
    }
    Ok(())
}

/// Drive one upgraded voice connection.
pub async fn run_voice_socket(socket: WebSocket, gate: VoiceGate) {
    let (mut write, read) = socket.split();
    let (tx, mut rx) = mpsc::channel::<VoiceOutbound>(32);

    let writer = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            if write.send(Message::Text(reply.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    let _ = process_voice_stream(read, &tx, gate).await;
    drop(tx);
    let _ = writer.await;
    info!("voice connection closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::stream;

    const READY: VoiceGate = VoiceGate { ready: true };
    const NOT_READY: VoiceGate = VoiceGate { ready: false };

    fn mock_stream(
        messages: Vec<Result<Message, axum::Error>>,
    ) -> impl Stream<Item = Result<Message, axum::Error>> + Unpin {
        stream::iter(messages)
    }

    #[test]
    fn ping_gets_pong() {
        assert_eq!(
            handle_voice_text(r#"{"type":"ping"}"#, NOT_READY, 5),
            VoiceOutbound::Pong { timestamp: 5 }
        );
    }

    #[test]
    fn audio_is_acknowledged_when_ready() {
        assert_eq!(
            handle_voice_text(r#"{"type":"voice_audio","audio":"AAA="}"#, READY, 9),
            VoiceOutbound::VoiceResponse {
                text: VOICE_ACK.into(),
                timestamp: 9
            }
        );
    }

    #[test]
    fn audio_without_configuration_fails_processing() {
        assert_eq!(
            handle_voice_text(r#"{"type":"voice_audio","audio":"AAA="}"#, NOT_READY, 9),
            VoiceOutbound::error("Failed to process message")
        );
    }

    #[test]
    fn audio_message_without_payload_is_acknowledged() {
        assert_eq!(
            handle_voice_text(r#"{"type":"voice_audio"}"#, READY, 3),
            VoiceOutbound::VoiceResponse {
                text: VOICE_ACK.into(),
                timestamp: 3
            }
        );
    }

    #[test]
    fn unknown_type() {
        assert_eq!(
            handle_voice_text(r#"{"type":"dance"}"#, READY, 0),
            VoiceOutbound::error("Unknown message type")
        );
        assert_eq!(
            handle_voice_text(r#"{"audio":"x"}"#, READY, 0),
            VoiceOutbound::error("Unknown message type")
        );
    }

    #[test]
    fn unparseable_message() {
        assert_eq!(
            handle_voice_text("not json", READY, 0),
            VoiceOutbound::error("Failed to process message")
        );
        assert_eq!(
            handle_voice_text(r#"{"type":"voice_audio","audio":5}"#, READY, 0),
            VoiceOutbound::error("Failed to process message")
        );
    }

    #[tokio::test]
    async fn replies_in_order_and_stops_at_close() {
        let (tx, mut rx) = mpsc::channel(8);
        let messages = vec![
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
            Ok(Message::Binary(vec![1u8, 2, 3].into())),
            Ok(Message::Text(r#"{"type":"nope"}"#.into())),
            Ok(Message::Close(None)),
            Ok(Message::Text(r#"{"type":"ping"}"#.into())),
        ];

        process_voice_stream(mock_stream(messages), &tx, READY)
            .await
            .unwrap();
        drop(tx);

        assert!(matches!(rx.recv().await, Some(VoiceOutbound::Pong { .. })));
        assert_eq!(
            rx.recv().await,
            Some(VoiceOutbound::error("Unknown message type"))
        );
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn dropped_receiver_stops_processing() {
        let (tx, rx) = mpsc::channel(8);
        drop(rx);
        let messages = vec![Ok(Message::Text(r#"{"type":"ping"}"#.into()))];
        assert_eq!(
            process_voice_stream(mock_stream(messages), &tx, READY).await,
            Err(())
        );
    }
}
