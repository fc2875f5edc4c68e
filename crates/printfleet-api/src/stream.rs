//! Push-socket session against a printer's `sockjs/websocket` endpoint.
//!
//! Unlike an auto-reconnecting stream, a [`StreamSession`] is a *single*
//! connection: it authenticates, applies the throttle, and yields decoded
//! frames until the device closes or the transport fails. Reconnection is
//! an explicit state transition owned by the connection supervisor in
//! `printfleet-core`, not an implicit retry inside this type.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, trace};

use crate::error::ApiError;
use crate::types::PushMessage;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Derive the throttle frame interval from the configured polling cadence.
///
/// The device emits one status frame per `throttle * 500ms`, so the wire
/// value is `(seconds * 1000) / 500`, truncated.
pub fn throttle_interval_ms(polling_seconds: f64) -> u64 {
    let raw = (polling_seconds * 1000.0) / 500.0;
    if raw.is_sign_negative() || !raw.is_finite() {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        raw as u64
    }
}

/// What the session read loop produced.
#[derive(Debug)]
pub enum SessionEvent {
    /// A decoded push frame.
    Message(PushMessage),
    /// The device sent a close frame.
    Closed { code: Option<u16>, reason: String },
    /// The stream ended without a close frame.
    Ended,
    /// Transport failure mid-session.
    Failed(ApiError),
}

/// One live push-socket connection to a device.
pub struct StreamSession {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
    url: String,
}

impl StreamSession {
    /// Connect to `ws://<address>/sockjs/websocket` and send the auth and
    /// throttle frames.
    ///
    /// `address` is the device's HTTP control address; its scheme is
    /// stripped before building the socket URL.
    pub async fn connect(
        address: &str,
        identity: &str,
        api_key: &str,
        throttle_ms: u64,
    ) -> Result<Self, ApiError> {
        let host = address
            .trim_start_matches("http://")
            .trim_start_matches("https://")
            .trim_end_matches('/');
        let url = format!("ws://{host}/sockjs/websocket");
        info!(url = %url, "connecting push socket");

        let (ws, _response) = tokio_tungstenite::connect_async(&url)
            .await
            .map_err(|e| ApiError::StreamConnect(e.to_string()))?;

        let (write, read) = ws.split();
        let mut session = Self { write, read, url };

        session
            .send_json(&json!({ "auth": format!("{identity}:{api_key}") }))
            .await?;
        session.send_throttle(throttle_ms).await?;

        debug!(url = %session.url, throttle_ms, "push socket authenticated");
        Ok(session)
    }

    /// Push a new throttle frame onto the open session.
    pub async fn send_throttle(&mut self, throttle_ms: u64) -> Result<(), ApiError> {
        self.send_json(&json!({ "throttle": throttle_ms })).await
    }

    async fn send_json(&mut self, value: &serde_json::Value) -> Result<(), ApiError> {
        self.write
            .send(Message::Text(value.to_string().into()))
            .await
            .map_err(|e| ApiError::StreamConnect(e.to_string()))
    }

    /// Read the next event. Non-text frames are consumed internally;
    /// tungstenite answers pings on our behalf.
    pub async fn next_event(&mut self) -> SessionEvent {
        loop {
            match self.read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str(&text) {
                    Ok(msg) => return SessionEvent::Message(msg),
                    Err(e) => {
                        debug!(url = %self.url, error = %e, "undecodable push frame, skipping");
                    }
                },
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (Some(u16::from(f.code)), f.reason.to_string()))
                        .unwrap_or((None, String::new()));
                    info!(url = %self.url, ?code, reason = %reason, "push socket close frame");
                    return SessionEvent::Closed { code, reason };
                }
                Some(Ok(Message::Ping(_))) => trace!(url = %self.url, "push socket ping"),
                Some(Ok(_)) => {
                    // Binary, Pong, raw frames -- ignore
                }
                Some(Err(e)) => {
                    return SessionEvent::Failed(ApiError::StreamConnect(e.to_string()));
                }
                None => {
                    info!(url = %self.url, "push socket stream ended");
                    return SessionEvent::Ended;
                }
            }
        }
    }

    /// Close the session from our side. Errors are irrelevant at this
    /// point; the connection is going away either way.
    pub async fn close(mut self) {
        let _ = self.write.send(Message::Close(None)).await;
        let _ = self.write.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttle_interval_truncates() {
        assert_eq!(throttle_interval_ms(0.5), 1);
        assert_eq!(throttle_interval_ms(1.0), 2);
        assert_eq!(throttle_interval_ms(2.6), 5);
        assert_eq!(throttle_interval_ms(0.0), 0);
    }

    #[test]
    fn throttle_interval_rejects_nonsense() {
        assert_eq!(throttle_interval_ms(-3.0), 0);
        assert_eq!(throttle_interval_ms(f64::NAN), 0);
    }
}
