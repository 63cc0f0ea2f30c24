//! Websocket signaling transport (client side of the call relay)

use crate::application::call::channel::SignalingTransport;
use crate::domain::shared::error::CallError;
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{CallControl, CallFrame, SignalingMessage};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound half of a relay connection
pub struct WsSignalingTransport {
    outbound: mpsc::UnboundedSender<String>,
}

/// Inbound half: every frame the relay sent, in order
pub type InboundFrames = mpsc::UnboundedReceiver<CallFrame>;

impl WsSignalingTransport {
    /// Connect to the relay and join the conversation's call room
    pub async fn connect(
        url: &str,
        conversation_id: &ConversationId,
        room_key: Option<String>,
    ) -> CallResult<(Self, InboundFrames)> {
        let (ws_stream, _) = connect_async(url)
            .await
            .map_err(|e| CallError::Signaling(format!("Failed to connect to {}: {}", url, e)))?;
        info!("relay.connected url={} room={}", url, conversation_id);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<String>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<CallFrame>();

        let join = serde_json::to_string(&CallFrame::Control(CallControl::Join {
            conversation_id: conversation_id.clone(),
            room_key,
        }))
        .map_err(|e| CallError::Signaling(e.to_string()))?;
        ws_write
            .send(Message::Text(join))
            .await
            .map_err(|e| CallError::Signaling(format!("Failed to join: {}", e)))?;

        // Ends once every sender is dropped or the relay goes away
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    text = outbound_rx.recv() => match text {
                        Some(text) => {
                            if ws_write.send(Message::Text(text)).await.is_err() {
                                break;
                            }
                        }
                        None => {
                            let _ = ws_write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    message = ws_read.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<CallFrame>(&text) {
                                Ok(frame) => {
                                    if inbound_tx.send(frame).is_err() {
                                        break;
                                    }
                                }
                                Err(e) => debug!("relay.unparsed_frame: {}", e),
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("relay.read_failed: {}", e);
                            break;
                        }
                    },
                }
            }
            info!("relay.disconnected");
        });

        Ok((Self { outbound }, inbound_rx))
    }
}

#[async_trait]
impl SignalingTransport for WsSignalingTransport {
    async fn send(&self, message: SignalingMessage) -> CallResult<()> {
        let text = serde_json::to_string(&CallFrame::Signal(message))
            .map_err(|e| CallError::Signaling(e.to_string()))?;
        self.outbound
            .send(text)
            .map_err(|_| CallError::Signaling("Relay connection closed".to_string()))
    }
}
