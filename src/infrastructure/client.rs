//! Embedding entry point: one voice-call engine bound to one conversation

use super::ice_config::HttpIceConfigSource;
use super::transport::{InboundFrames, WsSignalingTransport};
use super::webrtc::WebRtcPeerFactory;
use crate::application::call::{
    AudioOutput, CallHandle, CallSettings, CallStateMachine, CallUiController, MediaDevices,
    MediaSessionManager, SignalingChannel,
};
use crate::config::Config;
use crate::domain::shared::result::CallResult;
use crate::domain::shared::value_objects::ConversationId;
use crate::domain::signaling::{CallControl, CallFrame};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct CallClient {
    ui: Arc<CallUiController>,
    handle: CallHandle,
    channel: Arc<SignalingChannel>,
    engine: JoinHandle<()>,
    pump: JoinHandle<()>,
}

impl CallClient {
    /// Join the conversation's call room and start the call engine
    pub async fn connect(
        config: &Config,
        conversation_id: ConversationId,
        room_key: Option<String>,
        devices: Arc<dyn MediaDevices>,
        output: Arc<dyn AudioOutput>,
    ) -> CallResult<Self> {
        let ice = Arc::new(HttpIceConfigSource::new(&config.client.ice_servers_url)?);
        let (transport, inbound) =
            WsSignalingTransport::connect(&config.client.relay_url, &conversation_id, room_key)
                .await?;

        let channel = Arc::new(SignalingChannel::new(
            conversation_id.clone(),
            Arc::new(transport),
        ));
        let media = MediaSessionManager::new(
            ice,
            Arc::new(WebRtcPeerFactory::new()),
            devices,
            output,
            channel.clone(),
        );

        let (handle, mailbox) = CallHandle::pair();
        let ui = Arc::new(CallUiController::new(handle.clone()));
        let machine = CallStateMachine::new(
            CallSettings::from_config(config),
            channel.clone(),
            media,
            ui.clone(),
            mailbox,
        );

        let engine = tokio::spawn(machine.run());
        let pump = tokio::spawn(pump_frames(inbound, channel.clone()));

        info!("client.ready room={}", conversation_id);
        Ok(Self {
            ui,
            handle,
            channel,
            engine,
            pump,
        })
    }

    pub fn ui(&self) -> Arc<CallUiController> {
        self.ui.clone()
    }

    pub fn handle(&self) -> CallHandle {
        self.handle.clone()
    }

    pub fn channel(&self) -> Arc<SignalingChannel> {
        self.channel.clone()
    }

    /// Hang up any open call and stop the engine
    pub async fn shutdown(self) {
        if let Err(e) = self.handle.shutdown() {
            warn!("client.shutdown: {}", e);
        }
        if let Err(e) = self.engine.await {
            warn!("client.engine_join_failed: {}", e);
        }
        self.pump.abort();
    }
}

/// Route relay frames into the channel's handlers
async fn pump_frames(mut inbound: InboundFrames, channel: Arc<SignalingChannel>) {
    while let Some(frame) = inbound.recv().await {
        match frame {
            CallFrame::Signal(message) => {
                channel.dispatch(&message);
            }
            CallFrame::Control(CallControl::Error { code }) => {
                warn!("relay.rejected room={} code={}", channel.conversation_id(), code);
            }
            CallFrame::Control(CallControl::Join { .. }) => {}
        }
    }
}
