//! `PeerTransport`: one client's WebRTC peer (§4.6).
//!
//! Created when a session's control channel comes up. Sends its own SDP
//! offer over the control channel (the browser answers, rather than the
//! other way around, so the coordinator never needs an HTTP negotiation
//! endpoint), forwards samples from the audio sink and exactly one video
//! sink onto RTP tracks, and owns a reliable data channel carrying binary
//! cursor frames.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice::mdns::MulticastDnsMode;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample as RtcSample;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::capture::{CaptureManager, ListenerId, ListenerQueue};
use crate::desktop::{CursorEvent, CursorHookId, Desktop};
use crate::error::{AppError, Result};
use crate::ids::SessionId;
use crate::protocol::{CursorFrame, OutboundEvent};
use crate::webrtc::config::WebRtcConfig;
use crate::webrtc::mdns::{default_mdns_host_name, mdns_mode};

pub const CURSOR_CHANNEL_LABEL: &str = "cursor";

struct VideoSubscription {
    sink_id: String,
    listener: ListenerId,
    task: JoinHandle<()>,
}

struct AudioSubscription {
    listener: ListenerId,
    task: JoinHandle<()>,
}

pub struct PeerTransport {
    session_id: SessionId,
    pc: Arc<RTCPeerConnection>,
    capture: Arc<CaptureManager>,
    desktop: Arc<dyn Desktop>,
    outbound: mpsc::Sender<OutboundEvent>,
    video_track: Arc<TrackLocalStaticSample>,
    audio_track: Arc<TrackLocalStaticSample>,
    video: Mutex<Option<VideoSubscription>>,
    audio: Mutex<Option<AudioSubscription>>,
    cursor_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    cursor_hook: std::sync::Mutex<Option<CursorHookId>>,
}

impl PeerTransport {
    /// Build the peer, register event handlers, add both media tracks and
    /// the cursor data channel, then send the session its SDP offer. The
    /// caller is expected to feed the eventual `signal/answer` back in via
    /// [`PeerTransport::handle_answer`].
    pub async fn new(
        session_id: SessionId,
        config: &WebRtcConfig,
        capture: Arc<CaptureManager>,
        desktop: Arc<dyn Desktop>,
        outbound: mpsc::Sender<OutboundEvent>,
    ) -> Result<Arc<Self>> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| AppError::WebRtc(format!("failed to register codecs: {e}")))?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)
            .map_err(|e| AppError::WebRtc(format!("failed to register interceptors: {e}")))?;

        let mut setting_engine = SettingEngine::default();
        let mode = mdns_mode();
        setting_engine.set_ice_multicast_dns_mode(mode);
        if mode == MulticastDnsMode::QueryAndGather {
            setting_engine.set_multicast_dns_host_name(default_mdns_host_name(&session_id.to_string()));
        }

        let api = APIBuilder::new()
            .with_setting_engine(setting_engine)
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let mut ice_servers = Vec::new();
        for stun in &config.stun_servers {
            ice_servers.push(RTCIceServer { urls: vec![stun.clone()], ..Default::default() });
        }
        for turn in &config.turn_servers {
            ice_servers.push(RTCIceServer {
                urls: vec![turn.url.clone()],
                username: turn.username.clone(),
                credential: turn.credential.clone(),
                ..Default::default()
            });
        }

        let pc = api
            .new_peer_connection(RTCConfiguration { ice_servers, ..Default::default() })
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to create peer connection: {e}")))?;
        let pc = Arc::new(pc);

        let video_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability { mime_type: MIME_TYPE_VP8.to_owned(), ..Default::default() },
            "video".to_owned(),
            format!("kvm-{session_id}"),
        ));
        let audio_track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability { mime_type: MIME_TYPE_OPUS.to_owned(), ..Default::default() },
            "audio".to_owned(),
            format!("kvm-{session_id}"),
        ));
        pc.add_track(video_track.clone())
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to add video track: {e}")))?;
        pc.add_track(audio_track.clone())
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to add audio track: {e}")))?;

        let cursor_dc = pc
            .create_data_channel(CURSOR_CHANNEL_LABEL, None)
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to create cursor data channel: {e}")))?;

        let transport = Arc::new(Self {
            session_id,
            pc: pc.clone(),
            capture,
            desktop,
            outbound: outbound.clone(),
            video_track,
            audio_track,
            video: Mutex::new(None),
            audio: Mutex::new(None),
            cursor_channel: Mutex::new(Some(cursor_dc)),
            cursor_hook: std::sync::Mutex::new(None),
        });

        transport.register_handlers();
        transport.subscribe_cursor();
        transport.subscribe_audio().await;
        let default_video = transport.capture.video_ids().first().map(|s| s.to_string());
        if let Some(id) = default_video {
            transport.select_video(&id).await?;
        }

        let offer = pc.create_offer(None).await.map_err(|e| AppError::WebRtc(e.to_string()))?;
        pc.set_local_description(offer.clone())
            .await
            .map_err(|e| AppError::WebRtc(e.to_string()))?;
        let _ = outbound.try_send(OutboundEvent::SignalOffer { sdp: offer.sdp });

        Ok(transport)
    }

    fn register_handlers(self: &Arc<Self>) {
        let session_id = self.session_id;
        self.pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
            info!(%session_id, state = ?s, "peer connection state changed");
            Box::pin(async {})
        }));

        let outbound = self.outbound.clone();
        self.pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let outbound = outbound.clone();
            Box::pin(async move {
                if let Some(c) = candidate {
                    if let Ok(json) = c.to_json() {
                        let _ = outbound.try_send(OutboundEvent::SignalCandidate { candidate: json.candidate });
                    }
                }
            })
        }));
    }

    /// Feed the client's SDP answer in; completes the offer/answer exchange
    /// begun in `new` (§4.5: `signal/answer`).
    pub async fn handle_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp).map_err(|e| AppError::WebRtc(e.to_string()))?;
        self.pc
            .set_remote_description(answer)
            .await
            .map_err(|e| AppError::WebRtc(format!("failed to set remote description: {e}")))
    }

    /// Register this peer on the desktop's cursor-change hook so every
    /// position/image update is forwarded down its own data channel
    /// (§4.6). Holds only a weak reference to itself so a closed peer
    /// never keeps itself alive through the desktop's hook table.
    fn subscribe_cursor(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        let id = self.desktop.on_cursor_change(Box::new(move |event| {
            let Some(this) = weak.upgrade() else { return };
            let frame = match event {
                CursorEvent::Position { x, y } => CursorFrame::Position { x, y },
                CursorEvent::Image(img) => CursorFrame::Image {
                    width: img.width,
                    height: img.height,
                    xhot: img.xhot,
                    yhot: img.yhot,
                    img: img.img,
                },
            };
            tokio::spawn(async move {
                if let Err(e) = this.send_cursor(&frame).await {
                    debug!(session = %this.session_id, error = %e, "cursor frame forward failed");
                }
            });
        }));
        *self.cursor_hook.lock().unwrap() = Some(id);
    }

    async fn subscribe_audio(self: &Arc<Self>) {
        let sink = self.capture.audio().clone();
        match sink.add_listener().await {
            Ok((listener, queue)) => {
                let task = spawn_forward(queue, self.audio_track.clone(), self.session_id, "audio".into());
                *self.audio.lock().await = Some(AudioSubscription { listener, task });
            }
            Err(e) => warn!(session = %self.session_id, error = %e, "failed to subscribe to audio sink"),
        }
    }

    /// Switch the bound video variant (§4.6). At any moment this peer is a
    /// listener on at most one video sink.
    pub async fn select_video(self: &Arc<Self>, id: &str) -> Result<()> {
        let Some(sink) = self.capture.video(id).cloned() else {
            return Err(AppError::Pipeline(format!("unknown video id `{id}`")));
        };

        let mut current = self.video.lock().await;
        if let Some(existing) = current.as_ref() {
            if existing.sink_id == id {
                return Ok(());
            }
        }
        if let Some(prev) = current.take() {
            prev.task.abort();
            if let Some(prev_sink) = self.capture.video(&prev.sink_id) {
                prev_sink.remove_listener(prev.listener);
            }
        }

        let (listener, queue) = sink.add_listener().await?;
        let task = spawn_forward(queue, self.video_track.clone(), self.session_id, id.to_string());
        *current = Some(VideoSubscription { sink_id: id.to_string(), listener, task });
        Ok(())
    }

    /// Push one encoded cursor frame over the binary data channel (§6).
    pub async fn send_cursor(&self, frame: &CursorFrame) -> Result<()> {
        let channel = self.cursor_channel.lock().await;
        let Some(dc) = channel.as_ref() else {
            return Ok(());
        };
        dc.send(&Bytes::from(frame.encode()))
            .await
            .map_err(|e| AppError::WebRtc(format!("cursor channel send failed: {e}")))?;
        Ok(())
    }

    /// Tear everything down: unsubscribe from both sinks and close the
    /// peer connection.
    pub async fn close(&self) {
        if let Some(id) = self.cursor_hook.lock().unwrap().take() {
            self.desktop.remove_cursor_hook(id);
        }
        *self.cursor_channel.lock().await = None;
        if let Some(video) = self.video.lock().await.take() {
            video.task.abort();
            if let Some(sink) = self.capture.video(&video.sink_id) {
                sink.remove_listener(video.listener);
            }
        }
        if let Some(audio) = self.audio.lock().await.take() {
            audio.task.abort();
            self.capture.audio().remove_listener(audio.listener);
        }
        if let Err(e) = self.pc.close().await {
            debug!(session = %self.session_id, error = %e, "error closing peer connection");
        }
    }
}

fn spawn_forward(
    queue: Arc<ListenerQueue>,
    track: Arc<TrackLocalStaticSample>,
    session_id: SessionId,
    label: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let sample = queue.recv().await;
            let rtc_sample = RtcSample {
                data: sample.data,
                duration: sample.duration,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&rtc_sample).await {
                debug!(session = %session_id, sink = %label, error = %e, "sample forward stopped");
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_channel_label_matches_wire_contract() {
        assert_eq!(CURSOR_CHANNEL_LABEL, "cursor");
    }
}
