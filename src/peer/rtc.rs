//! `webrtc` peer connection
//!
//! Local audio is blocked into 20 ms frames and Opus-encoded onto a static
//! sample track. Remote audio is read as RTP, decoded and handed to playback
//! as a [`RemoteAudio`] stream.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use opus::{Application, Channels};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use webrtc::api::APIBuilder;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MediaEngine};
use webrtc::data_channel::RTCDataChannel;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::media::Sample;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_remote::TrackRemote;

use super::{PeerConnection, PeerConnector, RemoteAudioHandler};
use crate::voice::{FrameBlocker, FrameReceiver, RemoteAudio, RemoteAudioWriter};
use crate::{Error, Result};

/// Rate of both audio tracks
pub const PEER_SAMPLE_RATE: u32 = 48000;

/// Duration of one Opus packet
const OPUS_FRAME: Duration = Duration::from_millis(20);

/// Largest encoded packet we accept from the encoder
const MAX_PACKET_SIZE: usize = 4000;

/// Largest decoded frame (120 ms at 48 kHz)
const MAX_DECODED_FRAME: usize = 5760;

/// Builds `webrtc` peer connections
#[derive(Debug, Clone, Default)]
pub struct RtcConnector {
    ice_servers: Vec<String>,
}

impl RtcConnector {
    /// Create a connector using the given STUN/TURN URLs
    #[must_use]
    pub const fn new(ice_servers: Vec<String>) -> Self {
        Self { ice_servers }
    }
}

#[async_trait]
impl PeerConnector for RtcConnector {
    async fn connect(&self) -> Result<Box<dyn PeerConnection>> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if self.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: self.ice_servers.clone(),
                ..Default::default()
            }]
        };

        let config = RTCConfiguration {
            ice_servers,
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        pc.on_peer_connection_state_change(Box::new(|state: RTCPeerConnectionState| {
            tracing::debug!(?state, "peer connection state changed");
            Box::pin(async {})
        }));

        Ok(Box::new(RtcPeer {
            pc,
            data_channel: Mutex::new(None),
            tasks: std::sync::Mutex::new(Vec::new()),
        }))
    }
}

struct RtcPeer {
    pc: Arc<RTCPeerConnection>,
    data_channel: Mutex<Option<Arc<RTCDataChannel>>>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl RtcPeer {
    fn track_task(&self, task: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(task);
        }
    }
}

#[async_trait]
impl PeerConnection for RtcPeer {
    async fn add_microphone(&self, frames: FrameReceiver, sample_rate: u32) -> Result<()> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                clock_rate: sample_rate,
                channels: 1,
                ..Default::default()
            },
            "audio".to_owned(),
            "beacon-stream".to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // RTCP must be read for interceptors to run
        self.track_task(tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        }));

        let encoder = opus::Encoder::new(sample_rate, Channels::Mono, Application::Voip)
            .map_err(|e| Error::Codec(e.to_string()))?;
        let frame_len = usize::try_from(sample_rate / 50)
            .map_err(|e| Error::Codec(e.to_string()))?;

        self.track_task(tokio::spawn(encode_microphone(
            frames, encoder, frame_len, track,
        )));

        tracing::debug!(sample_rate, "microphone track added");
        Ok(())
    }

    async fn open_event_channel(
        &self,
        label: &str,
        events: mpsc::UnboundedSender<String>,
    ) -> Result<()> {
        let channel = self.pc.create_data_channel(label, None).await?;

        channel.on_message(Box::new(move |msg: DataChannelMessage| {
            let events = events.clone();
            Box::pin(async move {
                match String::from_utf8(msg.data.to_vec()) {
                    Ok(text) => {
                        let _ = events.send(text);
                    }
                    Err(e) => tracing::warn!(error = %e, "non-UTF-8 data channel message"),
                }
            })
        }));

        *self.data_channel.lock().await = Some(channel);
        Ok(())
    }

    async fn send_event(&self, event: &str) -> Result<()> {
        let channel = self.data_channel.lock().await.clone();
        let Some(channel) = channel else {
            return Err(Error::Transport("event channel is not open".to_string()));
        };
        channel.send_text(event.to_string()).await?;
        Ok(())
    }

    fn on_remote_audio(&self, handler: RemoteAudioHandler) {
        let handler: Arc<RemoteAudioHandler> = Arc::new(handler);

        self.pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let handler = Arc::clone(&handler);
                Box::pin(async move {
                    if track.kind() != RTPCodecType::Audio {
                        return;
                    }
                    let (writer, stream) = RemoteAudio::channel(PEER_SAMPLE_RATE);
                    handler(stream);
                    tokio::spawn(decode_remote(track, writer));
                })
            },
        ));
    }

    async fn create_offer(&self) -> Result<String> {
        let offer = self.pc.create_offer(None).await?;
        let mut gathering = self.pc.gathering_complete_promise().await;
        self.pc.set_local_description(offer).await?;

        // Non-trickle: the offer carries every candidate
        let _ = gathering.recv().await;

        self.pc
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or_else(|| Error::Negotiation("local description missing".to_string()))
    }

    async fn apply_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.pc.set_remote_description(answer).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .map(|mut tasks| tasks.drain(..).collect())
            .unwrap_or_default();
        for task in tasks {
            task.abort();
        }

        self.pc.close().await?;
        Ok(())
    }
}

/// Block frames into 20 ms packets and write them to the track
async fn encode_microphone(
    mut frames: FrameReceiver,
    mut encoder: opus::Encoder,
    frame_len: usize,
    track: Arc<TrackLocalStaticSample>,
) {
    let mut blocker = FrameBlocker::new(frame_len);

    while let Some(frame) = frames.recv().await {
        for block in blocker.push(frame.samples()) {
            let packet = match encoder.encode_vec_float(&block, MAX_PACKET_SIZE) {
                Ok(packet) => packet,
                Err(e) => {
                    tracing::warn!(error = %e, "opus encode failed");
                    continue;
                }
            };

            let sample = Sample {
                data: Bytes::from(packet),
                duration: OPUS_FRAME,
                ..Default::default()
            };
            if let Err(e) = track.write_sample(&sample).await {
                tracing::warn!(error = %e, "failed to write audio sample");
            }
        }
    }

    tracing::debug!("microphone track ended");
}

/// Decode remote RTP until the track ends or playback detaches
async fn decode_remote(track: Arc<TrackRemote>, writer: RemoteAudioWriter) {
    let mut decoder = match opus::Decoder::new(PEER_SAMPLE_RATE, Channels::Mono) {
        Ok(decoder) => decoder,
        Err(e) => {
            tracing::error!(error = %e, "failed to create opus decoder");
            return;
        }
    };
    let mut pcm = vec![0.0f32; MAX_DECODED_FRAME];

    while let Ok((packet, _)) = track.read_rtp().await {
        if packet.payload.is_empty() {
            continue;
        }
        match decoder.decode_float(&packet.payload, &mut pcm, false) {
            Ok(decoded) => {
                if !writer.write(pcm[..decoded].to_vec()) {
                    break;
                }
            }
            Err(e) => tracing::warn!(error = %e, "opus decode failed"),
        }
    }

    tracing::debug!("remote audio track ended");
}
