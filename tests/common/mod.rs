//! Shared test utilities
//!
//! Stand-ins for the microphone, the speaker and the remote audio server so
//! sessions can be exercised without audio hardware.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use beacon_stream::transport::{ReadyState, TextEvent};
use beacon_stream::voice::{
    AudioFrame, CaptureHandle, FrameSender, FrameSource, PlaybackSink, RemoteAudio, WavFile,
};
use beacon_stream::{Error, Result, SessionObserver};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Frame source driven by the test instead of a microphone
#[derive(Default)]
pub struct ScriptedSource {
    sender: Arc<Mutex<Option<FrameSender>>>,
    active: Arc<AtomicUsize>,
    starts: AtomicUsize,
    deny: bool,
    acquire_delay: Option<Duration>,
    tail: Option<Vec<f32>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source whose microphone access is always denied
    pub fn denied() -> Self {
        Self {
            deny: true,
            ..Self::default()
        }
    }

    /// A source that takes `delay` to acquire the microphone
    pub fn slow(delay: Duration) -> Self {
        Self {
            acquire_delay: Some(delay),
            ..Self::default()
        }
    }

    /// A source that delivers `tail` as its last frame when stopped, like a
    /// chunked recorder flushing its partial chunk
    pub fn with_tail(tail: Vec<f32>) -> Self {
        Self {
            tail: Some(tail),
            ..Self::default()
        }
    }

    /// Push a frame as if the device produced it; false if not capturing
    pub fn emit(&self, samples: Vec<f32>) -> bool {
        let sender = self.sender.lock().unwrap();
        sender
            .as_ref()
            .is_some_and(|tx| tx.send(AudioFrame::new(samples, 24000)).is_ok())
    }

    /// Captures started and not yet stopped
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Total acquisitions attempted
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FrameSource for ScriptedSource {
    async fn start(&self, frames: FrameSender) -> Result<CaptureHandle> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.acquire_delay {
            tokio::time::sleep(delay).await;
        }
        if self.deny {
            return Err(Error::Permission("denied by test".to_string()));
        }

        *self.sender.lock().unwrap() = Some(frames);
        self.active.fetch_add(1, Ordering::SeqCst);

        let sender = Arc::clone(&self.sender);
        let active = Arc::clone(&self.active);
        let tail = self.tail.clone();
        Ok(CaptureHandle::new(move || {
            let frames = sender.lock().unwrap().take();
            if let (Some(frames), Some(tail)) = (frames, tail) {
                let _ = frames.send(AudioFrame::new(tail, 24000));
            }
            active.fetch_sub(1, Ordering::SeqCst);
        }))
    }

    fn sample_rate(&self) -> u32 {
        24000
    }
}

/// Playback sink that records what it was asked to play
#[derive(Default)]
pub struct RecordingSink {
    clips: Mutex<Vec<WavFile>>,
    attached: AtomicUsize,
}

impl RecordingSink {
    pub fn clips(&self) -> Vec<WavFile> {
        self.clips.lock().unwrap().clone()
    }

    pub fn clip_count(&self) -> usize {
        self.clips.lock().unwrap().len()
    }

    pub fn attached(&self) -> usize {
        self.attached.load(Ordering::SeqCst)
    }
}

impl PlaybackSink for RecordingSink {
    fn play(&self, wav: WavFile) {
        self.clips.lock().unwrap().push(wav);
    }

    fn attach_stream(&self, _stream: RemoteAudio) {
        self.attached.fetch_add(1, Ordering::SeqCst);
    }
}

/// Observer that records transcripts and status changes
#[derive(Default)]
pub struct RecordingObserver {
    transcripts: Mutex<Vec<TextEvent>>,
    statuses: Mutex<Vec<ReadyState>>,
}

impl RecordingObserver {
    pub fn transcripts(&self) -> Vec<TextEvent> {
        self.transcripts.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ReadyState> {
        self.statuses.lock().unwrap().clone()
    }
}

impl SessionObserver for RecordingObserver {
    fn on_transcript(&self, event: &TextEvent) {
        self.transcripts.lock().unwrap().push(event.clone());
    }

    fn on_status(&self, state: ReadyState) {
        self.statuses.lock().unwrap().push(state);
    }
}

/// Behaviour of the mock audio server
#[derive(Default, Clone)]
pub struct ServerScript {
    /// Send each binary frame back to the client
    pub echo: bool,
    /// Messages sent to every client right after it connects
    pub greeting: Vec<Message>,
    /// Close the connection once the greeting is sent
    pub close_after_greeting: bool,
}

/// What the mock server has seen
#[derive(Default)]
pub struct ServerLog {
    pub accepted: AtomicUsize,
    pub live: AtomicUsize,
    pub binary: Mutex<Vec<Vec<u8>>>,
    pub text: Mutex<Vec<String>>,
    /// Every data frame in arrival order, as `binary:<len>` or `text:<body>`
    pub sequence: Mutex<Vec<String>>,
}

impl ServerLog {
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn binary(&self) -> Vec<Vec<u8>> {
        self.binary.lock().unwrap().clone()
    }

    pub fn text(&self) -> Vec<String> {
        self.text.lock().unwrap().clone()
    }

    pub fn sequence(&self) -> Vec<String> {
        self.sequence.lock().unwrap().clone()
    }
}

/// A local WebSocket server standing in for the audio endpoint
pub struct MockAudioServer {
    pub addr: SocketAddr,
    pub log: Arc<ServerLog>,
}

impl MockAudioServer {
    pub async fn start(script: ServerScript) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let log = Arc::new(ServerLog::default());

        let server_log = Arc::clone(&log);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let log = Arc::clone(&server_log);
                let script = script.clone();
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    log.accepted.fetch_add(1, Ordering::SeqCst);
                    log.live.fetch_add(1, Ordering::SeqCst);
                    serve_client(ws, &script, &log).await;
                    log.live.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });

        Self { addr, log }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/audio", self.addr)
    }
}

async fn serve_client(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    script: &ServerScript,
    log: &ServerLog,
) {
    let (mut sink, mut stream) = ws.split();

    for message in &script.greeting {
        if sink.send(message.clone()).await.is_err() {
            return;
        }
    }

    if script.close_after_greeting {
        let _ = sink.send(Message::Close(None)).await;
        return;
    }

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Binary(bytes) => {
                log.binary.lock().unwrap().push(bytes.to_vec());
                log.sequence
                    .lock()
                    .unwrap()
                    .push(format!("binary:{}", bytes.len()));
                if script.echo && sink.send(Message::Binary(bytes)).await.is_err() {
                    return;
                }
            }
            Message::Text(text) => {
                log.text.lock().unwrap().push(text.to_string());
                log.sequence.lock().unwrap().push(format!("text:{text}"));
            }
            Message::Close(_) => return,
            _ => {}
        }
    }
}

/// A TCP listener that accepts connections but never answers the WebSocket
/// handshake, leaving clients stuck connecting
pub struct SilentServer {
    pub addr: SocketAddr,
}

impl SilentServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        Self { addr }
    }

    pub fn url(&self) -> String {
        format!("ws://{}/audio", self.addr)
    }
}
