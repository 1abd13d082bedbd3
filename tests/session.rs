//! Socket session integration tests
//!
//! Run a real WebSocket round trip against a local server with a scripted
//! microphone and a recording speaker.

use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_stream::transport::{ReadyState, Speaker};
use beacon_stream::voice::pcm;
use beacon_stream::{Error, SessionController, SessionSettings};
use tokio_tungstenite::tungstenite::Message;

mod common;
use common::{
    MockAudioServer, RecordingObserver, RecordingSink, ScriptedSource, ServerScript, SilentServer,
    wait_until,
};

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    controller: Arc<SessionController>,
    source: Arc<ScriptedSource>,
    sink: Arc<RecordingSink>,
    observer: Arc<RecordingObserver>,
}

fn harness(url: String, grace: Duration, source: ScriptedSource) -> Harness {
    let source = Arc::new(source);
    let sink = Arc::new(RecordingSink::default());
    let observer = Arc::new(RecordingObserver::default());

    let controller = Arc::new(SessionController::new(
        SessionSettings { url, grace },
        source.clone(),
        sink.clone(),
        observer.clone(),
    ));

    Harness {
        controller,
        source,
        sink,
        observer,
    }
}

async fn wait_open(controller: &SessionController) {
    let mut status = controller.status().await.expect("session should be live");
    tokio::time::timeout(WAIT, status.wait_for(|s| *s == ReadyState::Open))
        .await
        .expect("socket should open")
        .expect("status channel closed");
}

#[tokio::test]
async fn test_frame_round_trip() {
    let server = MockAudioServer::start(ServerScript {
        echo: true,
        ..Default::default()
    })
    .await;
    let h = harness(server.url(), Duration::from_millis(50), ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());
    assert!(h.controller.is_capturing().await);
    wait_open(&h.controller).await;

    assert!(h.source.emit(vec![0.5; 128]));

    assert!(wait_until(WAIT, || server.log.binary().len() == 1).await);
    let binary = server.log.binary();
    let sent = &binary[0];
    assert_eq!(sent.len(), 256);
    assert!(pcm::decode_le_bytes(sent).iter().all(|&s| s == 16383));

    // The echoed chunk comes back as a 300-byte WAV clip
    assert!(wait_until(WAIT, || h.sink.clip_count() == 1).await);
    let clips = h.sink.clips();
    let clip = &clips[0];
    assert_eq!(clip.len(), 300);
    let bytes = clip.as_bytes();
    assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 292);
    assert_eq!(u32::from_le_bytes(bytes[40..44].try_into().unwrap()), 256);
    assert_eq!(clip.payload(), sent.as_slice());

    h.controller.stop().await;
    h.controller.drain().await;
}

#[tokio::test]
async fn test_restart_keeps_one_session() {
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(server.url(), Duration::from_millis(50), ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());
    wait_open(&h.controller).await;

    assert!(h.controller.start().await.unwrap());
    wait_open(&h.controller).await;

    assert_eq!(h.source.active(), 1);
    assert!(wait_until(WAIT, || server.log.accepted() == 2 && server.log.live() == 1).await);

    h.controller.stop().await;
    h.controller.drain().await;
    assert_eq!(h.source.active(), 0);
}

#[tokio::test]
async fn test_socket_outlives_stop_by_grace_delay() {
    let grace = Duration::from_millis(400);
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(server.url(), grace, ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());
    wait_open(&h.controller).await;

    let stopped_at = Instant::now();
    h.controller.stop().await;

    // Capture is released right away, the socket is not
    assert!(!h.controller.is_capturing().await);
    assert_eq!(h.source.active(), 0);
    assert!(!h.source.emit(vec![0.1; 128]));

    assert!(wait_until(WAIT, || server.log.text() == vec!["end".to_string()]).await);
    tokio::time::sleep(grace / 2).await;
    assert_eq!(server.log.live(), 1);

    h.controller.drain().await;
    assert!(stopped_at.elapsed() >= grace);
    assert!(wait_until(WAIT, || server.log.live() == 0).await);
    assert!(
        wait_until(WAIT, || h.observer.statuses().last() == Some(&ReadyState::Closed)).await
    );
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(server.url(), Duration::from_millis(10), ScriptedSource::new());

    h.controller.stop().await;

    assert!(h.controller.start().await.unwrap());
    wait_open(&h.controller).await;
    h.controller.stop().await;
    h.controller.stop().await;
    h.controller.drain().await;

    assert!(wait_until(WAIT, || server.log.live() == 0).await);
    assert_eq!(server.log.text(), vec!["end".to_string()]);
}

#[tokio::test]
async fn test_malformed_text_does_not_end_session() {
    let server = MockAudioServer::start(ServerScript {
        echo: false,
        greeting: vec![
            Message::text("not json at all"),
            Message::text(r#"{"person":"Agent","transcript":"Hello!"}"#),
            Message::binary(vec![1u8, 0, 2, 0]),
        ],
        ..Default::default()
    })
    .await;
    let h = harness(server.url(), Duration::from_millis(10), ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());

    assert!(wait_until(WAIT, || h.sink.clip_count() == 1).await);
    let transcripts = h.observer.transcripts();
    assert_eq!(transcripts.len(), 1);
    assert_eq!(transcripts[0].sender, Speaker::Agent);
    assert_eq!(transcripts[0].transcript, "Hello!");
    assert_eq!(h.sink.clips()[0].len(), 48);

    let status = h.controller.status().await.unwrap();
    assert_eq!(*status.borrow(), ReadyState::Open);

    h.controller.stop().await;
    h.controller.drain().await;
}

#[tokio::test]
async fn test_permission_denied_opens_nothing() {
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(server.url(), Duration::from_millis(10), ScriptedSource::denied());

    let result = h.controller.start().await;
    assert!(matches!(result, Err(Error::Permission(_))));
    assert!(!h.controller.is_capturing().await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.log.accepted(), 0);
}

#[tokio::test]
async fn test_stop_during_acquisition_discards_start() {
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(
        server.url(),
        Duration::from_millis(10),
        ScriptedSource::slow(Duration::from_millis(200)),
    );

    let controller = Arc::clone(&h.controller);
    let pending = tokio::spawn(async move { controller.start().await });

    assert!(wait_until(WAIT, || h.source.starts() == 1).await);
    h.controller.stop().await;

    let started = pending.await.unwrap().unwrap();
    assert!(!started);
    assert!(!h.controller.is_capturing().await);
    assert_eq!(h.source.active(), 0);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.log.accepted(), 0);
}

#[tokio::test]
async fn test_unreachable_server_closes() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("ws://{}/audio", listener.local_addr().unwrap());
    drop(listener);

    let h = harness(url, Duration::from_millis(10), ScriptedSource::new());
    assert!(h.controller.start().await.unwrap());

    assert!(
        wait_until(WAIT, || h.observer.statuses().last() == Some(&ReadyState::Closed)).await
    );
    assert!(!h.observer.statuses().contains(&ReadyState::Open));

    // Frames produced after the failure are dropped, not queued
    assert!(h.source.emit(vec![0.5; 128]));

    h.controller.stop().await;
    h.controller.drain().await;
}

#[tokio::test]
async fn test_stop_during_restart_teardown_discards_restart() {
    // The first socket never opens, so replacing it waits out the teardown timeout
    let server = SilentServer::start().await;
    let h = harness(server.url(), Duration::from_millis(10), ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());
    assert_eq!(h.source.starts(), 1);

    let controller = Arc::clone(&h.controller);
    let restart = tokio::spawn(async move { controller.start().await });

    tokio::time::sleep(Duration::from_millis(200)).await;
    h.controller.stop().await;

    let started = restart.await.unwrap().unwrap();
    assert!(!started);
    assert!(!h.controller.is_capturing().await);
    assert_eq!(h.source.active(), 0);
    assert_eq!(h.source.starts(), 1);
}

#[tokio::test]
async fn test_final_partial_chunk_precedes_end() {
    let server = MockAudioServer::start(ServerScript::default()).await;
    let h = harness(
        server.url(),
        Duration::from_millis(10),
        ScriptedSource::with_tail(vec![0.25; 40]),
    );

    assert!(h.controller.start().await.unwrap());
    wait_open(&h.controller).await;

    assert!(h.source.emit(vec![0.5; 128]));
    assert!(wait_until(WAIT, || server.log.binary().len() == 1).await);

    h.controller.stop().await;

    assert!(wait_until(WAIT, || server.log.sequence().len() == 3).await);
    assert_eq!(
        server.log.sequence(),
        vec![
            "binary:256".to_string(),
            "binary:80".to_string(),
            "text:end".to_string(),
        ]
    );

    h.controller.drain().await;
}

#[tokio::test]
async fn test_server_close_ends_without_error() {
    let server = MockAudioServer::start(ServerScript {
        greeting: vec![Message::text(
            r#"{"person":"Agent","transcript":"Goodbye"}"#,
        )],
        close_after_greeting: true,
        ..Default::default()
    })
    .await;
    let h = harness(server.url(), Duration::from_millis(10), ScriptedSource::new());

    assert!(h.controller.start().await.unwrap());

    assert!(
        wait_until(WAIT, || h.observer.statuses().last() == Some(&ReadyState::Closed)).await
    );
    assert!(!h.observer.statuses().contains(&ReadyState::Error));
    assert!(wait_until(WAIT, || h.observer.transcripts().len() == 1).await);

    h.controller.stop().await;
    h.controller.drain().await;
}
