//! STT adapter integration tests

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::mpsc;

use pitwall::config::SttConfig;
use pitwall::voice::stt::{FLUSH_INCREMENT, SttConnector, SttEvent, SttHandle, UpstreamFrame};

mod common;
use common::{FakeLink, FakeStt, WAIT};

fn spawn(stt: &Arc<FakeStt>) -> (SttHandle, mpsc::Receiver<SttEvent>) {
    let connector = Arc::clone(stt) as Arc<dyn SttConnector>;
    SttHandle::spawn(connector, &SttConfig::default())
}

async fn next_event(events: &mut mpsc::Receiver<SttEvent>) -> SttEvent {
    tokio::time::timeout(WAIT, events.recv())
        .await
        .expect("timed out waiting for STT event")
        .expect("STT actor stopped")
}

async fn next_link(links: &mut mpsc::UnboundedReceiver<FakeLink>) -> FakeLink {
    tokio::time::timeout(WAIT, links.recv())
        .await
        .expect("timed out waiting for connect")
        .expect("connector dropped")
}

async fn next_frame(link: &mut FakeLink) -> UpstreamFrame {
    tokio::time::timeout(WAIT, link.frames.recv())
        .await
        .expect("timed out waiting for upstream frame")
        .expect("link closed")
}

#[tokio::test(start_paused = true)]
async fn audio_waits_for_the_mic() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);

    handle.connect();
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let mut link = next_link(&mut links).await;

    handle.send_audio(vec![1; 5_000]);
    tokio::task::yield_now().await;
    assert!(link.frames.try_recv().is_err());

    handle.set_mic_enabled(true);
    for _ in 0..2 {
        match next_frame(&mut link).await {
            UpstreamFrame::Audio(chunk) => assert_eq!(chunk.len(), FLUSH_INCREMENT),
            other => panic!("expected audio, got {other:?}"),
        }
    }

    // Turning the mic off sends the tail and asks for a final
    handle.set_mic_enabled(false);
    match next_frame(&mut link).await {
        UpstreamFrame::Audio(chunk) => assert_eq!(chunk.len(), 5_000 - 2 * FLUSH_INCREMENT),
        other => panic!("expected audio, got {other:?}"),
    }
    assert_eq!(next_frame(&mut link).await, UpstreamFrame::Finalize);
}

#[tokio::test(start_paused = true)]
async fn transcripts_pass_through() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);
    handle.connect();
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let link = next_link(&mut links).await;

    let final_event = SttEvent::Final {
        text: "box this lap".to_string(),
        confidence: Some(0.93),
        end_of_speech: true,
    };
    link.events.send(final_event.clone()).await.unwrap();
    assert_eq!(next_event(&mut events).await, final_event);
}

#[tokio::test(start_paused = true)]
async fn reconnects_with_backoff() {
    let (stt, mut links) = FakeStt::new();
    stt.refuse_next(2);
    let (handle, mut events) = spawn(&stt);

    let started = tokio::time::Instant::now();
    handle.connect();
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    next_link(&mut links).await;

    assert_eq!(stt.connects.load(Ordering::SeqCst), 3);
    // 1 s then 2 s between attempts
    assert!(started.elapsed() >= Duration::from_secs(3));
}

#[tokio::test(start_paused = true)]
async fn rejected_credentials_stop_retrying() {
    let (stt, _links) = FakeStt::new();
    stt.reject_credentials();
    let (handle, mut events) = spawn(&stt);

    handle.connect();
    match next_event(&mut events).await {
        SttEvent::Error { recoverable, .. } => assert!(!recoverable),
        other => panic!("expected error, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(stt.connects.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn lost_link_keeps_buffered_audio() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);
    handle.connect();
    handle.set_mic_enabled(true);
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let link = next_link(&mut links).await;

    drop(link);
    assert_eq!(next_event(&mut events).await, SttEvent::Disconnected);

    // Spoken during the outage
    handle.send_audio(vec![7; FLUSH_INCREMENT]);

    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let mut link = next_link(&mut links).await;
    assert_eq!(
        next_frame(&mut link).await,
        UpstreamFrame::Audio(vec![7; FLUSH_INCREMENT])
    );
}

#[tokio::test(start_paused = true)]
async fn disconnect_closes_the_stream() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);
    handle.connect();
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let mut link = next_link(&mut links).await;

    handle.disconnect();
    assert_eq!(next_frame(&mut link).await, UpstreamFrame::CloseStream);
    assert_eq!(next_event(&mut events).await, SttEvent::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn idle_link_gets_keepalives() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);
    let started = tokio::time::Instant::now();
    handle.connect();
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let mut link = next_link(&mut links).await;

    assert_eq!(next_frame(&mut link).await, UpstreamFrame::KeepAlive);
    assert!(started.elapsed() >= SttConfig::default().keepalive);

    // Audio resets the idle timer
    handle.set_mic_enabled(true);
    handle.send_audio(vec![3; FLUSH_INCREMENT]);
    assert_eq!(
        next_frame(&mut link).await,
        UpstreamFrame::Audio(vec![3; FLUSH_INCREMENT])
    );
    assert_eq!(next_frame(&mut link).await, UpstreamFrame::KeepAlive);
}

#[tokio::test(start_paused = true)]
async fn gives_up_after_max_reconnect_attempts() {
    let config = SttConfig {
        max_reconnect_attempts: 2,
        ..SttConfig::default()
    };
    let (stt, _links) = FakeStt::new();
    stt.refuse_next(3);
    let connector = Arc::clone(&stt) as Arc<dyn SttConnector>;
    let (handle, mut events) = SttHandle::spawn(connector, &config);

    handle.connect();
    match next_event(&mut events).await {
        SttEvent::Error { recoverable, message } => {
            assert!(recoverable);
            assert!(message.contains("unavailable"), "{message}");
        }
        other => panic!("expected error, got {other:?}"),
    }
    // The first connect plus one per retry
    assert_eq!(stt.connects.load(Ordering::SeqCst), 3);

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(stt.connects.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn finalize_sends_the_tail_and_keeps_the_mic_open() {
    let (stt, mut links) = FakeStt::new();
    let (handle, mut events) = spawn(&stt);
    handle.connect();
    handle.set_mic_enabled(true);
    assert_eq!(next_event(&mut events).await, SttEvent::Connected);
    let mut link = next_link(&mut links).await;

    handle.send_audio(vec![5; 3_000]);
    assert_eq!(
        next_frame(&mut link).await,
        UpstreamFrame::Audio(vec![5; FLUSH_INCREMENT])
    );

    handle.finalize();
    assert_eq!(
        next_frame(&mut link).await,
        UpstreamFrame::Audio(vec![5; 3_000 - FLUSH_INCREMENT])
    );
    assert_eq!(next_frame(&mut link).await, UpstreamFrame::Finalize);

    handle.send_audio(vec![6; FLUSH_INCREMENT]);
    assert_eq!(
        next_frame(&mut link).await,
        UpstreamFrame::Audio(vec![6; FLUSH_INCREMENT])
    );
}
