//! Tests for the tokio task that owns the pipeline.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use murmur_application::{
    ErrorKind, RuntimeSnapshot, SpeechConfig, SpeechPhase, VoiceInteraction, VoiceRuntime,
    VoiceRuntimeHandle,
};
use murmur_bus::AudioBus;
use murmur_conversation::{ChatReply, ConversationBackend, ConversationError};
use murmur_events::{event_names, ConversationReplyEvent, SubscriberBus, VoiceErrorEvent};
use murmur_stt::{
    callback_channel, CallbackSender, CloseHint, RecognizerCallback, SynthesisOptions,
};

/// Answers by echoing, or fails every request. An optional delay keeps
/// requests in flight so overlap can be observed.
#[derive(Default)]
struct EchoBackend {
    queries: Mutex<Vec<String>>,
    fail: bool,
    delay: Option<Duration>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

#[async_trait]
impl ConversationBackend for EchoBackend {
    async fn send_message(
        &self,
        query: &str,
        _conversation_id: Option<&str>,
    ) -> murmur_conversation::Result<ChatReply> {
        self.queries.lock().unwrap().push(query.to_string());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(ConversationError::Status {
                status: 502,
                body: "bad gateway".into(),
            });
        }
        Ok(ChatReply {
            answer: format!("you said: {query}"),
            conversation_id: Some("conv-1".into()),
        })
    }
}

struct Setup {
    handle: VoiceRuntimeHandle,
    audio: murmur_bus::AudioBusSender,
    callbacks: CallbackSender,
    rec: StubRecognizer,
    replies: Arc<Mutex<Vec<ConversationReplyEvent>>>,
    errors: Arc<Mutex<Vec<VoiceErrorEvent>>>,
}

fn config(forward: bool) -> SpeechConfig {
    SpeechConfig {
        voice_start_threshold: 3,
        voice_end_threshold: 5,
        forward_to_conversation: forward,
        ..SpeechConfig::default()
    }
}

fn setup(config: SpeechConfig, backend: Option<Arc<EchoBackend>>) -> Setup {
    let rec = StubRecognizer::new();
    let events = Arc::new(SubscriberBus::new());

    let replies = Arc::new(Mutex::new(Vec::new()));
    let sink = replies.clone();
    events.subscribe_typed(event_names::CONVERSATION_REPLY, move |e: ConversationReplyEvent| {
        sink.lock().unwrap().push(e);
    });
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    events.subscribe_typed(event_names::VOICE_ERROR, move |e: VoiceErrorEvent| {
        sink.lock().unwrap().push(e);
    });

    let interaction = VoiceInteraction::builder(config)
        .recognizer(Box::new(rec.clone()))
        .synthesizer(Box::new(StubSynthesizer::new(4)))
        .synthesis_options(SynthesisOptions {
            poll_interval: Duration::from_millis(1),
            timeout: Duration::from_secs(5),
        })
        .event_bus(events)
        .build()
        .unwrap();

    let mut bus = AudioBus::new();
    let receiver = bus.take_receiver().unwrap();
    let (callbacks, callback_rx) = callback_channel();

    let mut runtime =
        VoiceRuntime::new(interaction, receiver, callback_rx).with_bus_status(bus.status());
    if let Some(backend) = backend {
        runtime = runtime.with_conversation(backend);
    }

    Setup {
        handle: runtime.spawn(),
        audio: bus.sender(),
        callbacks,
        rec,
        replies,
        errors,
    }
}

fn send_blocks(audio: &murmur_bus::AudioBusSender, n: usize, voice: bool) {
    for i in 0..n {
        let block = if voice {
            voice_block(i as u64)
        } else {
            silence_block(i as u64)
        };
        assert!(audio.send(16000, 1, block.samples));
    }
}

async fn wait_for(
    handle: &VoiceRuntimeHandle,
    check: impl Fn(&RuntimeSnapshot) -> bool,
) -> RuntimeSnapshot {
    for _ in 0..500 {
        let snapshot = handle.snapshot().await.unwrap();
        if check(&snapshot) {
            return snapshot;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("runtime never reached the expected state");
}

async fn wait_while(mut pending: impl FnMut() -> bool) {
    for _ in 0..500 {
        if !pending() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never cleared");
}

fn final_result(text: &str) -> RecognizerCallback {
    RecognizerCallback::Result {
        text: text.into(),
        is_last: true,
    }
}

// =============================================================================
// Audio path
// =============================================================================

mod audio_path {
    use super::*;

    #[tokio::test]
    async fn test_blocks_reach_the_controller() {
        let s = setup(config(false), None);
        s.handle.start_listening().await.unwrap();
        assert!(s.handle.is_running());

        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);

        let snapshot = wait_for(&s.handle, |snap| snap.phase == SpeechPhase::Processing).await;
        assert!(snapshot.listening);
        assert!(snapshot.voice_active);
        assert_eq!(snapshot.session.sessions_opened, 1);
        assert_eq!(snapshot.session.prebuffer_replayed, 10);

        let bus = snapshot.bus.unwrap();
        assert_eq!(bus.blocks_received, 15);
        assert_eq!(bus.dropped_blocks, 0);
        assert_eq!(bus.gaps_detected, 0);
        assert_eq!(s.rec.writes(0).len(), 11);

        s.handle.shutdown().await;
        assert!(s.rec.closed(0).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_timers_close_session_after_voice_ends() {
        let s = setup(config(false), None);
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        send_blocks(&s.audio, 6, false);
        wait_for(&s.handle, |snap| {
            snap.session.sessions_opened == 1 && !snap.voice_active
        })
        .await;
        assert!(s.rec.closed(0).is_none());

        // Grace window plus the close delay.
        tokio::time::sleep(Duration::from_secs(3)).await;
        let snapshot = s.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.session.sessions_closed, 1);
        assert_eq!(snapshot.phase, SpeechPhase::Listening);
        assert_eq!(s.rec.closed(0), Some(CloseHint::Normal));
        s.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_listening_returns_to_ready() {
        let s = setup(config(false), None);
        s.handle.start_listening().await.unwrap();
        s.handle.stop_listening().unwrap();

        let snapshot = wait_for(&s.handle, |snap| !snap.listening).await;
        assert_eq!(snapshot.phase, SpeechPhase::Ready);
        assert!(snapshot.last_error.is_none());
        s.handle.shutdown().await;
    }
}

// =============================================================================
// Conversation forwarding
// =============================================================================

mod conversation {
    use super::*;

    #[tokio::test]
    async fn test_recognized_text_is_answered() {
        let backend = Arc::new(EchoBackend::default());
        let s = setup(config(true), Some(backend.clone()));
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        wait_for(&s.handle, |snap| snap.voice_active).await;

        s.callbacks.send(final_result("what time is it")).unwrap();
        let replies = s.replies.clone();
        wait_while(|| replies.lock().unwrap().is_empty()).await;

        let reply = s.replies.lock().unwrap()[0].clone();
        assert_eq!(reply.answer, "you said: what time is it");
        assert_eq!(reply.conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(*backend.queries.lock().unwrap(), vec!["what time is it"]);
        s.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_backend_failure_becomes_voice_error() {
        let backend = Arc::new(EchoBackend {
            fail: true,
            ..Default::default()
        });
        let s = setup(config(true), Some(backend));
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        wait_for(&s.handle, |snap| snap.voice_active).await;

        s.callbacks.send(final_result("hello")).unwrap();
        let errors = s.errors.clone();
        wait_while(|| errors.lock().unwrap().is_empty()).await;

        let error = s.errors.lock().unwrap()[0].clone();
        assert_eq!(error.kind, ErrorKind::NetworkError.as_str());
        assert!(error.message.contains("502"));
        // The pipeline itself is unaffected.
        let snapshot = s.handle.snapshot().await.unwrap();
        assert!(snapshot.listening);
        s.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_requests_are_answered_one_at_a_time() {
        let backend = Arc::new(EchoBackend {
            delay: Some(Duration::from_millis(50)),
            ..Default::default()
        });
        let s = setup(config(true), Some(backend.clone()));
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        wait_for(&s.handle, |snap| snap.voice_active).await;

        s.callbacks.send(final_result("first")).unwrap();
        s.callbacks.send(final_result("second")).unwrap();
        let replies = s.replies.clone();
        wait_while(|| replies.lock().unwrap().len() < 2).await;

        let answers: Vec<String> = s
            .replies
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.answer.clone())
            .collect();
        assert_eq!(answers, vec!["you said: first", "you said: second"]);
        assert_eq!(backend.max_active.load(Ordering::SeqCst), 1);
        s.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_reply_after_shutdown() {
        let backend = Arc::new(EchoBackend {
            delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let s = setup(config(true), Some(backend.clone()));
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        wait_for(&s.handle, |snap| snap.voice_active).await;

        s.callbacks.send(final_result("are you there")).unwrap();
        let seen = backend.clone();
        wait_while(|| seen.queries.lock().unwrap().is_empty()).await;

        s.handle.shutdown().await;
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(s.replies.lock().unwrap().is_empty());
        assert!(s.errors.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwarding_disabled_by_config() {
        let backend = Arc::new(EchoBackend::default());
        let s = setup(config(false), Some(backend.clone()));
        s.handle.start_listening().await.unwrap();
        send_blocks(&s.audio, 12, false);
        send_blocks(&s.audio, 3, true);
        wait_for(&s.handle, |snap| snap.voice_active).await;

        s.callbacks.send(final_result("hello")).unwrap();
        wait_for(&s.handle, |snap| snap.session.recognitions == 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.queries.lock().unwrap().is_empty());
        assert!(s.replies.lock().unwrap().is_empty());
        s.handle.shutdown().await;
    }
}

// =============================================================================
// Synthesis through the handle
// =============================================================================

mod speaking {
    use super::*;

    #[tokio::test]
    async fn test_speak_and_collect_audio() {
        let s = setup(config(false), None);
        assert_eq!(s.handle.speak_text("good morning", None).await.unwrap(), 1);
        assert_eq!(s.handle.speak_text("again", Some("xiaofeng")).await.unwrap(), 2);

        let mut clips = Vec::new();
        for _ in 0..500 {
            clips.extend(s.handle.take_synthesized_audio().await.unwrap());
            if clips.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(clips.len(), 2);
        assert!(clips.iter().all(|c| c.pcm_len == 4 * 320));

        s.handle.playback_percent(0.5, 0.04).unwrap();
        s.handle.playback_finished().unwrap();
        let snapshot = s.handle.snapshot().await.unwrap();
        assert_eq!(snapshot.visemes[0], 1.0);
        s.handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_speak_rejects_empty_text() {
        let s = setup(config(false), None);
        let err = s.handle.speak_text("", None).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::ConfigurationError);
        s.handle.shutdown().await;
    }
}
