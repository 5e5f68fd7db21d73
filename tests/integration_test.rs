use chat_narrator::backends::{InferenceParams, VoiceModel};
use chat_narrator::chat::{ChatEvent, LineSource, RoomFilter};
use chat_narrator::engine::{AudioBuffer, SynthesisEngine};
use chat_narrator::error::PipelineError;
use chat_narrator::orchestrator::{Orchestrator, VoiceSelection, DEFAULT_UTTERANCE_TEMPLATE};
use chat_narrator::pipeline::Pipeline;
use chat_narrator::playback::AudioSink;
use chat_narrator::queue::{playback_queue, QueueItem};
use chat_narrator::text::CleanerRegistry;
use chat_narrator::voice_config::{SynthesisParams, VoiceConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

mockall::mock! {
    pub Model {}
    impl VoiceModel for Model {
        fn infer(&self, symbols: &[i64], speaker_id: i64, params: &InferenceParams) -> chat_narrator::error::Result<Vec<f32>>;
        fn id(&self) -> &'static str;
    }
}

mockall::mock! {
    pub Sink {}
    #[async_trait::async_trait]
    impl AudioSink for Sink {
        async fn play(&self, buffer: AudioBuffer) -> chat_narrator::error::Result<()>;
        fn id(&self) -> &'static str;
    }
}

const CONFIG: &str = r#"{
    "data": {"sampling_rate": 22050, "hop_length": 256, "add_blank": true,
             "text_cleaners": ["marker_cleaners", "basic_cleaners"], "n_speakers": 2},
    "model": {"hidden_channels": 192},
    "speakers": {"default": 0, "narrator": 1},
    "symbols": ["_", " ", "a", "b", "c", "e", "h", "i", "l", "o", "说"]
}"#;

fn engine(model: MockModel) -> Arc<SynthesisEngine> {
    let config = Arc::new(VoiceConfig::from_json_str(CONFIG).unwrap());
    Arc::new(SynthesisEngine::new(Arc::new(model), config, &CleanerRegistry::new()).unwrap())
}

fn voice(speaker: &str) -> VoiceSelection {
    VoiceSelection {
        language: "简体中文".to_string(),
        speaker: speaker.to_string(),
        params: SynthesisParams::default(),
        template: DEFAULT_UTTERANCE_TEMPLATE.to_string(),
    }
}

#[tokio::test]
async fn test_unknown_speaker_enqueues_nothing() {
    let mut model = MockModel::new();
    model.expect_infer().times(0);
    model.expect_id().return_const("mock");

    let (tx, mut rx) = playback_queue();
    let orchestrator = Orchestrator::new(engine(model), voice("ghost"), tx);

    let err = orchestrator
        .handle(ChatEvent::new("Alice", "hello"))
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::UnknownSpeaker(_)));
    assert_eq!(rx.try_pop(), None);
}

#[tokio::test]
async fn test_model_receives_inverted_length_scale() {
    let mut model = MockModel::new();
    model
        .expect_infer()
        .withf(|symbols, speaker_id, params| {
            symbols.len() % 2 == 1
                && *speaker_id == 1
                && (params.length_scale - 0.8).abs() < 1e-6
                && (params.noise_scale - 0.667).abs() < 1e-6
                && (params.noise_scale_w - 0.6).abs() < 1e-6
        })
        .times(1)
        .returning(|symbols, _, _| Ok(vec![0.25; symbols.len() * 10]));
    model.expect_id().return_const("mock");

    let (tx, mut rx) = playback_queue();
    let mut selection = voice("narrator");
    selection.params.length_scale = 1.25;
    let orchestrator = Orchestrator::new(engine(model), selection, tx);

    orchestrator
        .handle(ChatEvent::new("Alice", "hello"))
        .await
        .unwrap();
    match rx.try_pop() {
        Some(QueueItem::Audio(buffer)) => {
            assert!(!buffer.is_empty());
            assert_eq!(buffer.sample_rate, 22050);
        }
        other => panic!("expected audio, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_event_does_not_stop_orchestrator() {
    let mut seq = mockall::Sequence::new();
    let mut model = MockModel::new();
    model
        .expect_infer()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _, _| Err(PipelineError::Synthesis("malformed symbols".into())));
    model
        .expect_infer()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|symbols, _, _| Ok(vec![0.5; symbols.len()]));
    model.expect_id().return_const("mock");

    let (tx, mut rx) = playback_queue();
    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    events_tx.send(ChatEvent::new("Alice", "hello")).unwrap();
    events_tx.send(ChatEvent::new("Bob", "hi")).unwrap();
    drop(events_tx);

    let stats = Orchestrator::new(engine(model), voice("default"), tx)
        .run(events_rx)
        .await;
    assert_eq!(stats.handled, 2);
    assert_eq!(stats.enqueued, 1);
    assert_eq!(stats.dropped, 1);

    assert!(matches!(rx.pop().await, QueueItem::Audio(_)));
    assert_eq!(rx.pop().await, QueueItem::EndOfStream);
}

#[tokio::test]
async fn test_device_failure_is_fatal() {
    let mut model = MockModel::new();
    model
        .expect_infer()
        .returning(|symbols, _, _| Ok(vec![0.5; symbols.len()]));
    model.expect_id().return_const("mock");

    let mut sink = MockSink::new();
    sink.expect_play()
        .times(1)
        .returning(|_| Err(PipelineError::PlaybackDevice("device unplugged".into())));
    sink.expect_id().return_const("mock");

    let input = concat!(
        "{\"sender\": \"Alice\", \"content\": \"hello\"}\n",
        "{\"sender\": \"Bob\", \"content\": \"hi\"}\n",
        "{\"sender\": \"Alice\", \"content\": \"bye\"}\n",
    );
    let source = LineSource::new(input.as_bytes(), RoomFilter::default());
    let result = Pipeline::new(engine(model), voice("default"), Arc::new(sink))
        .run(Box::new(source), std::future::pending::<()>())
        .await;

    assert!(matches!(result, Err(PipelineError::PlaybackDevice(_))));
}

#[tokio::test]
async fn test_device_failure_stops_pending_synthesis() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let mut model = MockModel::new();
    model.expect_infer().returning(move |symbols, _, _| {
        // Everything after the first utterance is slow to synthesize.
        if counter.fetch_add(1, Ordering::SeqCst) > 0 {
            std::thread::sleep(Duration::from_secs(2));
        }
        Ok(vec![0.5; symbols.len()])
    });
    model.expect_id().return_const("mock");

    let mut sink = MockSink::new();
    sink.expect_play()
        .times(1)
        .returning(|_| Err(PipelineError::PlaybackDevice("device unplugged".into())));
    sink.expect_id().return_const("mock");

    // The chat connection never closes.
    let (mut client, server) = tokio::io::duplex(1024);
    client
        .write_all(concat!(
            "{\"sender\": \"Alice\", \"content\": \"hello\"}\n",
            "{\"sender\": \"Bob\", \"content\": \"hi\"}\n",
        ).as_bytes())
        .await
        .unwrap();
    let source = LineSource::new(tokio::io::BufReader::new(server), RoomFilter::default());

    let result = tokio::time::timeout(
        Duration::from_secs(1),
        Pipeline::new(engine(model), voice("default"), Arc::new(sink))
            .run(Box::new(source), std::future::pending::<()>()),
    )
    .await
    .expect("device error should end the session without waiting for synthesis");

    assert!(matches!(result, Err(PipelineError::PlaybackDevice(_))));
    drop(client);
}
