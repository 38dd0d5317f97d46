//! End-to-end tests for request orchestration through SpeechManager

mod common;

use common::{collect_until, is_ended, ramp, residual_files, statuses, test_settings, FakeEngineFactory, FakeOutput};
use mockall::mock;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use voxroute_spk::{
    AudioBuffer, EngineConfig, EngineRegistry, HistoryEntry, HistoryStore, SpeechError, SpeechEvent, SpeechManager,
};

mock! {
    pub History {}

    impl HistoryStore for History {
        fn record(&self, entry: HistoryEntry) -> Result<(), SpeechError>;
    }
}

fn manager(
    factory: &Arc<FakeEngineFactory>,
    output: &Arc<FakeOutput>,
    root: &Path,
    history: Option<Arc<dyn HistoryStore>>,
) -> SpeechManager {
    let mut registry = EngineRegistry::new();
    registry.register(factory.clone());
    SpeechManager::new(test_settings(root), registry, output.clone(), history)
}

fn two_devices() -> EngineConfig {
    EngineConfig::new("fake").with_devices(["A", "B"])
}

fn status_is(prefix: &'static str) -> impl Fn(&SpeechEvent) -> bool {
    move |e| matches!(e, SpeechEvent::Status(s) if s.starts_with(prefix))
}

#[tokio::test]
async fn test_speak_on_two_devices() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));

    let mut history = MockHistory::new();
    history
        .expect_record()
        .withf(|entry| {
            entry.text == "Hello"
                && entry.engine == "fake"
                && entry.devices == vec!["A".to_string(), "B".to_string()]
                && entry.sample_rate.is_none()
        })
        .times(1)
        .returning(|_| Ok(()));

    let manager = manager(&factory, &output, dir.path(), Some(Arc::new(history)));
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(
        statuses(&events),
        vec![
            "Initializing engine...",
            "Ready - Using Fake Engine (2 devices)",
            "Generating speech with Fake Engine...",
            "Playback complete",
        ]
    );
    assert_eq!(events.first(), Some(&SpeechEvent::Status("Initializing engine...".to_string())));
    assert!(events.contains(&SpeechEvent::ProcessingStarted));
    assert!(events.contains(&SpeechEvent::HistoryUpdated));
    assert_eq!(events.last(), Some(&SpeechEvent::ProcessingEnded));

    let played = output.played();
    assert_eq!(played.len(), 2);
    assert!(Arc::ptr_eq(&played[0].1, &played[1].1));
    assert_eq!(*played[0].1, ramp(2400, 24_000));

    assert!(!manager.is_processing());
    assert_eq!(residual_files(&manager.settings().temp_dir), 0);
}

#[tokio::test]
async fn test_post_processing_applied_once_before_playback() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices().with_speed(2.0).with_volume(0.5));
    collect_until(&mut rx, is_ended).await;

    let played = output.played();
    let buffer: &AudioBuffer = &played[0].1;
    assert_eq!(buffer.frames(), 1200);
    let source = ramp(2400, 24_000);
    assert_eq!(buffer.channels()[0][1], source.channels()[0][2] * 0.5);
}

#[tokio::test]
async fn test_second_request_rejected_while_busy() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").with_delay(Duration::from_millis(300)));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("First", two_devices());
    manager.speak("Second", two_devices());
    let events = collect_until(&mut rx, is_ended).await;

    assert!(statuses(&events).contains(&"Already processing...".to_string()));
    assert_eq!(factory.synth_calls(), 1);
    assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
}

#[tokio::test]
async fn test_empty_text_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("   \n", two_devices());

    assert_eq!(rx.try_recv().unwrap(), SpeechEvent::Status("Please enter some text".to_string()));
    assert!(rx.try_recv().is_err());
    assert!(!manager.is_processing());
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_playback_without_devices_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", EngineConfig::new("fake"));

    assert_eq!(
        rx.try_recv().unwrap(),
        SpeechEvent::Status("Error: Please select at least one output device".to_string())
    );
    assert!(!manager.is_processing());
}

#[tokio::test]
async fn test_engine_init_failure_reported() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").failing_build());
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    let events = collect_until(&mut rx, status_is("Error initializing engine")).await;

    let last = statuses(&events).pop().unwrap();
    assert!(last.contains("fake runtime is not installed"));
    assert!(!events.contains(&SpeechEvent::ProcessingStarted));
    assert!(output.played().is_empty());

    // The flag is released before the final status goes out
    assert!(!manager.is_processing());
}

#[tokio::test]
async fn test_synthesis_failure_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").failing_synthesis());
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    let events = collect_until(&mut rx, is_ended).await;

    let last = statuses(&events).pop().unwrap();
    assert_eq!(last, "Error: Synthesis error: fake synthesis failed");
    assert!(output.played().is_empty());
    assert_eq!(residual_files(&manager.settings().temp_dir), 0);
}

#[tokio::test]
async fn test_stop_during_playback() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]).holding());
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    collect_until(&mut rx, status_is("Generating speech")).await;
    while output.played().len() < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let stopped_at = Instant::now();
    manager.stop();
    let events = collect_until(&mut rx, is_ended).await;

    assert!(stopped_at.elapsed() < Duration::from_secs(1));
    assert_eq!(statuses(&events), vec!["Stopping...", "Stopped"]);
    assert_eq!(output.stops(), 2);
    assert!(!events.contains(&SpeechEvent::HistoryUpdated));
    assert_eq!(residual_files(&manager.settings().temp_dir), 0);
}

#[tokio::test]
async fn test_stop_during_synthesis_plays_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").with_delay(Duration::from_millis(300)));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    collect_until(&mut rx, status_is("Generating speech")).await;
    manager.stop();
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(statuses(&events).last().map(String::as_str), Some("Stopped"));
    assert!(output.played().is_empty());
    assert_eq!(residual_files(&manager.settings().temp_dir), 0);
}

#[tokio::test]
async fn test_stop_when_idle_is_silent() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.stop();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_export_writes_synthesized_file_verbatim() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    let target = dir.path().join("exports").join("out.wav");
    // Export ignores devices and post-processing settings
    manager.export("Hello", EngineConfig::new("fake").with_volume(0.2), &target);
    let events = collect_until(&mut rx, is_ended).await;

    assert!(statuses(&events).contains(&"Exporting speech...".to_string()));
    assert_eq!(statuses(&events).last().map(String::as_str), Some("Exported to out.wav"));
    assert!(output.played().is_empty());

    let reference = dir.path().join("reference.wav");
    ramp(2400, 24_000).write_wav(&reference).unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), std::fs::read(&reference).unwrap());
    assert_eq!(residual_files(&manager.settings().temp_dir), 0);
}

#[tokio::test]
async fn test_export_and_play() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    let target = dir.path().join("both.wav");
    manager.process_text("Hello", two_devices(), Some(target.clone()), true);
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
    assert!(target.exists());
    assert_eq!(output.played().len(), 2);
}

#[tokio::test]
async fn test_partial_device_failure_is_warning() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B", "C"]).failing_on_start("B"));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", EngineConfig::new("fake").with_devices(["A", "B", "C"]));
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(
        statuses(&events).last().map(String::as_str),
        Some("Playback complete (warning: 1 of 3 device(s) failed: B)")
    );
}

#[tokio::test]
async fn test_all_devices_failing_is_error() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(
        FakeOutput::with_devices(&["A", "B"])
            .failing_on_start("A")
            .failing_on_start("B"),
    );
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    let events = collect_until(&mut rx, is_ended).await;

    let last = statuses(&events).pop().unwrap();
    assert!(last.starts_with("Error: Device error on 'A, B': playback failed on every device"));
    assert!(!events.contains(&SpeechEvent::HistoryUpdated));
}

#[tokio::test]
async fn test_history_failure_does_not_fail_request() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));

    let mut history = MockHistory::new();
    history
        .expect_record()
        .times(1)
        .returning(|_| Err(SpeechError::Validation("disk full".to_string())));

    let manager = manager(&factory, &output, dir.path(), Some(Arc::new(history)));
    let mut rx = manager.subscribe();

    manager.speak("Hello", EngineConfig::new("fake").with_devices(["A"]));
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
    assert!(!events.contains(&SpeechEvent::HistoryUpdated));
}

#[tokio::test]
async fn test_update_engine_requires_devices() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);

    assert!(!manager.update_engine(&EngineConfig::new("fake")).await);
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_update_engine_then_speak_reuses_instance() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);

    assert!(manager.update_engine(&two_devices()).await);
    let mut rx = manager.subscribe();

    // Reordered devices and a sub-tolerance speed change keep the instance
    manager.speak("Hello", EngineConfig::new("fake").with_devices(["B", "A"]).with_speed(1.005));
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(factory.builds(), 1);
    assert!(!statuses(&events).contains(&"Initializing engine...".to_string()));
    assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
}

#[tokio::test]
async fn test_failed_update_reports_error() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").failing_build());
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    assert!(!manager.update_engine(&EngineConfig::new("fake").with_devices(["A"])).await);

    assert_eq!(rx.try_recv().unwrap(), SpeechEvent::Status("Initializing engine...".to_string()));
    match rx.try_recv().unwrap() {
        SpeechEvent::Status(s) => assert!(s.starts_with("Error initializing engine:")),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_init_failure_reported_once_by_both_paths() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").failing_build());
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    let spoken = statuses(&collect_until(&mut rx, status_is("Error initializing engine")).await);

    assert!(!manager.update_engine(&two_devices()).await);
    let mut updated = Vec::new();
    while let Ok(event) = rx.try_recv() {
        updated.push(event);
    }
    let updated = statuses(&updated);

    assert_eq!(spoken.len(), 2);
    assert_eq!(spoken, updated);
    assert_eq!(spoken[0], "Initializing engine...");
    assert!(spoken[1].starts_with("Error initializing engine:"));
    assert_eq!(factory.builds(), 2);
}

#[tokio::test]
async fn test_rebuild_during_request_keeps_old_engine() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake").with_delay(Duration::from_millis(300)));
    let output = Arc::new(FakeOutput::with_devices(&["A", "B"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.speak("Hello", two_devices());
    collect_until(&mut rx, status_is("Generating speech")).await;

    assert!(manager.update_engine(&two_devices().with_voice("beta")).await);
    let events = collect_until(&mut rx, is_ended).await;

    assert_eq!(factory.builds(), 2);
    assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
    assert_eq!(output.played().len(), 2);
}

#[tokio::test]
async fn test_sequential_requests() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();
    let config = EngineConfig::new("fake").with_devices(["A"]);

    for text in ["one", "two", "three"] {
        manager.speak(text, config.clone());
        let events = collect_until(&mut rx, is_ended).await;
        assert_eq!(statuses(&events).last().map(String::as_str), Some("Playback complete"));
    }

    assert_eq!(factory.builds(), 1);
    assert_eq!(factory.synth_calls(), 3);
    assert_eq!(output.played().len(), 3);
}

#[tokio::test]
async fn test_listing_without_instance() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["Speakers", "BlackHole 2ch"]));
    let manager = manager(&factory, &output, dir.path(), None);

    let engines = manager.list_engines();
    assert_eq!(engines.len(), 1);
    assert_eq!(engines[0].id, "fake");
    assert_eq!(engines[0].display_name, "Fake Engine");

    let voices = manager.list_voices("fake").await.unwrap();
    let ids: Vec<&str> = voices.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta"]);

    let err = manager.list_voices("missing").await.unwrap_err();
    assert!(matches!(err, SpeechError::Initialization(_)));

    assert_eq!(manager.list_devices().unwrap().len(), 2);
    assert_eq!(manager.default_device_name().as_deref(), Some("Speakers"));
    assert_eq!(factory.builds(), 0);
}

#[tokio::test]
async fn test_shutdown_rejects_new_requests() {
    let dir = tempfile::tempdir().unwrap();
    let factory = Arc::new(FakeEngineFactory::new("fake"));
    let output = Arc::new(FakeOutput::with_devices(&["A"]));
    let manager = manager(&factory, &output, dir.path(), None);
    let mut rx = manager.subscribe();

    manager.shutdown().await;
    manager.speak("Hello", EngineConfig::new("fake").with_devices(["A"]));

    assert_eq!(
        rx.try_recv().unwrap(),
        SpeechEvent::Status("Error: Speech manager is shut down".to_string())
    );
    assert!(!manager.is_processing());
}
