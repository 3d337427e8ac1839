mod common;

use std::io::Cursor;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chime::audio::{AudioBackend, MemoryBackend};
use chime::{EngineSettings, PlaybackState, SoundRegistry};
use common::{decoded, wait_until, wav_clip};

const FINISH_TIMEOUT: Duration = Duration::from_secs(10);

fn registry_with(backend: &Arc<MemoryBackend>) -> SoundRegistry {
    let backend: Arc<dyn AudioBackend> = backend.clone();
    SoundRegistry::new(backend, EngineSettings::default())
}

#[test]
fn test_beep_plays_once_at_real_time() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    assert!(registry.load("beep", wav_clip(400)));

    let started = Instant::now();
    let session = registry.spawn("beep", false).unwrap();
    assert_eq!(registry.active_count("beep"), 1);

    assert!(session.wait_finished(FINISH_TIMEOUT));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(session.state(), PlaybackState::Unknown);

    let expected = decoded(&chime::AudioSource::from_bytes("beep", wav_clip(400)));
    let record = backend.line(0).unwrap();
    assert_eq!(record.written, expected);
    assert!(record.closed);

    assert!(registry.sessions("beep").is_empty());
    assert_eq!(registry.active_total(), 0);
}

#[test]
fn test_looping_key_keeps_playing_until_stopped() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(4.0));
    let registry = registry_with(&backend);
    registry.load("music", wav_clip(200));

    assert!(registry.play("music", true));
    let session = registry.sessions("music").remove(0);
    assert!(wait_until(FINISH_TIMEOUT, || session.restarts() >= 2));
    assert_eq!(registry.active_count("music"), 1);

    assert!(registry.stop("music"));
    assert!(session.wait_finished(FINISH_TIMEOUT));
    assert_eq!(registry.active_count("music"), 0);
    assert!(backend.line(0).unwrap().flushed);
}

#[test]
fn test_repeated_plays_stack() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    registry.load("click", wav_clip(2000));

    let first = registry.spawn("click", true).unwrap();
    let second = registry.spawn("click", true).unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(registry.active_count("click"), 2);
    assert_eq!(backend.opened(), 2);

    first.stop();
    assert!(first.wait_finished(FINISH_TIMEOUT));
    assert!(second.is_active());

    let remaining = registry.sessions("click");
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].id(), second.id());
}

#[test]
fn test_pause_and_volume_fan_out_to_every_session() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    registry.load("a", wav_clip(2000));
    registry.load("b", wav_clip(2000));

    let a1 = registry.spawn("a", true).unwrap();
    let a2 = registry.spawn("a", true).unwrap();
    let b = registry.spawn("b", true).unwrap();

    assert!(registry.pause("a", true));
    assert_eq!(a1.state(), PlaybackState::Paused);
    assert_eq!(a2.state(), PlaybackState::Paused);
    assert_eq!(b.state(), PlaybackState::Playing);

    registry.pause_all(true);
    assert_eq!(b.state(), PlaybackState::Paused);
    registry.pause_all(false);
    assert!([&a1, &a2, &b].iter().all(|s| s.state() == PlaybackState::Playing));

    assert!(registry.set_volume("a", 0.5));
    assert_eq!(a1.volume(), Some(0.5));
    assert_eq!(a2.volume(), Some(0.5));
    assert_eq!(b.volume(), None);

    assert!(registry.set_volume_all(0.0));
    for record in backend.lines() {
        assert_eq!(record.gain.unwrap().db(), chime::audio::SILENCE_FLOOR_DB);
    }

    registry.stop_all();
    for session in [&a1, &a2, &b] {
        assert!(session.wait_finished(FINISH_TIMEOUT));
    }
    assert_eq!(registry.active_total(), 0);
}

#[test]
fn test_volume_refused_without_gain_control() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0).without_gain());
    let registry = registry_with(&backend);
    registry.load("hum", wav_clip(1000));

    let session = registry.spawn("hum", true).unwrap();
    assert!(!registry.set_volume("hum", 0.5));
    assert!(!registry.set_volume_all(0.5));
    assert!(session.is_active());
}

#[test]
fn test_unavailable_line_records_nothing() {
    let backend = Arc::new(MemoryBackend::new().failing_open());
    let registry = registry_with(&backend);
    registry.load("beep", wav_clip(200));

    assert!(!registry.play("beep", false));
    assert!(registry.spawn("beep", true).is_err());
    assert!(registry.sessions("beep").is_empty());
    assert!(!registry.stop("beep"));
    assert_eq!(backend.opened(), 0);
}

#[test]
fn test_unload_stops_sessions_and_forgets_source() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    registry.load("alarm", wav_clip(2000));

    let session = registry.spawn("alarm", true).unwrap();
    assert!(registry.unload("alarm"));
    assert!(session.wait_finished(FINISH_TIMEOUT));

    assert!(!registry.is_loaded("alarm"));
    assert!(!registry.play("alarm", false));
    assert!(registry.keys().is_empty());
}

#[test]
fn test_shutdown_closes_every_line() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    registry.load("one", wav_clip(2000));
    registry.load("two", wav_clip(2000));

    let sessions = vec![
        registry.spawn("one", true).unwrap(),
        registry.spawn("one", false).unwrap(),
        registry.spawn("two", true).unwrap(),
    ];
    registry.pause("two", true);

    registry.shutdown();

    assert!(sessions.iter().all(|s| s.is_finished()));
    let lines = backend.lines();
    assert_eq!(lines.len(), 3);
    assert!(lines.iter().all(|r| r.closed));
    assert_eq!(registry.active_total(), 0);
}

#[test]
fn test_dropping_the_registry_stops_playback() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    {
        let registry = registry_with(&backend);
        registry.load("bg", wav_clip(2000));
        assert!(registry.play("bg", true));
    }
    assert!(backend.line(0).unwrap().closed);
}

#[test]
fn test_load_from_reader_and_file() {
    let backend = Arc::new(MemoryBackend::new());
    let registry = registry_with(&backend);

    assert!(registry.load_reader("reader", Cursor::new(wav_clip(100))));

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("chirp.wav");
    std::fs::write(&path, wav_clip(100)).unwrap();
    assert!(registry.load_file("file", &path));

    assert_eq!(registry.keys(), vec!["file".to_string(), "reader".to_string()]);

    for key in ["reader", "file"] {
        let session = registry.spawn(key, false).unwrap();
        assert!(session.wait_finished(FINISH_TIMEOUT));
    }
    let lines = backend.lines();
    assert_eq!(lines[0].written, lines[1].written);
    assert!(!lines[0].written.is_empty());
}

#[test]
fn test_concurrent_plays_from_many_threads() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = Arc::new(registry_with(&backend));
    registry.load("tick", wav_clip(2000));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let registry = Arc::clone(&registry);
            thread::spawn(move || registry.play("tick", true))
        })
        .collect();
    for handle in handles {
        assert!(handle.join().unwrap());
    }

    assert_eq!(registry.active_count("tick"), 4);
    registry.stop_all();
    assert!(wait_until(FINISH_TIMEOUT, || registry.sessions("tick").is_empty()));
    assert!(backend.lines().iter().all(|r| r.closed));
}

#[test]
fn test_unload_waits_for_sessions_to_close_their_lines() {
    let backend = Arc::new(MemoryBackend::new().with_pacing(1.0));
    let registry = registry_with(&backend);
    registry.load("bg", wav_clip(2000));
    registry.load("fx", wav_clip(2000));

    assert!(registry.play("bg", true));
    assert!(registry.play("fx", true));
    registry.pause("fx", true);

    assert!(registry.unload("bg"));
    assert!(registry.unload("fx"));
    let lines = backend.lines();
    assert!(lines.iter().all(|r| r.drained && r.closed));

    registry.shutdown();
    drop(registry);
    assert!(backend.lines().iter().all(|r| r.closed));
}

#[test]
fn test_finished_sessions_do_not_count_as_live() {
    let backend = Arc::new(MemoryBackend::new());
    let registry = registry_with(&backend);
    registry.load("beep", wav_clip(100));

    let session = registry.spawn("beep", false).unwrap();
    assert!(session.wait_finished(FINISH_TIMEOUT));

    assert!(!registry.stop("beep"));
    assert!(!registry.pause("beep", true));
    assert!(!registry.set_volume("beep", 0.5));
    assert!(registry.sessions("beep").is_empty());
    assert!(registry.is_loaded("beep"));
}

#[test]
fn test_slow_line_open_leaves_registry_usable() {
    let backend = Arc::new(
        MemoryBackend::new()
            .with_pacing(1.0)
            .with_open_delay(Duration::from_millis(500)),
    );
    let registry = Arc::new(registry_with(&backend));
    registry.load("music", wav_clip(2000));
    registry.load("alert", wav_clip(2000));
    let music = registry.spawn("music", true).unwrap();

    let opening = {
        let registry = Arc::clone(&registry);
        thread::spawn(move || registry.play("alert", false))
    };
    thread::sleep(Duration::from_millis(100));

    let started = Instant::now();
    assert!(registry.pause("music", true));
    assert!(registry.stop("music"));
    assert_eq!(registry.keys().len(), 2);
    assert!(started.elapsed() < Duration::from_millis(250));

    assert!(opening.join().unwrap());
    assert!(music.wait_finished(FINISH_TIMEOUT));
    assert_eq!(registry.active_count("alert"), 1);
    registry.stop_all();
}

#[test]
fn test_registry_reports_its_backend_and_settings() {
    let backend = Arc::new(MemoryBackend::new());
    let mut settings = EngineSettings::default();
    settings.playback.chunk_size = 512;
    let registry = SoundRegistry::new(backend.clone(), settings);

    assert_eq!(registry.backend().name(), "memory");
    assert_eq!(registry.settings().playback.chunk_size, 512);

    registry.load("tick", wav_clip(100));
    let session = registry.spawn("tick", false).unwrap();
    assert_eq!(session.source_id(), "tick");
    assert!(!session.is_looping());
    assert!(session.wait_finished(FINISH_TIMEOUT));
    assert!(backend.line(0).unwrap().writes >= 2);
}
