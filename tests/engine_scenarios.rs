//! End-to-end playback scenarios against scripted sources
//!
//! Timings use real time with short intervals; assertions poll with
//! generous deadlines.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netradio_engine::audio::{AudioFrame, OutputSink, RecordingSink};
use netradio_engine::config::{EngineConfig, StationEntry};
use netradio_engine::control::EqPreset;
use netradio_engine::error::StageError;
use netradio_engine::pipeline::{Source, SourceChunk, SourceProvider, SourceReader, StreamMetadata};
use netradio_engine::settings::{DebouncedStore, MemoryBackend, PersistedSettings, SettingsStore};
use netradio_engine::stations::StationList;
use netradio_engine::{Engine, Error, PlaybackState};

const STREAM: &str = "http://stream.example/live";

/// How a scripted reader behaves after opening
#[derive(Clone)]
enum Script {
    /// Never produces anything until told to end
    Silent { end: Arc<AtomicBool> },
    /// Emits `chunks` chunks of silence, then ends
    Finite { chunks: usize },
    /// Emits one metadata block, then stays silent
    Tagged { stream_title: String },
    /// Emits silence at roughly real time, forever
    Endless,
    /// Opening fails
    Unreachable,
}

struct ScriptedProvider {
    script: Script,
    opened: Arc<AtomicUsize>,
}

impl ScriptedProvider {
    fn new(script: Script) -> (Arc<Self>, Arc<AtomicUsize>) {
        let opened = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(Self {
            script,
            opened: opened.clone(),
        });
        (provider, opened)
    }
}

struct ScriptedReader {
    script: Script,
    emitted: usize,
}

impl SourceReader for ScriptedReader {
    fn next_chunk(&mut self) -> BoxFuture<'_, Result<Option<SourceChunk>, StageError>> {
        Box::pin(async move {
            match &self.script {
                Script::Silent { end } => {
                    while !end.load(Ordering::SeqCst) {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Ok(None)
                }
                Script::Finite { chunks } => {
                    if self.emitted >= *chunks {
                        return Ok(None);
                    }
                    self.emitted += 1;
                    Ok(Some(SourceChunk::Data(Bytes::from(vec![0u8; 1024]))))
                }
                Script::Endless => {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(Some(SourceChunk::Data(Bytes::from(vec![0u8; 1024]))))
                }
                Script::Tagged { stream_title } => {
                    if self.emitted == 0 {
                        self.emitted = 1;
                        return Ok(Some(SourceChunk::Metadata(StreamMetadata::from_stream_title(
                            stream_title,
                        ))));
                    }
                    std::future::pending().await
                }
                Script::Unreachable => unreachable!("reader for unreachable source"),
            }
        })
    }
}

impl SourceProvider for ScriptedProvider {
    fn open(&self, _source: Source) -> BoxFuture<'static, Result<Box<dyn SourceReader>, StageError>> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let script = self.script.clone();
        Box::pin(async move {
            if let Script::Unreachable = script {
                return Err(StageError::Open("connection refused".into()));
            }
            Ok(Box::new(ScriptedReader { script, emitted: 0 }) as Box<dyn SourceReader>)
        })
    }
}

fn config() -> EngineConfig {
    EngineConfig {
        prebuffer_ticks: 10,
        tick_interval_ms: 30,
        reconnect_delay_ms: 100,
        volume_debounce_ms: 40,
        save_debounce_ms: 60,
        ..EngineConfig::default()
    }
}

fn start(provider: Arc<ScriptedProvider>) -> (Engine, Arc<RecordingSink>) {
    start_with(config(), provider)
}

fn start_with(config: EngineConfig, provider: Arc<ScriptedProvider>) -> (Engine, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new(48_000));
    let engine = Engine::builder(config)
        .sink(sink.clone())
        .provider(provider)
        .start()
        .unwrap();
    (engine, sink)
}

/// Output device whose driver panics on the first write
struct ExplodingSink;

impl OutputSink for ExplodingSink {
    fn set_volume(&self, _volume: u8) {}

    fn set_muted(&self, _muted: bool) {}

    fn write(&self, frame: &AudioFrame) -> Result<(), StageError> {
        panic!("driver fault writing {} samples", frame.samples.len());
    }

    fn sample_rate(&self) -> u32 {
        48_000
    }
}

/// Poll until `check` holds or the deadline passes
async fn wait_for(timeout_ms: u64, mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

fn record_states(engine: &Engine) -> Arc<Mutex<Vec<PlaybackState>>> {
    let states = Arc::new(Mutex::new(Vec::new()));
    let sink = states.clone();
    engine.subscribe_fn(move |status| {
        let mut states = sink.lock();
        if states.last() != Some(&status.state) {
            states.push(status.state);
        }
    });
    states
}

#[tokio::test]
async fn test_prebuffer_completes_without_fill_signal() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, _opened) = ScriptedProvider::new(Script::Silent { end });
    let (engine, sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    let status = engine.status();
    assert_eq!(status.state, PlaybackState::Buffering);
    assert_eq!(status.current_source, STREAM);
    assert_eq!(engine.buffer_level(), 0);
    assert_eq!(sink.last_muted(), Some(true));

    // Level climbs with the tick ramp while buffering
    assert!(wait_for(1_000, || engine.buffer_level() > 0).await);
    assert_eq!(engine.status().state, PlaybackState::Buffering);

    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);
    assert_eq!(engine.buffer_level(), 100);
    assert_eq!(sink.last_muted(), Some(false));

    // No real signal while playing: the last estimate stands
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.buffer_level(), 100);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dropped_stream_reconnects_once() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, opened) = ScriptedProvider::new(Script::Silent { end: end.clone() });
    let (engine, _sink) = start(provider);
    let states = record_states(&engine);

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);

    end.store(true, Ordering::SeqCst);
    assert!(wait_for(2_000, || opened.load(Ordering::SeqCst) >= 2).await);
    assert!(wait_for(500, || engine.status().state == PlaybackState::Buffering).await);

    let status = engine.status();
    assert_eq!(status.current_source, STREAM);
    assert!(wait_for(500, || states.lock().len() >= 3).await);
    let seen = states.lock().clone();
    assert_eq!(
        &seen[..3],
        &[PlaybackState::Buffering, PlaybackState::Playing, PlaybackState::Buffering]
    );
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_stop_during_reconnect_delay_wins() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, opened) = ScriptedProvider::new(Script::Silent { end: end.clone() });
    let sink = Arc::new(RecordingSink::new(48_000));
    let engine = Engine::builder(EngineConfig {
        reconnect_delay_ms: 400,
        ..config()
    })
    .sink(sink)
    .provider(provider)
    .start()
    .unwrap();

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);

    end.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Stopped);

    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.status().state, PlaybackState::Stopped);
    assert_eq!(engine.buffer_level(), 0);
}

#[tokio::test]
async fn test_local_file_ends_in_stopped() {
    let (provider, opened) = ScriptedProvider::new(Script::Finite { chunks: 20 });
    let (engine, sink) = start(provider);

    engine.play("/music/track.pcm").await.unwrap();
    assert!(wait_for(3_000, || engine.status().state == PlaybackState::Stopped).await);
    assert!(sink.frames_written() > 0);

    // Local sources are never resubmitted
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_open_failure_is_sticky_until_stop() {
    let (provider, _opened) = ScriptedProvider::new(Script::Unreachable);
    let (engine, _sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(1_000, || engine.status().state == PlaybackState::Error).await);

    assert!(matches!(engine.play(STREAM).await, Err(Error::InvalidState(_))));
    engine.pause().await.unwrap();
    engine.resume().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Error);

    engine.stop().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Stopped);
    // A fresh chain fails the same way
    engine.play(STREAM).await.unwrap();
    assert!(wait_for(1_000, || engine.status().state == PlaybackState::Error).await);
}

#[tokio::test]
async fn test_pause_and_resume_only_from_their_states() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, _opened) = ScriptedProvider::new(Script::Silent { end });
    let (engine, _sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    engine.pause().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Buffering);

    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);
    engine.pause().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Paused);
    engine.resume().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Playing);
}

#[tokio::test]
async fn test_stream_metadata_reaches_status() {
    let (provider, _opened) = ScriptedProvider::new(Script::Tagged {
        stream_title: "Boards of Canada - Roygbiv".into(),
    });
    let (engine, _sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(1_000, || !engine.status().title.is_empty()).await);
    let status = engine.status();
    assert_eq!(status.artist, "Boards of Canada");
    assert_eq!(status.title, "Roygbiv");
}

#[tokio::test]
async fn test_volume_burst_single_hardware_write() {
    let (provider, _opened) = ScriptedProvider::new(Script::Finite { chunks: 0 });
    let (engine, sink) = start(provider);
    let initial = sink.volume_writes();

    for volume in [10, 30, 55, 120] {
        engine.set_volume(volume).await.unwrap();
    }
    assert_eq!(engine.status().volume, 100);
    assert_eq!(sink.volume_writes(), initial);

    assert!(wait_for(500, || sink.volume_writes().len() > initial.len()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let mut expected = initial;
    expected.push(100);
    assert_eq!(sink.volume_writes(), expected);
}

#[tokio::test]
async fn test_mute_is_held_while_buffering() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, _opened) = ScriptedProvider::new(Script::Silent { end });
    let (engine, sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    engine.mute(false).await.unwrap();
    assert_eq!(sink.last_muted(), Some(true));

    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);
    assert_eq!(sink.last_muted(), Some(false));
    engine.mute(true).await.unwrap();
    assert_eq!(sink.last_muted(), Some(true));
    assert!(engine.status().muted);
}

#[tokio::test]
async fn test_next_station_wraps_and_persists() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, _opened) = ScriptedProvider::new(Script::Silent { end });
    let backend = Arc::new(MemoryBackend::with_settings(PersistedSettings {
        volume: Some(33),
        ..PersistedSettings::default()
    }));
    let settings = Arc::new(DebouncedStore::open(backend.clone(), Duration::from_secs(60)).unwrap());
    let stations = StationList::new(vec![
        StationEntry {
            name: "One".into(),
            url: "http://stream.example/one".into(),
        },
        StationEntry {
            name: "Two".into(),
            url: "http://stream.example/two".into(),
        },
    ]);
    let engine = Engine::builder(config())
        .sink(Arc::new(RecordingSink::new(48_000)))
        .provider(provider)
        .settings(settings.clone())
        .stations(Arc::new(stations))
        .start()
        .unwrap();
    assert_eq!(engine.status().volume, 33);

    engine.play_next().await.unwrap();
    assert_eq!(engine.status().current_source, "http://stream.example/one");
    engine.play_next().await.unwrap();
    engine.play_next().await.unwrap();
    assert_eq!(engine.status().current_source, "http://stream.example/one");

    engine.apply_preset(EqPreset::Jazz).await.unwrap();
    engine.shutdown().await.unwrap();

    let stored = backend.stored().unwrap();
    assert_eq!(stored.last_source.as_deref(), Some("http://stream.example/one"));
    assert_eq!(stored.equalizer.preset(), EqPreset::Jazz);
    assert_eq!(settings.last_source().as_deref(), Some("http://stream.example/one"));
}

#[tokio::test]
async fn test_equalizer_edits_reach_stage_gains() {
    let (provider, _opened) = ScriptedProvider::new(Script::Finite { chunks: 0 });
    let (engine, _sink) = start(provider);

    engine.set_all_bands([24; 10]).await.unwrap();
    assert!(engine.equalizer_cells().iter().all(|&g| g == 12));

    engine.set_balance(-100).await.unwrap();
    let cells = engine.equalizer_cells();
    assert!(cells[..10].iter().all(|&g| g == 12));
    assert!(cells[10..].iter().all(|&g| g == 0));

    engine.save_custom_preset(0, "Loud").await.unwrap();
    engine.apply_preset(EqPreset::Flat).await.unwrap();
    engine.load_custom_preset(0).await.unwrap();
    assert_eq!(engine.equalizer().levels(), [24; 10]);
    assert!(matches!(engine.load_custom_preset(7).await, Err(Error::InvalidArgument(_))));
}

#[tokio::test]
async fn test_half_rate_stream_plays_through_resampler() {
    let (provider, opened) = ScriptedProvider::new(Script::Endless);
    let (engine, sink) = start_with(
        EngineConfig {
            input_sample_rate: 24_000,
            ..config()
        },
        provider,
    );

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);
    assert!(wait_for(1_000, || sink.frames_written() > 0).await);
    assert!(sink.recent_frames().iter().all(|f| f.sample_rate == 48_000));

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(engine.status().state, PlaybackState::Playing);
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_output_failure_is_sticky_and_not_retried() {
    let (provider, opened) = ScriptedProvider::new(Script::Endless);
    let (engine, sink) = start(provider);

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);
    assert!(wait_for(1_000, || sink.frames_written() > 0).await);

    sink.fail_writes(true);
    assert!(wait_for(1_000, || engine.status().state == PlaybackState::Error).await);
    assert_eq!(engine.buffer_level(), 0);

    // Well past the reconnect delay: nothing was resubmitted
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.status().state, PlaybackState::Error);
    assert!(matches!(engine.play(STREAM).await, Err(Error::InvalidState(_))));

    engine.stop().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Stopped);
}

#[tokio::test]
async fn test_panicking_stage_ends_in_error() {
    let (provider, opened) = ScriptedProvider::new(Script::Endless);
    let engine = Engine::builder(config())
        .sink(Arc::new(ExplodingSink))
        .provider(provider)
        .start()
        .unwrap();

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(3_000, || engine.status().state == PlaybackState::Error).await);

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.status().state, PlaybackState::Error);
    assert!(engine.is_running());
}

#[tokio::test]
async fn test_reconnect_due_while_paused_runs_on_resume() {
    let end = Arc::new(AtomicBool::new(false));
    let (provider, opened) = ScriptedProvider::new(Script::Silent { end: end.clone() });
    let (engine, _sink) = start_with(
        EngineConfig {
            reconnect_delay_ms: 300,
            ..config()
        },
        provider,
    );

    engine.play(STREAM).await.unwrap();
    assert!(wait_for(2_000, || engine.status().state == PlaybackState::Playing).await);

    end.store(true, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.pause().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Paused);

    // The delay elapses while paused: nothing reopens yet
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);
    assert_eq!(engine.status().state, PlaybackState::Paused);

    engine.resume().await.unwrap();
    assert_eq!(engine.status().state, PlaybackState::Buffering);
    assert!(wait_for(1_000, || opened.load(Ordering::SeqCst) == 2).await);
    assert_eq!(engine.status().current_source, STREAM);
    engine.shutdown().await.unwrap();
}
