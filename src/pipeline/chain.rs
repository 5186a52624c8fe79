//! Stage chain construction and teardown
//!
//! ```text
//! Fetcher ──Bytes──▶ Decoder ──frames──▶ Resampler ──▶ [Equalizer] ──▶ Output Writer ──▶ sink
//!  (tokio)          (thread)            (thread)       (thread)         (thread, gated)
//! ```

use bytes::Bytes;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::buffer::AudioFrame;
use crate::audio::sink::OutputSink;
use crate::config::EngineConfig;
use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::{Error, Result, StageError};
use crate::pipeline::dsp::{PcmDecoder, StreamResampler};
use crate::pipeline::equalizer::{EqualizerStage, SharedEqualizer};
use crate::pipeline::queue::{bounded, FillGauge, QueueWriter, TryPush};
use crate::pipeline::source::{Source, SourceChunk, SourceProvider};
use crate::pipeline::stage::{
    report_panic, spawn_output_writer, spawn_processor, ChainControl, EventReporter, StageEvent,
    StageEventKind, StageKind,
};

/// Unique identifier of one chain instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChainId(Uuid);

impl ChainId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChainId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ChainId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything a chain needs besides its source
#[derive(Clone)]
pub struct ChainParams {
    pub stage_queue_capacity: usize,
    pub output_queue_capacity: usize,
    pub input_sample_rate: u32,
    pub input_channels: u16,
    pub output_sample_rate: u32,
    /// Inserted between resampler and output when present
    pub equalizer: Option<SharedEqualizer>,
}

impl ChainParams {
    pub fn from_config(config: &EngineConfig, equalizer: Option<SharedEqualizer>, output_rate: u32) -> Self {
        Self {
            stage_queue_capacity: config.stage_queue_capacity,
            output_queue_capacity: config.output_queue_capacity,
            input_sample_rate: config.input_sample_rate,
            input_channels: config.input_channels,
            output_sample_rate: output_rate,
            equalizer: if config.equalizer_enabled { equalizer } else { None },
        }
    }
}

/// Builder for stage chains
pub struct StageChain;

impl StageChain {
    /// Build, link and start every stage for `identifier`
    ///
    /// Must be called from within a tokio runtime. The output writer starts
    /// gated; call [`ChainHandle::open_output`] once prebuffering completes.
    pub fn start(
        identifier: &str,
        params: &ChainParams,
        provider: Arc<dyn SourceProvider>,
        sink: Arc<dyn OutputSink>,
        events: mpsc::UnboundedSender<StageEvent>,
    ) -> Result<ChainHandle> {
        let source = Source::parse(identifier)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::ResourceExhausted(format!("no runtime for fetcher: {}", e)))?;

        let id = ChainId::new();
        let control = Arc::new(ChainControl::new());
        let reporter = EventReporter::new(id, events);

        let (fetch_tx, fetch_rx) = bounded::<Bytes>(params.stage_queue_capacity);
        let (decode_tx, decode_rx) = bounded::<AudioFrame>(params.stage_queue_capacity);
        let (out_tx, out_rx) = bounded::<AudioFrame>(params.output_queue_capacity);
        let gauge = out_rx.gauge();

        let mut threads: Vec<JoinHandle<()>> = Vec::with_capacity(4);
        let spawned = (|| -> std::result::Result<(), StageError> {
            threads.push(spawn_processor(
                StageKind::Decoder,
                PcmDecoder::new(params.input_sample_rate, params.input_channels),
                fetch_rx,
                decode_tx,
                control.clone(),
                reporter.clone(),
            )?);

            let resampler = StreamResampler::new(params.output_sample_rate);
            match params.equalizer.clone() {
                Some(shared) => {
                    let (eq_tx, eq_rx) = bounded::<AudioFrame>(params.stage_queue_capacity);
                    threads.push(spawn_processor(
                        StageKind::Resampler,
                        resampler,
                        decode_rx,
                        eq_tx,
                        control.clone(),
                        reporter.clone(),
                    )?);
                    threads.push(spawn_processor(
                        StageKind::Equalizer,
                        EqualizerStage::new(shared),
                        eq_rx,
                        out_tx,
                        control.clone(),
                        reporter.clone(),
                    )?);
                }
                None => {
                    threads.push(spawn_processor(
                        StageKind::Resampler,
                        resampler,
                        decode_rx,
                        out_tx,
                        control.clone(),
                        reporter.clone(),
                    )?);
                }
            }

            threads.push(spawn_output_writer(out_rx, sink, control.clone(), reporter.clone())?);
            Ok(())
        })();

        if let Err(e) = spawned {
            control.halt();
            for handle in threads {
                let _ = handle.join();
            }
            return Err(Error::ResourceExhausted(e.to_string()));
        }

        let fetcher = runtime.spawn(supervise_fetcher(
            source.clone(),
            provider,
            fetch_tx,
            control.clone(),
            reporter,
        ));

        tracing::info!("Chain {} started for {}", id, source.identifier);

        Ok(ChainHandle {
            id,
            source,
            control,
            gauge,
            fetcher: Some(fetcher),
            threads,
        })
    }
}

/// Run the fetcher, reporting a panic as a stage error
///
/// The queue is owned here so it closes only after the error is reported.
async fn supervise_fetcher(
    source: Source,
    provider: Arc<dyn SourceProvider>,
    output: QueueWriter<Bytes>,
    control: Arc<ChainControl>,
    reporter: EventReporter,
) {
    let run = AssertUnwindSafe(run_fetcher(&source, provider, &output, &control, &reporter)).catch_unwind();
    if let Err(payload) = run.await {
        report_panic(StageKind::Fetcher, &reporter, payload.as_ref());
    }
}

async fn run_fetcher(
    source: &Source,
    provider: Arc<dyn SourceProvider>,
    output: &QueueWriter<Bytes>,
    control: &ChainControl,
    reporter: &EventReporter,
) {
    let kind = StageKind::Fetcher;
    let mut reader = match provider.open(source.clone()).await {
        Ok(reader) => reader,
        Err(e) => {
            tracing::error!("Failed to open {}: {}", source.identifier, e);
            reporter.report(kind, StageEventKind::Error(e.to_string()));
            return;
        }
    };

    let mut announced = false;
    while control.is_running() {
        if control.is_paused() {
            tokio::time::sleep(QUEUE_POLL_INTERVAL).await;
            continue;
        }
        match reader.next_chunk().await {
            Ok(Some(SourceChunk::Data(bytes))) => {
                if !announced {
                    announced = true;
                    reporter.report(kind, StageEventKind::DataReady);
                }
                if !push_async(output, bytes, control).await {
                    return;
                }
            }
            Ok(Some(SourceChunk::Metadata(meta))) => {
                reporter.report(
                    kind,
                    StageEventKind::Metadata {
                        title: meta.title,
                        artist: meta.artist,
                    },
                );
            }
            Ok(None) => {
                tracing::info!("Source {} ended", source.identifier);
                reporter.report(kind, StageEventKind::Finished);
                return;
            }
            Err(e) => {
                // A read failure after a successful open is a dropped stream
                tracing::warn!("Read from {} failed: {}", source.identifier, e);
                reporter.report(kind, StageEventKind::Finished);
                return;
            }
        }
    }
}

/// Push without blocking the runtime thread
async fn push_async(output: &QueueWriter<Bytes>, bytes: Bytes, control: &ChainControl) -> bool {
    let mut item = bytes;
    loop {
        match output.try_push(item) {
            TryPush::Pushed => return true,
            TryPush::Closed => return false,
            TryPush::Full(back) => {
                if !control.is_running() {
                    return false;
                }
                item = back;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        }
    }
}

/// Handle to a running chain
pub struct ChainHandle {
    id: ChainId,
    source: Source,
    control: Arc<ChainControl>,
    gauge: FillGauge<AudioFrame>,
    fetcher: Option<tokio::task::JoinHandle<()>>,
    threads: Vec<JoinHandle<()>>,
}

impl ChainHandle {
    pub fn id(&self) -> ChainId {
        self.id
    }

    pub fn source(&self) -> &Source {
        &self.source
    }

    /// Let the output writer start draining its queue
    pub fn open_output(&self) {
        self.control.open_output();
    }

    pub fn pause(&self) {
        self.control.set_paused(true);
    }

    pub fn resume(&self) {
        self.control.set_paused(false);
    }

    /// Fill percentage of the output writer's input queue
    pub fn output_fill(&self) -> Option<u8> {
        self.gauge.percent()
    }

    /// Halt every stage and wait for all of them to exit
    ///
    /// Once this returns no stage of this chain can emit another event.
    pub async fn stop(mut self) {
        self.control.halt();

        if let Some(fetcher) = self.fetcher.take() {
            fetcher.abort();
            let _ = fetcher.await;
        }

        let threads = std::mem::take(&mut self.threads);
        let joined = tokio::task::spawn_blocking(move || {
            for handle in threads {
                if handle.join().is_err() {
                    tracing::error!("Stage thread panicked");
                }
            }
        })
        .await;
        if let Err(e) = joined {
            tracing::error!("Failed to join stage threads: {}", e);
        }

        tracing::info!("Chain {} stopped", self.id);
    }
}

impl Drop for ChainHandle {
    fn drop(&mut self) {
        // Dropped without stop(): let the stages wind down on their own
        self.control.halt();
        if let Some(fetcher) = self.fetcher.take() {
            fetcher.abort();
        }
    }
}
