//! Stage workers and the events they report
//!
//! Each processing stage runs on its own named thread, blocking on its input
//! queue with a poll timeout so it can observe the chain's control flags.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::sync::mpsc;

use crate::audio::buffer::AudioFrame;
use crate::audio::sink::OutputSink;
use crate::constants::QUEUE_POLL_INTERVAL;
use crate::error::StageError;
use crate::pipeline::chain::ChainId;
use crate::pipeline::queue::{Pop, QueueReader, QueueWriter};

/// Position of a stage in the chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Fetcher,
    Decoder,
    Resampler,
    Equalizer,
    Output,
}

impl StageKind {
    pub fn name(self) -> &'static str {
        match self {
            StageKind::Fetcher => "fetcher",
            StageKind::Decoder => "decoder",
            StageKind::Resampler => "resampler",
            StageKind::Equalizer => "equalizer",
            StageKind::Output => "output",
        }
    }
}

/// What happened in a stage
#[derive(Debug, Clone, PartialEq)]
pub enum StageEventKind {
    /// First data passed through the stage
    DataReady,
    /// Input exhausted or stream ended
    Finished,
    /// Unrecoverable failure
    Error(String),
    /// Track information from the source
    Metadata { title: String, artist: String },
}

/// Status report from one stage of one chain
#[derive(Debug, Clone, PartialEq)]
pub struct StageEvent {
    pub chain: ChainId,
    pub stage: StageKind,
    pub kind: StageEventKind,
}

/// Sends stage events tagged with their chain id
#[derive(Clone)]
pub struct EventReporter {
    chain: ChainId,
    tx: mpsc::UnboundedSender<StageEvent>,
}

impl EventReporter {
    pub fn new(chain: ChainId, tx: mpsc::UnboundedSender<StageEvent>) -> Self {
        Self { chain, tx }
    }

    pub fn report(&self, stage: StageKind, kind: StageEventKind) {
        // A closed receiver means the engine is gone; nothing left to tell
        let _ = self.tx.send(StageEvent {
            chain: self.chain,
            stage,
            kind,
        });
    }
}

/// Run/pause/gate flags shared by every stage of a chain
#[derive(Debug)]
pub struct ChainControl {
    running: AtomicBool,
    paused: AtomicBool,
    output_open: AtomicBool,
}

impl ChainControl {
    pub fn new() -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            output_open: AtomicBool::new(false),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    pub fn halt(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Release);
    }

    pub fn is_output_open(&self) -> bool {
        self.output_open.load(Ordering::Acquire)
    }

    pub fn open_output(&self) {
        self.output_open.store(true, Ordering::Release);
    }
}

impl Default for ChainControl {
    fn default() -> Self {
        Self::new()
    }
}

/// A replaceable transform between two queues
pub trait Processor: Send + 'static {
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Transform one item; `Ok(None)` when nothing is ready yet
    fn process(&mut self, input: Self::Input) -> Result<Option<Self::Output>, StageError>;
}

fn spawn_named<F>(kind: StageKind, body: F) -> Result<JoinHandle<()>, StageError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(format!("stage-{}", kind.name()))
        .spawn(body)
        .map_err(|e| StageError::Spawn(format!("{}: {}", kind.name(), e)))
}

/// Text of a panic payload
pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(reason) = payload.downcast_ref::<&str>() {
        reason.to_string()
    } else if let Some(reason) = payload.downcast_ref::<String>() {
        reason.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Report a panicked stage as failed
pub(crate) fn report_panic(kind: StageKind, reporter: &EventReporter, payload: &(dyn Any + Send)) {
    let reason = panic_reason(payload);
    tracing::error!("Stage {} panicked: {}", kind.name(), reason);
    reporter.report(kind, StageEventKind::Error(format!("{} stage panicked: {}", kind.name(), reason)));
}

/// Run a stage body, turning a panic into an `Error` event
///
/// The body borrows its queues so they close only after the event is sent.
fn supervise(kind: StageKind, reporter: &EventReporter, body: impl FnOnce()) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(body)) {
        report_panic(kind, reporter, payload.as_ref());
    }
}

/// Spawn a processing stage thread
pub fn spawn_processor<P: Processor>(
    kind: StageKind,
    mut processor: P,
    input: QueueReader<P::Input>,
    output: QueueWriter<P::Output>,
    control: Arc<ChainControl>,
    reporter: EventReporter,
) -> Result<JoinHandle<()>, StageError> {
    spawn_named(kind, move || {
        supervise(kind, &reporter, || {
            let mut announced = false;
            while control.is_running() {
                if control.is_paused() {
                    thread::sleep(QUEUE_POLL_INTERVAL);
                    continue;
                }
                match input.pop(QUEUE_POLL_INTERVAL) {
                    Pop::Item(item) => match processor.process(item) {
                        Ok(Some(out)) => {
                            if !announced {
                                announced = true;
                                reporter.report(kind, StageEventKind::DataReady);
                            }
                            if !output.push(out, control.running_flag()) {
                                break;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            tracing::error!("Stage {} failed: {}", kind.name(), e);
                            reporter.report(kind, StageEventKind::Error(e.to_string()));
                            return;
                        }
                    },
                    Pop::Empty => {}
                    Pop::Closed => {
                        reporter.report(kind, StageEventKind::Finished);
                        return;
                    }
                }
            }
            tracing::debug!("Stage {} halted", kind.name());
        });
    })
}

/// Spawn the output writer thread
///
/// The writer stays idle until the chain's output gate is opened, letting its
/// input queue fill during prebuffering.
pub fn spawn_output_writer(
    input: QueueReader<AudioFrame>,
    sink: Arc<dyn OutputSink>,
    control: Arc<ChainControl>,
    reporter: EventReporter,
) -> Result<JoinHandle<()>, StageError> {
    let kind = StageKind::Output;
    spawn_named(kind, move || {
        supervise(kind, &reporter, || {
            let mut announced = false;
            while control.is_running() {
                if control.is_paused() || !control.is_output_open() {
                    thread::sleep(QUEUE_POLL_INTERVAL);
                    continue;
                }
                match input.pop(QUEUE_POLL_INTERVAL) {
                    Pop::Item(frame) => {
                        if let Err(e) = sink.write(&frame) {
                            tracing::error!("Output write failed: {}", e);
                            reporter.report(kind, StageEventKind::Error(e.to_string()));
                            return;
                        }
                        if !announced {
                            announced = true;
                            reporter.report(kind, StageEventKind::DataReady);
                        }
                    }
                    Pop::Empty => {}
                    Pop::Closed => {
                        reporter.report(kind, StageEventKind::Finished);
                        return;
                    }
                }
            }
            tracing::debug!("Output writer halted");
        });
    })
}
