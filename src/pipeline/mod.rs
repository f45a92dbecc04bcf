//! Bounded parallel QR generation
//!
//! A dispatcher thread feeds work items through a bounded channel to a fixed
//! pool of worker threads. Each worker renders its item through the shared
//! [`SymbolEncoder`] and pushes a [`Handoff`] into a bounded result queue
//! drained by a single consumer (see [`crate::sink`]).
//!
//! Cancellation is cooperative: workers look at the [`CancellationToken`]
//! before taking an item and again after encoding it. A cancelled worker
//! drops whatever it just rendered and stops. The result queue closes exactly
//! once, after every worker has been joined.

mod cancel;

pub use cancel::CancellationToken;

use crate::error::{Error, Result};
use crate::input::WorkItem;
use crate::qr::{LogoPool, SymbolEncoder};
use crossbeam::channel::{Receiver, Sender, bounded};
use image::RgbaImage;
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::Span;

/// A successfully rendered item
pub struct GeneratedCode {
    /// Source string
    pub text: String,
    /// Rendered symbol
    pub image: RgbaImage,
    /// Worker that produced it
    pub worker_id: usize,
    /// Time spent encoding
    pub elapsed: Duration,
}

impl fmt::Debug for GeneratedCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedCode")
            .field("text", &self.text)
            .field("dimensions", &self.image.dimensions())
            .field("worker_id", &self.worker_id)
            .field("elapsed", &self.elapsed)
            .finish()
    }
}

/// An item the encoder could not render
#[derive(Debug)]
pub struct ItemFailure {
    /// Source string
    pub text: String,
    /// Why it failed
    pub error: Error,
}

/// Message carried from workers to the consumer
#[derive(Debug)]
pub enum Handoff {
    /// Item rendered
    Generated(GeneratedCode),
    /// Item failed on its own; siblings carry on
    Failed(ItemFailure),
    /// Unexpected failure; the batch is aborted
    Aborted(Error),
}

/// Worker pool configuration plus the shared encoder and logo pool
#[derive(Clone)]
pub struct Pipeline {
    encoder: Arc<dyn SymbolEncoder>,
    logos: Arc<LogoPool>,
    workers: usize,
    queue_capacity: Option<usize>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("workers", &self.workers)
            .field("queue_capacity", &self.queue_capacity())
            .field("logo", &self.logos.has_logo())
            .finish()
    }
}

impl Pipeline {
    /// Pipeline with one worker per available CPU
    pub fn new(encoder: Arc<dyn SymbolEncoder>, logos: LogoPool) -> Self {
        Self {
            encoder,
            logos: Arc::new(logos),
            workers: default_workers(),
            queue_capacity: None,
        }
    }

    /// Override the worker count (at least one)
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Override the result queue bound (at least one)
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = Some(capacity.max(1));
        self
    }

    /// Configured worker count
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Result queue bound; twice the worker count unless overridden
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity.unwrap_or(self.workers * 2)
    }

    /// Shared logo pool
    pub fn logos(&self) -> &LogoPool {
        &self.logos
    }

    /// Start generating `items` in the background.
    ///
    /// The returned receiver yields one [`Handoff`] per finished item and
    /// disconnects once every worker has stopped.
    pub fn spawn(&self, items: Vec<WorkItem>, token: CancellationToken) -> Result<PipelineHandle> {
        let (result_tx, result_rx) = bounded(self.queue_capacity());
        let pipeline = self.clone();
        let span = Span::current();

        let dispatcher = thread::Builder::new()
            .name("qrbatch-dispatch".to_string())
            .spawn(move || {
                let _entered = span.enter();
                pipeline.dispatch(items, token, result_tx);
            })?;

        Ok(PipelineHandle {
            results: result_rx,
            dispatcher,
        })
    }

    fn dispatch(&self, items: Vec<WorkItem>, token: CancellationToken, result_tx: Sender<Handoff>) {
        let total = items.len();
        if total == 0 {
            return;
        }

        let workers = self.workers.min(total);
        let (work_tx, work_rx) = bounded::<WorkItem>(workers * 2);
        let started = Instant::now();
        tracing::debug!(total, workers, "Dispatching batch");

        let outcome = crossbeam::thread::scope(|s| {
            for worker_id in 0..workers {
                let ctx = WorkerContext {
                    worker_id,
                    work_rx: work_rx.clone(),
                    result_tx: result_tx.clone(),
                    token: token.clone(),
                    encoder: self.encoder.as_ref(),
                    logos: &self.logos,
                    span: Span::current(),
                };
                s.builder()
                    .name(format!("qrbatch-worker-{worker_id}"))
                    .spawn(move |_| worker_loop(ctx))
                    .map_err(|e| Error::Unexpected(format!("failed to spawn worker: {e}")))?;
            }
            drop(work_rx);

            let mut scheduled = 0;
            for item in items {
                if token.is_cancelled() {
                    break;
                }
                if work_tx.send(item).is_err() {
                    break;
                }
                scheduled += 1;
            }
            drop(work_tx);

            if scheduled < total {
                tracing::debug!(scheduled, total, "Stopped scheduling after cancellation");
            }
            Ok::<_, Error>(())
        });

        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(payload) => Some(Error::Unexpected(format!(
                "worker thread panicked: {}",
                panic_message(payload.as_ref())
            ))),
        };

        if let Some(error) = failure {
            tracing::error!(%error, "Generation aborted");
            token.cancel();
            let _ = result_tx.send(Handoff::Aborted(error));
        }

        tracing::debug!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "All workers finished"
        );
        // Dropping the last sender closes the queue for the consumer.
    }
}

/// Background generation in progress
#[derive(Debug)]
pub struct PipelineHandle {
    results: Receiver<Handoff>,
    dispatcher: JoinHandle<()>,
}

impl PipelineHandle {
    /// Queue of finished items
    pub fn results(&self) -> &Receiver<Handoff> {
        &self.results
    }

    /// Split into the result queue and the dispatcher thread
    pub fn into_parts(self) -> (Receiver<Handoff>, JoinHandle<()>) {
        (self.results, self.dispatcher)
    }

    /// Wait for the dispatcher thread to exit.
    pub fn join(self) -> Result<()> {
        let (results, dispatcher) = self.into_parts();
        drop(results);
        join_dispatcher(dispatcher)
    }
}

pub(crate) fn join_dispatcher(dispatcher: JoinHandle<()>) -> Result<()> {
    dispatcher.join().map_err(|payload| {
        Error::Unexpected(format!(
            "dispatcher thread panicked: {}",
            panic_message(payload.as_ref())
        ))
    })
}

/// Number of hardware threads available to the process
pub fn default_workers() -> usize {
    num_cpus::get().max(1)
}

struct WorkerContext<'a> {
    worker_id: usize,
    work_rx: Receiver<WorkItem>,
    result_tx: Sender<Handoff>,
    token: CancellationToken,
    encoder: &'a dyn SymbolEncoder,
    logos: &'a LogoPool,
    span: Span,
}

fn worker_loop(ctx: WorkerContext<'_>) {
    let _entered = ctx.span.enter();

    while let Ok(item) = ctx.work_rx.recv() {
        if ctx.token.is_cancelled() {
            break;
        }

        let text = item.into_string();
        let started = Instant::now();
        let outcome = {
            let logo = ctx.logos.lease(ctx.worker_id);
            panic::catch_unwind(AssertUnwindSafe(|| {
                ctx.encoder.encode(&text, logo.as_deref())
            }))
        };
        let elapsed = started.elapsed();

        if ctx.token.is_cancelled() {
            tracing::debug!(worker = ctx.worker_id, %text, "Discarding render after cancellation");
            break;
        }

        let handoff = match outcome {
            Ok(Ok(image)) => {
                tracing::debug!(
                    worker = ctx.worker_id,
                    %text,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Encoded"
                );
                Handoff::Generated(GeneratedCode {
                    text,
                    image,
                    worker_id: ctx.worker_id,
                    elapsed,
                })
            }
            Ok(Err(error)) if error.is_per_item() => {
                tracing::warn!(worker = ctx.worker_id, %error, "Item failed");
                Handoff::Failed(ItemFailure { text, error })
            }
            Ok(Err(error)) => {
                tracing::error!(worker = ctx.worker_id, %error, "Unexpected encoder failure");
                ctx.token.cancel();
                Handoff::Aborted(error)
            }
            Err(payload) => {
                let error = Error::Unexpected(format!(
                    "worker {} panicked while encoding '{}': {}",
                    ctx.worker_id,
                    text,
                    panic_message(payload.as_ref())
                ));
                tracing::error!(worker = ctx.worker_id, %error, "Encoder panicked");
                ctx.token.cancel();
                Handoff::Aborted(error)
            }
        };

        let aborted = matches!(handoff, Handoff::Aborted(_));
        if ctx.result_tx.send(handoff).is_err() || aborted {
            break;
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
