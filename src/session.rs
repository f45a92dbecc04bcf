//! Generator front door tying the pipeline and the sink together

use crate::config::QrBatchConfig;
use crate::error::{Error, Result};
use crate::input::WorkItem;
use crate::pipeline::{CancellationToken, Pipeline, join_dispatcher};
use crate::qr::{Logo, LogoPool, QrEncoder, SymbolEncoder};
use crate::sink::{self, BatchReport, DrainContext, Presenter, ResultStore};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use uuid::Uuid;

/// Owns the pipeline and the result store between batches
#[derive(Debug)]
pub struct Generator {
    pipeline: Pipeline,
    store: ResultStore,
}

impl Generator {
    /// Generator over an already configured pipeline
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            store: ResultStore::new(),
        }
    }

    /// Build the encoder, logo pool and pipeline described by `config`.
    ///
    /// The logo is read once here and handed to the pipeline explicitly.
    pub fn from_config(config: &QrBatchConfig) -> Result<Self> {
        let style = config.render.to_style()?;
        let encoder = QrEncoder::new(style).with_verification(config.render.verify);

        let logo = config
            .render
            .logo
            .as_deref()
            .map(Logo::load)
            .transpose()?;
        encoder.warm_up(logo.as_ref().map(Logo::image))?;

        let mut pipeline = Pipeline::new(Arc::new(encoder), LogoPool::new(logo));
        if let Some(workers) = config.pipeline.workers {
            pipeline = pipeline.with_workers(workers);
        }
        if let Some(capacity) = config.pipeline.queue_capacity {
            pipeline = pipeline.with_queue_capacity(capacity);
        }
        tracing::debug!(
            ?pipeline,
            logo = ?pipeline.logos().logo().and_then(Logo::source),
            "Generator ready"
        );

        Ok(Self::new(pipeline))
    }

    /// Generator using `encoder` with default pool sizing and no logo
    pub fn with_encoder(encoder: Arc<dyn SymbolEncoder>) -> Self {
        Self::new(Pipeline::new(encoder, LogoPool::default()))
    }

    /// The underlying pipeline
    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Results of the last completed batch
    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Release every stored result.
    pub fn clear(&mut self) {
        self.store.clear();
    }

    /// Start a batch. The store moves to the sink thread until
    /// [`RunningBatch::wait`] hands it back.
    pub fn start<P>(&mut self, items: Vec<WorkItem>, presenter: P) -> Result<RunningBatch<'_>>
    where
        P: Presenter + 'static,
    {
        self.start_with_token(items, presenter, CancellationToken::new())
    }

    /// Start a batch observing an existing cancellation token.
    pub fn start_with_token<P>(
        &mut self,
        items: Vec<WorkItem>,
        mut presenter: P,
        token: CancellationToken,
    ) -> Result<RunningBatch<'_>>
    where
        P: Presenter + 'static,
    {
        let batch_id = Uuid::new_v4();
        let total = items.len();
        let span = tracing::info_span!("batch", id = %batch_id, items = total);
        let _entered = span.enter();
        tracing::info!(workers = self.pipeline.workers(), "Starting batch");

        let (results, dispatcher) = self.pipeline.spawn(items, token.clone())?.into_parts();

        let mut store = std::mem::take(&mut self.store);
        let ctx = DrainContext {
            batch_id,
            results,
            token: token.clone(),
            total,
        };
        let sink_span = span.clone();
        let sink = thread::Builder::new()
            .name("qrbatch-sink".to_string())
            .spawn(move || {
                let _entered = sink_span.enter();
                let report = sink::drain(ctx, &mut store, &mut presenter);
                (store, report)
            })?;

        Ok(RunningBatch {
            generator: self,
            batch_id,
            token,
            sink,
            dispatcher,
        })
    }

    /// Run a batch to completion.
    pub fn run<P>(&mut self, items: Vec<WorkItem>, presenter: P) -> Result<BatchReport>
    where
        P: Presenter + 'static,
    {
        self.start(items, presenter)?.wait()
    }
}

/// A batch in flight; borrows the generator so only one batch runs at a time
#[derive(Debug)]
pub struct RunningBatch<'g> {
    generator: &'g mut Generator,
    batch_id: Uuid,
    token: CancellationToken,
    sink: JoinHandle<(ResultStore, BatchReport)>,
    dispatcher: JoinHandle<()>,
}

impl RunningBatch<'_> {
    /// Identifier used in logs and reports
    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Token that cancels this batch
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Request cancellation; repeated calls have no further effect.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Whether the sink has finished draining
    pub fn is_finished(&self) -> bool {
        self.sink.is_finished()
    }

    /// Block until the batch reaches a terminal state and return its report.
    pub fn wait(self) -> Result<BatchReport> {
        let RunningBatch {
            generator,
            sink,
            dispatcher,
            ..
        } = self;

        let joined = sink.join();
        let dispatched = join_dispatcher(dispatcher);
        // Workers are gone; their logo copies are not needed until the next batch.
        generator.pipeline.logos().release_all();

        match joined {
            Ok((store, report)) => {
                generator.store = store;
                dispatched?;
                Ok(report)
            }
            Err(_) => {
                generator.store = ResultStore::new();
                Err(Error::Unexpected("result sink thread panicked".to_string()))
            }
        }
    }
}
