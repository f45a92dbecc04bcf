//! Result consumer: the single thread that owns the [`ResultStore`]
//!
//! [`drain`] pulls finished items off the handoff queue, records them and
//! forwards one [`UiEvent`] per item to a [`Presenter`]. Presenters never block
//! the drain loop; [`ChannelPresenter`] hands events to an async task over an
//! unbounded channel.

use crate::error::Error;
use crate::pipeline::{CancellationToken, Handoff, ItemFailure};
use crossbeam::channel::Receiver;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

/// Rendered codes of the current batch, keyed by source string, in delivery order
#[derive(Default)]
pub struct ResultStore {
    images: HashMap<String, Arc<RgbaImage>>,
    order: Vec<String>,
}

impl ResultStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a result. A second insert for the same key is refused and its
    /// image released.
    pub fn insert(&mut self, text: String, image: Arc<RgbaImage>) -> bool {
        if self.images.contains_key(&text) {
            return false;
        }
        self.order.push(text.clone());
        self.images.insert(text, image);
        true
    }

    /// Image for `text`
    pub fn get(&self, text: &str) -> Option<&Arc<RgbaImage>> {
        self.images.get(text)
    }

    /// Whether `text` has a result
    pub fn contains(&self, text: &str) -> bool {
        self.images.contains_key(text)
    }

    /// Number of results
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Keys in delivery order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Entries in delivery order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<RgbaImage>)> {
        self.order
            .iter()
            .filter_map(|key| self.images.get(key).map(|image| (key.as_str(), image)))
    }

    /// Release every image. Returns how many entries were dropped.
    pub fn clear(&mut self) -> usize {
        let released = self.order.len();
        self.images.clear();
        self.order.clear();
        released
    }
}

impl fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultStore")
            .field("keys", &self.order)
            .finish()
    }
}

/// Lifecycle of one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchState {
    /// Nothing submitted yet
    Idle,
    /// Accepting results
    Running,
    /// Every worker finished without cancellation
    Completed,
    /// Cancelled by the user
    Cancelled,
    /// Aborted by an unexpected failure
    Failed,
}

impl BatchState {
    /// Completed, Cancelled or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Per-item progress update
#[derive(Clone)]
pub struct ItemUpdate {
    /// Source string
    pub text: String,
    /// Rendered symbol, shared with the store
    pub image: Arc<RgbaImage>,
    /// Zero-based position in delivery order
    pub index: usize,
    /// Results delivered so far, including this one
    pub generated: usize,
    /// Items in the batch
    pub total: usize,
}

impl fmt::Debug for ItemUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemUpdate")
            .field("text", &self.text)
            .field("dimensions", &self.image.dimensions())
            .field("index", &self.index)
            .field("generated", &self.generated)
            .field("total", &self.total)
            .finish()
    }
}

/// Failed item as reported to presenters and in the batch report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedItem {
    /// Source string
    pub text: String,
    /// Error message
    pub reason: String,
}

impl From<&ItemFailure> for FailedItem {
    fn from(failure: &ItemFailure) -> Self {
        Self {
            text: failure.text.clone(),
            reason: failure.error.to_string(),
        }
    }
}

/// Terminal status reported once per batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum BatchStatus {
    /// All items processed
    Completed {
        /// Results stored
        generated: usize,
        /// Items that failed to encode
        failed: usize,
        /// Items in the batch
        total: usize,
    },
    /// Cancelled; the store has been cleared
    Cancelled {
        /// Results that had been shown before cancellation
        delivered: usize,
        /// Items in the batch
        total: usize,
    },
    /// Aborted by an unexpected failure; the store has been cleared
    Failed {
        /// Diagnostic
        message: String,
    },
}

/// Event marshalled to the presentation layer
#[derive(Debug, Clone)]
pub enum UiEvent {
    /// An item was rendered and stored
    ItemReady(ItemUpdate),
    /// An item could not be rendered
    ItemFailed(FailedItem),
    /// The batch reached a terminal state
    Finished(BatchStatus),
}

/// Receiver of sink events.
///
/// Called on the sink thread, in dequeue order; implementations must return
/// promptly.
pub trait Presenter: Send {
    /// Handle one event
    fn present(&mut self, event: UiEvent);
}

/// Forwards events to an async consumer without ever blocking
#[derive(Debug, Clone)]
pub struct ChannelPresenter {
    tx: UnboundedSender<UiEvent>,
}

impl ChannelPresenter {
    /// Wrap the sending half of an unbounded channel
    pub fn new(tx: UnboundedSender<UiEvent>) -> Self {
        Self { tx }
    }
}

impl Presenter for ChannelPresenter {
    fn present(&mut self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("Presenter receiver closed; dropping event");
        }
    }
}

/// Adapter turning a closure into a [`Presenter`]
pub struct FnPresenter<F>(pub F);

impl<F> Presenter for FnPresenter<F>
where
    F: FnMut(UiEvent) + Send,
{
    fn present(&mut self, event: UiEvent) {
        (self.0)(event)
    }
}

/// Presenter that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullPresenter;

impl Presenter for NullPresenter {
    fn present(&mut self, _event: UiEvent) {}
}

/// Summary of one finished batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Batch identifier used in logs
    pub batch_id: Uuid,
    /// Terminal state
    pub state: BatchState,
    /// Items submitted
    pub total: usize,
    /// Results delivered (and, for a completed batch, kept in the store)
    pub generated: usize,
    /// Items that failed to encode
    pub failures: Vec<FailedItem>,
    /// Results that arrived after cancellation or abort and were released unseen
    pub discarded: usize,
    /// Diagnostic for a failed batch
    pub error: Option<String>,
    /// Wall-clock duration of the drain loop
    pub elapsed: Duration,
}

impl BatchReport {
    /// Terminal status as sent to the presenter
    pub fn status(&self) -> BatchStatus {
        match self.state {
            BatchState::Cancelled => BatchStatus::Cancelled {
                delivered: self.generated,
                total: self.total,
            },
            BatchState::Failed => BatchStatus::Failed {
                message: self
                    .error
                    .clone()
                    .unwrap_or_else(|| "generation failed".to_string()),
            },
            _ => BatchStatus::Completed {
                generated: self.generated,
                failed: self.failures.len(),
                total: self.total,
            },
        }
    }
}

/// Inputs of one drain loop
#[derive(Debug)]
pub struct DrainContext {
    /// Batch identifier
    pub batch_id: Uuid,
    /// Handoff queue; the loop ends when it disconnects
    pub results: Receiver<Handoff>,
    /// Batch cancellation flag
    pub token: CancellationToken,
    /// Items submitted
    pub total: usize,
}

/// Drain the handoff queue into `store` until every producer has stopped.
///
/// The store is cleared first, so a batch never sees leftovers from the
/// previous one. Results arriving after cancellation or abort are released
/// immediately and the store is cleared again before the terminal event.
pub fn drain<P>(ctx: DrainContext, store: &mut ResultStore, presenter: &mut P) -> BatchReport
where
    P: Presenter + ?Sized,
{
    let DrainContext {
        batch_id,
        results,
        token,
        total,
    } = ctx;
    let started = Instant::now();

    let stale = store.clear();
    if stale > 0 {
        tracing::debug!(stale, "Released results of previous batch");
    }

    let mut state = BatchState::Running;
    let mut generated = 0;
    let mut discarded = 0;
    let mut failures = Vec::new();
    let mut abort: Option<Error> = None;

    for handoff in results.iter() {
        if let Handoff::Aborted(error) = handoff {
            state = BatchState::Failed;
            abort.get_or_insert(error);
            continue;
        }

        if state == BatchState::Running && token.is_cancelled() {
            state = BatchState::Cancelled;
        }
        if state != BatchState::Running {
            // Dropping the handoff here releases its image.
            discarded += 1;
            continue;
        }

        match handoff {
            Handoff::Generated(code) => {
                let image = Arc::new(code.image);
                if !store.insert(code.text.clone(), Arc::clone(&image)) {
                    tracing::warn!(text = %code.text, "Duplicate result ignored");
                    continue;
                }
                generated += 1;
                presenter.present(UiEvent::ItemReady(ItemUpdate {
                    text: code.text,
                    image,
                    index: store.len() - 1,
                    generated,
                    total,
                }));
            }
            Handoff::Failed(failure) => {
                let item = FailedItem::from(&failure);
                presenter.present(UiEvent::ItemFailed(item.clone()));
                failures.push(item);
            }
            Handoff::Aborted(_) => {}
        }
    }

    if state == BatchState::Running {
        state = if token.is_cancelled() {
            BatchState::Cancelled
        } else {
            BatchState::Completed
        };
    }

    if matches!(state, BatchState::Cancelled | BatchState::Failed) {
        let released = store.clear();
        tracing::debug!(released, discarded, "Cleared results after {state}");
    }

    let report = BatchReport {
        batch_id,
        state,
        total,
        generated,
        failures,
        discarded,
        error: abort.map(|e| e.to_string()),
        elapsed: started.elapsed(),
    };

    match state {
        BatchState::Completed => tracing::info!(
            generated,
            failed = report.failures.len(),
            total,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch completed"
        ),
        BatchState::Cancelled => tracing::info!(generated, total, "Batch cancelled"),
        _ => tracing::error!(error = ?report.error, "Batch failed"),
    }

    presenter.present(UiEvent::Finished(report.status()));
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::GeneratedCode;
    use crossbeam::channel::unbounded;
    use image::Rgba;

    fn code(text: &str) -> Handoff {
        Handoff::Generated(GeneratedCode {
            text: text.to_string(),
            image: RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])),
            worker_id: 0,
            elapsed: Duration::ZERO,
        })
    }

    fn run(handoffs: Vec<Handoff>, token: CancellationToken, store: &mut ResultStore) -> (BatchReport, Vec<UiEvent>) {
        let (tx, rx) = unbounded();
        let total = handoffs.len();
        for handoff in handoffs {
            tx.send(handoff).unwrap();
        }
        drop(tx);

        let mut events: Vec<UiEvent> = Vec::new();
        let mut presenter = FnPresenter(|event: UiEvent| events.push(event));
        let report = drain(
            DrainContext {
                batch_id: Uuid::new_v4(),
                results: rx,
                token,
                total,
            },
            store,
            &mut presenter,
        );
        (report, events)
    }

    #[test]
    fn test_store_refuses_duplicates() {
        let mut store = ResultStore::new();
        let image = Arc::new(RgbaImage::new(1, 1));
        assert!(store.insert("a".into(), Arc::clone(&image)));
        assert!(!store.insert("a".into(), image));
        assert_eq!(store.len(), 1);
        assert_eq!(store.clear(), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_store_iterates_in_delivery_order() {
        let mut store = ResultStore::new();
        for key in ["z", "a", "m"] {
            store.insert(key.into(), Arc::new(RgbaImage::new(1, 1)));
        }
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["z", "a", "m"]);
        assert_eq!(store.iter().count(), 3);
    }

    #[test]
    fn test_completed_batch_reports_progress() {
        let mut store = ResultStore::new();
        let (report, events) = run(vec![code("a"), code("b")], CancellationToken::new(), &mut store);

        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.generated, 2);
        assert_eq!(store.len(), 2);

        let progress: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                UiEvent::ItemReady(update) => Some((update.index, update.generated, update.total)),
                _ => None,
            })
            .collect();
        assert_eq!(progress, vec![(0, 1, 2), (1, 2, 2)]);
        assert!(matches!(
            events.last(),
            Some(UiEvent::Finished(BatchStatus::Completed { generated: 2, failed: 0, total: 2 }))
        ));
    }

    #[test]
    fn test_failures_do_not_stop_batch() {
        let mut store = ResultStore::new();
        let failed = Handoff::Failed(ItemFailure {
            text: "big".into(),
            error: Error::encoding("big", "data too long"),
        });
        let (report, events) = run(vec![code("a"), failed, code("b")], CancellationToken::new(), &mut store);

        assert_eq!(report.state, BatchState::Completed);
        assert_eq!(report.generated, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].text, "big");
        assert!(events.iter().any(|e| matches!(e, UiEvent::ItemFailed(f) if f.text == "big")));
    }

    #[test]
    fn test_cancelled_batch_clears_store_and_discards_late_results() {
        let mut store = ResultStore::new();
        let token = CancellationToken::new();
        token.cancel();
        let (report, events) = run(vec![code("a"), code("b")], token, &mut store);

        assert_eq!(report.state, BatchState::Cancelled);
        assert_eq!(report.generated, 0);
        assert_eq!(report.discarded, 2);
        assert!(store.is_empty());
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], UiEvent::Finished(BatchStatus::Cancelled { delivered: 0, total: 2 })));
    }

    #[test]
    fn test_abort_fails_batch() {
        let mut store = ResultStore::new();
        let handoffs = vec![
            code("a"),
            Handoff::Aborted(Error::Unexpected("boom".into())),
            code("b"),
        ];
        let (report, events) = run(handoffs, CancellationToken::new(), &mut store);

        assert_eq!(report.state, BatchState::Failed);
        assert_eq!(report.discarded, 1);
        assert!(store.is_empty());
        assert!(report.error.as_deref().unwrap_or_default().contains("boom"));
        assert!(matches!(events.last(), Some(UiEvent::Finished(BatchStatus::Failed { .. }))));
    }

    #[test]
    fn test_new_batch_starts_from_empty_store() {
        let mut store = ResultStore::new();
        store.insert("stale".into(), Arc::new(RgbaImage::new(1, 1)));
        let (_, _) = run(vec![code("fresh")], CancellationToken::new(), &mut store);
        assert_eq!(store.keys().collect::<Vec<_>>(), vec!["fresh"]);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BatchState::Idle.is_terminal());
        assert!(!BatchState::Running.is_terminal());
        assert!(BatchState::Completed.is_terminal());
        assert!(BatchState::Cancelled.is_terminal());
        assert!(BatchState::Failed.is_terminal());
    }

    #[tokio::test]
    async fn test_channel_presenter_forwards_events() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut presenter = ChannelPresenter::new(tx);
        presenter.present(UiEvent::Finished(BatchStatus::Failed {
            message: "x".into(),
        }));
        drop(presenter);
        assert!(matches!(rx.recv().await, Some(UiEvent::Finished(_))));
        assert!(rx.recv().await.is_none());
    }
}
