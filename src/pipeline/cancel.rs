//! Cooperative cancellation flag

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag handed by value to every worker and the sink.
///
/// Cancelling is idempotent; it never interrupts an encode already running.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Returns `true` only for the call that flipped the flag.
    pub fn cancel(&self) -> bool {
        let first = !self.flag.swap(true, Ordering::AcqRel);
        if first {
            tracing::info!("Cancellation requested");
        }
        first
    }

    /// Whether cancellation has been requested
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}
