use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Current utilization snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Load {
    pub active: usize,
    pub max: usize,
    pub utilization_pct: f32,
}

/// A held concurrency slot. Dropping it releases the slot automatically —
/// `Release` is implicit, there is no explicit release call.
pub struct SlotToken {
    _permit: OwnedSemaphorePermit,
    active: Arc<AtomicUsize>,
}

impl Drop for SlotToken {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Process-wide counting semaphore bounding concurrent ingestion jobs (C9).
/// The admission step is the only entry point that consults it; everything
/// else is non-blocking.
pub struct ConcurrencyManager {
    semaphore: Arc<Semaphore>,
    max: usize,
    active: Arc<AtomicUsize>,
}

impl ConcurrencyManager {
    pub fn new(max_concurrent: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent)),
            max: max_concurrent,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Non-blocking acquire. Returns `None` (busy) rather than waiting.
    pub fn try_acquire(&self) -> Option<SlotToken> {
        let permit = self.semaphore.clone().try_acquire_owned().ok()?;
        self.active.fetch_add(1, Ordering::SeqCst);
        Some(SlotToken {
            _permit: permit,
            active: self.active.clone(),
        })
    }

    pub fn load(&self) -> Load {
        let active = self.active.load(Ordering::SeqCst);
        #[allow(clippy::cast_precision_loss)]
        let utilization_pct = if self.max == 0 {
            0.0
        } else {
            (active as f32 / self.max as f32) * 100.0
        };
        Load {
            active,
            max: self.max,
            utilization_pct,
        }
    }
}
