use crate::error::{Result, Stage, TrajError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and the
/// parallel loops; checked between independent work units.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    pub fn check(&self, stage: Stage) -> Result<()> {
        if self.is_cancelled() {
            Err(TrajError::Cancelled { stage })
        } else {
            Ok(())
        }
    }
}
