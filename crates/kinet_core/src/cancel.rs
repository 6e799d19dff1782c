use crate::error::{KineticsError, KineticsResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative cancellation flag shared between a caller and running solves.
///
/// Clones observe the same flag. Solvers poll it between iterations.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Returns `Err(Cancelled)` once the flag is set.
    pub fn check(&self) -> KineticsResult<()> {
        if self.is_cancelled() {
            Err(KineticsError::Cancelled)
        } else {
            Ok(())
        }
    }
}
