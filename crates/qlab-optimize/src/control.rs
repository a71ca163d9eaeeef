use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::error::OptimizeError;

/// Shared cancellation flag.
///
/// Clones observe the same flag. Optimizers poll it between evaluations, so
/// a cancelled search stops after the evaluation in flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// `Err(Cancelled)` once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<(), OptimizeError> {
        if self.is_cancelled() {
            return Err(OptimizeError::Cancelled);
        }
        Ok(())
    }
}

/// Completed / total evaluations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub completed: usize,
    pub total: usize,
    pub fraction: f64,
}

impl Progress {
    pub fn new(completed: usize, total: usize) -> Self {
        let fraction = if total == 0 {
            1.0
        } else {
            completed as f64 / total as f64
        };
        Self {
            completed,
            total,
            fraction,
        }
    }
}

/// Reported by the genetic optimizer after each generation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GenerationProgress {
    pub generation: usize,
    pub best_fitness: f64,
    pub evaluations: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(OptimizeError::Cancelled)));
    }

    #[test]
    fn test_progress_fraction() {
        assert_eq!(Progress::new(1, 4).fraction, 0.25);
        assert_eq!(Progress::new(0, 0).fraction, 1.0);
    }
}
