use crate::error::{JointError, Result};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation shared by the units of work of one build
///
/// A token carries a shared flag and an optional deadline. Long running
/// steps call `check` between blocks of work; a cancelled step returns
/// `JointError::Cancelled` and leaves nothing behind in the cache.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// A token sharing this flag that also expires after `timeout`
    pub fn child_with_timeout(&self, timeout: Option<Duration>) -> Self {
        let deadline = timeout.map(|t| Instant::now() + t);
        let deadline = match (self.deadline, deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        Self {
            flag: self.flag.clone(),
            deadline,
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
            || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// `Err(Cancelled)` once cancelled or past the deadline
    pub fn check(&self, what: &str) -> Result<()> {
        if self.flag.load(Ordering::Relaxed) {
            return Err(JointError::Cancelled(format!("{} was cancelled", what)));
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(JointError::Cancelled(format!("{} timed out", what)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_reaches_children() {
        let root = CancelToken::new();
        let child = root.child_with_timeout(None);
        assert!(child.check("x").is_ok());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check("x"), Err(JointError::Cancelled(_))));
    }

    #[test]
    fn zero_timeout_expires() {
        let child = CancelToken::new().child_with_timeout(Some(Duration::ZERO));
        assert!(child.is_cancelled());
        let err = child.check("pair").unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }
}
