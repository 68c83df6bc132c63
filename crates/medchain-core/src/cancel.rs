//! Cooperative cancellation for verification scans.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why a scan should stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    Cancelled,
    TimedOut,
}

/// A cloneable stop signal with an optional deadline.
///
/// Clones share the same flag, so a request handler can keep one and hand
/// the other to `HashChainLedger::verify_with`.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    timeout: Option<Duration>,
    // None with a timeout set means the deadline lies past what `Instant`
    // can represent.
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires unless `cancel()` is called.
    pub fn new() -> Self {
        Self::default()
    }

    /// A token that also fires once `timeout` has elapsed from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            timeout: Some(timeout),
            deadline: Instant::now().checked_add(timeout),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// The configured timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// The configured timeout in whole milliseconds, saturating at `u64::MAX`.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
    }

    /// Poll the token.  Explicit cancellation wins over an expired deadline.
    pub fn check(&self) -> Option<Interrupt> {
        if self.is_cancelled() {
            return Some(Interrupt::Cancelled);
        }
        match self.deadline {
            Some(at) if Instant::now() >= at => Some(Interrupt::TimedOut),
            _ => None,
        }
    }
}
