// Fatal conditions (§7): capacity exhaustion, timestamp regression, GC
// invariant violation, and the like. These are never retried and never
// surfaced to a client; the owning subsystem logs them and trips the
// process-wide shutdown signal so every other thread gets a chance to
// notice and unwind instead of the call site calling process::exit
// directly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum Fatal {
    #[error("transaction status table overflow region exhausted")]
    TstOutOfSpace,
    #[error("ring buffer full after a complete sweep")]
    RingFull,
    #[error("timestamp regression: next={next} last={last}")]
    TimestampRegression { last: u64, next: u64 },
    #[error("garbage collector task DAG invariant violated: {0}")]
    GcInvariant(String),
    #[error("mailbox send failed after exhausting retries")]
    MailboxSendFailed,
    #[error("configuration error: {0}")]
    Config(String),
}

/// Shared by every subsystem in a process; cloned cheaply (it's an
/// `Arc<AtomicBool>` under the hood) and checked at every blocking
/// `recv`/`lock` loop so a fatal error in one thread wakes the rest.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal(Arc<AtomicBool>);

impl ShutdownSignal {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Logs `fatal` and trips the signal. Idempotent: the first caller
    /// to trip it "wins" the log line, later callers are silent.
    pub fn trigger(&self, fatal: &Fatal) {
        if !self.0.swap(true, Ordering::AcqRel) {
            error!(target: "gryphon::fatal", error = %fatal, "fatal error, process shutting down");
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trigger_is_idempotent_and_observable() {
        let sig = ShutdownSignal::new();
        assert!(!sig.is_triggered());
        sig.trigger(&Fatal::TstOutOfSpace);
        assert!(sig.is_triggered());
        let sig2 = sig.clone();
        assert!(sig2.is_triggered());
        // Second trigger must not panic or double log in a way we can
        // observe from here; just confirm state is stable.
        sig.trigger(&Fatal::RingFull);
        assert!(sig.is_triggered());
    }
}
