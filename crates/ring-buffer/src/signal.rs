//! Binary Signals and Timeouts

use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// How long a blocking ring buffer call may wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    /// Poll once, never block
    Immediate,
    /// Block for at most the given duration
    After(Duration),
    /// Block until the call can complete
    Forever,
}

impl Timeout {
    /// Absolute deadline for this timeout, `None` meaning unbounded
    pub(crate) fn deadline(self, now: Instant) -> Option<Instant> {
        match self {
            Timeout::Immediate => Some(now),
            Timeout::After(d) => Some(now + d),
            Timeout::Forever => None,
        }
    }
}

impl From<Duration> for Timeout {
    fn from(duration: Duration) -> Self {
        if duration.is_zero() {
            Timeout::Immediate
        } else {
            Timeout::After(duration)
        }
    }
}

/// Binary semaphore: `give` sets the flag, `take` waits for it and clears it
#[derive(Debug)]
pub(crate) struct Signal {
    raised: Mutex<bool>,
    cond: Condvar,
}

impl Signal {
    pub(crate) fn new(raised: bool) -> Self {
        Self {
            raised: Mutex::new(raised),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn give(&self) {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        *raised = true;
        self.cond.notify_one();
    }

    /// Wait for the signal until `deadline`. Returns false on timeout.
    pub(crate) fn take(&self, deadline: Option<Instant>) -> bool {
        let mut raised = self.raised.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if *raised {
                *raised = false;
                return true;
            }
            match deadline {
                None => {
                    raised = self.cond.wait(raised).unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    raised = self
                        .cond
                        .wait_timeout(raised, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }
}
