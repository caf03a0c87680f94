use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::{ErrorKind, OperatorError};

pub const SHORT_REQUEUE_MIN: Duration = Duration::from_secs(2);
pub const SHORT_REQUEUE_MAX: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requeue {
    Done,
    Now,
    /// Retry after a random delay in `[min, max]`.
    After { min: Duration, max: Duration },
}

impl Requeue {
    /// Delay to wait before the next pass, `None` when no retry is wanted.
    pub fn jittered(&self) -> Option<Duration> {
        match *self {
            Requeue::Done => None,
            Requeue::Now => Some(Duration::ZERO),
            Requeue::After { min, max } => {
                let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
                if hi <= lo {
                    return Some(min);
                }
                let ms = rand::rng().random_range(lo..=hi);
                Some(Duration::from_millis(ms))
            }
        }
    }
}

/// Outcome of an orchestration step.
#[derive(Debug)]
pub struct ReconcileResult {
    requeue: Requeue,
    error: Option<OperatorError>,
}

impl ReconcileResult {
    pub fn done() -> Self {
        Self {
            requeue: Requeue::Done,
            error: None,
        }
    }

    pub fn requeue_now() -> Self {
        Self {
            requeue: Requeue::Now,
            error: None,
        }
    }

    pub fn requeue_after(min: Duration, max: Duration) -> Self {
        Self {
            requeue: Requeue::After { min, max },
            error: None,
        }
    }

    pub fn short_requeue() -> Self {
        Self::requeue_after(SHORT_REQUEUE_MIN, SHORT_REQUEUE_MAX)
    }

    pub fn with_error(mut self, err: OperatorError) -> Self {
        self.error = Some(err);
        self
    }

    /// Requeue chosen from the error's kind.
    pub fn from_error(err: OperatorError, backoff: &Backoff) -> Self {
        Self {
            requeue: backoff.requeue_for(&err),
            error: Some(err),
        }
    }

    pub fn should_requeue(&self) -> bool {
        self.requeue != Requeue::Done
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// Neither a retry nor an error: the caller may move on.
    pub fn is_complete(&self) -> bool {
        !self.should_requeue() && !self.is_error()
    }

    pub fn requeue(&self) -> Requeue {
        self.requeue
    }

    pub fn error(&self) -> Option<&OperatorError> {
        self.error.as_ref()
    }

    pub fn into_parts(self) -> (Requeue, Option<OperatorError>) {
        (self.requeue, self.error)
    }

    /// Combines two sub-step results. The first requeue request and the
    /// first error win; a later error that loses is logged.
    pub fn merge(mut self, other: ReconcileResult) -> Self {
        if self.requeue == Requeue::Done {
            self.requeue = other.requeue;
        }
        match other.error {
            Some(e) if self.error.is_none() => self.error = Some(e),
            Some(dropped) => {
                warn!(error = %dropped, "additional failure in the same pass")
            }
            None => {}
        }
        self
    }
}

/// Requeue ranges per error kind.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub short: (Duration, Duration),
    pub configuration: (Duration, Duration),
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            short: (SHORT_REQUEUE_MIN, SHORT_REQUEUE_MAX),
            configuration: (Duration::from_secs(60), Duration::from_secs(90)),
        }
    }
}

impl Backoff {
    pub fn short(&self) -> ReconcileResult {
        ReconcileResult::requeue_after(self.short.0, self.short.1)
    }

    pub fn requeue_for(&self, err: &OperatorError) -> Requeue {
        match err.kind() {
            ErrorKind::UserInput | ErrorKind::Fatal => Requeue::Done,
            ErrorKind::Configuration => Requeue::After {
                min: self.configuration.0,
                max: self.configuration.1,
            },
            ErrorKind::Transient | ErrorKind::Conflict => Requeue::After {
                min: self.short.0,
                max: self.short.1,
            },
        }
    }
}
