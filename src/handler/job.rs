use std::pin::Pin;
use std::task::Context;
use std::time::Duration;

use futures::Future;
use futures_timer::Delay;

/// A background job run periodically.
///
/// Can be suspended and resumed; resuming never loses the "run once
/// immediately" semantics of a fresh job.
#[derive(Debug)]
pub(crate) struct PeriodicJob {
    interval: Duration,
    delay: Delay,
    /// Run at the next poll regardless of the timer
    fire_now: bool,
    paused: bool,
}

impl PeriodicJob {
    /// A new job is due immediately.
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            delay: Delay::new(interval),
            fire_now: true,
            paused: false,
        }
    }

    /// Suspend the job; the timer is ignored until [`PeriodicJob::resume`].
    pub(crate) fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume the job with one immediate run.
    pub(crate) fn resume(&mut self) {
        if self.paused {
            self.paused = false;
            self.fire_now = true;
        }
    }

    /// Returns `true` if the job is currently not running but ready
    /// to be run, `false` otherwise.
    pub(crate) fn is_ready(&mut self, cx: &mut Context<'_>) -> bool {
        if self.paused {
            return false;
        }
        if self.fire_now {
            self.fire_now = false;
            self.delay.reset(self.interval);
            return true;
        }
        if Future::poll(Pin::new(&mut self.delay), cx).is_ready() {
            self.delay.reset(self.interval);
            return true;
        }
        false
    }
}
