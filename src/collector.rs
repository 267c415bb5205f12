//! Fixed-interval collection loop with cooperative cancellation.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant, SystemTime};

use log::debug;

use crate::source::RandomSource;
use crate::types::ReadResult;
use crate::RngError;

/// Cooperative cancellation flag, cloneable across threads.
///
/// Cancellation is observed between collection cycles and during the
/// inter-tick wait; it does not interrupt an in-flight device read.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    cond: Condvar,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation, waking any pending inter-tick wait.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock().unwrap();
        *cancelled = true;
        self.inner.cond.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock().unwrap()
    }

    /// Block until `deadline` or cancellation, whichever comes first.
    /// Returns true when cancelled.
    pub(crate) fn wait_until(&self, deadline: Instant) -> bool {
        let mut cancelled = self.inner.cancelled.lock().unwrap();
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .inner
                .cond
                .wait_timeout(cancelled, deadline - now)
                .unwrap();
            cancelled = guard;
        }
        true
    }
}

/// Collection loop phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Reading,
    Delivering,
    Waiting,
    /// Terminal: cancellation observed, no further reads or deliveries.
    Cancelled,
    /// Terminal: a read failed; the error was returned to the caller.
    Fatal,
}

/// Repeatedly reads a fixed bit count from a [`RandomSource`] at a fixed
/// cadence, forwarding each batch to a sink.
///
/// The first read happens immediately; subsequent reads run on the tick
/// grid `start + k * period`. Any read error is fatal to this loop
/// instance — whether to reopen and restart is the caller's decision.
#[derive(Debug)]
pub struct Collector {
    bits: usize,
    period: Duration,
    state: CollectorState,
}

impl Collector {
    /// Validates the batch size and period up front.
    pub fn new(bits: usize, period: Duration) -> Result<Self, RngError> {
        if bits == 0 {
            return Err(RngError::InvalidArgument(
                "bit count must be greater than zero".into(),
            ));
        }
        if period.is_zero() {
            return Err(RngError::InvalidArgument(
                "collection period must be greater than zero".into(),
            ));
        }
        Ok(Self { bits, period, state: CollectorState::Idle })
    }

    /// Terminal or current loop phase.
    pub fn state(&self) -> CollectorState {
        self.state
    }

    /// Run the loop until cancellation (`Ok`) or a fatal read error.
    ///
    /// Deliveries are strictly sequential and ordered by tick. The sink
    /// must not block indefinitely or it stalls the loop.
    pub fn run<S>(
        &mut self,
        source: &mut S,
        cancel: &CancelToken,
        mut sink: impl FnMut(ReadResult),
    ) -> Result<(), RngError>
    where
        S: RandomSource + ?Sized,
    {
        let mut ticks: u64 = 0;
        let mut next_tick = Instant::now() + self.period;
        loop {
            if cancel.is_cancelled() {
                self.state = CollectorState::Cancelled;
                debug!("collector cancelled after {ticks} deliveries");
                return Ok(());
            }

            self.state = CollectorState::Reading;
            let data = match source.read_bits(self.bits) {
                Ok(data) => data,
                Err(e) => {
                    self.state = CollectorState::Fatal;
                    return Err(e);
                }
            };

            self.state = CollectorState::Delivering;
            sink(ReadResult {
                timestamp: SystemTime::now(),
                bits_requested: self.bits,
                data,
            });
            ticks += 1;

            self.state = CollectorState::Waiting;
            if cancel.wait_until(next_tick) {
                self.state = CollectorState::Cancelled;
                debug!("collector cancelled after {ticks} deliveries");
                return Ok(());
            }
            next_tick += self.period;
        }
    }
}
