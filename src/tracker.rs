//! Submission and confirmation tracking
//!
//! A signed transaction is submitted exactly once. Waiting for it is a
//! bounded poll of the ledger's status query that ends in one of three
//! outcomes; running out of time is an outcome, not an error.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::Result;
use crate::ledger::LedgerService;
use crate::types::*;

/// Source of time for polling
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, duration: Duration);
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration)
    }
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Shared flag that stops a confirmation wait
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackerConfig {
    pub poll_interval: Duration,
    pub timeout: Duration,
    /// Consecutive failed status queries tolerated before giving up
    pub max_query_failures: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            max_query_failures: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed { block: String, slot: Natural },
    TimedOut,
    Cancelled,
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed { .. })
    }
}

pub struct Tracker<'a, L: LedgerService, C: Clock = SystemClock> {
    ledger: &'a L,
    clock: C,
    config: TrackerConfig,
}

impl<'a, L: LedgerService> Tracker<'a, L, SystemClock> {
    pub fn new(ledger: &'a L, config: TrackerConfig) -> Self {
        Self::with_clock(ledger, config, SystemClock)
    }
}

impl<'a, L: LedgerService, C: Clock> Tracker<'a, L, C> {
    pub fn with_clock(ledger: &'a L, config: TrackerConfig, clock: C) -> Self {
        Self {
            ledger,
            clock,
            config,
        }
    }

    /// Submits once. A rejection is returned as is and never retried here.
    pub fn submit(&self, signed: &SignedTransaction) -> Result<TransactionId> {
        let id = self.ledger.submit(&signed.bytes)?;
        if id != signed.id {
            warn!(
                "ledger reported id {} for transaction {}",
                hex::encode(id),
                hex::encode(signed.id)
            );
        }
        info!("submitted {} ({} bytes)", hex::encode(id), signed.bytes.len());
        Ok(id)
    }

    /// AwaitConfirmation: ℍ → {Confirmed(b, s), TimedOut, Cancelled}
    ///
    /// Polls every `poll_interval` until the deadline. `Pending` and
    /// `NotFound` both mean keep waiting; a transient query failure counts
    /// against `max_query_failures` and a non-transient one is returned.
    pub fn await_confirmation(&self, id: &TransactionId, cancel: &CancelToken) -> Result<Confirmation> {
        let deadline = self.clock.now() + self.config.timeout;
        let mut failures = 0;
        let mut polls = 0usize;

        loop {
            if cancel.is_cancelled() {
                info!("stopped waiting for {}", hex::encode(id));
                return Ok(Confirmation::Cancelled);
            }

            polls += 1;
            match self.ledger.get_transaction_status(id) {
                Ok(TxStatus::Confirmed { block, slot }) => {
                    info!("{} confirmed in slot {} after {} polls", hex::encode(id), slot, polls);
                    return Ok(Confirmation::Confirmed { block, slot });
                }
                Ok(status) => {
                    failures = 0;
                    debug!("{} is {:?}", hex::encode(id), status);
                }
                Err(e) if e.is_retryable() => {
                    failures += 1;
                    warn!("status query {} of {} failed: {}", failures, self.config.max_query_failures, e);
                    if failures > self.config.max_query_failures {
                        return Ok(Confirmation::TimedOut);
                    }
                }
                Err(e) => return Err(e),
            }

            if self.clock.now() + self.config.poll_interval > deadline {
                warn!("gave up on {} after {} polls", hex::encode(id), polls);
                return Ok(Confirmation::TimedOut);
            }
            self.clock.sleep(self.config.poll_interval);
        }
    }
}
