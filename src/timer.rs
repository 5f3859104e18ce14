//! Retransmission timeout tracking with exponential backoff.
//!
//! The timer is polled, never callback-driven: the caller asks for the next
//! deadline and reports the current time into `handle_timeout`.

use std::time::{Duration, Instant};

use crate::Error;

/// Upper bound for the retransmission timeout.
pub const MAX_RTO: Duration = Duration::from_secs(60);

/// Consecutive timeouts after which the handshake is abandoned.
pub const MAX_TIMEOUTS: u32 = 12;

/// Timeouts after which packetization falls back to the transport's
/// conservative MTU.
const FALLBACK_MTU_AFTER: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Timeout {
    Idle,
    Armed(Instant),
}

/// What to do after a timer expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryAction {
    /// Ask the transport for its fallback MTU and clamp packetization to it.
    pub query_fallback_mtu: bool,
}

/// Per-flight retransmission timer.
#[derive(Debug)]
pub struct RetransmitTimer {
    initial_rto: Duration,
    rto: Duration,
    timeout_count: u32,
    fallback_queried: bool,
    state: Timeout,
}

impl RetransmitTimer {
    pub fn new(initial_rto: Duration) -> Self {
        RetransmitTimer {
            initial_rto,
            rto: initial_rto,
            timeout_count: 0,
            fallback_queried: false,
            state: Timeout::Idle,
        }
    }

    /// Start over for a new flight. Backoff returns to the initial RTO.
    pub fn reset(&mut self) {
        self.rto = self.initial_rto;
        self.timeout_count = 0;
        self.state = Timeout::Idle;
    }

    /// Arm the timer from `now`.
    ///
    /// Re-arming mid-flight recomputes the deadline from `now` with the
    /// current backoff; it does not reset the backoff.
    pub fn arm(&mut self, now: Instant) {
        self.state = Timeout::Armed(now + self.rto);
    }

    /// Stop the timer without touching backoff or counts. Used when a reply
    /// is observed; the flight data stays around in case it is needed again.
    pub fn disarm(&mut self) {
        self.state = Timeout::Idle;
    }

    /// The deadline to wait for, if armed.
    pub fn poll_timeout(&self) -> Option<Instant> {
        match self.state {
            Timeout::Armed(deadline) => Some(deadline),
            Timeout::Idle => None,
        }
    }

    /// Whether the armed deadline has passed.
    pub fn is_expired(&self, now: Instant) -> bool {
        match self.state {
            Timeout::Armed(deadline) => now >= deadline,
            Timeout::Idle => false,
        }
    }

    /// Current backoff duration.
    pub fn rto(&self) -> Duration {
        self.rto
    }

    /// Number of expirations since the flight started.
    pub fn timeout_count(&self) -> u32 {
        self.timeout_count
    }

    /// Account for one expiry: bump the count, abandon past the limit,
    /// double the backoff (capped) and re-arm from `now`.
    ///
    /// The caller resends the whole flight on every `Ok`.
    pub fn on_expiry(&mut self, now: Instant) -> Result<ExpiryAction, Error> {
        self.timeout_count += 1;

        if self.timeout_count > MAX_TIMEOUTS {
            return Err(Error::ReadTimeoutExpired);
        }

        let query_fallback_mtu = self.timeout_count > FALLBACK_MTU_AFTER && !self.fallback_queried;
        if query_fallback_mtu {
            self.fallback_queried = true;
        }

        self.rto = (self.rto * 2).min(MAX_RTO);
        self.arm(now);

        Ok(ExpiryAction { query_fallback_mtu })
    }
}
