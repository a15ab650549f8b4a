//! Circuit breaker — three-state guard over a fallible remote operation.
//!
//! CLOSED passes everything and counts consecutive failures. At the
//! threshold the breaker OPENs and denies requests until `open_timeout_ms`
//! has elapsed, then HALF_OPEN admits exactly one probe. The probe's
//! outcome decides: success → CLOSED, failure or probe timeout → OPEN.
//!
//! Callers in HALF_OPEN must bypass their own backoff and probe
//! immediately; the breaker cannot see a probe that is never attempted.

/// Breaker position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// Immutable per-instance tuning.
#[derive(Debug, Clone, Copy)]
pub struct BreakerConfig {
    /// Consecutive failures in CLOSED before opening.
    pub failure_threshold: u32,
    /// Deny window after opening [ms].
    pub open_timeout_ms: u64,
    /// Max wait for the HALF_OPEN probe's outcome [ms].
    pub probe_timeout_ms: u64,
}

impl BreakerConfig {
    /// Link layer (network association).
    pub const LINK: Self = Self {
        failure_threshold: 10,
        open_timeout_ms: 60_000,
        probe_timeout_ms: 15_000,
    };

    /// Transport layer (broker connection and publishes).
    pub const TRANSPORT: Self = Self {
        failure_threshold: 5,
        open_timeout_ms: 30_000,
        probe_timeout_ms: 10_000,
    };

    /// Out-of-band processing endpoint.
    pub const PROCESSING: Self = Self {
        failure_threshold: 3,
        open_timeout_ms: 60_000,
        probe_timeout_ms: 10_000,
    };
}

/// One breaker instance. All transitions take `now_ms` explicitly.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: BreakerConfig,
    state: BreakerState,
    failure_count: u32,
    last_failure_ms: Option<u64>,
    state_entered_ms: u64,
    probe_in_flight: bool,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            state: BreakerState::Closed,
            failure_count: 0,
            last_failure_ms: None,
            state_entered_ms: 0,
            probe_in_flight: false,
        }
    }

    pub fn state(&self) -> BreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    pub fn last_failure_ms(&self) -> Option<u64> {
        self.last_failure_ms
    }

    /// Consult before every outbound attempt.
    pub fn allow_request(&mut self, now_ms: u64) -> bool {
        match self.state {
            BreakerState::Closed => true,
            BreakerState::Open => {
                if now_ms.saturating_sub(self.state_entered_ms) >= self.config.open_timeout_ms {
                    self.enter(BreakerState::HalfOpen, now_ms);
                    self.probe_in_flight = true;
                    true
                } else {
                    false
                }
            }
            BreakerState::HalfOpen => {
                if self.probe_in_flight {
                    // A probe is out. Time it out if the caller never
                    // reported a result.
                    if now_ms.saturating_sub(self.state_entered_ms)
                        >= self.config.probe_timeout_ms
                    {
                        self.enter(BreakerState::Open, now_ms);
                    }
                    false
                } else {
                    self.probe_in_flight = true;
                    true
                }
            }
        }
    }

    /// Report a successful operation.
    pub fn record_success(&mut self, now_ms: u64) {
        match self.state {
            BreakerState::Closed => self.failure_count = 0,
            BreakerState::HalfOpen => {
                self.enter(BreakerState::Closed, now_ms);
                self.failure_count = 0;
            }
            // Stale result from before the open; the deny window stands.
            BreakerState::Open => {}
        }
    }

    /// Report a failed operation.
    pub fn record_failure(&mut self, now_ms: u64) {
        self.last_failure_ms = Some(now_ms);
        match self.state {
            BreakerState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= self.config.failure_threshold {
                    self.enter(BreakerState::Open, now_ms);
                }
            }
            BreakerState::HalfOpen => {
                self.enter(BreakerState::Open, now_ms);
            }
            BreakerState::Open => {}
        }
    }

    /// Whether the next allowed request is a HALF_OPEN probe (callers
    /// bypass backoff for it).
    pub fn probing(&self) -> bool {
        self.state == BreakerState::HalfOpen
    }

    fn enter(&mut self, state: BreakerState, now_ms: u64) {
        self.state = state;
        self.state_entered_ms = now_ms;
        self.probe_in_flight = false;
    }
}
