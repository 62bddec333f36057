//! Process-wide circuit breaker for the execution pipeline.
//!
//! The teacher tracked agent health per-backend in a SQLite table; this is
//! deliberately a single pipeline-wide state machine instead, per the
//! state table the pipeline is required to obey (closed/open/half_open
//! with independent failure/success counters and a cooldown).

use chrono::Utc;
use shared_types::{CircuitBreakerConfig, CircuitBreakerState, CircuitState};
use std::sync::Mutex;

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<CircuitBreakerState>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        CircuitBreaker {
            config,
            state: Mutex::new(CircuitBreakerState::default()),
        }
    }

    /// Current externally-visible state, first applying the open -> half_open
    /// transition if the cooldown has elapsed.
    pub fn snapshot(&self) -> CircuitBreakerState {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        self.maybe_half_open(&mut state);
        state.clone()
    }

    pub fn is_open(&self) -> bool {
        matches!(self.snapshot().state, CircuitState::Open)
    }

    fn maybe_half_open(&self, state: &mut CircuitBreakerState) {
        if state.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = state.opened_at else {
            return;
        };
        let elapsed = Utc::now().signed_duration_since(opened_at);
        if elapsed.num_seconds() >= self.config.cooldown_secs as i64 {
            state.state = CircuitState::HalfOpen;
            state.success_count = 0;
        }
    }

    /// Records a successful execution, applying the table in the module
    /// doc: closed decrements failures; half_open accumulates successes
    /// until it closes.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        self.maybe_half_open(&mut state);
        match state.state {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    state.state = CircuitState::Closed;
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.opened_at = None;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Records a failed execution. Returns `true` if this call opened (or
    /// re-opened) the breaker, so callers can emit a `circuit_open` event.
    pub fn record_failure(&self) -> bool {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        self.maybe_half_open(&mut state);
        match state.state {
            CircuitState::Closed => {
                state.failure_count += 1;
                if state.failure_count >= self.config.failure_threshold {
                    state.state = CircuitState::Open;
                    state.opened_at = Some(Utc::now());
                    return true;
                }
                false
            }
            CircuitState::HalfOpen => {
                state.state = CircuitState::Open;
                state.opened_at = Some(Utc::now());
                state.success_count = 0;
                true
            }
            CircuitState::Open => false,
        }
    }

    /// Explicit operator override, only meaningful in AUTO mode per the
    /// pipeline's policy; resets to closed regardless of current state.
    pub fn force_reset(&self) {
        let mut state = self.state.lock().expect("circuit breaker mutex poisoned");
        *state = CircuitBreakerState::default();
    }
}
