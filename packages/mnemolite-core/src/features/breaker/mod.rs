//! Timeout / Breaker Kernel (C12, spec §4.12).
//!
//! One generic deadline wrapper plus one circuit breaker state machine,
//! shared by the Embedding Provider and the Cascade Cache's L2 client.

use mnemolite_storage::error::EngineError;
use mnemolite_storage::Result;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::warn;

/// Runs `fut` under `timeout`, converting elapsed wall time into the
/// `{operation, timeout, elapsed}` triple spec §7 requires on expiry.
pub async fn with_timeout<F, T>(operation: &str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let start = Instant::now();
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::timeout(
            operation,
            timeout.as_millis() as u64,
            start.elapsed().as_millis() as u64,
        )),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => State::Open,
            2 => State::HalfOpen,
            _ => State::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            State::Closed => 0,
            State::Open => 1,
            State::HalfOpen => 2,
        }
    }
}

/// CLOSED → OPEN (failure_count >= threshold within window) → HALF_OPEN
/// (after recovery_timeout) → CLOSED (one success) | OPEN (one failure).
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: AtomicU8,
    failure_count: AtomicU32,
    opened_at: Mutex<Option<Instant>>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            service: service.into(),
            failure_threshold,
            recovery_timeout,
            state: AtomicU8::new(State::Closed.as_u8()),
            failure_count: AtomicU32::new(0),
            opened_at: Mutex::new(None),
        }
    }

    /// Call fails fast with `CircuitOpen` when tripped; otherwise records
    /// the outcome of `fut` and transitions state accordingly.
    pub async fn call<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.admit()?;
        match fut.await {
            Ok(v) => {
                self.on_success();
                Ok(v)
            }
            Err(e) => {
                self.on_failure();
                Err(e)
            }
        }
    }

    fn admit(&self) -> Result<()> {
        match self.current_state() {
            State::Closed | State::HalfOpen => Ok(()),
            State::Open => Err(EngineError::circuit_open(self.service.clone())),
        }
    }

    /// Applies the OPEN -> HALF_OPEN transition once `recovery_timeout` has
    /// elapsed, then returns the (possibly updated) state.
    fn current_state(&self) -> State {
        let state = State::from_u8(self.state.load(Ordering::Acquire));
        if state != State::Open {
            return state;
        }
        let elapsed = (*self.opened_at.lock()).map(|at| at.elapsed());
        if elapsed.is_some_and(|e| e >= self.recovery_timeout) {
            self.state
                .store(State::HalfOpen.as_u8(), Ordering::Release);
            State::HalfOpen
        } else {
            State::Open
        }
    }

    fn on_success(&self) {
        self.failure_count.store(0, Ordering::Release);
        self.state.store(State::Closed.as_u8(), Ordering::Release);
        *self.opened_at.lock() = None;
    }

    fn on_failure(&self) {
        let state = State::from_u8(self.state.load(Ordering::Acquire));
        if state == State::HalfOpen {
            self.trip();
            return;
        }
        let count = self.failure_count.fetch_add(1, Ordering::AcqRel) + 1;
        if count >= self.failure_threshold {
            self.trip();
        }
    }

    fn trip(&self) {
        self.state.store(State::Open.as_u8(), Ordering::Release);
        *self.opened_at.lock() = Some(Instant::now());
        warn!(service = %self.service, "circuit breaker tripped open");
    }

    pub fn is_open(&self) -> bool {
        self.current_state() == State::Open
    }

    pub fn service_name(&self) -> &str {
        &self.service
    }
}

/// Registry surfaced by `Health()` (spec §6) — names any OPEN breaker.
#[derive(Default, Clone)]
pub struct BreakerRegistry {
    breakers: Arc<Mutex<Vec<Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, breaker: Arc<CircuitBreaker>) {
        self.breakers.lock().push(breaker);
    }

    pub fn critical_circuits_open(&self) -> Vec<String> {
        self.breakers
            .lock()
            .iter()
            .filter(|b| b.is_open())
            .map(|b| b.service_name().to_string())
            .collect()
    }
}
