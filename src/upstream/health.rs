use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Health state of a single upstream server (spec §3 "Upstream
/// server"). Each server gets its own small struct behind independent
/// atomics/a single lock, rather than one global lock across all
/// servers (spec §9: "avoid one global lock across all servers"),
/// grounded on the teacher's per-server `ServerHealth` in `resolver.rs`.
#[derive(Debug)]
pub struct ServerHealth {
    pub address: SocketAddr,
    consecutive_failures: AtomicU32,
    state: Mutex<HealthState>,
    last_success_at: Mutex<Option<Instant>>,
    ewma_rtt_micros: AtomicU64,
    unhealthy_threshold: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

impl ServerHealth {
    pub fn new(address: SocketAddr, unhealthy_threshold: u32) -> Self {
        Self {
            address,
            consecutive_failures: AtomicU32::new(0),
            state: Mutex::new(HealthState::Healthy),
            last_success_at: Mutex::new(None),
            ewma_rtt_micros: AtomicU64::new(0),
            unhealthy_threshold,
        }
    }

    pub fn state(&self) -> HealthState {
        *self.state.lock()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn ewma_rtt(&self) -> Duration {
        Duration::from_micros(self.ewma_rtt_micros.load(Ordering::Relaxed))
    }

    /// Resets `consecutive_failures`, updates the EWMA rtt, and
    /// transitions back to `healthy` on first success (spec §4.C
    /// "Health: Success").
    pub fn record_success(&self, rtt: Duration) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        *self.last_success_at.lock() = Some(Instant::now());
        *self.state.lock() = HealthState::Healthy;

        let sample = rtt.as_micros() as u64;
        let prev = self.ewma_rtt_micros.load(Ordering::Relaxed);
        let next = if prev == 0 {
            sample
        } else {
            // alpha = 0.2, more weight to history for a smoother signal.
            ((prev as f64) * 0.8 + (sample as f64) * 0.2) as u64
        };
        self.ewma_rtt_micros.store(next, Ordering::Relaxed);
    }

    /// Increments `consecutive_failures`; transitions to `unhealthy`
    /// once it reaches the configured threshold, `degraded` below that
    /// (spec §4.C "Health: Failure").
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        let mut state = self.state.lock();
        *state = if failures >= self.unhealthy_threshold {
            HealthState::Unhealthy
        } else {
            HealthState::Degraded
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "8.8.8.8:53".parse().unwrap()
    }

    #[test]
    fn becomes_unhealthy_after_threshold_failures() {
        let health = ServerHealth::new(addr(), 3);
        health.record_failure();
        assert_eq!(health.state(), HealthState::Degraded);
        health.record_failure();
        assert_eq!(health.state(), HealthState::Degraded);
        health.record_failure();
        assert_eq!(health.state(), HealthState::Unhealthy);
    }

    #[test]
    fn recovers_to_healthy_on_first_success() {
        let health = ServerHealth::new(addr(), 1);
        health.record_failure();
        assert_eq!(health.state(), HealthState::Unhealthy);
        health.record_success(Duration::from_millis(20));
        assert_eq!(health.state(), HealthState::Healthy);
        assert_eq!(health.consecutive_failures(), 0);
    }
}
