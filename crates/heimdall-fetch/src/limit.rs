//! Per-host admission control: a concurrency cap plus a token bucket.
//!
//! State is created lazily per host with the limits configured at client
//! construction. Waiting for admission is a suspension point; callers bound
//! it with their request deadline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

use crate::error::{FetchError, Result};

// ─── Limits ──────────────────────────────────────────────────────────────────

/// Admission limits applied to one upstream host.
#[derive(Debug, Clone, Copy)]
pub struct HostLimits {
  /// Maximum in-flight requests to the host.
  pub max_concurrency: usize,
  /// Steady-state requests per second.
  pub rate_per_sec:    f64,
  /// Bucket capacity — how many requests may burst after an idle period.
  pub burst:           f64,
}

impl Default for HostLimits {
  fn default() -> Self {
    Self { max_concurrency: 4, rate_per_sec: 2.0, burst: 4.0 }
  }
}

// ─── Token bucket ────────────────────────────────────────────────────────────

struct TokenBucket {
  tokens:      f64,
  last_refill: Instant,
  rate:        f64,
  burst:       f64,
}

impl TokenBucket {
  fn new(rate: f64, burst: f64) -> Self {
    Self { tokens: burst, last_refill: Instant::now(), rate, burst }
  }

  /// Take a token if available, otherwise report how long until one is.
  fn try_take(&mut self, now: Instant) -> Option<Duration> {
    let elapsed = now.duration_since(self.last_refill).as_secs_f64();
    self.tokens = (self.tokens + elapsed * self.rate).min(self.burst);
    self.last_refill = now;

    if self.tokens >= 1.0 {
      self.tokens -= 1.0;
      None
    } else {
      let deficit = 1.0 - self.tokens;
      Some(Duration::from_secs_f64(deficit / self.rate))
    }
  }
}

// ─── Gate ────────────────────────────────────────────────────────────────────

struct HostState {
  semaphore: Arc<Semaphore>,
  bucket:    Mutex<TokenBucket>,
}

/// Lazily-populated per-host admission state.
pub(crate) struct RateGate {
  defaults:  HostLimits,
  overrides: HashMap<String, HostLimits>,
  hosts:     Mutex<HashMap<String, Arc<HostState>>>,
}

impl RateGate {
  pub fn new(defaults: HostLimits, overrides: HashMap<String, HostLimits>) -> Self {
    Self { defaults, overrides, hosts: Mutex::new(HashMap::new()) }
  }

  fn state_for(&self, host: &str) -> Arc<HostState> {
    let mut hosts = self.hosts.lock().expect("rate gate lock poisoned");
    if let Some(state) = hosts.get(host) {
      return state.clone();
    }

    let limits = self.overrides.get(host).copied().unwrap_or(self.defaults);
    let state = Arc::new(HostState {
      semaphore: Arc::new(Semaphore::new(limits.max_concurrency.max(1))),
      bucket:    Mutex::new(TokenBucket::new(
        limits.rate_per_sec.max(f64::MIN_POSITIVE),
        limits.burst.max(1.0),
      )),
    });
    hosts.insert(host.to_owned(), state.clone());
    state
  }

  /// Wait for a token and a free slot. The returned permit releases the slot
  /// on drop; tokens are not returned.
  pub async fn admit(&self, host: &str) -> Result<OwnedSemaphorePermit> {
    let state = self.state_for(host);

    loop {
      let wait = {
        let mut bucket = state.bucket.lock().expect("token bucket lock poisoned");
        bucket.try_take(Instant::now())
      };
      match wait {
        None => break,
        Some(delay) => tokio::time::sleep(delay).await,
      }
    }

    state
      .semaphore
      .clone()
      .acquire_owned()
      .await
      .map_err(|_| FetchError::Cancelled)
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn bucket_bursts_then_throttles() {
    let mut bucket = TokenBucket::new(1.0, 2.0);
    let now = Instant::now();

    assert!(bucket.try_take(now).is_none());
    assert!(bucket.try_take(now).is_none());

    let wait = bucket.try_take(now).expect("bucket should be empty");
    assert!(wait > Duration::from_millis(900) && wait <= Duration::from_secs(1));
  }

  #[test]
  fn bucket_refills_over_time() {
    let mut bucket = TokenBucket::new(2.0, 2.0);
    let start = Instant::now();

    assert!(bucket.try_take(start).is_none());
    assert!(bucket.try_take(start).is_none());
    assert!(bucket.try_take(start).is_some());

    // Half a second at 2 tokens/sec refills one token.
    assert!(bucket.try_take(start + Duration::from_millis(600)).is_none());
  }

  #[tokio::test]
  async fn concurrency_cap_is_enforced() {
    let gate = RateGate::new(
      HostLimits { max_concurrency: 1, rate_per_sec: 1_000.0, burst: 1_000.0 },
      HashMap::new(),
    );

    let first = gate.admit("example.com").await.unwrap();
    let second = tokio::time::timeout(
      Duration::from_millis(20),
      gate.admit("example.com"),
    )
    .await;
    assert!(second.is_err(), "second admission should block on the cap");

    drop(first);
    gate.admit("example.com").await.unwrap();
  }

  #[tokio::test]
  async fn hosts_are_limited_independently() {
    let gate = RateGate::new(
      HostLimits { max_concurrency: 1, rate_per_sec: 1_000.0, burst: 1_000.0 },
      HashMap::new(),
    );

    let _a = gate.admit("a.example.com").await.unwrap();
    // Different host, unaffected by a.example.com's in-flight request.
    gate.admit("b.example.com").await.unwrap();
  }
}
