use crate::config::BreakerConfig;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Health state of a single call target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected without contacting the target.
    Open,
    /// Cooldown elapsed; a single trial call may go through.
    HalfOpen,
}

/// State change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTransition {
    /// The breaker stayed in its state.
    Unchanged,
    /// Closed or HalfOpen → Open.
    Opened,
    /// HalfOpen → Closed after a successful trial.
    Closed,
}

#[derive(Debug)]
struct BreakerInner {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
    /// Bumped on every entry into HalfOpen.
    trial_epoch: u64,
}

/// Per-target circuit breaker.
///
/// Closed → Open after `failure_threshold` consecutive failures.
/// Open → HalfOpen once `cooldown` has elapsed since `opened_at`.
/// HalfOpen admits one trial: success closes the breaker, failure reopens
/// it with a fresh `opened_at`.
///
/// Every method has an `_at` variant taking the current instant so tests
/// can drive the clock.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    failure_threshold: u32,
    cooldown: Duration,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a closed breaker. A threshold of zero is treated as one.
    pub fn new(target: impl Into<String>, failure_threshold: u32, cooldown: Duration) -> Self {
        Self {
            target: target.into(),
            failure_threshold: failure_threshold.max(1),
            cooldown,
            inner: Mutex::new(BreakerInner {
                state: BreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trial_in_flight: false,
                trial_epoch: 0,
            }),
        }
    }

    /// Create a closed breaker with the shared policy.
    pub fn from_config(target: impl Into<String>, config: &BreakerConfig) -> Self {
        Self::new(target, config.failure_threshold, config.cooldown())
    }

    /// The target this breaker guards.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Consecutive failures that open the breaker.
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// How long the breaker stays Open before admitting a trial.
    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Whether a call may proceed. A `true` answer while half-open reserves
    /// the single trial slot for the caller.
    pub fn allow(&self) -> bool {
        self.allow_at(Instant::now())
    }

    /// [`allow`](Self::allow) at an explicit instant.
    pub fn allow_at(&self, now: Instant) -> bool {
        self.admit_at(now).is_some()
    }

    /// Admit a call and hand out a permit that records its outcome.
    ///
    /// Dropping the permit without recording anything (the call future was
    /// cancelled or panicked) frees a reserved half-open trial slot, so the
    /// next call can run the trial instead.
    pub fn try_acquire(self: &Arc<Self>) -> Option<BreakerPermit> {
        self.try_acquire_at(Instant::now())
    }

    /// [`try_acquire`](Self::try_acquire) at an explicit instant.
    pub fn try_acquire_at(self: &Arc<Self>, now: Instant) -> Option<BreakerPermit> {
        let trial = self.admit_at(now)?;
        Some(BreakerPermit {
            breaker: Arc::clone(self),
            trial,
            settled: false,
        })
    }

    /// `Some(trial_epoch)` if a call may proceed; the epoch is set when the
    /// call is the half-open trial.
    fn admit_at(&self, now: Instant) -> Option<Option<u64>> {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        match inner.state {
            BreakerState::Closed => Some(None),
            BreakerState::Open => None,
            BreakerState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Some(inner.trial_epoch))
                }
            }
        }
    }

    /// Give back a reserved trial slot without an outcome. A slot from an
    /// earlier half-open period is left alone.
    fn abandon_trial(&self, epoch: u64) {
        let mut inner = self.inner.lock();
        if inner.state == BreakerState::HalfOpen
            && inner.trial_in_flight
            && inner.trial_epoch == epoch
        {
            inner.trial_in_flight = false;
            debug!(target_id = %self.target, "Half-open trial abandoned, slot released");
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) -> BreakerTransition {
        let mut inner = self.inner.lock();
        match inner.state {
            BreakerState::Closed => {
                inner.consecutive_failures = 0;
                BreakerTransition::Unchanged
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Closed;
                inner.consecutive_failures = 0;
                inner.opened_at = None;
                inner.trial_in_flight = false;
                info!(target_id = %self.target, "Circuit breaker closed after successful trial");
                BreakerTransition::Closed
            }
            // A call admitted before the breaker opened finished late.
            BreakerState::Open => BreakerTransition::Unchanged,
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) -> BreakerTransition {
        self.record_failure_at(Instant::now())
    }

    /// [`record_failure`](Self::record_failure) at an explicit instant.
    pub fn record_failure_at(&self, now: Instant) -> BreakerTransition {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            BreakerState::Closed if inner.consecutive_failures >= self.failure_threshold => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                warn!(
                    target_id = %self.target,
                    failures = inner.consecutive_failures,
                    "Circuit breaker opened"
                );
                BreakerTransition::Opened
            }
            BreakerState::HalfOpen => {
                inner.state = BreakerState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!(target_id = %self.target, "Half-open trial failed, circuit breaker reopened");
                BreakerTransition::Opened
            }
            _ => BreakerTransition::Unchanged,
        }
    }

    /// Current state, promoting Open to HalfOpen if the cooldown elapsed.
    pub fn state(&self) -> BreakerState {
        self.state_at(Instant::now())
    }

    /// [`state`](Self::state) at an explicit instant.
    pub fn state_at(&self, now: Instant) -> BreakerState {
        let mut inner = self.inner.lock();
        self.refresh(&mut inner, now);
        inner.state
    }

    /// Open and still cooling down. Does not reserve a trial.
    pub fn is_open_at(&self, now: Instant) -> bool {
        self.state_at(now) == BreakerState::Open
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().consecutive_failures
    }

    /// When the breaker last opened, if it is not Closed.
    pub fn opened_at(&self) -> Option<Instant> {
        self.inner.lock().opened_at
    }

    /// Operator action: force the breaker back to Closed.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.state = BreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
        inner.trial_in_flight = false;
    }

    fn refresh(&self, inner: &mut BreakerInner, now: Instant) {
        if inner.state != BreakerState::Open {
            return;
        }
        let elapsed = inner
            .opened_at
            .map(|opened| now.saturating_duration_since(opened) >= self.cooldown)
            .unwrap_or(true);
        if elapsed {
            inner.state = BreakerState::HalfOpen;
            inner.trial_in_flight = false;
            inner.trial_epoch = inner.trial_epoch.wrapping_add(1);
        }
    }
}

/// An admitted call. Record exactly one outcome on it.
#[derive(Debug)]
pub struct BreakerPermit {
    breaker: Arc<CircuitBreaker>,
    trial: Option<u64>,
    settled: bool,
}

impl BreakerPermit {
    /// Whether this call is the half-open trial.
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// The breaker that admitted the call.
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Record a successful call.
    pub fn record_success(mut self) -> BreakerTransition {
        self.settled = true;
        self.breaker.record_success()
    }

    /// Record a failed call.
    pub fn record_failure(mut self) -> BreakerTransition {
        self.settled = true;
        self.breaker.record_failure()
    }
}

impl Drop for BreakerPermit {
    fn drop(&mut self) {
        if let (Some(epoch), false) = (self.trial, self.settled) {
            self.breaker.abandon_trial(epoch);
        }
    }
}

/// One breaker per call target, created on first use and shared by every
/// concurrent call that selects the same target.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    /// Create an empty registry; breakers use `config`.
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Get the breaker for `target`, creating it if needed.
    pub fn get(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.read().get(target) {
            return existing.clone();
        }
        self.breakers
            .write()
            .entry(target.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::from_config(target, &self.config)))
            .clone()
    }

    /// Open and still cooling down. Unknown targets are closed.
    pub fn is_open(&self, target: &str) -> bool {
        self.breakers
            .read()
            .get(target)
            .map(|b| b.is_open_at(Instant::now()))
            .unwrap_or(false)
    }

    /// Current state of every known breaker, sorted by target.
    pub fn snapshot(&self) -> Vec<(String, BreakerState)> {
        let mut states: Vec<(String, BreakerState)> = self
            .breakers
            .read()
            .iter()
            .map(|(id, b)| (id.clone(), b.state()))
            .collect();
        states.sort_by(|a, b| a.0.cmp(&b.0));
        states
    }

    /// Operator action: close every breaker.
    pub fn reset_all(&self) {
        for breaker in self.breakers.read().values() {
            breaker.reset();
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new("claude-opus", 3, Duration::from_secs(30))
    }

    #[test]
    fn test_opens_after_threshold() {
        let b = breaker();
        let now = Instant::now();
        assert_eq!(b.record_failure_at(now), BreakerTransition::Unchanged);
        assert_eq!(b.record_failure_at(now), BreakerTransition::Unchanged);
        assert!(b.allow_at(now));
        assert_eq!(b.record_failure_at(now), BreakerTransition::Opened);
        assert!(!b.allow_at(now));
        assert_eq!(b.state_at(now), BreakerState::Open);
        assert_eq!(b.opened_at(), Some(now));
    }

    #[test]
    fn test_success_resets_counter_when_closed() {
        let b = breaker();
        b.record_failure();
        b.record_failure();
        assert_eq!(b.record_success(), BreakerTransition::Unchanged);
        assert_eq!(b.consecutive_failures(), 0);
        b.record_failure();
        assert_eq!(b.state(), BreakerState::Closed);
    }

    #[test]
    fn test_half_open_allows_exactly_one_trial() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let before = t0 + Duration::from_secs(29);
        assert!(!b.allow_at(before));

        let after = t0 + Duration::from_secs(30);
        assert_eq!(b.state_at(after), BreakerState::HalfOpen);
        assert!(b.allow_at(after));
        assert!(!b.allow_at(after));
        assert!(!b.allow_at(after + Duration::from_secs(1)));
    }

    #[test]
    fn test_failed_trial_reopens_with_new_timestamp() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let t1 = t0 + Duration::from_secs(31);
        assert!(b.allow_at(t1));
        assert_eq!(b.record_failure_at(t1), BreakerTransition::Opened);
        assert_eq!(b.opened_at(), Some(t1));
        assert!(!b.allow_at(t1 + Duration::from_secs(10)));
        assert!(b.allow_at(t1 + Duration::from_secs(30)));
    }

    #[test]
    fn test_successful_trial_closes() {
        let b = breaker();
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let t1 = t0 + Duration::from_secs(30);
        assert!(b.allow_at(t1));
        assert_eq!(b.record_success(), BreakerTransition::Closed);
        assert_eq!(b.state_at(t1), BreakerState::Closed);
        assert_eq!(b.consecutive_failures(), 0);
        assert!(b.allow_at(t1));
        assert!(b.allow_at(t1));
    }

    #[test]
    fn test_reset() {
        let b = breaker();
        for _ in 0..3 {
            b.record_failure();
        }
        assert!(!b.allow());
        b.reset();
        assert!(b.allow());
        assert_eq!(b.consecutive_failures(), 0);
    }

    #[test]
    fn test_dropped_trial_permit_frees_the_slot() {
        let b = Arc::new(breaker());
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let t1 = t0 + Duration::from_secs(30);

        let permit = b.try_acquire_at(t1).unwrap();
        assert!(permit.is_trial());
        assert!(b.try_acquire_at(t1).is_none());

        drop(permit);
        assert_eq!(b.state_at(t1), BreakerState::HalfOpen);
        let retry = b.try_acquire_at(t1).unwrap();
        assert!(retry.is_trial());
        assert_eq!(retry.record_success(), BreakerTransition::Closed);
        assert_eq!(b.state_at(t1), BreakerState::Closed);
    }

    #[test]
    fn test_stale_trial_permit_does_not_free_a_newer_trial() {
        let b = Arc::new(breaker());
        let t0 = Instant::now();
        for _ in 0..3 {
            b.record_failure_at(t0);
        }
        let t1 = t0 + Duration::from_secs(30);
        let stale = b.try_acquire_at(t1).unwrap();

        // another caller fails a trial of its own; the breaker reopens, cools
        // down and hands the next trial out
        b.record_failure_at(t1);
        let t2 = t1 + Duration::from_secs(30);
        let current = b.try_acquire_at(t2).unwrap();
        assert!(current.is_trial());

        drop(stale);
        assert!(b.try_acquire_at(t2).is_none());
        drop(current);
        assert!(b.try_acquire_at(t2).is_some());
    }

    #[test]
    fn test_settled_permit_keeps_its_outcome() {
        let b = Arc::new(CircuitBreaker::new("gpt-4o", 1, Duration::from_secs(30)));
        let permit = b.try_acquire().unwrap();
        assert!(!permit.is_trial());
        assert_eq!(permit.record_failure(), BreakerTransition::Opened);
        assert_eq!(b.state(), BreakerState::Open);
        assert!(b.try_acquire().is_none());
    }

    #[test]
    fn test_registry_shares_breakers() {
        let registry = BreakerRegistry::new(BreakerConfig {
            failure_threshold: 1,
            cooldown_ms: 60_000,
        });
        registry.get("a").record_failure();
        assert!(registry.is_open("a"));
        assert!(!registry.is_open("b"));
        assert!(Arc::ptr_eq(&registry.get("a"), &registry.get("a")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot, vec![("a".to_string(), BreakerState::Open)]);

        registry.reset_all();
        assert!(!registry.is_open("a"));
    }
}
