use std::collections::HashMap;
use std::time::Duration;

use fmproxy_common::RateLimitConfig;
use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateState {
    Normal,
    RateLimited,
    Recovering,
}

#[derive(Debug, Clone)]
struct LedgerEntry {
    state: RateState,
    rate_limit_start: Option<Instant>,
    next_retry: Option<Instant>,
    retry_count: u32,
}

impl LedgerEntry {
    fn fresh() -> Self {
        Self {
            state: RateState::Normal,
            rate_limit_start: None,
            next_retry: None,
            retry_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Admission {
    pub allowed: bool,
    pub seconds_until_retry: u64,
}

/// Per-model rate-limit state machine: NORMAL / RATE_LIMITED / RECOVERING
/// with a bounded retry budget and exponential backoff (spec.md §4.6). One
/// mutex over the whole map — the hot path (a map lookup plus a few field
/// writes) is short enough that a single lock beats per-model lock
/// management, matching the note in spec.md §5 that the ledger may use
/// "a single mutex over the whole ledger".
pub struct RateLimitLedger {
    config: RateLimitConfig,
    entries: Mutex<HashMap<String, LedgerEntry>>,
}

impl RateLimitLedger {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True if NORMAL, or if the wait has elapsed and the retry budget
    /// isn't exhausted. Otherwise the model is closed and the caller should
    /// fail fast.
    pub async fn can_retry(&self, model: &str) -> Admission {
        let guard = self.entries.lock().await;
        let Some(entry) = guard.get(model) else {
            return Admission {
                allowed: true,
                seconds_until_retry: 0,
            };
        };
        match entry.state {
            RateState::Normal => Admission {
                allowed: true,
                seconds_until_retry: 0,
            },
            RateState::RateLimited | RateState::Recovering => {
                let now = Instant::now();
                let next_retry = entry.next_retry.unwrap_or(now);
                let ready = now >= next_retry && entry.retry_count <= self.config.max_retries;
                Admission {
                    allowed: ready,
                    seconds_until_retry: next_retry.saturating_duration_since(now).as_secs(),
                }
            }
        }
    }

    /// Records a 429: computes the next-retry instant with exponential
    /// backoff + jitter, honoring `Retry-After` when it yields a smaller
    /// ceiling. Returns the wait duration the pipeline should sleep before
    /// its next attempt, or `None` if the retry budget is already
    /// exhausted (the model is closed).
    pub async fn record_rate_limited(&self, model: &str, retry_after: Option<Duration>) -> Option<Duration> {
        let mut guard = self.entries.lock().await;
        let entry = guard.entry(model.to_string()).or_insert_with(LedgerEntry::fresh);

        if entry.rate_limit_start.is_none() {
            entry.rate_limit_start = Some(Instant::now());
        }
        entry.retry_count += 1;
        entry.state = if entry.state == RateState::Normal {
            RateState::RateLimited
        } else {
            entry.state
        };

        let computed = self.compute_backoff(entry.retry_count);
        let delay = match retry_after {
            Some(hint) if hint < computed => hint,
            _ => computed,
        };
        entry.next_retry = Some(Instant::now() + delay);

        if entry.retry_count > self.config.max_retries {
            None
        } else {
            Some(delay)
        }
    }

    /// Marks the model as RECOVERING: the pipeline has decided to wait and
    /// retry (spec.md §4.6 RATE_LIMITED → RECOVERING transition).
    pub async fn mark_recovering(&self, model: &str) {
        let mut guard = self.entries.lock().await;
        if let Some(entry) = guard.get_mut(model) {
            entry.state = RateState::Recovering;
        }
    }

    /// A successful response clears the rate-limit state entirely.
    pub async fn record_success(&self, model: &str) {
        self.reset(model).await;
    }

    pub async fn reset(&self, model: &str) {
        let mut guard = self.entries.lock().await;
        guard.insert(model.to_string(), LedgerEntry::fresh());
    }

    pub async fn state(&self, model: &str) -> RateState {
        self.entries
            .lock()
            .await
            .get(model)
            .map(|e| e.state)
            .unwrap_or(RateState::Normal)
    }

    fn compute_backoff(&self, retry_count: u32) -> Duration {
        let base = self.config.base_delay_ms as f64;
        let exp = self.config.exponential_base.powi(retry_count as i32);
        let raw_ms = (base * exp).min(self.config.max_delay_ms as f64);
        let jitter_ceiling = raw_ms * self.config.jitter_factor;
        let jitter = if jitter_ceiling > 0.0 {
            rand::rng().random_range(0.0..=jitter_ceiling)
        } else {
            0.0
        };
        let total_ms = (raw_ms + jitter).min(self.config.max_delay_ms as f64);
        Duration::from_millis(total_ms.max(0.0) as u64)
    }
}

/// Parses an HTTP `Retry-After` header: either an integer number of seconds
/// or an HTTP-date.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let when = httpdate::parse_http_date(trimmed).ok()?;
    let now = std::time::SystemTime::now();
    when.duration_since(now).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 1_000,
            exponential_base: 2.0,
            jitter_factor: 0.0,
        }
    }

    #[tokio::test]
    async fn fresh_model_is_admitted() {
        let ledger = RateLimitLedger::new(config());
        let admission = ledger.can_retry("gpt-5-nano").await;
        assert!(admission.allowed);
    }

    #[tokio::test]
    async fn success_resets_to_normal_and_can_retry() {
        let ledger = RateLimitLedger::new(config());
        ledger.record_rate_limited("m", Some(Duration::from_millis(1))).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        ledger.record_success("m").await;
        assert_eq!(ledger.state("m").await, RateState::Normal);
        assert!(ledger.can_retry("m").await.allowed);
    }

    #[tokio::test]
    async fn exhausted_retry_budget_closes_the_model() {
        let ledger = RateLimitLedger::new(config());
        // max_retries = 2: the 3rd consecutive 429 exhausts the budget.
        assert!(ledger.record_rate_limited("m", None).await.is_some());
        assert!(ledger.record_rate_limited("m", None).await.is_some());
        assert!(ledger.record_rate_limited("m", None).await.is_none());

        let admission = ledger.can_retry("m").await;
        assert!(!admission.allowed);
    }

    #[tokio::test]
    async fn retry_after_header_caps_computed_backoff() {
        let ledger = RateLimitLedger::new(RateLimitConfig {
            max_retries: 5,
            base_delay_ms: 10_000,
            max_delay_ms: 60_000,
            exponential_base: 2.0,
            jitter_factor: 0.0,
        });
        let delay = ledger
            .record_rate_limited("m", Some(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(delay, Duration::from_secs(1));
    }

    #[test]
    fn parses_integer_seconds() {
        assert_eq!(parse_retry_after("2"), Some(Duration::from_secs(2)));
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_retry_after("not-a-date"), None);
    }
}
