//! Exercises `RateLimitLedger` from outside the crate, the way
//! `gproxy-provider-core/tests/credential_pool.rs` tests its pool as a black
//! box rather than only through inline `#[cfg(test)]` modules.

use std::time::Duration;

use fmproxy_common::RateLimitConfig;
use fmproxy_core::ledger::RateLimitLedger;
use fmproxy_core::RateState;

fn config(max_retries: u32) -> RateLimitConfig {
    RateLimitConfig {
        max_retries,
        base_delay_ms: 5,
        max_delay_ms: 200,
        exponential_base: 2.0,
        jitter_factor: 0.0,
    }
}

#[tokio::test]
async fn two_consecutive_rate_limits_then_a_success_returns_to_normal() {
    let ledger = RateLimitLedger::new(config(3));

    let first = ledger.record_rate_limited("gpt-5-nano", Some(Duration::from_millis(1))).await;
    assert!(first.is_some());
    ledger.mark_recovering("gpt-5-nano").await;
    assert_eq!(ledger.state("gpt-5-nano").await, RateState::Recovering);

    let second = ledger.record_rate_limited("gpt-5-nano", Some(Duration::from_millis(1))).await;
    assert!(second.is_some());

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(ledger.can_retry("gpt-5-nano").await.allowed);

    ledger.record_success("gpt-5-nano").await;
    assert_eq!(ledger.state("gpt-5-nano").await, RateState::Normal);
    assert!(ledger.can_retry("gpt-5-nano").await.allowed);
}

#[tokio::test]
async fn zero_max_retries_closes_the_model_on_the_first_429() {
    // A large base delay so the computed backoff ceiling is well above the
    // Retry-After hint, letting the hint's smaller value win per spec.md
    // §4.6 ("honor Retry-After ... when smaller than the computed ceiling").
    let ledger = RateLimitLedger::new(RateLimitConfig {
        max_retries: 0,
        base_delay_ms: 10_000,
        max_delay_ms: 60_000,
        exponential_base: 2.0,
        jitter_factor: 0.0,
    });

    let delay = ledger.record_rate_limited("claude-3-5-sonnet", Some(Duration::from_secs(3))).await;
    assert!(delay.is_none(), "retry_count(1) > max_retries(0) must close the model");

    let admission = ledger.can_retry("claude-3-5-sonnet").await;
    assert!(!admission.allowed);
    assert_eq!(admission.seconds_until_retry, 3);
}

#[tokio::test]
async fn backoff_grows_exponentially_across_retries_without_a_retry_after_hint() {
    let ledger = RateLimitLedger::new(config(5));

    let first = ledger.record_rate_limited("m", None).await.unwrap();
    let second = ledger.record_rate_limited("m", None).await.unwrap();
    assert!(second >= first, "second backoff ({second:?}) should be >= first ({first:?})");
}

#[tokio::test]
async fn reset_clears_retry_count_and_readmits_immediately() {
    let ledger = RateLimitLedger::new(config(1));

    ledger.record_rate_limited("m", None).await;
    ledger.record_rate_limited("m", None).await;
    assert!(!ledger.can_retry("m").await.allowed);

    ledger.reset("m").await;
    assert_eq!(ledger.state("m").await, RateState::Normal);
    assert!(ledger.can_retry("m").await.allowed);
}

#[tokio::test]
async fn unrelated_models_do_not_share_rate_limit_state() {
    let ledger = RateLimitLedger::new(config(0));

    ledger.record_rate_limited("gpt-5-nano", None).await;
    assert!(!ledger.can_retry("gpt-5-nano").await.allowed);
    assert!(ledger.can_retry("claude-3-5-sonnet").await.allowed);
}
