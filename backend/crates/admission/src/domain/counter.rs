//! Counter State and Admission Algorithms
//!
//! Each algorithm is a pure function of (stored state, now, rule) to
//! (new state, outcome). The counter store runs it inside a single atomic
//! read-modify-write per key, so two racing checks can never both observe
//! the same free slot.

use serde::{Deserialize, Serialize};

use crate::domain::rule::{Algorithm, EffectiveRule};

/// Stored state for one (rule, key) counter, variant by algorithm
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CounterState {
    SlidingWindow { timestamps: Vec<i64> },
    TokenBucket { tokens: f64, last_refill_ms: i64 },
    LeakyBucket { level: f64, last_leak_ms: i64 },
    FixedWindow { count: u64, window_start_ms: i64 },
}

/// Outcome of evaluating one rule against one counter key
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCheckOutcome {
    pub allowed: bool,
    pub current: u64,
    pub limit: u64,
    pub retry_after_secs: Option<u64>,
    pub window_remaining_secs: u64,
}

/// Stored counters outlive their window by this factor before eviction
const TTL_SAFETY_MULTIPLE: i64 = 2;

/// Expiry to store alongside a counter written at `now_ms`
pub fn expiry_for(rule: &EffectiveRule, now_ms: i64) -> i64 {
    now_ms + rule.window_ms.max(1_000) * TTL_SAFETY_MULTIPLE
}

fn ms_to_secs_ceil(ms: i64) -> u64 {
    (ms.max(0) as u64).div_ceil(1_000)
}

/// Evaluate `rule` against the stored `state` at `now_ms`
///
/// Stored state of a different variant (the rule's algorithm changed under
/// the same key) or already past its expiry reads as empty.
pub fn check(
    state: Option<CounterState>,
    rule: &EffectiveRule,
    now_ms: i64,
) -> (CounterState, RuleCheckOutcome) {
    match &rule.algorithm {
        Algorithm::SlidingWindow => {
            let timestamps = match state {
                Some(CounterState::SlidingWindow { timestamps }) => timestamps,
                _ => Vec::new(),
            };
            sliding_window(timestamps, rule, now_ms)
        }
        Algorithm::TokenBucket { .. } => {
            let prev = match state {
                Some(CounterState::TokenBucket {
                    tokens,
                    last_refill_ms,
                }) => Some((tokens, last_refill_ms)),
                _ => None,
            };
            token_bucket(prev, rule, now_ms)
        }
        Algorithm::LeakyBucket { .. } => {
            let prev = match state {
                Some(CounterState::LeakyBucket {
                    level,
                    last_leak_ms,
                }) => Some((level, last_leak_ms)),
                _ => None,
            };
            leaky_bucket(prev, rule, now_ms)
        }
        Algorithm::FixedWindow => {
            let prev = match state {
                Some(CounterState::FixedWindow {
                    count,
                    window_start_ms,
                }) => Some((count, window_start_ms)),
                _ => None,
            };
            fixed_window(prev, rule, now_ms)
        }
    }
}

fn sliding_window(
    timestamps: Vec<i64>,
    rule: &EffectiveRule,
    now_ms: i64,
) -> (CounterState, RuleCheckOutcome) {
    let window_start = now_ms - rule.window_ms;
    let mut kept: Vec<i64> = timestamps
        .into_iter()
        .filter(|&t| t > window_start && t <= now_ms + rule.window_ms)
        .collect();
    kept.sort_unstable();

    let current = kept.len() as u64;
    let outcome = if rule.limit > 0 && current < rule.limit {
        kept.push(now_ms);
        RuleCheckOutcome {
            allowed: true,
            current: current + 1,
            limit: rule.limit,
            retry_after_secs: None,
            window_remaining_secs: rule.window_secs(),
        }
    } else {
        // Room frees when the oldest kept entry leaves the window
        let retry_ms = kept
            .first()
            .map(|&oldest| oldest + rule.window_ms - now_ms)
            .unwrap_or(rule.window_ms);
        let retry_secs = ms_to_secs_ceil(retry_ms).max(1);
        RuleCheckOutcome {
            allowed: false,
            current,
            limit: rule.limit,
            retry_after_secs: Some(retry_secs),
            window_remaining_secs: retry_secs,
        }
    };

    (CounterState::SlidingWindow { timestamps: kept }, outcome)
}

fn token_bucket(
    prev: Option<(f64, i64)>,
    rule: &EffectiveRule,
    now_ms: i64,
) -> (CounterState, RuleCheckOutcome) {
    let capacity = rule.capacity().max(0.0);
    let refill = rule.refill_per_sec();
    let (stored_tokens, last_ms) = prev.unwrap_or((capacity, now_ms));

    let elapsed_secs = (now_ms - last_ms).max(0) as f64 / 1_000.0;
    let mut tokens = (stored_tokens.clamp(0.0, capacity) + elapsed_secs * refill).clamp(0.0, capacity);

    let consumed = |tokens: f64| (capacity - tokens).round().max(0.0) as u64;

    let outcome = if rule.limit > 0 && tokens >= 1.0 {
        tokens -= 1.0;
        RuleCheckOutcome {
            allowed: true,
            current: consumed(tokens),
            limit: rule.limit,
            retry_after_secs: None,
            window_remaining_secs: secs_until_refilled(capacity, tokens, refill, rule),
        }
    } else {
        let retry_secs = if rule.limit == 0 || refill <= 0.0 {
            rule.window_secs()
        } else {
            ((1.0 - tokens) / refill).ceil().max(1.0) as u64
        };
        RuleCheckOutcome {
            allowed: false,
            current: consumed(tokens),
            limit: rule.limit,
            retry_after_secs: Some(retry_secs.max(1)),
            window_remaining_secs: retry_secs.max(1),
        }
    };

    (
        CounterState::TokenBucket {
            tokens,
            last_refill_ms: now_ms,
        },
        outcome,
    )
}

fn secs_until_refilled(capacity: f64, tokens: f64, refill: f64, rule: &EffectiveRule) -> u64 {
    if refill <= 0.0 {
        return rule.window_secs();
    }
    ((capacity - tokens) / refill).ceil().max(0.0) as u64
}

fn leaky_bucket(
    prev: Option<(f64, i64)>,
    rule: &EffectiveRule,
    now_ms: i64,
) -> (CounterState, RuleCheckOutcome) {
    let capacity = rule.capacity().max(0.0);
    let leak = rule.leak_per_sec();
    let (stored_level, last_ms) = prev.unwrap_or((0.0, now_ms));

    let elapsed_secs = (now_ms - last_ms).max(0) as f64 / 1_000.0;
    let mut level = (stored_level.max(0.0) - elapsed_secs * leak).max(0.0);

    // Tolerance keeps `level + 1 <= capacity` exact across repeated leaks
    let outcome = if rule.limit > 0 && level + 1.0 <= capacity + 1e-9 {
        level += 1.0;
        RuleCheckOutcome {
            allowed: true,
            current: level.round() as u64,
            limit: rule.limit,
            retry_after_secs: None,
            window_remaining_secs: secs_until_drained(level, leak, rule),
        }
    } else {
        let retry_secs = if rule.limit == 0 || leak <= 0.0 {
            rule.window_secs()
        } else {
            ((level + 1.0 - capacity) / leak).ceil().max(1.0) as u64
        };
        RuleCheckOutcome {
            allowed: false,
            current: level.round() as u64,
            limit: rule.limit,
            retry_after_secs: Some(retry_secs.max(1)),
            window_remaining_secs: retry_secs.max(1),
        }
    };

    (
        CounterState::LeakyBucket {
            level,
            last_leak_ms: now_ms,
        },
        outcome,
    )
}

fn secs_until_drained(level: f64, leak: f64, rule: &EffectiveRule) -> u64 {
    if leak <= 0.0 {
        return rule.window_secs();
    }
    (level / leak).ceil().max(0.0) as u64
}

fn fixed_window(
    prev: Option<(u64, i64)>,
    rule: &EffectiveRule,
    now_ms: i64,
) -> (CounterState, RuleCheckOutcome) {
    let window_ms = rule.window_ms.max(1);
    let window_start = now_ms.div_euclid(window_ms) * window_ms;

    let prev_count = match prev {
        Some((count, start)) if start == window_start => count,
        _ => 0,
    };
    let count = prev_count.saturating_add(1);

    let boundary_secs = ms_to_secs_ceil(window_start + window_ms - now_ms).max(1);
    let outcome = if rule.limit > 0 && count <= rule.limit {
        RuleCheckOutcome {
            allowed: true,
            current: count,
            limit: rule.limit,
            retry_after_secs: None,
            window_remaining_secs: boundary_secs,
        }
    } else {
        RuleCheckOutcome {
            allowed: false,
            current: count,
            limit: rule.limit,
            retry_after_secs: Some(boundary_secs),
            window_remaining_secs: boundary_secs,
        }
    };

    (
        CounterState::FixedWindow {
            count,
            window_start_ms: window_start,
        },
        outcome,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::rule::Algorithm;

    fn rule(algorithm: Algorithm, limit: u64, window_secs: u64) -> EffectiveRule {
        EffectiveRule {
            name: "test".to_string(),
            algorithm,
            limit,
            window_ms: window_secs as i64 * 1_000,
        }
    }

    #[test]
    fn test_sliding_window_fills_then_rejects() {
        let rule = rule(Algorithm::SlidingWindow, 5, 60);
        let mut state = None;
        for i in 1..=5 {
            let (next, outcome) = check(state.take(), &rule, 0);
            assert!(outcome.allowed);
            assert_eq!(outcome.current, i);
            state = Some(next);
        }
        let (_, outcome) = check(state, &rule, 0);
        assert!(!outcome.allowed);
        assert_eq!(outcome.current, 5);
        assert_eq!(outcome.retry_after_secs, Some(60));
    }

    #[test]
    fn test_sliding_window_prunes_old_entries() {
        let rule = rule(Algorithm::SlidingWindow, 2, 60);
        let state = CounterState::SlidingWindow {
            timestamps: vec![-100_000, 1_000, 30_000],
        };
        // Everything before now - 60s no longer counts
        let (next, outcome) = check(Some(state), &rule, 70_000);
        assert!(outcome.allowed);
        assert_eq!(outcome.current, 2);
        match next {
            CounterState::SlidingWindow { timestamps } => {
                assert_eq!(timestamps, vec![30_000, 70_000])
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_token_bucket_burst_then_refill() {
        let rule = rule(
            Algorithm::TokenBucket {
                bucket_size: Some(10.0),
                refill_rate: Some(1.0),
            },
            10,
            60,
        );
        let mut state = None;
        for i in 1..=10 {
            let (next, outcome) = check(state.take(), &rule, 0);
            assert!(outcome.allowed, "request {i} should pass");
            assert_eq!(outcome.current, i);
            state = Some(next);
        }
        // Bucket exhausted
        let (next, outcome) = check(state, &rule, 0);
        assert!(!outcome.allowed);
        assert_eq!(outcome.retry_after_secs, Some(1));

        // One second later exactly one token has accrued
        let (next, outcome) = check(Some(next), &rule, 1_000);
        assert!(outcome.allowed);
        let (_, outcome) = check(Some(next), &rule, 1_000);
        assert!(!outcome.allowed);
    }

    #[test]
    fn test_token_bucket_tokens_bounded() {
        let rule = rule(
            Algorithm::TokenBucket {
                bucket_size: Some(5.0),
                refill_rate: Some(100.0),
            },
            5,
            60,
        );
        let state = CounterState::TokenBucket {
            tokens: 3.0,
            last_refill_ms: 0,
        };
        // Long idle period refills to capacity, never beyond
        let (next, outcome) = check(Some(state), &rule, 3_600_000);
        assert!(outcome.allowed);
        match next {
            CounterState::TokenBucket { tokens, .. } => {
                assert!((0.0..=5.0).contains(&tokens));
                assert!((tokens - 4.0).abs() < 1e-9);
            }
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_leaky_bucket_overflow_and_drain() {
        let rule = rule(
            Algorithm::LeakyBucket {
                bucket_size: Some(3.0),
                leak_rate: Some(1.0),
            },
            3,
            60,
        );
        let mut state = None;
        for _ in 0..3 {
            let (next, outcome) = check(state.take(), &rule, 0);
            assert!(outcome.allowed);
            state = Some(next);
        }
        // Full; a reject never raises the level past capacity
        let (next, outcome) = check(state, &rule, 0);
        assert!(!outcome.allowed);
        assert_eq!(outcome.current, 3);
        assert_eq!(outcome.retry_after_secs, Some(1));

        // After two seconds two slots have leaked
        let (_, outcome) = check(Some(next), &rule, 2_000);
        assert!(outcome.allowed);
        assert_eq!(outcome.current, 2);
    }

    #[test]
    fn test_leaky_bucket_reject_keeps_level() {
        let rule = rule(
            Algorithm::LeakyBucket {
                bucket_size: Some(2.0),
                leak_rate: Some(0.1),
            },
            2,
            60,
        );
        let state = CounterState::LeakyBucket {
            level: 2.0,
            last_leak_ms: 0,
        };
        let (next, outcome) = check(Some(state), &rule, 0);
        assert!(!outcome.allowed);
        match next {
            CounterState::LeakyBucket { level, .. } => assert!((level - 2.0).abs() < 1e-9),
            other => panic!("unexpected state {other:?}"),
        }
    }

    #[test]
    fn test_fixed_window_boundary_reset() {
        let rule = rule(Algorithm::FixedWindow, 2, 60);
        let (state, outcome) = check(None, &rule, 10_000);
        assert!(outcome.allowed);
        let (state, outcome) = check(Some(state), &rule, 20_000);
        assert!(outcome.allowed);
        let (state, outcome) = check(Some(state), &rule, 30_000);
        assert!(!outcome.allowed);
        // Retry points at the window boundary (t = 60s)
        assert_eq!(outcome.retry_after_secs, Some(30));

        // Next window starts fresh
        let (_, outcome) = check(Some(state), &rule, 61_000);
        assert!(outcome.allowed);
        assert_eq!(outcome.current, 1);
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        for algorithm in [
            Algorithm::SlidingWindow,
            Algorithm::TokenBucket {
                bucket_size: None,
                refill_rate: None,
            },
            Algorithm::LeakyBucket {
                bucket_size: None,
                leak_rate: None,
            },
            Algorithm::FixedWindow,
        ] {
            let rule = rule(algorithm, 0, 60);
            let (_, outcome) = check(None, &rule, 0);
            assert!(!outcome.allowed, "{} must reject", rule.algorithm.name());
            assert!(outcome.retry_after_secs.unwrap() > 0);
        }
    }

    #[test]
    fn test_algorithm_change_resets_state() {
        let rule = rule(Algorithm::FixedWindow, 5, 60);
        let stale = CounterState::SlidingWindow {
            timestamps: vec![1, 2, 3],
        };
        let (_, outcome) = check(Some(stale), &rule, 0);
        assert!(outcome.allowed);
        assert_eq!(outcome.current, 1);
    }

    #[test]
    fn test_expiry_is_safety_multiple_of_window() {
        let rule = rule(Algorithm::SlidingWindow, 5, 60);
        assert_eq!(expiry_for(&rule, 1_000), 1_000 + 120_000);
    }
}
