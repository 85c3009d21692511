//! Property-based tests for retry backoff

use chrono::Utc;
use proptest::prelude::*;
use std::time::Duration;
use trailsync::offline::{BackoffStrategy, RetryDecision, RetryPolicy};

proptest! {
    #[test]
    fn test_backoff_is_non_decreasing_up_to_cap(
        base_secs in 1u64..120,
        cap_factor in 1u64..64,
        attempts in 1u32..48,
    ) {
        let base = Duration::from_secs(base_secs);
        let cap = Duration::from_secs(base_secs * cap_factor);
        let strategy = BackoffStrategy::exponential(base, cap);

        let mut previous = Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = strategy.delay_for(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= cap);
            previous = delay;
        }
        prop_assert_eq!(strategy.delay_for(1), base);
    }

    #[test]
    fn test_policy_gives_up_exactly_at_max_attempts(max_attempts in 1u32..20, failures in 1u32..40) {
        let policy = RetryPolicy {
            max_attempts,
            backoff: BackoffStrategy::exponential(Duration::from_secs(30), Duration::from_secs(1800)),
        };
        let now = Utc::now();
        match policy.decide(failures, now) {
            RetryDecision::GiveUp => prop_assert!(failures >= max_attempts),
            RetryDecision::RetryAt(at) => {
                prop_assert!(failures < max_attempts);
                prop_assert!(at > now);
            }
        }
    }
}
