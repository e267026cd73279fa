//! Threshold and cooldown decision

use chrono::{DateTime, Duration, Utc};

/// Whether a low-balance email should go out now.
///
/// True when `balance` is strictly below `threshold` and either nothing has
/// been sent yet or at least `cooldown` has passed since the last successful
/// send. Exactly `cooldown` counts as elapsed.
pub fn should_alert(
    balance: f64,
    threshold: f64,
    last_alert_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    balance < threshold && cooldown_elapsed(last_alert_at, now, cooldown)
}

/// Whether `cooldown` has passed since `last`, or there is no `last`
pub fn cooldown_elapsed(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    cooldown: Duration,
) -> bool {
    last.map_or(true, |at| now - at >= cooldown)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
    }

    fn six_hours() -> Duration {
        Duration::hours(6)
    }

    #[rstest]
    #[case(20.0)]
    #[case(25.0)]
    #[case(1_000.0)]
    fn test_at_or_above_threshold_never_alerts(#[case] balance: f64) {
        let never = None;
        let long_ago = Some(now() - Duration::days(30));
        let just_now = Some(now());

        for last in [never, long_ago, just_now] {
            assert!(!should_alert(balance, 20.0, last, now(), six_hours()));
        }
    }

    #[rstest]
    #[case(19.99)]
    #[case(15.0)]
    #[case(0.0)]
    #[case(-3.0)]
    fn test_below_threshold_without_history_alerts(#[case] balance: f64) {
        assert!(should_alert(balance, 20.0, None, now(), six_hours()));
    }

    #[rstest]
    #[case(Duration::hours(3), false)]
    #[case(six_hours() - Duration::seconds(1), false)]
    #[case(six_hours(), true)]
    #[case(six_hours() + Duration::seconds(1), true)]
    #[case(Duration::days(2), true)]
    fn test_cooldown_boundary(#[case] since_last: Duration, #[case] expected: bool) {
        let last = Some(now() - since_last);
        assert_eq!(should_alert(15.0, 20.0, last, now(), six_hours()), expected);
    }

    #[test]
    fn test_zero_cooldown_always_elapsed() {
        assert!(should_alert(15.0, 20.0, Some(now()), now(), Duration::zero()));
    }

    #[test]
    fn test_nan_balance_never_alerts() {
        assert!(!should_alert(f64::NAN, 20.0, None, now(), six_hours()));
    }
}
