use std::time::Duration;

use super::schedule::ExponentialSchedulePolicy;
use super::schedule::SchedulePolicy;

#[test]
fn test_fail_doubles_until_upper_bound() {
    let mut policy = ExponentialSchedulePolicy::new(Duration::from_secs(1), Duration::from_secs(8));

    let delays: Vec<u64> = (0..6).map(|_| policy.fail().as_secs()).collect();

    assert_eq!(delays, vec![1, 2, 4, 8, 8, 8]);
}

#[test]
fn test_success_resets_to_lower_bound() {
    let mut policy = ExponentialSchedulePolicy::new(Duration::from_millis(100), Duration::from_millis(800));

    policy.fail();
    policy.fail();
    assert_eq!(policy.last_delay(), Duration::from_millis(200));

    policy.success();
    assert_eq!(policy.last_delay(), Duration::ZERO);
    assert_eq!(policy.fail(), Duration::from_millis(100));
}

#[test]
fn test_upper_bound_below_lower_bound_is_clamped() {
    let mut policy = ExponentialSchedulePolicy::new(Duration::from_secs(5), Duration::from_secs(1));

    assert_eq!(policy.fail(), Duration::from_secs(5));
    assert_eq!(policy.fail(), Duration::from_secs(5));
}
