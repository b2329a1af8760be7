use timemap::models::Task;
use timemap::time::{Duration, Instant};
use timemap::urgency::compute_urgency;

fn now() -> Instant {
    Instant::from_ymd_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

#[test]
fn test_urgency_calculation() {
    let due_in_two_days = now() + Duration::days(2);
    let task = Task::assignment("Test", due_in_two_days, Duration::hours(1));

    let urgency = compute_urgency(&task, now());
    // Urgency should be positive
    assert!(urgency > 0.0);
    assert!(urgency < 100.0);
}

#[test]
fn test_urgency_due_today() {
    let task = Task::assignment("Test", now() + Duration::hours(3), Duration::hours(2));
    let urgency = compute_urgency(&task, now());
    // base 100 + importance + effort
    assert_eq!(urgency, 100.0 + 5.0 + 2.0);
}

#[test]
fn test_urgency_overdue() {
    // Ended an hour ago but not yet done: still the most pressing.
    let start = now() - Duration::hours(2);
    let task = Task::with_times("Test", start, Some(now())).unwrap();
    let urgency = compute_urgency(&task, now());
    assert!(urgency > 100.0);
}

#[test]
fn test_closer_deadline_is_more_urgent() {
    let soon = Task::assignment("Soon", now() + Duration::days(2), Duration::hours(1));
    let later = Task::assignment("Later", now() + Duration::days(10), Duration::hours(1));
    assert!(compute_urgency(&soon, now()) > compute_urgency(&later, now()));
}

#[test]
fn test_effort_increases_urgency() {
    let short = Task::assignment("Short", now() + Duration::days(3), Duration::hours(1));
    let long = Task::assignment("Long", now() + Duration::days(3), Duration::hours(8));
    assert!(compute_urgency(&long, now()) > compute_urgency(&short, now()));
}

#[test]
fn test_open_ended_task_uses_importance() {
    let task = Task::new("Someday").with_importance(3.0).unwrap();
    assert_eq!(compute_urgency(&task, now()), 3.0);
}

#[test]
fn test_done_task_has_no_urgency() {
    let mut task = Task::assignment("Test", now() + Duration::days(1), Duration::hours(1));
    task.complete().unwrap();
    assert_eq!(compute_urgency(&task, now()), -1.0);

    let expired = Task::with_times("Old", now() - Duration::days(2), Some(now() - Duration::days(1))).unwrap();
    assert_eq!(compute_urgency(&expired, now()), -1.0);
}
