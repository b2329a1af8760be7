use crate::models::Task;
use crate::time::Instant;

/// Calculates the urgency score for a given task at `now`.
///
/// The score is based on:
/// - **Terminal time**: a closer deadline (or end time) yields a higher score.
///   Anything due within a day gets a significant boost.
/// - **Effort**: longer tasks slightly increase urgency.
/// - **Importance**: added on top, so it breaks ties between similar tasks.
///
/// # Returns
/// - `-1.0` if the task is done at `now`.
/// - The bare importance for open-ended tasks.
/// - A positive float otherwise (higher is more urgent).
pub fn compute_urgency(task: &Task, now: Instant) -> f64 {
    if task.is_done_at(now) {
        return -1.0;
    }
    let importance = task.importance();
    let Some(terminal) = task.terminal_time() else {
        return importance;
    };
    let effort_hours = task
        .expected_duration()
        .or_else(|| Some(task.end_time()? - task.start_time()?))
        .map(|d| d.as_hours_f64())
        .unwrap_or(0.0);
    let hours_left = (terminal - now).as_hours_f64();
    let base = if hours_left <= 24.0 {
        // due today -> high urgency
        100.0 + importance + effort_hours
    } else {
        // closer terminal time -> higher urgency; longer tasks increase urgency
        (24.0 / hours_left) * 10.0 * (1.0 + effort_hours / 8.0) + importance
    };
    if base.is_finite() { base } else { 0.0 }
}
