use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};
use uuid::Uuid;

use crate::chunk::TimeChunk;
use crate::error::{Error, Result, TaskError};
use crate::models::{DeadlineViolation, Occurrence, Task, TaskKind, DEFAULT_IMPORTANCE};
use crate::storage::{RefreshReport, StateManager};
use crate::thread::Thread;
use crate::time::{Duration, Instant};
use crate::urgency::compute_urgency;

/// Everything `add` can be told about a new task.
#[derive(Debug, Default, Clone)]
pub struct NewTask {
    pub name: String,
    pub thread: String,
    pub start: Option<String>,
    pub end: Option<String>,
    pub deadline: Option<String>,
    /// Expected duration of an assignment, in hours.
    pub hours: Option<f64>,
    pub importance: Option<f64>,
    pub event: bool,
    /// Repeat period, in hours.
    pub repeat_hours: Option<f64>,
}

fn parse_opt(s: &Option<String>) -> Result<Option<Instant>> {
    Ok(s.as_deref().map(Instant::parse_lenient).transpose()?)
}

fn hours(h: f64) -> Result<Duration> {
    Duration::from_hours_f64(h).ok_or_else(|| Error::Command(format!("Invalid number of hours: {h}.")))
}

fn short_id(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

/// Finds the task whose id starts with `prefix`.
pub fn resolve_task_id(manager: &StateManager, prefix: &str) -> Result<Uuid> {
    let needle = prefix.trim().to_lowercase().replace('-', "");
    let matches: Vec<Uuid> = manager
        .tasks()
        .map(Task::id)
        .filter(|id| !needle.is_empty() && id.simple().to_string().starts_with(&needle))
        .collect();
    match matches.as_slice() {
        [id] => Ok(*id),
        [] => Err(Error::Command(format!("Task {prefix} not found."))),
        _ => Err(Error::Command(format!("Task id '{prefix}' is ambiguous; use more characters."))),
    }
}

fn task_mut(manager: &mut StateManager, id: Uuid) -> Result<&mut Task> {
    manager
        .task_mut(id)
        .ok_or_else(|| Error::Command(format!("Task {id} not found.")))
}

fn report_violation(violation: Option<DeadlineViolation>, silent: bool) {
    if let (Some(v), false) = (violation, silent) {
        eprintln!("Warning: '{}' would finish at {}, after its deadline {}.", v.name, v.finish, v.deadline);
    }
}

fn report_refresh(report: &RefreshReport, silent: bool) {
    if silent {
        return;
    }
    for e in report.saved.corrupt.iter().chain(&report.loaded.corrupt) {
        eprintln!("Warning: {e}");
    }
    if report.saved.archived > 0 {
        println!("{} finished task(s) moved to history.", report.saved.archived);
    }
}

/// Adds a new task to a thread, creating the thread if needed.
///
/// A deadline makes an assignment; `event` makes an event (start and end
/// required); otherwise a plain task is created.
pub fn cmd_add(manager: &mut StateManager, new: NewTask, silent: bool) -> Result<Uuid> {
    let start = parse_opt(&new.start)?;
    let end = parse_opt(&new.end)?;
    let deadline = parse_opt(&new.deadline)?;

    let thread = manager.ensure_thread(&new.thread, DEFAULT_IMPORTANCE)?;
    let importance = new.importance.unwrap_or(thread.default_importance());

    let mut violation = None;
    let mut task = if let Some(deadline) = deadline {
        let expected = match (new.hours, start, end) {
            (Some(h), _, _) => hours(h)?,
            (None, Some(s), Some(e)) => e - s,
            _ => Duration::HOUR,
        };
        let mut task = Task::assignment(new.name, deadline, expected);
        if let Some(start) = start {
            violation = task.change_time(start, end)?;
        }
        task
    } else if new.event {
        match (start, end) {
            (Some(s), Some(e)) => Task::event(new.name, s, e)?,
            _ => return Err(TaskError::MissingEventTime.into()),
        }
    } else {
        match start {
            Some(s) => Task::with_times(new.name, s, end)?,
            None => Task::new(new.name),
        }
    };
    task.set_importance(importance)?;
    task.set_thread_name(Some(thread.name().to_string()));
    if let Some(h) = new.repeat_hours {
        task.enable_repeat(hours(h)?)?;
    }

    let id = task.id();
    thread.add_task(task);
    report_violation(violation, silent);
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Task added (id = {})", short_id(id));
    }
    Ok(id)
}

/// Marks a task as complete; it moves to history on the refresh that follows.
pub fn cmd_complete(manager: &mut StateManager, id: &str, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    task_mut(manager, id)?.complete()?;
    let report = manager.refresh()?;
    if !silent {
        println!("Task {} marked as complete.", short_id(id));
    }
    report_refresh(&report, silent);
    Ok(())
}

/// Drops a task from the working set. History is left alone.
pub fn cmd_remove(manager: &mut StateManager, id: &str, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    manager.remove_task(id);
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Task {} removed.", short_id(id));
    }
    Ok(())
}

/// Moves a task to a new start (and optionally end) time.
pub fn cmd_move(manager: &mut StateManager, id: &str, start: &str, end: Option<String>, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    let start = Instant::parse_lenient(start)?;
    let end = parse_opt(&end)?;
    let violation = task_mut(manager, id)?.change_time(start, end)?;
    report_violation(violation, silent);
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Task {} moved.", short_id(id));
    }
    Ok(())
}

pub fn cmd_importance(manager: &mut StateManager, id: &str, importance: f64, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    task_mut(manager, id)?.set_importance(importance)?;
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Task {} importance set to {importance}.", short_id(id));
    }
    Ok(())
}

/// Turns repetition on with a period in hours, or off with `None`.
pub fn cmd_repeat(manager: &mut StateManager, id: &str, period_hours: Option<f64>, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    let task = task_mut(manager, id)?;
    match period_hours {
        Some(h) => task.enable_repeat(hours(h)?)?,
        None => task.disable_repeat(),
    }
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        match period_hours {
            Some(h) => println!("Task {} repeats every {}.", short_id(id), hours(h)?),
            None => println!("Task {} no longer repeats.", short_id(id)),
        }
    }
    Ok(())
}

/// Records an appointment (event) or deadline (assignment). With `minutes`
/// the occurrence is a chunk of that length instead of a bare instant.
pub fn cmd_occurrence_add(
    manager: &mut StateManager,
    id: &str,
    when: &str,
    minutes: Option<i64>,
    silent: bool,
) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    let when = Instant::parse_lenient(when)?;
    let occurrence = match minutes {
        Some(m) => {
            let length = Duration::checked_minutes(m)
                .ok_or_else(|| Error::Command(format!("Invalid number of minutes: {m}.")))?;
            Occurrence::Chunk(TimeChunk::new(when, length)?)
        }
        None => Occurrence::At(when),
    };
    task_mut(manager, id)?.add_occurrence(occurrence)?;
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Occurrence at {when} added to task {}.", short_id(id));
    }
    Ok(())
}

pub fn cmd_occurrence_remove(manager: &mut StateManager, id: &str, when: &str, silent: bool) -> Result<()> {
    let id = resolve_task_id(manager, id)?;
    let when = Instant::parse_lenient(when)?;
    let removed = task_mut(manager, id)?.remove_occurrence(when);
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        if removed {
            println!("Occurrence at {when} removed from task {}.", short_id(id));
        } else {
            println!("Task {} has no occurrence at {when}.", short_id(id));
        }
    }
    Ok(())
}

pub fn cmd_thread_add(manager: &mut StateManager, name: String, importance: f64, silent: bool) -> Result<()> {
    if !(0.0..=10.0).contains(&importance) {
        return Err(TaskError::InvalidImportance { value: importance }.into());
    }
    if manager.thread(&name).is_some() {
        return Err(Error::Command(format!("Thread '{name}' already exists.")));
    }
    manager.add_thread(Thread::new(name.clone(), importance))?;
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Thread '{name}' added.");
    }
    Ok(())
}

/// Drops a thread from the working set; its history stays on disk.
pub fn cmd_thread_remove(manager: &mut StateManager, name: &str, silent: bool) -> Result<()> {
    if manager.remove_thread(name).is_none() {
        return Err(Error::Command(format!("Thread '{name}' not found.")));
    }
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!("Thread '{name}' removed.");
    }
    Ok(())
}

pub fn cmd_thread_list(manager: &StateManager) {
    if manager.threads().is_empty() {
        println!("No threads found.");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Name", "Default Importance", "Pending Tasks"]);
    for t in manager.threads() {
        table.add_row(vec![
            t.name().to_string(),
            format!("{:.1}", t.default_importance()),
            t.len().to_string(),
        ]);
    }
    println!("{table}");
}

/// Saves and reloads, moving finished work into history.
pub fn cmd_refresh(manager: &mut StateManager, silent: bool) -> Result<RefreshReport> {
    let report = manager.refresh()?;
    report_refresh(&report, silent);
    if !silent {
        println!(
            "{} thread(s), {} pending task(s) loaded.",
            report.loaded.threads, report.loaded.tasks
        );
    }
    Ok(report)
}

/// Lists tasks in a formatted table, sorted by urgency.
///
/// By default shows the working set; with `history`, shows the past records
/// of the selected threads instead.
pub fn cmd_list(manager: &StateManager, thread: Option<&str>, history: bool) -> Result<()> {
    let now = Instant::now();
    let selected: Vec<&Thread> = manager
        .threads()
        .iter()
        .filter(|t| thread.map_or(true, |name| t.name() == name))
        .collect();

    let mut tasks: Vec<Task> = Vec::new();
    if history {
        let names: Vec<&str> = match thread {
            Some(name) => vec![name],
            None => selected.iter().map(|t| t.name()).collect(),
        };
        for name in names {
            if let Some(past) = manager.read_past(name)? {
                tasks.extend(past.tasks().iter().cloned());
            }
        }
    } else {
        tasks.extend(selected.iter().flat_map(|t| t.tasks().iter().cloned()));
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    // Sort by urgency descending
    tasks.sort_by(|a, b| compute_urgency(b, now).total_cmp(&compute_urgency(a, now)));

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID").add_attribute(Attribute::Bold),
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Thread").add_attribute(Attribute::Bold),
            Cell::new("Type").add_attribute(Attribute::Bold),
            Cell::new("Start").add_attribute(Attribute::Bold),
            Cell::new("End/Due").add_attribute(Attribute::Bold),
            Cell::new("Imp").add_attribute(Attribute::Bold),
            Cell::new("Urg").add_attribute(Attribute::Bold),
            Cell::new("Status").add_attribute(Attribute::Bold),
        ]);

    for t in tasks {
        let urgency = compute_urgency(&t, now);
        let done = t.is_done_at(now);
        let kind = match t.kind() {
            TaskKind::Plain => "task",
            TaskKind::Event => "event",
            TaskKind::Assignment { .. } => "assignment",
        };
        let kind = if t.repeat().is_enabled() { format!("{kind} (repeats)") } else { kind.to_string() };
        let urgency_color = if done {
            Color::Grey
        } else if urgency > 50.0 {
            Color::Red
        } else if urgency > 20.0 {
            Color::Yellow
        } else {
            Color::Green
        };
        let status = if t.is_completed() {
            "Done"
        } else if done {
            "Expired"
        } else {
            "Pending"
        };
        let status_color = if done { Color::Green } else { Color::Yellow };
        let fmt_time = |i: Option<Instant>| i.map(|i| i.as_datetime().format("%Y-%m-%d %H:%M").to_string()).unwrap_or_default();

        table.add_row(vec![
            Cell::new(short_id(t.id())),
            Cell::new(t.name()),
            Cell::new(t.thread_name().unwrap_or_default()),
            Cell::new(kind),
            Cell::new(fmt_time(t.start_time())),
            Cell::new(fmt_time(t.terminal_time())),
            Cell::new(format!("{:.1}", t.importance())),
            Cell::new(format!("{:.1}", urgency)).fg(urgency_color),
            Cell::new(status).fg(status_color),
        ]);
    }

    println!("{table}");
    Ok(())
}
