use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::chunk::TimeChunk;
use crate::error::TaskError;
use crate::time::{Duration, Instant};

/// Importance given to a task when nobody says otherwise.
pub const DEFAULT_IMPORTANCE: f64 = 5.0;
/// `max_divisions` value meaning the task may be split any number of times.
pub const UNBOUNDED_DIVISIONS: i32 = -1;

/// The shape of a task.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskKind {
    /// A bare task with an optional time window.
    Plain,
    /// A fixed, immovable window. Always has both a start and an end.
    Event,
    /// Movable work that has to fit before `deadline`.
    Assignment {
        deadline: Instant,
        expected_duration: Duration,
    },
}

impl TaskKind {
    /// Discriminator written to the `type` field of a persisted task.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            TaskKind::Plain => None,
            TaskKind::Event => Some("event"),
            TaskKind::Assignment { .. } => Some("assignment"),
        }
    }
}

/// One per-period occurrence of a task: an appointment for an event, a
/// deadline for an assignment.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(untagged)]
pub enum Occurrence {
    At(Instant),
    Chunk(TimeChunk),
}

impl Occurrence {
    pub fn when(&self) -> Instant {
        match self {
            Occurrence::At(when) => *when,
            Occurrence::Chunk(chunk) => chunk.start(),
        }
    }
}

impl From<Instant> for Occurrence {
    fn from(when: Instant) -> Self {
        Occurrence::At(when)
    }
}

impl From<TimeChunk> for Occurrence {
    fn from(chunk: TimeChunk) -> Self {
        Occurrence::Chunk(chunk)
    }
}

/// Recurrence overlay carried by every task.
///
/// When enabled, the task's `start_time` opens the first period and its
/// `end_time` is the cutoff of the last one.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Repeat {
    #[serde(default)]
    enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    period: Option<Duration>,
    #[serde(default)]
    occurrences: Vec<Occurrence>,
}

impl Repeat {
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn period(&self) -> Option<Duration> {
        self.period
    }

    /// Occurrences ordered by time.
    pub fn occurrences(&self) -> &[Occurrence] {
        &self.occurrences
    }

    fn is_unused(&self) -> bool {
        !self.enabled && self.period.is_none() && self.occurrences.is_empty()
    }

    fn insert(&mut self, occurrence: Occurrence) {
        if self.occurrences.contains(&occurrence) {
            return;
        }
        let when = occurrence.when();
        let idx = self.occurrences.partition_point(|o| o.when() <= when);
        self.occurrences.insert(idx, occurrence);
    }

    fn normalize(&mut self) {
        let mut unique: Vec<Occurrence> = Vec::with_capacity(self.occurrences.len());
        for occurrence in self.occurrences.drain(..) {
            if !unique.contains(&occurrence) {
                unique.push(occurrence);
            }
        }
        unique.sort_by_key(Occurrence::when);
        self.occurrences = unique;
    }
}

/// Soft diagnostic raised when an assignment is scheduled to finish after
/// its deadline. The time change that caused it still stands.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadlineViolation {
    pub task_id: Uuid,
    pub name: String,
    pub finish: Instant,
    pub deadline: Instant,
}

/// A unit of work.
///
/// Two tasks with the same `id` are the same entity. `PartialEq` compares
/// every field; use [`Task::same_entity`] for identity.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(into = "TaskRecord", try_from = "TaskRecord")]
pub struct Task {
    id: Uuid,
    name: String,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    importance: f64,
    partial_completion_allowed: bool,
    max_divisions: i32,
    thread_name: Option<String>,
    completed: bool,
    kind: TaskKind,
    repeat: Repeat,
}

impl Task {
    /// A plain task with no time window.
    pub fn new(name: impl Into<String>) -> Self {
        Task {
            id: Uuid::new_v4(),
            name: name.into(),
            start_time: None,
            end_time: None,
            importance: DEFAULT_IMPORTANCE,
            partial_completion_allowed: false,
            max_divisions: UNBOUNDED_DIVISIONS,
            thread_name: None,
            completed: false,
            kind: TaskKind::Plain,
            repeat: Repeat::default(),
        }
    }

    /// A plain task placed at `start`, optionally ending at `end`.
    pub fn with_times(name: impl Into<String>, start: Instant, end: Option<Instant>) -> Result<Self, TaskError> {
        let mut task = Task::new(name);
        task.change_time(start, end)?;
        Ok(task)
    }

    pub fn event(name: impl Into<String>, start: Instant, end: Instant) -> Result<Self, TaskError> {
        let mut task = Task::with_times(name, start, Some(end))?;
        task.kind = TaskKind::Event;
        Ok(task)
    }

    /// An assignment with no placement yet.
    pub fn assignment(name: impl Into<String>, deadline: Instant, expected_duration: Duration) -> Self {
        let mut task = Task::new(name);
        task.kind = TaskKind::Assignment {
            deadline,
            expected_duration,
        };
        task
    }

    pub fn with_importance(mut self, importance: f64) -> Result<Self, TaskError> {
        self.set_importance(importance)?;
        Ok(self)
    }

    pub fn in_thread(mut self, thread_name: impl Into<String>) -> Self {
        self.thread_name = Some(thread_name.into());
        self
    }

    pub fn repeating(mut self, period: Duration) -> Result<Self, TaskError> {
        self.enable_repeat(period)?;
        Ok(self)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn same_entity(&self, other: &Task) -> bool {
        self.id == other.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn start_time(&self) -> Option<Instant> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<Instant> {
        self.end_time
    }

    pub fn importance(&self) -> f64 {
        self.importance
    }

    pub fn partial_completion_allowed(&self) -> bool {
        self.partial_completion_allowed
    }

    pub fn set_partial_completion_allowed(&mut self, allowed: bool) {
        self.partial_completion_allowed = allowed;
    }

    pub fn max_divisions(&self) -> i32 {
        self.max_divisions
    }

    pub fn set_max_divisions(&mut self, max_divisions: i32) {
        self.max_divisions = max_divisions;
    }

    pub fn thread_name(&self) -> Option<&str> {
        self.thread_name.as_deref()
    }

    pub fn set_thread_name(&mut self, thread_name: Option<String>) {
        self.thread_name = thread_name;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn repeat(&self) -> &Repeat {
        &self.repeat
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.kind {
            TaskKind::Assignment { deadline, .. } => Some(deadline),
            _ => None,
        }
    }

    pub fn expected_duration(&self) -> Option<Duration> {
        match self.kind {
            TaskKind::Assignment { expected_duration, .. } => Some(expected_duration),
            _ => None,
        }
    }

    /// The instant after which an unfinished task counts as past: the
    /// deadline of an assignment, the end time of anything else.
    pub fn terminal_time(&self) -> Option<Instant> {
        self.deadline().or(self.end_time)
    }

    /// Moves the task.
    ///
    /// Without `new_end`, a task that has both times keeps its length, and a
    /// task with only an end keeps that end. Assignments re-derive their
    /// expected duration from the new window and report (but do not reject)
    /// a finish past the deadline.
    pub fn change_time(
        &mut self,
        new_start: Instant,
        new_end: Option<Instant>,
    ) -> Result<Option<DeadlineViolation>, TaskError> {
        let new_end = match (new_end, self.start_time, self.end_time) {
            (Some(end), _, _) => Some(end),
            (None, Some(start), Some(end)) => Some(shift(new_start, end - start)?),
            (None, None, Some(end)) => Some(end),
            (None, _, None) => None,
        };
        if let Some(end) = new_end {
            if new_start > end {
                return Err(TaskError::InvalidTimeRange { start: new_start, end });
            }
        }
        let schedule = match self.kind {
            TaskKind::Assignment { expected_duration, .. } => {
                let expected = new_end.map_or(expected_duration, |end| end - new_start);
                Some((expected, shift(new_start, expected)?))
            }
            _ => None,
        };
        self.start_time = Some(new_start);
        self.end_time = new_end;
        Ok(schedule.and_then(|(expected, finish)| self.check_deadline(expected, finish)))
    }

    fn check_deadline(&mut self, expected: Duration, finish: Instant) -> Option<DeadlineViolation> {
        let TaskKind::Assignment {
            deadline,
            expected_duration,
        } = &mut self.kind
        else {
            return None;
        };
        *expected_duration = expected;
        let deadline = *deadline;
        if finish <= deadline {
            return None;
        }
        tracing::warn!(
            task = %self.id,
            name = %self.name,
            %finish,
            %deadline,
            "deadline not met"
        );
        Some(DeadlineViolation {
            task_id: self.id,
            name: self.name.clone(),
            finish,
            deadline,
        })
    }

    pub fn set_importance(&mut self, importance: f64) -> Result<(), TaskError> {
        if !(0.0..=10.0).contains(&importance) {
            return Err(TaskError::InvalidImportance { value: importance });
        }
        self.importance = importance;
        Ok(())
    }

    /// Marks the task as done.
    ///
    /// Repeating tasks need per-occurrence completion, which does not exist
    /// yet, so they are refused.
    pub fn complete(&mut self) -> Result<(), TaskError> {
        if self.repeat.enabled {
            return Err(TaskError::NotImplemented {
                what: "completing a repeating task",
            });
        }
        self.completed = true;
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.is_done_at(Instant::now())
    }

    /// Completed, or its terminal time is strictly before `now`.
    pub fn is_done_at(&self, now: Instant) -> bool {
        self.completed || self.terminal_time().is_some_and(|t| t < now)
    }

    /// Turns repetition on. The first period has to end within the
    /// supported time range.
    pub fn enable_repeat(&mut self, period: Duration) -> Result<(), TaskError> {
        let fits = self.start_time.map_or(true, |start| start.checked_add(period).is_some());
        if !period.is_positive() || !fits {
            return Err(TaskError::InvalidPeriod { period });
        }
        self.repeat.enabled = true;
        self.repeat.period = Some(period);
        Ok(())
    }

    /// Stops repeating. Recorded occurrences are kept.
    pub fn disable_repeat(&mut self) {
        self.repeat.enabled = false;
    }

    /// Records an occurrence: an appointment for an event, a deadline for an
    /// assignment.
    ///
    /// A repeating task only accepts occurrences within one period of its
    /// start.
    pub fn add_occurrence(&mut self, occurrence: impl Into<Occurrence>) -> Result<(), TaskError> {
        let occurrence = occurrence.into();
        let start = self.start_time.ok_or(TaskError::NoStartTime { id: self.id })?;
        if let (true, Some(period)) = (self.repeat.enabled, self.repeat.period) {
            let window_end = shift(start, period)?;
            let when = occurrence.when();
            if when < start || when > window_end {
                return Err(TaskError::OccurrenceOutOfPeriod {
                    when,
                    window_start: start,
                    window_end,
                });
            }
        }
        self.repeat.insert(occurrence);
        Ok(())
    }

    /// Drops every occurrence at `when`. Returns whether anything was removed.
    pub fn remove_occurrence(&mut self, when: Instant) -> bool {
        let before = self.repeat.occurrences.len();
        self.repeat.occurrences.retain(|o| o.when() != when);
        self.repeat.occurrences.len() != before
    }
}

fn shift(base: Instant, offset: Duration) -> Result<Instant, TaskError> {
    base.checked_add(offset)
        .ok_or(TaskError::TimeOutOfRange { base, offset })
}

fn fmt_opt(t: Option<Instant>) -> String {
    t.map(|t| t.to_string()).unwrap_or_else(|| "None".into())
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TaskKind::Assignment { deadline, .. } => {
                write!(f, "Assignment: '{}' by {}", self.name, deadline)
            }
            TaskKind::Event => write!(
                f,
                "Event: '{}' in {}-{}",
                self.name,
                fmt_opt(self.start_time),
                fmt_opt(self.end_time)
            ),
            TaskKind::Plain => write!(
                f,
                "Task: '{}' in {}-{}",
                self.name,
                fmt_opt(self.start_time),
                fmt_opt(self.end_time)
            ),
        }
    }
}

fn default_importance() -> f64 {
    DEFAULT_IMPORTANCE
}

fn unbounded_divisions() -> i32 {
    UNBOUNDED_DIVISIONS
}

/// Persisted shape of a task, shared by every variant.
///
/// `type` is absent for a plain task. Records written by older versions
/// may carry flat `repeating`/`period` fields instead of a `repeat` object;
/// both are read.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub(crate) struct TaskRecord {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(default)]
    uid: Option<Uuid>,
    name: String,
    #[serde(default)]
    start_time: Option<Instant>,
    #[serde(default)]
    end_time: Option<Instant>,
    #[serde(default = "default_importance")]
    importance: f64,
    #[serde(default)]
    partial_completion: bool,
    #[serde(default = "unbounded_divisions")]
    max_divisions: i32,
    #[serde(default)]
    thread_name: Option<String>,
    #[serde(default)]
    completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    deadline: Option<Instant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expected_duration: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    repeat: Option<Repeat>,
    #[serde(default, skip_serializing)]
    repeating: Option<bool>,
    #[serde(default, skip_serializing)]
    period: Option<Duration>,
}

impl From<Task> for TaskRecord {
    fn from(task: Task) -> Self {
        let deadline = task.deadline();
        let expected_duration = task.expected_duration();
        TaskRecord {
            kind: task.kind.tag().map(str::to_string),
            uid: Some(task.id),
            name: task.name,
            start_time: task.start_time,
            end_time: task.end_time,
            importance: task.importance,
            partial_completion: task.partial_completion_allowed,
            max_divisions: task.max_divisions,
            thread_name: task.thread_name,
            completed: task.completed,
            deadline,
            expected_duration,
            repeat: (!task.repeat.is_unused()).then_some(task.repeat),
            repeating: None,
            period: None,
        }
    }
}

impl TryFrom<TaskRecord> for Task {
    type Error = String;

    fn try_from(record: TaskRecord) -> Result<Self, Self::Error> {
        let id = match record.uid {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4();
                tracing::warn!(name = %record.name, %id, "task record has no uid, assigning a new one");
                id
            }
        };
        if let (Some(start), Some(end)) = (record.start_time, record.end_time) {
            if start > end {
                return Err(TaskError::InvalidTimeRange { start, end }.to_string());
            }
        }
        if !(0.0..=10.0).contains(&record.importance) {
            return Err(TaskError::InvalidImportance {
                value: record.importance,
            }
            .to_string());
        }

        let kind = match record.kind.as_deref() {
            None => TaskKind::Plain,
            Some("event") => {
                if record.start_time.is_none() || record.end_time.is_none() {
                    return Err(TaskError::MissingEventTime.to_string());
                }
                TaskKind::Event
            }
            Some("assignment") => {
                let deadline = record
                    .deadline
                    .ok_or_else(|| format!("assignment '{}' has no deadline", record.name))?;
                let expected_duration = record.expected_duration.unwrap_or_else(|| {
                    match (record.start_time, record.end_time) {
                        (Some(start), Some(end)) => end - start,
                        _ => Duration::ZERO,
                    }
                });
                TaskKind::Assignment {
                    deadline,
                    expected_duration,
                }
            }
            // Unknown discriminators degrade to the base shape rather than
            // failing the whole thread record.
            Some(other) => {
                tracing::warn!(task = %id, kind = other, "unknown task type, reading as a plain task");
                TaskKind::Plain
            }
        };

        let mut repeat = match record.repeat {
            Some(repeat) => repeat,
            None => Repeat {
                enabled: record.repeating.unwrap_or(false),
                period: record.period,
                occurrences: Vec::new(),
            },
        };
        repeat.normalize();

        Ok(Task {
            id,
            name: record.name,
            start_time: record.start_time,
            end_time: record.end_time,
            importance: record.importance,
            partial_completion_allowed: record.partial_completion,
            max_divisions: record.max_divisions,
            thread_name: record.thread_name,
            completed: record.completed,
            kind,
            repeat,
        })
    }
}
