use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ThreadError;
use crate::models::Task;
use crate::time::Instant;

/// A named life-area grouping related tasks.
///
/// Tasks are kept in insertion order and are unique by id.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Thread {
    name: String,
    default_importance: f64,
    #[serde(default)]
    tasks: Vec<Task>,
}

impl Thread {
    pub fn new(name: impl Into<String>, default_importance: f64) -> Self {
        Thread {
            name: name.into(),
            default_importance,
            tasks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_importance(&self) -> f64 {
        self.default_importance
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: Uuid) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id() == id)
    }

    pub fn task_mut(&mut self, id: Uuid) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|t| t.id() == id)
    }

    /// A plain task tagged with this thread's name and default importance.
    pub fn new_task(&self, name: impl Into<String>) -> Task {
        let mut task = Task::new(name).in_thread(self.name.clone());
        if let Err(e) = task.set_importance(self.default_importance) {
            tracing::debug!(thread = %self.name, error = %e, "keeping the global default importance");
        }
        task
    }

    /// Inserts `task`, replacing (in place) any task with the same id.
    /// Returns the replaced task.
    pub fn add_task(&mut self, task: Task) -> Option<Task> {
        match self.tasks.iter_mut().find(|t| t.same_entity(&task)) {
            Some(existing) => Some(std::mem::replace(existing, task)),
            None => {
                self.tasks.push(task);
                None
            }
        }
    }

    /// Inserts `task` only if no task with its id is present.
    pub fn insert_new(&mut self, task: Task) -> Result<(), ThreadError> {
        if self.task(task.id()).is_some() {
            return Err(ThreadError::DuplicateId {
                thread: self.name.clone(),
                id: task.id(),
            });
        }
        self.tasks.push(task);
        Ok(())
    }

    pub fn remove_task(&mut self, id: Uuid) -> Option<Task> {
        let idx = self.tasks.iter().position(|t| t.id() == id)?;
        Some(self.tasks.remove(idx))
    }

    /// Set union of two same-named threads.
    ///
    /// On an id collision the task from `other` wins. The result keeps
    /// `self`'s order and default importance, followed by tasks only `other`
    /// has.
    pub fn union(&self, other: &Thread) -> Result<Thread, ThreadError> {
        if self.name != other.name {
            return Err(ThreadError::ThreadNameMismatch {
                left: self.name.clone(),
                right: other.name.clone(),
            });
        }
        let mut merged = self.clone();
        for task in &other.tasks {
            merged.add_task(task.clone());
        }
        Ok(merged)
    }

    /// Splits into `(done, pending)` threads, both named like `self`.
    pub fn partition(&self, now: Instant) -> (Thread, Thread) {
        let (done, pending): (Vec<Task>, Vec<Task>) =
            self.tasks.iter().cloned().partition(|t| t.is_done_at(now));
        (self.with_tasks(done), self.with_tasks(pending))
    }

    fn with_tasks(&self, tasks: Vec<Task>) -> Thread {
        Thread {
            name: self.name.clone(),
            default_importance: self.default_importance,
            tasks,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(s: &str) -> serde_json::Result<Thread> {
        let mut thread: Thread = serde_json::from_str(s)?;
        thread.dedup_by_id();
        Ok(thread)
    }

    // Older records could hold the same task twice; the later copy wins.
    fn dedup_by_id(&mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in tasks {
            self.add_task(task);
        }
    }
}
