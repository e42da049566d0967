//! AL-050: Task manager. A bounded worker pool over a FIFO queue.
//!
//! Status moves WAITING → RUNNING → FINISHED | FAILED and never leaves a
//! terminal state. Started tasks cannot be cancelled. A task that returns an
//! error or panics is recorded FAILED together with its captured log.

use crate::core::error::{AlbumError, Result};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

pub type TaskId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Waiting,
    Running,
    Finished,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Finished | Self::Failed)
    }

    /// Whether `self → to` is a legal transition.
    pub fn can_become(self, to: TaskStatus) -> bool {
        matches!(
            (self, to),
            (Self::Waiting, Self::Running) | (Self::Running, Self::Finished | Self::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Waiting => write!(f, "WAITING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Finished => write!(f, "FINISHED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// Snapshot of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub name: String,
    pub status: TaskStatus,
    pub log: Vec<String>,
    pub error: Option<String>,
}

impl TaskRecord {
    /// Apply a transition; illegal ones are ignored and reported as `false`.
    fn transition(&mut self, to: TaskStatus) -> bool {
        if !self.status.can_become(to) {
            warn!(
                "task {} cannot move from {} to {}",
                self.id, self.status, to
            );
            return false;
        }
        self.status = to;
        true
    }
}

/// Log lines a task writes while it runs.
#[derive(Debug, Clone, Default)]
pub struct TaskLog(Arc<Mutex<Vec<String>>>);

impl TaskLog {
    pub fn push(&self, line: impl Into<String>) {
        lock(&self.0).push(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

type Work = Box<dyn FnOnce(&TaskLog) -> Result<()> + Send + 'static>;

/// A named unit of work.
pub struct Task {
    name: String,
    work: Work,
}

impl Task {
    pub fn new<F>(name: &str, work: F) -> Self
    where
        F: FnOnce(&TaskLog) -> Result<()> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            work: Box::new(work),
        }
    }
}

struct State {
    queue: VecDeque<(TaskId, Work)>,
    /// Kept until [`TaskManager::prune`] drops the terminal ones.
    records: BTreeMap<TaskId, TaskRecord>,
    next_id: TaskId,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    /// Signalled when work is queued or on shutdown.
    work_ready: Condvar,
    /// Signalled when a task reaches a terminal state.
    task_done: Condvar,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct TaskManager {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskManager {
    /// Start `workers` worker threads.
    pub fn new(workers: usize) -> Result<Self> {
        if workers == 0 {
            return Err(AlbumError::Validation(
                "task manager needs at least one worker".to_string(),
            ));
        }
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                records: BTreeMap::new(),
                next_id: 1,
                shutdown: false,
            }),
            work_ready: Condvar::new(),
            task_done: Condvar::new(),
        });
        let mut handles = Vec::with_capacity(workers);
        for i in 0..workers {
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("album-task-{}", i))
                .spawn(move || worker_loop(&shared))
                .map_err(|e| AlbumError::io(std::path::Path::new("album-task"), e))?;
            handles.push(handle);
        }
        debug!("task manager started with {} workers", workers);
        Ok(Self {
            shared,
            workers: Mutex::new(handles),
        })
    }

    /// Queue a task. Returns its id.
    pub fn register(&self, task: Task) -> Result<TaskId> {
        let mut state = lock(&self.shared.state);
        if state.shutdown {
            return Err(AlbumError::Validation(
                "task manager is shut down".to_string(),
            ));
        }
        let id = state.next_id;
        state.next_id += 1;
        state.records.insert(
            id,
            TaskRecord {
                id,
                name: task.name,
                status: TaskStatus::Waiting,
                log: Vec::new(),
                error: None,
            },
        );
        state.queue.push_back((id, task.work));
        drop(state);
        self.shared.work_ready.notify_one();
        Ok(id)
    }

    pub fn get(&self, id: TaskId) -> Result<TaskRecord> {
        lock(&self.shared.state)
            .records
            .get(&id)
            .cloned()
            .ok_or_else(|| AlbumError::NotFound(format!("task {}", id)))
    }

    /// Every task in registration order.
    pub fn list(&self) -> Vec<TaskRecord> {
        lock(&self.shared.state).records.values().cloned().collect()
    }

    /// Drop the records of finished and failed tasks. Returns how many were
    /// dropped. Waiting and running tasks are kept.
    pub fn prune(&self) -> usize {
        let mut state = lock(&self.shared.state);
        let before = state.records.len();
        state.records.retain(|_, r| !r.status.is_terminal());
        before - state.records.len()
    }

    /// Block until the task reaches a terminal state.
    pub fn wait(&self, id: TaskId) -> Result<TaskRecord> {
        let mut state = lock(&self.shared.state);
        loop {
            match state.records.get(&id) {
                None => return Err(AlbumError::NotFound(format!("task {}", id))),
                Some(r) if r.status.is_terminal() => return Ok(r.clone()),
                Some(_) => {}
            }
            state = self
                .shared
                .task_done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Stop accepting tasks, drain the queue, and join the workers.
    pub fn shutdown(&self) {
        lock(&self.shared.state).shutdown = true;
        self.shared.work_ready.notify_all();
        let handles: Vec<_> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("task worker exited abnormally");
            }
        }
    }
}

impl Drop for TaskManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &Shared) {
    loop {
        let (id, work) = {
            let mut state = lock(&shared.state);
            loop {
                if let Some(next) = state.queue.pop_front() {
                    break next;
                }
                if state.shutdown {
                    return;
                }
                state = shared
                    .work_ready
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };
        if let Some(record) = lock(&shared.state).records.get_mut(&id) {
            record.transition(TaskStatus::Running);
        }
        debug!("task {} running", id);

        let log = TaskLog::default();
        let outcome = catch_unwind(AssertUnwindSafe(|| work(&log)));
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };
        if let Some(ref e) = error {
            warn!("task {} failed: {}", id, e);
            log.push(format!("error: {}", e));
        }

        let mut state = lock(&shared.state);
        if let Some(record) = state.records.get_mut(&id) {
            let to = if error.is_some() {
                TaskStatus::Failed
            } else {
                TaskStatus::Finished
            };
            if record.transition(to) {
                record.log = log.lines();
                record.error = error;
            }
        }
        drop(state);
        shared.task_done.notify_all();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}
