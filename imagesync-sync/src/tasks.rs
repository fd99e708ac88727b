//! Task registry: the only state shared between pipelines and observers.
//!
//! The id → task map sits behind one `RwLock` that is held only long enough
//! to clone an `Arc`; each task then has its own `RwLock`. Readers of
//! different tasks never wait on each other, and a writer only blocks
//! readers of the same task for the duration of one mutation.
//!
//! Invariants enforced here rather than by callers:
//! - status moves forward only (see [`TaskStatus::rank`])
//! - progress never decreases, and only [`TaskHandle::finish_success`] sets 100
//! - after a terminal status, only log lines may be appended

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::Utc;

use imagesync_core::{
    LogEntry, Platform, PlatformOutcome, PlatformResult, StrategyKind, Task, TaskId, TaskStatus,
    TaskSummary,
};

/// Highest progress a running task may report.
const RUNNING_PROGRESS_CAP: u8 = 99;

struct TaskCell {
    state: RwLock<Task>,
}

struct RegistryInner {
    tasks: HashMap<TaskId, Arc<TaskCell>>,
    /// Creation order, oldest first.
    order: VecDeque<TaskId>,
}

pub struct TaskRegistry {
    inner: RwLock<RegistryInner>,
    capacity: usize,
}

impl TaskRegistry {
    /// `capacity` is a soft bound: only terminal tasks are evicted to honour it.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(RegistryInner {
                tasks: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Allocate a `pending` task with an id never used by this registry.
    pub fn create(&self, source: String, destination: String, platforms: Vec<Platform>) -> TaskHandle {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);

        let mut id = TaskId::generate();
        while inner.tasks.contains_key(&id) {
            id = TaskId::generate();
        }

        evict_finished(&mut inner, self.capacity.saturating_sub(1));

        let cell = Arc::new(TaskCell {
            state: RwLock::new(Task::new(id.clone(), source, destination, platforms)),
        });
        inner.tasks.insert(id.clone(), cell.clone());
        inner.order.push_back(id.clone());
        TaskHandle { id, cell }
    }

    /// Consistent snapshot of one task.
    pub fn get(&self, id: &TaskId) -> Option<Task> {
        self.get_since(id, 0)
    }

    /// Snapshot whose `logs` holds only entries at index `>= log_offset`.
    /// `log_total` always carries the full count.
    pub fn get_since(&self, id: &TaskId, log_offset: usize) -> Option<Task> {
        let cell = self.cell(id)?;
        let task = cell.state.read().unwrap_or_else(PoisonError::into_inner);
        Some(snapshot(&task, log_offset))
    }

    /// Summaries in creation order.
    pub fn list(&self) -> Vec<TaskSummary> {
        let cells: Vec<Arc<TaskCell>> = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            inner
                .order
                .iter()
                .filter_map(|id| inner.tasks.get(id).cloned())
                .collect()
        };
        cells
            .iter()
            .map(|cell| {
                cell.state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .summary()
            })
            .collect()
    }

    /// Writer handle for an existing task.
    pub fn handle(&self, id: &TaskId) -> Option<TaskHandle> {
        self.cell(id).map(|cell| TaskHandle {
            id: id.clone(),
            cell,
        })
    }

    /// Apply one mutation atomically. Returns `false` if the task is unknown
    /// or already terminal.
    pub fn update<F>(&self, id: &TaskId, mutator: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        self.handle(id).map(|h| h.update(mutator)).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn cell(&self, id: &TaskId) -> Option<Arc<TaskCell>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .tasks
            .get(id)
            .cloned()
    }
}

fn evict_finished(inner: &mut RegistryInner, keep: usize) {
    if inner.tasks.len() <= keep {
        return;
    }
    let mut excess = inner.tasks.len() - keep;
    let mut survivors = VecDeque::with_capacity(inner.order.len());
    while let Some(id) = inner.order.pop_front() {
        let terminal = inner
            .tasks
            .get(&id)
            .map(|cell| {
                cell.state
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .status
                    .is_terminal()
            })
            .unwrap_or(true);
        if excess > 0 && terminal {
            inner.tasks.remove(&id);
            excess -= 1;
            tracing::debug!(task_id = %id, "evicted finished task");
        } else {
            survivors.push_back(id);
        }
    }
    inner.order = survivors;
}

fn snapshot(task: &Task, log_offset: usize) -> Task {
    let start = log_offset.min(task.logs.len());
    let mut copy = task.clone();
    copy.logs.drain(..start);
    copy.log_total = task.logs.len();
    copy
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Write access to one task, held by the pipeline executing it.
#[derive(Clone)]
pub struct TaskHandle {
    id: TaskId,
    cell: Arc<TaskCell>,
}

impl TaskHandle {
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn snapshot(&self) -> Task {
        let task = self.cell.state.read().unwrap_or_else(PoisonError::into_inner);
        snapshot(&task, 0)
    }

    pub fn is_terminal(&self) -> bool {
        self.cell
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .status
            .is_terminal()
    }

    /// Apply `mutator` unless the task is terminal. Progress and status
    /// regressions made by the mutator are undone.
    pub fn update<F>(&self, mutator: F) -> bool
    where
        F: FnOnce(&mut Task),
    {
        let mut task = self.cell.state.write().unwrap_or_else(PoisonError::into_inner);
        if task.status.is_terminal() {
            return false;
        }
        let before_status = task.status;
        let before_progress = task.progress;
        mutator(&mut task);
        if task.status.rank() < before_status.rank() || task.status.is_terminal() {
            task.status = before_status;
        }
        task.progress = task
            .progress
            .clamp(before_progress, RUNNING_PROGRESS_CAP.max(before_progress));
        task.log_total = task.logs.len();
        task.updated_at = Utc::now();
        true
    }

    /// Append one line to the task narrative. Allowed after terminal status.
    pub fn log(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(task_id = %self.id, "{message}");
        let mut task = self.cell.state.write().unwrap_or_else(PoisonError::into_inner);
        task.logs.push(LogEntry {
            at: Utc::now(),
            message,
        });
        task.log_total = task.logs.len();
        task.updated_at = Utc::now();
    }

    pub fn set_status(&self, status: TaskStatus) {
        self.update(|task| {
            if status.rank() >= task.status.rank() {
                task.status = status;
            }
        });
    }

    pub fn set_step(&self, step: impl Into<String>) {
        let step = step.into();
        self.update(|task| task.current_step = step);
    }

    /// Raise progress to `progress` (capped below 100); lower values are ignored.
    pub fn advance(&self, progress: u8) {
        self.update(|task| task.progress = task.progress.max(progress));
    }

    pub fn set_strategy(&self, strategy: StrategyKind) {
        self.update(|task| {
            if task.strategy.is_none() {
                task.strategy = Some(strategy);
            }
        });
    }

    pub fn record_platform(&self, platform: &Platform, outcome: PlatformOutcome) {
        self.update(|task| {
            match task
                .platform_results
                .iter_mut()
                .find(|r| &r.platform == platform)
            {
                Some(existing) => existing.outcome = outcome,
                None => task.platform_results.push(PlatformResult {
                    platform: platform.clone(),
                    outcome,
                }),
            }
        });
    }

    /// Terminal success: status, progress 100, and step set together.
    pub fn finish_success(&self, step: impl Into<String>) -> bool {
        self.finish(TaskStatus::Success, Some(step.into()), None)
    }

    /// Terminal failure. Progress and the step that failed are kept.
    pub fn finish_failed(&self, error: impl Into<String>) -> bool {
        self.finish(TaskStatus::Failed, None, Some(error.into()))
    }

    fn finish(&self, status: TaskStatus, step: Option<String>, error: Option<String>) -> bool {
        let mut task = self.cell.state.write().unwrap_or_else(PoisonError::into_inner);
        if task.status.is_terminal() {
            return false;
        }
        let now = Utc::now();
        task.status = status;
        if status == TaskStatus::Success {
            task.progress = 100;
        }
        if let Some(step) = step {
            task.current_step = step;
        }
        task.error = error;
        task.finished_at = Some(now);
        task.updated_at = now;
        true
    }
}
