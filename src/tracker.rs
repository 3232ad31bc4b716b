use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::NaiveDate;
use log::info;

use crate::clock::{timestamp, Clock, SystemClock};
use crate::error::StoreResult;
use crate::models::{format_date, Priority, Recurrence, Task, TaskKind, TaskStatus};
use crate::recurrence::{
    anchor_date, create_next_instance, due_within, ensure_caught_up, mark_overdue,
    resolve_template,
};
use crate::storage::{IdAllocator, TaskStore};

/// Fields of a task being created.
#[derive(Debug, Clone, Default)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Priority,
    pub due_date: Option<NaiveDate>,
    pub goal_id: Option<u64>,
    pub time_spent: Option<f64>,
    /// Makes the task the template of a new chain.
    pub recurrence: Option<Recurrence>,
    pub recurrence_end_date: Option<NaiveDate>,
}

/// Partial update of a task. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<Priority>,
    pub due_date: Option<NaiveDate>,
    /// `Some(None)` unlinks the goal.
    pub goal_id: Option<Option<u64>>,
    /// A non-positive value clears it.
    pub time_spent: Option<f64>,
    /// `Some(Some(_))` turns the task into a template, `Some(None)` drops
    /// every recurrence field.
    pub recurrence: Option<Option<Recurrence>>,
    /// `Some(None)` removes the end date.
    pub recurrence_end_date: Option<Option<NaiveDate>>,
}

/// Criteria for [`Tracker::filter_tasks`]; unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub priority: Option<Priority>,
    pub completed: Option<bool>,
    pub due_date: Option<NaiveDate>,
    pub goal_id: Option<u64>,
}

impl TaskFilter {
    pub fn matches(&self, task: &Task) -> bool {
        self.priority.map_or(true, |p| task.priority == p)
            && self.completed.map_or(true, |c| task.is_completed() == c)
            && self
                .due_date
                .map_or(true, |d| task.due_date.as_deref() == Some(format_date(d).as_str()))
            && self.goal_id.map_or(true, |g| task.goal_id == Some(g))
    }
}

/// Entry points the UI calls into.
///
/// Every operation that writes the store runs under one writer lock, so a
/// background scan sharing this tracker never interleaves with a mutation.
pub struct Tracker<S: TaskStore, C: Clock = SystemClock> {
    store: S,
    clock: C,
    writer: Mutex<()>,
}

impl<S: TaskStore, C: Clock> Tracker<S, C> {
    pub fn new(store: S, clock: C) -> Self {
        Tracker {
            store,
            clock,
            writer: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocator(&self, tasks: &[Task]) -> IdAllocator {
        IdAllocator::new(self.store.last_issued_id(), tasks)
    }

    /// Returns every task after filling in missing recurring instances and
    /// marking missed ones. Saves once, and only if something changed.
    pub fn get_tasks(&self) -> StoreResult<Vec<Task>> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let mut ids = self.allocator(&tasks);

        let created = ensure_caught_up(&mut tasks, &mut ids, &self.clock);
        let missed = mark_overdue(&mut tasks, &mut ids, &self.clock);
        if created > 0 || missed > 0 {
            self.store.save(&tasks)?;
            info!(
                "caught up {} recurring instance(s), marked {} task(s) missed",
                created, missed
            );
        }
        Ok(tasks)
    }

    /// Flips completion of task `id`.
    ///
    /// Completing a recurring task also creates the next instance of its
    /// chain, anchored on this task's due date. Reopening keeps any instance
    /// already generated.
    pub fn toggle_task(&self, id: u64) -> StoreResult<Option<Task>> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let Some(idx) = tasks.iter().position(|t| t.id == id) else {
            return Ok(None);
        };

        let now = timestamp(self.clock.now());
        let task = &mut tasks[idx];
        task.status = match task.status {
            TaskStatus::Completed { .. } => TaskStatus::Open,
            TaskStatus::Open | TaskStatus::Missed { .. } => {
                TaskStatus::Completed { at: Some(now) }
            }
        };

        if task.is_completed() && task.recurrence.is_some() {
            let anchor = task.due();
            if let (Some(anchor), Some(template_idx)) = (anchor, resolve_template(&tasks, id)) {
                let mut ids = self.allocator(&tasks);
                let next =
                    create_next_instance(&mut tasks, &mut ids, template_idx, anchor, &self.clock);
                if let Some(next) = next {
                    info!("task {} completed, next instance {} due {}", id, next.id, anchor);
                }
            }
        }

        self.store.save(&tasks)?;
        Ok(Some(tasks[idx].clone()))
    }

    /// Appends the next instance of the chain owning task `id`, after the
    /// chain's latest due date. `None` when there is nothing to generate.
    pub fn create_next_recurring_instance(&self, id: u64) -> StoreResult<Option<Task>> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let Some(template_idx) = resolve_template(&tasks, id) else {
            return Ok(None);
        };
        let Some(anchor) = anchor_date(&tasks, template_idx) else {
            return Ok(None);
        };
        let mut ids = self.allocator(&tasks);
        let created =
            create_next_instance(&mut tasks, &mut ids, template_idx, anchor, &self.clock);
        if created.is_some() {
            self.store.save(&tasks)?;
        }
        Ok(created)
    }

    /// Creates a task. A task with a recurrence becomes the template of a new
    /// chain and, when dated, immediately gets its first instance.
    pub fn add_task(&self, new: NewTask) -> StoreResult<Task> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let mut ids = self.allocator(&tasks);

        let task = Task {
            id: ids.next_id(),
            title: new.title,
            description: new.description,
            priority: new.priority,
            due_date: new.due_date.map(format_date),
            status: TaskStatus::Open,
            goal_id: new.goal_id,
            time_spent: new.time_spent.filter(|h| *h > 0.0),
            recurrence: new.recurrence,
            kind: if new.recurrence.is_some() {
                TaskKind::Template
            } else {
                TaskKind::Single
            },
            recurrence_end_date: new
                .recurrence
                .and(new.recurrence_end_date)
                .map(format_date),
            created_at: timestamp(self.clock.now()),
        };
        tasks.push(task.clone());

        if let Some(due) = new.due_date.filter(|_| task.is_template()) {
            let template_idx = tasks.len() - 1;
            create_next_instance(&mut tasks, &mut ids, template_idx, due, &self.clock);
        }

        self.store.save(&tasks)?;
        info!("task added (id = {})", task.id);
        Ok(task)
    }

    /// Applies a partial update to task `id`.
    pub fn update_task(&self, id: u64, update: TaskUpdate) -> StoreResult<Option<Task>> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let Some(t) = tasks.iter_mut().find(|t| t.id == id) else {
            return Ok(None);
        };

        if let Some(title) = update.title {
            t.title = title;
        }
        if let Some(description) = update.description {
            t.description = description;
        }
        if let Some(priority) = update.priority {
            t.priority = priority;
        }
        if let Some(due) = update.due_date {
            t.due_date = Some(format_date(due));
        }
        if let Some(goal_id) = update.goal_id {
            t.goal_id = goal_id;
        }
        if let Some(hours) = update.time_spent {
            t.time_spent = Some(hours).filter(|h| *h > 0.0);
        }
        match update.recurrence {
            Some(Some(recurrence)) => {
                t.recurrence = Some(recurrence);
                t.kind = TaskKind::Template;
                if let Some(Some(end)) = update.recurrence_end_date {
                    t.recurrence_end_date = Some(format_date(end));
                }
            }
            Some(None) => {
                t.recurrence = None;
                t.kind = TaskKind::Single;
                t.recurrence_end_date = None;
            }
            None => {
                if let Some(end) = update.recurrence_end_date {
                    t.recurrence_end_date = end.map(format_date);
                }
            }
        }

        let updated = t.clone();
        self.store.save(&tasks)?;
        Ok(Some(updated))
    }

    /// Removes task `id`. Deleting a template leaves its instances in place.
    pub fn delete_task(&self, id: u64) -> StoreResult<bool> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let len_before = tasks.len();
        tasks.retain(|t| t.id != id);
        if tasks.len() == len_before {
            return Ok(false);
        }
        self.store.save(&tasks)?;
        Ok(true)
    }

    /// Clears `goal_id` on every task linked to `goal_id`; returns how many.
    pub fn unlink_goal(&self, goal_id: u64) -> StoreResult<usize> {
        let _guard = self.write_lock();
        let mut tasks = self.store.load();
        let mut unlinked = 0;
        for t in tasks.iter_mut().filter(|t| t.goal_id == Some(goal_id)) {
            t.goal_id = None;
            unlinked += 1;
        }
        if unlinked > 0 {
            self.store.save(&tasks)?;
        }
        Ok(unlinked)
    }

    /// Tasks whose title or description contains `query`, ignoring case.
    pub fn search_tasks(&self, query: &str) -> Vec<Task> {
        let query = query.to_lowercase();
        self.store
            .load()
            .into_iter()
            .filter(|t| {
                t.title.to_lowercase().contains(&query)
                    || t.description.to_lowercase().contains(&query)
            })
            .collect()
    }

    pub fn filter_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        self.store.load().into_iter().filter(|t| filter.matches(t)).collect()
    }

    /// Open tasks due within the next `hours` hours.
    pub fn due_soon(&self, hours: i64) -> Vec<Task> {
        let tasks = self.store.load();
        due_within(&tasks, hours, &self.clock).into_iter().cloned().collect()
    }
}
