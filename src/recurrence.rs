//! Recurring-task generation and overdue detection.
//!
//! Everything here works on an in-memory task list and never touches the
//! store; callers persist once when the returned counts are non-zero.

use chrono::{Duration, NaiveDate, NaiveTime};
use log::{debug, warn};

use crate::clock::{timestamp, Clock};
use crate::models::{format_date, parse_date, Recurrence, Task, TaskKind, TaskStatus};
use crate::storage::IdAllocator;

/// How long past the end of its due day a task may stay open before it is missed.
pub const GRACE_HOURS: i64 = 24;

/// Due date of the occurrence after `anchor`.
pub fn next_due_date(recurrence: Recurrence, anchor: NaiveDate) -> NaiveDate {
    anchor + Duration::days(recurrence.offset_days())
}

/// Index of the template owning task `id`: the task itself if it is a
/// template, else its parent (one hop).
pub fn resolve_template(tasks: &[Task], id: u64) -> Option<usize> {
    let idx = tasks.iter().position(|t| t.id == id)?;
    match tasks[idx].kind {
        TaskKind::Template => Some(idx),
        TaskKind::Instance { parent_task_id } => tasks
            .iter()
            .position(|t| t.id == parent_task_id && t.is_template()),
        TaskKind::Single => None,
    }
}

/// Latest resolvable due date in the chain of the template at `template_idx`,
/// counting the template's own date.
pub fn anchor_date(tasks: &[Task], template_idx: usize) -> Option<NaiveDate> {
    let template_id = tasks[template_idx].id;
    tasks
        .iter()
        .filter(|t| t.parent_task_id() == Some(template_id))
        .filter_map(Task::due)
        .chain(tasks[template_idx].due())
        .max()
}

/// Appends the occurrence after `anchor` to the chain of the template at
/// `template_idx` and returns a copy of it.
///
/// Returns `None` without touching `tasks` when the template has no
/// recurrence, the chain has ended, or the chain already holds an instance
/// on that date.
pub fn create_next_instance(
    tasks: &mut Vec<Task>,
    ids: &mut IdAllocator,
    template_idx: usize,
    anchor: NaiveDate,
    clock: &impl Clock,
) -> Option<Task> {
    let template = tasks.get(template_idx)?;
    if !template.is_template() {
        return None;
    }
    let recurrence = template.recurrence?;
    let next = next_due_date(recurrence, anchor);

    // An end date that does not parse does not end the chain.
    if let Some(end) = template.recurrence_end_date.as_deref().and_then(parse_date) {
        if clock.today() > end || next > end {
            debug!("chain {} ended on {}", template.id, end);
            return None;
        }
    }

    let template_id = template.id;
    let exists = tasks
        .iter()
        .any(|t| t.parent_task_id() == Some(template_id) && t.due() == Some(next));
    if exists {
        return None;
    }

    let template = &tasks[template_idx];
    let instance = Task {
        id: ids.next_id(),
        title: template.title.clone(),
        description: template.description.clone(),
        priority: template.priority,
        due_date: Some(format_date(next)),
        status: TaskStatus::Open,
        goal_id: template.goal_id,
        time_spent: template.time_spent,
        recurrence: Some(recurrence),
        kind: TaskKind::Instance { parent_task_id: template_id },
        recurrence_end_date: template.recurrence_end_date.clone(),
        created_at: timestamp(clock.now()),
    };
    debug!("chain {}: created instance {} due {}", template_id, instance.id, next);
    tasks.push(instance.clone());
    Some(instance)
}

/// Generates every missing instance up to and including today, for every chain.
///
/// Returns the number of instances appended; zero when already caught up.
pub fn ensure_caught_up(
    tasks: &mut Vec<Task>,
    ids: &mut IdAllocator,
    clock: &impl Clock,
) -> usize {
    let today = clock.today();
    let templates: Vec<usize> = tasks
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_template() && t.recurrence.is_some())
        .map(|(i, _)| i)
        .collect();

    let mut created = 0;
    for idx in templates {
        let Some(mut anchor) = anchor_date(tasks, idx) else {
            warn!("skipping chain {}: no valid due date", tasks[idx].id);
            continue;
        };
        while anchor < today {
            match create_next_instance(tasks, ids, idx, anchor, clock) {
                Some(instance) => {
                    created += 1;
                    match instance.due() {
                        Some(due) => anchor = due,
                        None => break,
                    }
                }
                None => break,
            }
        }
    }
    created
}

/// Marks open tasks more than a day past their due date as missed.
///
/// A missed recurring task still gets its successor, so a chain keeps
/// producing instances through days nobody opened the app. Returns the number
/// of tasks marked.
pub fn mark_overdue(
    tasks: &mut Vec<Task>,
    ids: &mut IdAllocator,
    clock: &impl Clock,
) -> usize {
    let now = clock.now();
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    let mut marked = 0;

    // Instances appended below are visited too.
    let mut i = 0;
    while i < tasks.len() {
        let task = &tasks[i];
        i += 1;
        if task.status != TaskStatus::Open {
            continue;
        }
        let Some(due) = task.due() else {
            continue;
        };
        if now - due.and_time(end_of_day) <= Duration::hours(GRACE_HOURS) {
            continue;
        }

        let id = task.id;
        let recurring = task.recurrence.is_some();
        tasks[i - 1].status = TaskStatus::Missed { at: Some(timestamp(now)) };
        marked += 1;
        debug!("task {} missed (due {})", id, due);

        if recurring {
            if let Some(template_idx) = resolve_template(tasks, id) {
                create_next_instance(tasks, ids, template_idx, due, clock);
            }
        }
    }
    marked
}

/// Open, dated tasks whose due day ends within the next `hours` hours.
///
/// A negative window selects nothing; a window too large for `Duration`
/// has no upper bound.
pub fn due_within<'a>(tasks: &'a [Task], hours: i64, clock: &impl Clock) -> Vec<&'a Task> {
    if hours < 0 {
        return Vec::new();
    }
    let limit = Duration::try_hours(hours);
    let now = clock.now();
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default();
    tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Open)
        .filter(|t| match t.due() {
            Some(due) => {
                let left = due.and_time(end_of_day) - now;
                left >= Duration::zero() && limit.map_or(true, |limit| left <= limit)
            }
            None => false,
        })
        .collect()
}
