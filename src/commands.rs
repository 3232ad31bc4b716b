use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Attribute, Cell, Color, ContentArrangement, Table};

use crate::clock::Clock;
use crate::goals::{GoalBook, GoalUpdate};
use crate::models::{parse_date, Priority, Recurrence, Task, TaskKind, TaskStatus};
use crate::storage::{GoalStore, HabitStore, TaskStore};
use crate::tracker::{NewTask, TaskUpdate, Tracker};

/// Parses a user-supplied `YYYY-MM-DD` date.
pub fn parse_user_date(raw: &str) -> Result<NaiveDate> {
    match parse_date(raw) {
        Some(d) => Ok(d),
        None => bail!("Invalid date '{}'. Use YYYY-MM-DD.", raw),
    }
}

fn header(names: &[&str]) -> Vec<Cell> {
    names.iter().map(|n| Cell::new(n).add_attribute(Attribute::Bold)).collect()
}

/// Renders tasks as a table, in the given order.
pub fn task_table(tasks: &[Task], today: NaiveDate) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header(&[
            "ID",
            "Title",
            "Priority",
            "Due",
            "Time Left",
            "Goal",
            "Recur",
            "Status",
        ]));

    for t in tasks {
        let days_left = t.due().map(|d| (d - today).num_days());
        let time_left = match days_left {
            Some(d) if d < 0 => format!("{}d overdue", d.abs()),
            Some(0) => "Today".to_string(),
            Some(d) => format!("{}d", d),
            None => "-".to_string(),
        };
        let overdue = days_left.map_or(false, |d| d < 0) && t.status == TaskStatus::Open;

        let recur = match (t.recurrence, t.kind) {
            (Some(r), TaskKind::Template) => format!("{} (template)", r),
            (Some(r), TaskKind::Instance { parent_task_id }) => {
                format!("{} (#{})", r, parent_task_id)
            }
            (Some(r), TaskKind::Single) => r.to_string(),
            (None, _) => String::new(),
        };
        let priority_color = match t.priority {
            Priority::Now => Color::Red,
            Priority::Next => Color::Yellow,
            Priority::Later => Color::Reset,
        };
        let status_color = match t.status {
            TaskStatus::Open => Color::Yellow,
            TaskStatus::Completed { .. } => Color::Green,
            TaskStatus::Missed { .. } => Color::Red,
        };

        table.add_row(vec![
            Cell::new(t.id),
            Cell::new(&t.title),
            Cell::new(t.priority).fg(priority_color),
            Cell::new(t.due_date.as_deref().unwrap_or("-")),
            Cell::new(time_left).fg(if overdue { Color::Red } else { Color::Reset }),
            Cell::new(t.goal_id.map_or_else(|| "Misc".to_string(), |g| g.to_string())),
            Cell::new(recur),
            Cell::new(t.status.label()).fg(status_color),
        ]);
    }
    table
}

/// Sorts undated tasks last, then by due date, then by id.
fn sort_by_due(tasks: &mut [Task]) {
    tasks.sort_by_key(|t| (t.due().is_none(), t.due(), t.id));
}

/// Lists tasks after catching up recurring chains and marking missed tasks.
///
/// By default, hides completed and missed tasks unless `all` is true.
pub fn cmd_list<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, all: bool) -> Result<()> {
    let mut tasks = tracker.get_tasks().context("failed to refresh tasks")?;
    if !all {
        tasks.retain(|t| t.status == TaskStatus::Open);
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    sort_by_due(&mut tasks);
    println!("{}", task_table(&tasks, tracker.clock().today()));
    Ok(())
}

/// Arguments of `add` as typed on the command line.
pub struct AddArgs {
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub due: Option<String>,
    pub goal: Option<u64>,
    pub hours: Option<f64>,
    pub recur: Option<String>,
    pub until: Option<String>,
}

pub fn cmd_add<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, args: AddArgs) -> Result<()> {
    let new = NewTask {
        title: args.title,
        description: args.description.unwrap_or_default(),
        priority: parse_opt::<Priority>(args.priority.as_deref())?.unwrap_or_default(),
        due_date: args.due.as_deref().map(parse_user_date).transpose()?,
        goal_id: args.goal,
        time_spent: args.hours,
        recurrence: parse_opt::<Recurrence>(args.recur.as_deref())?,
        recurrence_end_date: args.until.as_deref().map(parse_user_date).transpose()?,
    };
    let task = tracker.add_task(new).context("failed to save tasks")?;
    println!("Task added (id = {})", task.id);
    Ok(())
}

fn parse_opt<T: std::str::FromStr<Err = String>>(raw: Option<&str>) -> Result<Option<T>> {
    raw.map(|s| s.parse::<T>()).transpose().map_err(anyhow::Error::msg)
}

/// Flips completion of a task; completing a recurring one schedules the next.
pub fn cmd_toggle<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, id: u64) -> Result<()> {
    match tracker.toggle_task(id).context("failed to save tasks")? {
        Some(t) if t.is_completed() => println!("Task {} marked as complete.", id),
        Some(_) => println!("Task {} reopened.", id),
        None => bail!("Task {} not found.", id),
    }
    Ok(())
}

/// Generates the next instance of the chain owning `id`.
pub fn cmd_next<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, id: u64) -> Result<()> {
    match tracker.create_next_recurring_instance(id).context("failed to save tasks")? {
        Some(t) => println!(
            "Recurring task created due on {} (id = {})",
            t.due_date.as_deref().unwrap_or("-"),
            t.id
        ),
        None => println!("Nothing to generate for task {}.", id),
    }
    Ok(())
}

/// Arguments of `edit`; only the given fields change.
#[derive(Default)]
pub struct EditArgs {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<String>,
    pub due: Option<String>,
    pub goal: Option<u64>,
    pub no_goal: bool,
    pub hours: Option<f64>,
    pub recur: Option<String>,
    pub no_recur: bool,
    pub until: Option<String>,
}

pub fn cmd_edit<S: TaskStore, C: Clock>(
    tracker: &Tracker<S, C>,
    id: u64,
    args: EditArgs,
) -> Result<()> {
    let recurrence = if args.no_recur {
        Some(None)
    } else {
        parse_opt::<Recurrence>(args.recur.as_deref())?.map(Some)
    };
    let update = TaskUpdate {
        title: args.title,
        description: args.description,
        priority: parse_opt::<Priority>(args.priority.as_deref())?,
        due_date: args.due.as_deref().map(parse_user_date).transpose()?,
        goal_id: if args.no_goal {
            Some(None)
        } else {
            args.goal.map(Some)
        },
        time_spent: args.hours,
        recurrence,
        recurrence_end_date: args
            .until
            .as_deref()
            .map(parse_user_date)
            .transpose()?
            .map(Some),
    };
    match tracker.update_task(id, update).context("failed to save tasks")? {
        Some(_) => println!("Task {} updated.", id),
        None => bail!("Task {} not found.", id),
    }
    Ok(())
}

pub fn cmd_remove<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, id: u64) -> Result<()> {
    if tracker.delete_task(id).context("failed to save tasks")? {
        println!("Task {} removed.", id);
        Ok(())
    } else {
        bail!("Task {} not found.", id)
    }
}

pub fn cmd_search<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, query: &str) -> Result<()> {
    let mut tasks = tracker.search_tasks(query);
    if tasks.is_empty() {
        println!("No tasks match '{}'.", query);
        return Ok(());
    }
    sort_by_due(&mut tasks);
    println!("{}", task_table(&tasks, tracker.clock().today()));
    Ok(())
}

/// Lists open tasks due within `hours` hours.
pub fn cmd_due<S: TaskStore, C: Clock>(tracker: &Tracker<S, C>, hours: i64) -> Result<()> {
    if hours < 0 {
        bail!("--hours must not be negative (got {}).", hours);
    }
    let mut tasks = tracker.due_soon(hours);
    if tasks.is_empty() {
        println!("Nothing due in the next {}h.", hours);
        return Ok(());
    }
    sort_by_due(&mut tasks);
    println!("{}", task_table(&tasks, tracker.clock().today()));
    Ok(())
}

pub fn cmd_goal_add<G: GoalStore, H: HabitStore>(
    book: &GoalBook<G, H>,
    title: String,
    description: Option<String>,
    hours: Option<f64>,
    clock: &impl Clock,
) -> Result<()> {
    let goal = book
        .add(title, description.unwrap_or_default(), hours, clock)
        .context("failed to save goals")?;
    println!("Goal added (id = {})", goal.id);
    Ok(())
}

pub fn cmd_goal_list<G: GoalStore, H: HabitStore>(book: &GoalBook<G, H>) {
    let goals = book.list();
    if goals.is_empty() {
        println!("No goals found.");
        return;
    }
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["ID", "Title", "Description", "Time Goal"]);
    for g in goals {
        table.add_row(vec![
            g.id.to_string(),
            g.title,
            g.description,
            g.time_goal.map_or_else(|| "-".into(), |h| format!("{:.1}h", h)),
        ]);
    }
    println!("{table}");
}

/// Edits a goal; `hours` of 0 clears its time target.
pub fn cmd_goal_edit<G: GoalStore, H: HabitStore>(
    book: &GoalBook<G, H>,
    id: u64,
    update: GoalUpdate,
) -> Result<()> {
    match book.update(id, update).context("failed to save goals")? {
        Some(_) => println!("Goal {} updated.", id),
        None => bail!("Goal {} not found.", id),
    }
    Ok(())
}

pub fn cmd_goal_remove<G: GoalStore, H: HabitStore, S: TaskStore, C: Clock>(
    book: &GoalBook<G, H>,
    tracker: &Tracker<S, C>,
    id: u64,
) -> Result<()> {
    if book.delete(id, tracker).context("failed to remove goal")? {
        println!("Goal {} removed.", id);
        Ok(())
    } else {
        bail!("Goal {} not found.", id)
    }
}

pub fn cmd_goal_progress<G: GoalStore, H: HabitStore, S: TaskStore, C: Clock>(
    book: &GoalBook<G, H>,
    tracker: &Tracker<S, C>,
    id: u64,
) -> Result<()> {
    let Some(goal) = book.get(id) else {
        bail!("Goal {} not found.", id);
    };
    let tasks = tracker.get_tasks().context("failed to refresh tasks")?;
    let p = book.progress(id, &tasks);
    println!(
        "{}: {}/{} done ({:.2}%)",
        goal.title, p.completed, p.total, p.percentage
    );
    println!("  Tasks: {}/{}", p.tasks_completed, p.tasks_total);
    println!("  Habits: {}/{} checked in", p.habits_completed, p.habits_total);
    match (p.time_goal, p.time_percentage) {
        (Some(target), Some(pct)) => println!(
            "Time: {:.2}h of {:.2}h ({:.2}%)",
            p.time_spent, target, pct
        ),
        _ => println!("Time: {:.2}h", p.time_spent),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::storage::MemoryTaskStore;

    fn tracker_on(day: &str) -> Tracker<MemoryTaskStore, FixedClock> {
        Tracker::new(
            MemoryTaskStore::new(),
            FixedClock::on(parse_user_date(day).unwrap()),
        )
    }

    #[test]
    fn due_rejects_negative_window() {
        let tracker = tracker_on("2024-01-01");
        assert!(cmd_due(&tracker, -1).is_err());
        assert!(cmd_due(&tracker, i64::MAX).is_ok());
    }

    #[test]
    fn rejects_bad_dates_and_patterns() {
        let tracker = tracker_on("2024-01-01");
        let bad_date = AddArgs {
            title: "x".into(),
            description: None,
            priority: None,
            due: Some("01/02/2024".into()),
            goal: None,
            hours: None,
            recur: None,
            until: None,
        };
        assert!(cmd_add(&tracker, bad_date).is_err());

        let bad_recur = AddArgs {
            title: "x".into(),
            description: None,
            priority: None,
            due: Some("2024-01-02".into()),
            goal: None,
            hours: None,
            recur: Some("hourly".into()),
            until: None,
        };
        assert!(cmd_add(&tracker, bad_recur).is_err());
        assert!(tracker.store().load().is_empty());
    }

    #[test]
    fn table_shows_chain_roles_and_status() {
        let tracker = tracker_on("2024-01-01");
        let args = AddArgs {
            title: "Standup".into(),
            description: None,
            priority: Some("now".into()),
            due: Some("2024-01-01".into()),
            goal: None,
            hours: None,
            recur: Some("daily".into()),
            until: None,
        };
        cmd_add(&tracker, args).unwrap();

        let today = parse_user_date("2024-01-01").unwrap();
        let mut table = task_table(&tracker.store().load(), today);
        let rendered = table
            .set_content_arrangement(ContentArrangement::Disabled)
            .to_string();
        assert!(rendered.contains("daily (template)"));
        assert!(rendered.contains("daily (#1)"));
        assert!(rendered.contains("Misc"));
        assert!(rendered.contains("Today"));
    }

    #[test]
    fn undated_tasks_sort_last() {
        let tracker = tracker_on("2024-01-01");
        tracker
            .add_task(NewTask {
                title: "undated".into(),
                ..NewTask::default()
            })
            .unwrap();
        tracker
            .add_task(NewTask {
                title: "dated".into(),
                due_date: Some(parse_user_date("2024-02-01").unwrap()),
                ..NewTask::default()
            })
            .unwrap();
        let mut tasks = tracker.store().load();
        sort_by_due(&mut tasks);
        assert_eq!(tasks[0].title, "dated");
    }
}
