use log::info;
use serde_json::Value;

use crate::clock::{timestamp, Clock};
use crate::error::StoreResult;
use crate::models::{Goal, Task};
use crate::storage::{GoalStore, HabitStore, TaskStore};
use crate::tracker::Tracker;

/// Progress of the tasks and habits linked to one goal.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalProgress {
    pub total: usize,
    pub completed: usize,
    pub tasks_total: usize,
    pub tasks_completed: usize,
    pub habits_total: usize,
    /// Habits with at least one check-in.
    pub habits_completed: usize,
    /// Completed share of everything linked, 0-100, two decimals.
    pub percentage: f64,
    pub time_goal: Option<f64>,
    /// Hours spent on completed tasks plus timed habit check-ins.
    pub time_spent: f64,
    /// Share of `time_goal` reached, capped at 100.
    pub time_percentage: Option<f64>,
}

/// Partial update of a goal. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct GoalUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    /// A non-positive value clears the target.
    pub time_goal: Option<f64>,
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

fn habit_goal_id(habit: &Value) -> Option<u64> {
    habit.get("goal_id").and_then(Value::as_u64)
}

fn habit_check_ins(habit: &Value) -> &[Value] {
    habit
        .get("check_ins")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

/// Hours logged on a time-tracked habit; check-ins store minutes.
fn habit_hours(habit: &Value) -> f64 {
    if habit.get("track_time").and_then(Value::as_bool) != Some(true) {
        return 0.0;
    }
    habit_check_ins(habit)
        .iter()
        .filter_map(|c| c.get("time_spent").and_then(Value::as_f64))
        .sum::<f64>()
        / 60.0
}

/// Goal operations over the goals file and the habit tracker's habits.
pub struct GoalBook<G: GoalStore, H: HabitStore> {
    goals: G,
    habits: H,
}

impl<G: GoalStore, H: HabitStore> GoalBook<G, H> {
    pub fn new(goals: G, habits: H) -> Self {
        GoalBook { goals, habits }
    }

    pub fn list(&self) -> Vec<Goal> {
        self.goals.load()
    }

    pub fn get(&self, id: u64) -> Option<Goal> {
        self.goals.load().into_iter().find(|g| g.id == id)
    }

    /// Creates a goal. Ids of deleted goals are never handed out again.
    pub fn add(
        &self,
        title: String,
        description: String,
        time_goal: Option<f64>,
        clock: &impl Clock,
    ) -> StoreResult<Goal> {
        let mut goals = self.goals.load();
        let last = goals
            .iter()
            .map(|g| g.id)
            .max()
            .unwrap_or(0)
            .max(self.goals.last_issued_id());
        let goal = Goal {
            id: last + 1,
            title,
            description,
            time_goal: time_goal.filter(|h| *h > 0.0),
            created_at: timestamp(clock.now()),
        };
        goals.push(goal.clone());
        self.goals.save(&goals)?;
        info!("goal added (id = {})", goal.id);
        Ok(goal)
    }

    pub fn update(&self, id: u64, update: GoalUpdate) -> StoreResult<Option<Goal>> {
        let mut goals = self.goals.load();
        let Some(g) = goals.iter_mut().find(|g| g.id == id) else {
            return Ok(None);
        };
        if let Some(title) = update.title {
            g.title = title;
        }
        if let Some(description) = update.description {
            g.description = description;
        }
        if let Some(hours) = update.time_goal {
            g.time_goal = Some(hours).filter(|h| *h > 0.0);
        }
        let updated = g.clone();
        self.goals.save(&goals)?;
        Ok(Some(updated))
    }

    /// Removes goal `id` and unlinks the tasks and habits that pointed at it.
    ///
    /// Returns `false` if no such goal exists.
    pub fn delete<S: TaskStore, C: Clock>(
        &self,
        id: u64,
        tracker: &Tracker<S, C>,
    ) -> StoreResult<bool> {
        let mut goals = self.goals.load();
        let len_before = goals.len();
        goals.retain(|g| g.id != id);
        if goals.len() == len_before {
            return Ok(false);
        }
        self.goals.save(&goals)?;
        let tasks_unlinked = tracker.unlink_goal(id)?;

        let mut habits = self.habits.load();
        let mut habits_unlinked = 0;
        for habit in habits.iter_mut().filter(|h| habit_goal_id(h) == Some(id)) {
            habit["goal_id"] = Value::Null;
            habits_unlinked += 1;
        }
        if habits_unlinked > 0 {
            self.habits.save(&habits)?;
        }
        info!(
            "goal {} removed, {} task(s) and {} habit(s) unlinked",
            id, tasks_unlinked, habits_unlinked
        );
        Ok(true)
    }

    /// Completion and time progress of goal `id` across `tasks` and the
    /// habit tracker's habits.
    pub fn progress(&self, id: u64, tasks: &[Task]) -> GoalProgress {
        let time_goal = self.get(id).and_then(|g| g.time_goal);

        let linked: Vec<&Task> = tasks.iter().filter(|t| t.goal_id == Some(id)).collect();
        let done: Vec<&&Task> = linked.iter().filter(|t| t.is_completed()).collect();
        let task_hours: f64 = done.iter().filter_map(|t| t.time_spent).sum();

        let habits: Vec<Value> = self
            .habits
            .load()
            .into_iter()
            .filter(|h| habit_goal_id(h) == Some(id))
            .collect();
        let habits_completed = habits
            .iter()
            .filter(|h| !habit_check_ins(h).is_empty())
            .count();
        let habit_hours: f64 = habits.iter().map(habit_hours).sum();

        let total = linked.len() + habits.len();
        let completed = done.len() + habits_completed;
        let time_spent = task_hours + habit_hours;
        let percentage = if total == 0 {
            0.0
        } else {
            completed as f64 / total as f64 * 100.0
        };
        let time_percentage = time_goal
            .filter(|g| *g > 0.0)
            .map(|g| round2((time_spent / g * 100.0).min(100.0)));

        GoalProgress {
            total,
            completed,
            tasks_total: linked.len(),
            tasks_completed: done.len(),
            habits_total: habits.len(),
            habits_completed,
            percentage: round2(percentage),
            time_goal,
            time_spent: round2(time_spent),
            time_percentage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::models::parse_date;
    use crate::storage::{JsonGoalStore, JsonHabitStore, MemoryTaskStore};
    use crate::tracker::NewTask;
    use std::fs;
    use tempfile::TempDir;

    fn clock() -> FixedClock {
        FixedClock::on(parse_date("2024-05-01").unwrap())
    }

    fn book(dir: &TempDir) -> GoalBook<JsonGoalStore, JsonHabitStore> {
        GoalBook::new(
            JsonGoalStore::new(dir.path().join("goals.json")),
            JsonHabitStore::new(dir.path().join("habits.json")),
        )
    }

    #[test]
    fn progress_counts_completed_time() {
        let dir = TempDir::new().unwrap();
        let book = book(&dir);
        let goal = book
            .add("Learn Rust".into(), String::new(), Some(10.0), &clock())
            .unwrap();

        let tracker = Tracker::new(MemoryTaskStore::new(), clock());
        for (title, hours) in [("read book", 3.0), ("exercises", 2.5), ("project", 4.0)] {
            tracker
                .add_task(NewTask {
                    title: title.into(),
                    goal_id: Some(goal.id),
                    time_spent: Some(hours),
                    ..NewTask::default()
                })
                .unwrap();
        }
        tracker.toggle_task(1).unwrap();
        tracker.toggle_task(2).unwrap();

        let progress = book.progress(goal.id, &tracker.store().load());
        assert_eq!(progress.tasks_total, 3);
        assert_eq!(progress.tasks_completed, 2);
        assert_eq!(progress.habits_total, 0);
        assert_eq!(progress.percentage, 66.67);
        assert_eq!(progress.time_spent, 5.5);
        assert_eq!(progress.time_percentage, Some(55.0));
    }

    #[test]
    fn progress_includes_habit_check_ins_and_minutes() {
        let dir = TempDir::new().unwrap();
        let book = book(&dir);
        let goal = book
            .add("Fitness".into(), String::new(), Some(2.0), &clock())
            .unwrap();
        fs::write(
            dir.path().join("habits.json"),
            r#"[
                {"id":1,"title":"Run","goal_id":1,"track_time":true,
                 "check_ins":[{"date":"2024-04-30","time_spent":30},{"date":"2024-05-01","time_spent":60}]},
                {"id":2,"title":"Stretch","goal_id":1,"check_ins":[]},
                {"id":3,"title":"Read","goal_id":9,"check_ins":["2024-05-01"]}
            ]"#,
        )
        .unwrap();

        let progress = book.progress(goal.id, &[]);
        assert_eq!(progress.habits_total, 2);
        assert_eq!(progress.habits_completed, 1);
        assert_eq!(progress.total, 2);
        assert_eq!(progress.percentage, 50.0);
        assert_eq!(progress.time_spent, 1.5);
        assert_eq!(progress.time_percentage, Some(75.0));
    }

    #[test]
    fn delete_unlinks_tasks_and_habits() {
        let dir = TempDir::new().unwrap();
        let book = book(&dir);
        let goal = book.add("Fitness".into(), String::new(), None, &clock()).unwrap();
        fs::write(
            dir.path().join("habits.json"),
            r#"[{"id":1,"title":"Run","goal_id":1,"check_ins":[]},{"id":2,"title":"Read","goal_id":5}]"#,
        )
        .unwrap();
        let tracker = Tracker::new(MemoryTaskStore::new(), clock());
        tracker
            .add_task(NewTask {
                title: "run".into(),
                goal_id: Some(goal.id),
                ..NewTask::default()
            })
            .unwrap();

        assert!(book.delete(goal.id, &tracker).unwrap());
        assert!(!book.delete(goal.id, &tracker).unwrap());
        assert!(book.list().is_empty());
        assert_eq!(tracker.store().load()[0].goal_id, None);

        let habits = JsonHabitStore::new(dir.path().join("habits.json")).load();
        assert!(habits[0]["goal_id"].is_null());
        assert_eq!(habits[1]["goal_id"], 5);
    }

    #[test]
    fn deleted_goal_id_is_not_reused() {
        let dir = TempDir::new().unwrap();
        let book = book(&dir);
        let tracker = Tracker::new(MemoryTaskStore::new(), clock());
        book.add("a".into(), String::new(), None, &clock()).unwrap();
        let b = book.add("b".into(), String::new(), None, &clock()).unwrap();
        book.delete(b.id, &tracker).unwrap();

        let c = book.add("c".into(), String::new(), None, &clock()).unwrap();
        assert_eq!(c.id, b.id + 1);
    }

    #[test]
    fn update_changes_only_given_fields() {
        let dir = TempDir::new().unwrap();
        let book = book(&dir);
        let goal = book
            .add("Piano".into(), "scales".into(), Some(50.0), &clock())
            .unwrap();

        let renamed = book
            .update(
                goal.id,
                GoalUpdate {
                    title: Some("Piano grade 3".into()),
                    ..GoalUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(renamed.title, "Piano grade 3");
        assert_eq!(renamed.description, "scales");
        assert_eq!(renamed.time_goal, Some(50.0));

        let cleared = book
            .update(
                goal.id,
                GoalUpdate {
                    time_goal: Some(0.0),
                    ..GoalUpdate::default()
                },
            )
            .unwrap()
            .unwrap();
        assert_eq!(cleared.time_goal, None);
        assert_eq!(book.get(goal.id), Some(cleared));
        assert!(book.update(99, GoalUpdate::default()).unwrap().is_none());
    }
}
