//! # taskloop
//!
//! A terminal front end for the to-do data shared with the habit tracker.
//!
//! ## Usage
//!
//! ```bash
//! # Plain task
//! taskloop add "Write report" --priority now --due 2025-12-01
//!
//! # Recurring task; the first instance is created right away
//! taskloop add "Team Standup" --recur daily --due 2025-12-01 --until 2026-06-30
//!
//! # List open tasks (fills in missed recurring instances first)
//! taskloop list
//!
//! # Complete / reopen a task
//! taskloop toggle <ID>
//! ```
//!
//! ## Data Storage
//!
//! Files live in the local data directory (`~/.local/share/ToDo` on Linux),
//! next to the habit tracker's. Override with `TASKLOOP_DATA_DIR`.
//! Set `RUST_LOG=debug` to see every generated instance.

use std::io;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};

use taskloop::clock::SystemClock;
use taskloop::commands::*;
use taskloop::config::DataPaths;
use taskloop::goals::{GoalBook, GoalUpdate};
use taskloop::storage::{JsonGoalStore, JsonHabitStore, JsonTaskStore};
use taskloop::tracker::Tracker;

#[derive(Parser)]
#[command(name = "taskloop")]
#[command(about = "Recurring to-do list shared with the habit tracker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Add a new task
    Add {
        /// Task title (quoted if it has spaces)
        title: String,
        /// Longer description
        #[arg(short, long)]
        description: Option<String>,
        /// Priority (now, next, later)
        #[arg(short, long)]
        priority: Option<String>,
        /// Due date in YYYY-MM-DD
        #[arg(short = 'D', long)]
        due: Option<String>,
        /// Linked goal id
        #[arg(short, long)]
        goal: Option<u64>,
        /// Time spent in hours, e.g. 1.5
        #[arg(short = 'H', long)]
        hours: Option<f64>,
        /// Recurrence (daily, weekly, monthly, yearly)
        #[arg(short, long)]
        recur: Option<String>,
        /// Last date a recurring task may fall on, YYYY-MM-DD
        #[arg(short, long)]
        until: Option<String>,
    },
    /// List tasks, catching up recurring ones first
    List {
        /// Show completed and missed tasks
        #[arg(short, long)]
        all: bool,
    },
    /// Mark a task complete, or reopen it
    Toggle {
        id: u64,
    },
    /// Create the next instance of a recurring task
    Next {
        /// Template id, or the id of any instance in the chain
        id: u64,
    },
    /// Edit a task
    Edit {
        id: u64,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// New priority
        #[arg(short, long)]
        priority: Option<String>,
        /// New due date
        #[arg(short = 'D', long)]
        due: Option<String>,
        /// New goal id
        #[arg(short, long, conflicts_with = "no_goal")]
        goal: Option<u64>,
        /// Unlink the goal
        #[arg(long)]
        no_goal: bool,
        /// New time spent (0 clears it)
        #[arg(short = 'H', long)]
        hours: Option<f64>,
        /// Make the task recurring
        #[arg(short, long, conflicts_with = "no_recur")]
        recur: Option<String>,
        /// Stop the task from recurring
        #[arg(long)]
        no_recur: bool,
        /// New recurrence end date
        #[arg(short, long)]
        until: Option<String>,
    },
    /// Remove a task
    Remove {
        id: u64,
    },
    /// Search titles and descriptions
    Search {
        query: String,
    },
    /// Show open tasks due soon
    Due {
        /// Look-ahead window in hours
        #[arg(long, default_value_t = 24)]
        hours: i64,
    },
    /// Manage goals
    Goal {
        #[command(subcommand)]
        command: GoalCommands,
    },
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for (bash, zsh, fish, powershell, elvish)
        shell: String,
    },
}

#[derive(Subcommand)]
enum GoalCommands {
    /// Add a new goal
    Add {
        title: String,
        #[arg(short, long)]
        description: Option<String>,
        /// Target duration in hours
        #[arg(short = 'H', long)]
        hours: Option<f64>,
    },
    /// List goals
    List,
    /// Edit a goal
    Edit {
        id: u64,
        /// New title
        #[arg(short, long)]
        title: Option<String>,
        /// New description
        #[arg(short, long)]
        description: Option<String>,
        /// New target duration in hours (0 clears it)
        #[arg(short = 'H', long)]
        hours: Option<f64>,
    },
    /// Remove a goal and unlink its tasks and habits
    Remove {
        id: u64,
    },
    /// Show progress of a goal
    Progress {
        id: u64,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::List { all: false });
    if let Commands::Completions { shell } = &command {
        return print_completions(shell);
    }

    let paths = DataPaths::resolve().context("failed to prepare data directory")?;
    let tracker = Tracker::new(JsonTaskStore::new(&paths.tasks_file), SystemClock);
    let goals = GoalBook::new(
        JsonGoalStore::new(&paths.goals_file),
        JsonHabitStore::new(&paths.habits_file),
    );

    match command {
        Commands::Add {
            title,
            description,
            priority,
            due,
            goal,
            hours,
            recur,
            until,
        } => cmd_add(
            &tracker,
            AddArgs {
                title,
                description,
                priority,
                due,
                goal,
                hours,
                recur,
                until,
            },
        ),
        Commands::List { all } => cmd_list(&tracker, all),
        Commands::Toggle { id } => cmd_toggle(&tracker, id),
        Commands::Next { id } => cmd_next(&tracker, id),
        Commands::Edit {
            id,
            title,
            description,
            priority,
            due,
            goal,
            no_goal,
            hours,
            recur,
            no_recur,
            until,
        } => cmd_edit(
            &tracker,
            id,
            EditArgs {
                title,
                description,
                priority,
                due,
                goal,
                no_goal,
                hours,
                recur,
                no_recur,
                until,
            },
        ),
        Commands::Remove { id } => cmd_remove(&tracker, id),
        Commands::Search { query } => cmd_search(&tracker, &query),
        Commands::Due { hours } => cmd_due(&tracker, hours),
        Commands::Goal { command } => match command {
            GoalCommands::Add {
                title,
                description,
                hours,
            } => cmd_goal_add(&goals, title, description, hours, &SystemClock),
            GoalCommands::List => {
                cmd_goal_list(&goals);
                Ok(())
            }
            GoalCommands::Edit {
                id,
                title,
                description,
                hours,
            } => cmd_goal_edit(
                &goals,
                id,
                GoalUpdate {
                    title,
                    description,
                    time_goal: hours,
                },
            ),
            GoalCommands::Remove { id } => cmd_goal_remove(&goals, &tracker, id),
            GoalCommands::Progress { id } => cmd_goal_progress(&goals, &tracker, id),
        },
        Commands::Completions { .. } => Ok(()),
    }
}

fn print_completions(shell: &str) -> Result<()> {
    let shell_enum = match shell {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        "powershell" => Shell::PowerShell,
        "elvish" => Shell::Elvish,
        _ => anyhow::bail!("Unsupported shell: {}", shell),
    };
    let mut cmd = Cli::command();
    generate(shell_enum, &mut cmd, "taskloop", &mut io::stdout());
    Ok(())
}
