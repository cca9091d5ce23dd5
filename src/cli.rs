use crate::application::commands::{
    add_goal_impl, add_task_impl, begin_google_sign_in_impl, complete_google_sign_in_impl,
    day_timeline_impl, delete_goal_impl, delete_task_impl, export_state_impl, list_tasks_impl,
    monthly_goals_impl, save_weekly_review_impl, set_theme_impl, set_yearly_goal_impl,
    sign_out_google_impl, toggle_complete_impl, toggle_theme_impl, update_goal_impl,
    update_task_impl, week_view_impl, weekly_review_impl, yearly_goal_impl, AppState,
    DayTimelineView, Dispatched, WeekView, WeeklyReviewView,
};
use crate::application::oauth::OAuthConfig;
use crate::domain::date_utils::format_date;
use crate::domain::models::{Goal, GoalPatch, NewGoal, NewTask, Priority, Task, TaskPatch, Theme, TimeTag};
use crate::infrastructure::error::InfraError;
use chrono::{Datelike, Local};
use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{eyre, Result};
use directories::ProjectDirs;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "weekplan")]
#[command(about = "Weekly planner: tasks on a week grid, goals, reviews and Google Calendar mirroring")]
#[command(version)]
pub struct Cli {
    /// Workspace directory holding config, logs and the planner database
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Print views as JSON instead of text
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Manage tasks
    #[command(subcommand)]
    Task(TaskCommand),
    /// Show the week grid containing a date (default today)
    Week {
        #[arg(long)]
        date: Option<String>,
    },
    /// Show the lane layout of one day (default today)
    Day {
        #[arg(long)]
        date: Option<String>,
    },
    /// Manage yearly and monthly goals
    #[command(subcommand)]
    Goal(GoalCommand),
    /// Weekly reviews
    #[command(subcommand)]
    Review(ReviewCommand),
    /// Light or dark theme
    #[command(subcommand)]
    Theme(ThemeCommand),
    /// Google Calendar connection
    #[command(subcommand)]
    Auth(AuthCommand),
    /// Print the stored planner document
    Export,
}

#[derive(Debug, Subcommand)]
pub enum TaskCommand {
    /// Add a task
    Add(TaskAddArgs),
    /// Change fields of a task
    Update(TaskUpdateArgs),
    /// Delete a task
    Delete { id: String },
    /// Flip the completed flag
    Toggle { id: String },
    /// List tasks, optionally for one date
    List {
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Debug, Args)]
pub struct TaskAddArgs {
    pub title: String,
    /// Date (YYYY-MM-DD), default today
    #[arg(long)]
    pub date: Option<String>,
    /// Start time (HH:MM)
    #[arg(long)]
    pub start: String,
    /// End time (HH:MM), same day
    #[arg(long)]
    pub end: String,
    #[arg(long, default_value = "medium")]
    pub priority: Priority,
    /// Part of the day; derived from the start time when omitted
    #[arg(long)]
    pub period: Option<TimeTag>,
    #[arg(long)]
    pub memo: Option<String>,
}

#[derive(Debug, Args)]
pub struct TaskUpdateArgs {
    pub id: String,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub date: Option<String>,
    #[arg(long)]
    pub start: Option<String>,
    #[arg(long)]
    pub end: Option<String>,
    #[arg(long)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub period: Option<TimeTag>,
    #[arg(long, conflicts_with = "clear_memo")]
    pub memo: Option<String>,
    #[arg(long)]
    pub clear_memo: bool,
}

#[derive(Debug, Subcommand)]
pub enum GoalCommand {
    /// Add a monthly goal
    Add {
        content: String,
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },
    /// Monthly goals of a month (default current)
    List {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        month: Option<u32>,
    },
    /// Show the yearly goal, or replace it with --set
    Yearly {
        #[arg(long)]
        year: Option<i32>,
        #[arg(long)]
        set: Option<String>,
    },
    /// Rewrite a goal's content
    Update { id: String, content: String },
    /// Delete a goal
    Delete { id: String },
}

#[derive(Debug, Subcommand)]
pub enum ReviewCommand {
    /// Completion stats and the saved review of a week
    Show {
        #[arg(long)]
        date: Option<String>,
    },
    /// Save the review of a week
    Save {
        comment: String,
        #[arg(long)]
        date: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ThemeCommand {
    Toggle,
    Set { theme: Theme },
}

#[derive(Debug, Subcommand)]
pub enum AuthCommand {
    /// Print the Google authorization URL
    Login,
    /// Finish sign-in with the URL the browser was redirected to
    Complete {
        redirect_url: String,
        #[arg(long)]
        state: String,
    },
    /// Disconnect Google Calendar
    Logout,
}

/// Resolves the workspace: `--root`, else the per-user data dir, else the current dir.
pub fn resolve_workspace_root(root: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(root) = root {
        return Ok(root);
    }
    if let Some(dirs) = ProjectDirs::from("com", "weekplan", "weekplan") {
        return Ok(dirs.data_dir().to_path_buf());
    }
    Ok(std::env::current_dir()?)
}

pub async fn run(cli: Cli) -> Result<()> {
    let workspace_root = resolve_workspace_root(cli.root)?;
    let state = AppState::new(workspace_root)?;
    let json = cli.json;

    match cli.command {
        Commands::Task(command) => handle_task(&state, command).await,
        Commands::Week { date } => {
            let view = week_view_impl(&state, &date_or_today(date))
                .map_err(|error| eyre!(state.command_error("week", &error)))?;
            print_view(json, &view, render_week)
        }
        Commands::Day { date } => {
            let view = day_timeline_impl(&state, &date_or_today(date))
                .map_err(|error| eyre!(state.command_error("day", &error)))?;
            print_view(json, &view, render_day)
        }
        Commands::Goal(command) => handle_goal(&state, command),
        Commands::Review(command) => handle_review(&state, command, json),
        Commands::Theme(command) => {
            let theme = match command {
                ThemeCommand::Toggle => toggle_theme_impl(&state),
                ThemeCommand::Set { theme } => set_theme_impl(&state, theme),
            }
            .map_err(|error| eyre!(state.command_error("theme", &error)))?;
            println!("Theme: {}", theme.as_str());
            Ok(())
        }
        Commands::Auth(command) => handle_auth(&state, command),
        Commands::Export => {
            let document = export_state_impl(&state)
                .map_err(|error| eyre!(state.command_error("export", &error)))?;
            println!("{document}");
            Ok(())
        }
    }
}

async fn handle_task(state: &AppState, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::Add(args) => {
            let input = NewTask {
                title: args.title,
                date: date_or_today(args.date),
                start_time: args.start,
                end_time: args.end,
                priority: args.priority,
                time_tag: args.period,
                memo: args.memo,
                completed: false,
            };
            let task = settle(state, "task add", add_task_impl(state, input)).await?;
            println!("Task created (ID: {})", task.id);
        }
        TaskCommand::Update(args) => {
            let memo = if args.clear_memo { Some(None) } else { args.memo.map(Some) };
            let patch = TaskPatch {
                title: args.title,
                date: args.date,
                start_time: args.start,
                end_time: args.end,
                priority: args.priority,
                time_tag: args.period.map(Some),
                memo,
                ..TaskPatch::default()
            };
            match settle(state, "task update", update_task_impl(state, &args.id, patch)).await? {
                Some(task) => println!("{}", task_line(&task)),
                None => println!("No task with ID {}", args.id),
            }
        }
        TaskCommand::Delete { id } => {
            if settle(state, "task delete", delete_task_impl(state, &id)).await? {
                println!("Task deleted");
            } else {
                println!("No task with ID {id}");
            }
        }
        TaskCommand::Toggle { id } => {
            match toggle_complete_impl(state, &id)
                .map_err(|error| eyre!(state.command_error("task toggle", &error)))?
            {
                Some(task) => println!("{}", task_line(&task)),
                None => println!("No task with ID {id}"),
            }
        }
        TaskCommand::List { date } => {
            let tasks = list_tasks_impl(state, date.as_deref())
                .map_err(|error| eyre!(state.command_error("task list", &error)))?;
            for task in &tasks {
                println!("{}", task_line(task));
            }
        }
    }
    Ok(())
}

fn handle_goal(state: &AppState, command: GoalCommand) -> Result<()> {
    let today = Local::now().date_naive();
    match command {
        GoalCommand::Add { content, year, month } => {
            let input = NewGoal::monthly(year.unwrap_or(today.year()), month.unwrap_or(today.month()), content);
            let goal = add_goal_impl(state, input)
                .map_err(|error| eyre!(state.command_error("goal add", &error)))?;
            println!("Goal created (ID: {})", goal.id);
        }
        GoalCommand::List { year, month } => {
            let goals = monthly_goals_impl(state, year.unwrap_or(today.year()), month.unwrap_or(today.month()))
                .map_err(|error| eyre!(state.command_error("goal list", &error)))?;
            for goal in &goals {
                println!("{}", goal_line(goal));
            }
        }
        GoalCommand::Yearly { year, set } => {
            let year = year.unwrap_or(today.year());
            let goal = match set {
                Some(content) => Some(set_yearly_goal_impl(state, year, &content)),
                None => yearly_goal_impl(state, year).transpose(),
            }
            .transpose()
            .map_err(|error| eyre!(state.command_error("goal yearly", &error)))?;
            match goal {
                Some(goal) => println!("{}", goal_line(&goal)),
                None => println!("No yearly goal for {year}"),
            }
        }
        GoalCommand::Update { id, content } => {
            let patch = GoalPatch {
                content: Some(content),
                ..GoalPatch::default()
            };
            match update_goal_impl(state, &id, patch)
                .map_err(|error| eyre!(state.command_error("goal update", &error)))?
            {
                Some(goal) => println!("{}", goal_line(&goal)),
                None => println!("No goal with ID {id}"),
            }
        }
        GoalCommand::Delete { id } => {
            let removed = delete_goal_impl(state, &id)
                .map_err(|error| eyre!(state.command_error("goal delete", &error)))?;
            println!("{}", if removed { "Goal deleted".to_string() } else { format!("No goal with ID {id}") });
        }
    }
    Ok(())
}

fn handle_review(state: &AppState, command: ReviewCommand, json: bool) -> Result<()> {
    match command {
        ReviewCommand::Show { date } => {
            let view = weekly_review_impl(state, &date_or_today(date))
                .map_err(|error| eyre!(state.command_error("review show", &error)))?;
            print_view(json, &view, render_review)
        }
        ReviewCommand::Save { comment, date } => {
            let review = save_weekly_review_impl(state, &date_or_today(date), &comment)
                .map_err(|error| eyre!(state.command_error("review save", &error)))?;
            println!(
                "Review saved for {}-W{:02} ({}% complete)",
                review.year, review.week_number, review.completion_rate
            );
            Ok(())
        }
    }
}

fn handle_auth(state: &AppState, command: AuthCommand) -> Result<()> {
    match command {
        AuthCommand::Login => {
            let request = OAuthConfig::from_env()
                .and_then(|config| begin_google_sign_in_impl(state, config))
                .map_err(|error| eyre!(state.command_error("auth login", &error)))?;
            println!("Open this URL in a browser:\n{}", request.authorization_url);
            println!("Then run: weekplan auth complete '<redirected url>' --state {}", request.state);
        }
        AuthCommand::Complete { redirect_url, state: expected_state } => {
            OAuthConfig::from_env()
                .and_then(|config| complete_google_sign_in_impl(state, config, &redirect_url, &expected_state))
                .map_err(|error| eyre!(state.command_error("auth complete", &error)))?;
            println!("Google Calendar connected");
        }
        AuthCommand::Logout => {
            sign_out_google_impl(state).map_err(|error| eyre!(state.command_error("auth logout", &error)))?;
            println!("Google Calendar disconnected");
        }
    }
    Ok(())
}

async fn settle<T>(state: &AppState, command: &str, dispatched: Result<Dispatched<T>, InfraError>) -> Result<T> {
    let dispatched = dispatched.map_err(|error| eyre!(state.command_error(command, &error)))?;
    Ok(dispatched.settled().await)
}

fn date_or_today(date: Option<String>) -> String {
    date.unwrap_or_else(|| format_date(Local::now().date_naive()))
}

fn print_view<T: Serialize>(json: bool, view: &T, render: fn(&T) -> String) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(view)?);
    } else {
        print!("{}", render(view));
    }
    Ok(())
}

fn task_line(task: &Task) -> String {
    format!(
        "[{}] {} {}-{} {:<6} {}  ({})",
        if task.completed { "x" } else { " " },
        task.date,
        task.start_time,
        task.end_time,
        task.priority.as_str(),
        task.title,
        task.id
    )
}

fn goal_line(goal: &Goal) -> String {
    match goal.month {
        Some(month) => format!("{}-{:02} {}  ({})", goal.year, month, goal.content, goal.id),
        None => format!("{} {}  ({})", goal.year, goal.content, goal.id),
    }
}

fn render_week(view: &WeekView) -> String {
    let mut out = format!(
        "{}-W{:02}  {} ~ {}  {}% ({}/{})\n",
        view.year,
        view.week_number,
        view.week_start,
        view.week_end,
        view.stats.overall.rate,
        view.stats.overall.completed,
        view.stats.overall.total
    );
    for day in &view.days {
        out.push_str(&format!("{} {} ({})\n", day.weekday, day.date, day.total));
        for group in day.periods.iter().filter(|group| !group.tasks.is_empty()) {
            for task in &group.tasks {
                out.push_str(&format!("  {:<3} {}\n", group.period.label(), task_line(task)));
            }
        }
    }
    out
}

fn render_day(view: &DayTimelineView) -> String {
    let mut out = format!("{}  lanes: {}\n", view.date, view.lane_count);
    for bar in &view.bars {
        out.push_str(&format!("  lane {} {}\n", bar.lane, task_line(&bar.task)));
    }
    out
}

fn render_review(view: &WeeklyReviewView) -> String {
    let mut out = format!(
        "{}-W{:02}  {}% ({}/{})  high {}%  medium {}%  low {}%\n",
        view.year,
        view.week_number,
        view.stats.overall.rate,
        view.stats.overall.completed,
        view.stats.overall.total,
        view.stats.high.rate,
        view.stats.medium.rate,
        view.stats.low.rate
    );
    match &view.review {
        Some(review) => out.push_str(&format!("Review: {}\n", review.comment)),
        None => out.push_str("No review saved\n"),
    }
    out
}
