use crate::application::bootstrap::bootstrap_workspace;
use crate::application::calendar_bridge::{CalendarBridge, RemoteUpdate, RetryPolicy};
use crate::application::oauth::{OAuthConfig, OAuthManager};
use crate::application::store::{next_id, PlannerStore, SnapshotSubscriber};
use crate::domain::date_utils::{format_date, iso_week, parse_date, week_range, weekday_label};
use crate::domain::layering::day_timeline;
use crate::domain::models::{
    Goal, GoalPatch, NewGoal, NewReview, NewTask, PlannerState, Task, TaskPatch, Theme, TimeTag,
    WeeklyReview,
};
use crate::domain::stats::{weekly_stats, WeeklyStats};
use crate::infrastructure::config::AppConfig;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::google_calendar_client::{GoogleCalendarClient, ReqwestGoogleCalendarClient};
use crate::infrastructure::state_repository::StateRepository;
use crate::infrastructure::storage::SqliteKeyValueStore;
use chrono::{NaiveDate, Utc};
use serde::Serialize;
use std::fs::OpenOptions;
use std::future::Future;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{info, warn};

const CALENDAR_SCOPE_PREFIX: &str = "https://www.googleapis.com/auth/calendar";

pub struct AppState<C = ReqwestGoogleCalendarClient>
where
    C: GoogleCalendarClient + 'static,
{
    logs_dir: PathBuf,
    config: AppConfig,
    repository: Arc<StateRepository<SqliteKeyValueStore>>,
    store: Arc<PlannerStore>,
    calendar_client: Arc<C>,
    bridge: Arc<CalendarBridge<C>>,
    log_guard: Mutex<()>,
}

impl AppState<ReqwestGoogleCalendarClient> {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        Self::with_calendar_client(workspace_root, Arc::new(ReqwestGoogleCalendarClient::new()))
    }
}

impl<C> AppState<C>
where
    C: GoogleCalendarClient + 'static,
{
    /// Bootstraps the workspace and hydrates the planner from its database.
    pub fn with_calendar_client(workspace_root: PathBuf, calendar_client: Arc<C>) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;
        let storage = Arc::new(SqliteKeyValueStore::new(&bootstrap.database_path));
        let repository = Arc::new(StateRepository::new(storage, bootstrap.config.storage_key.clone()));
        let store = PlannerStore::new(repository.load()?)
            .with_subscriber(Arc::clone(&repository) as Arc<dyn SnapshotSubscriber>);
        let bridge = CalendarBridge::new(
            Arc::clone(&calendar_client),
            bootstrap.config.calendar_id.clone(),
            bootstrap.config.timezone.clone(),
        );

        Ok(Self {
            logs_dir: bootstrap.logs_dir,
            config: bootstrap.config,
            repository,
            store: Arc::new(store),
            calendar_client,
            bridge: Arc::new(bridge),
            log_guard: Mutex::new(()),
        })
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.bridge = Arc::new(
            CalendarBridge::new(
                Arc::clone(&self.calendar_client),
                self.config.calendar_id.clone(),
                self.config.timezone.clone(),
            )
            .with_retry_policy(retry_policy),
        );
        self
    }

    pub fn store(&self) -> &Arc<PlannerStore> {
        &self.store
    }

    pub fn snapshot(&self) -> Result<Arc<PlannerState>, InfraError> {
        self.store.snapshot()
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }

    fn access_token(&self) -> Result<Option<String>, InfraError> {
        Ok(self
            .store
            .snapshot()?
            .settings
            .active_access_token()
            .map(ToOwned::to_owned))
    }
}

/// Result of a command whose calendar mirroring may still be in flight.
#[derive(Debug)]
pub struct Dispatched<T> {
    pub value: T,
    pub remote_sync: Option<JoinHandle<()>>,
}

impl<T> Dispatched<T> {
    fn local(value: T) -> Self {
        Self {
            value,
            remote_sync: None,
        }
    }

    /// Waits for the calendar call, if any, and returns the local result.
    pub async fn settled(self) -> T {
        if let Some(handle) = self.remote_sync {
            if let Err(error) = handle.await {
                warn!(%error, "calendar sync task did not complete");
            }
        }
        self.value
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PeriodTasks {
    pub period: TimeTag,
    pub tasks: Vec<Task>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayColumn {
    pub date: String,
    pub weekday: &'static str,
    pub periods: Vec<PeriodTasks>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeekView {
    pub week_start: String,
    pub week_end: String,
    pub year: i32,
    pub week_number: u32,
    pub days: Vec<DayColumn>,
    pub stats: WeeklyStats,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimelineBarView {
    pub task: Task,
    pub lane: usize,
    pub left: f64,
    pub width: f64,
    pub top: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DayTimelineView {
    pub date: String,
    pub lane_count: usize,
    pub height: f64,
    pub bars: Vec<TimelineBarView>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WeeklyReviewView {
    pub year: i32,
    pub week_number: u32,
    pub stats: WeeklyStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review: Option<WeeklyReview>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GoogleSignInRequest {
    pub authorization_url: String,
    pub state: String,
}

pub fn add_task_impl<C>(state: &AppState<C>, input: NewTask) -> Result<Dispatched<Task>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let input = normalize_new_task(input);
    input.validate().map_err(InfraError::InvalidInput)?;

    let task = state.store.add_task(input)?;
    state.log_info("add_task", &format!("created task_id={}", task.id));

    let Some(access_token) = state.access_token()? else {
        return Ok(Dispatched::local(task));
    };
    let bridge = Arc::clone(&state.bridge);
    let store = Arc::clone(&state.store);
    let created = task.clone();
    let remote_sync = spawn_remote("add_task", async move {
        if let Some(event_id) = bridge.create_remote_event(&access_token, &created).await {
            attach_event_id(store, created.id, event_id).await;
        }
    });

    Ok(Dispatched {
        value: task,
        remote_sync,
    })
}

/// Applies a partial update. An unknown id yields `None` and changes nothing.
pub fn update_task_impl<C>(
    state: &AppState<C>,
    task_id: &str,
    patch: TaskPatch,
) -> Result<Dispatched<Option<Task>>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let task_id = required_id(task_id, "task_id")?;
    let patch = normalize_task_patch(patch);
    patch.validate().map_err(InfraError::InvalidInput)?;

    if let Some(current) = state.store.snapshot()?.task(task_id) {
        let merged = patch.apply(current, current.updated_at);
        let times_changed = patch.start_time.is_some() || patch.end_time.is_some();
        if times_changed && merged.end_time <= merged.start_time {
            return Err(InfraError::InvalidInput(
                "task.end_time must be after task.start_time".to_string(),
            ));
        }
    }

    let Some(updated) = state.store.update_task(task_id, &patch)? else {
        state.log_info("update_task", &format!("no task with task_id={task_id}"));
        return Ok(Dispatched::local(None));
    };
    state.log_info("update_task", &format!("updated task_id={task_id}"));

    let Some(access_token) = state.access_token()? else {
        return Ok(Dispatched::local(Some(updated)));
    };
    let bridge = Arc::clone(&state.bridge);
    let store = Arc::clone(&state.store);
    let task = updated.clone();
    let remote_sync = spawn_remote("update_task", async move {
        if let RemoteUpdate::Created(event_id) = bridge.update_remote_event(&access_token, &task).await {
            attach_event_id(store, task.id, event_id).await;
        }
    });

    Ok(Dispatched {
        value: Some(updated),
        remote_sync,
    })
}

/// Deletes the task locally. A mirrored event is deleted first on a best-effort
/// basis; its failure does not keep the task.
pub fn delete_task_impl<C>(state: &AppState<C>, task_id: &str) -> Result<Dispatched<bool>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let task_id = required_id(task_id, "task_id")?;
    let event_id = state
        .store
        .snapshot()?
        .task(task_id)
        .and_then(|task| task.google_event_id.clone());

    let remote_sync = match (event_id, state.access_token()?) {
        (Some(event_id), Some(access_token)) => {
            let bridge = Arc::clone(&state.bridge);
            spawn_remote("delete_task", async move {
                bridge.delete_remote_event(&access_token, &event_id).await;
            })
        }
        _ => None,
    };

    let removed = state.store.delete_task(task_id)?.is_some();
    if removed {
        state.log_info("delete_task", &format!("deleted task_id={task_id}"));
    }
    Ok(Dispatched {
        value: removed,
        remote_sync,
    })
}

pub fn toggle_complete_impl<C>(state: &AppState<C>, task_id: &str) -> Result<Option<Task>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let task_id = required_id(task_id, "task_id")?;
    let toggled = state.store.toggle_complete(task_id)?;
    if let Some(task) = &toggled {
        state.log_info(
            "toggle_complete",
            &format!("task_id={task_id} completed={}", task.completed),
        );
    }
    Ok(toggled)
}

pub fn list_tasks_impl<C>(state: &AppState<C>, date: Option<&str>) -> Result<Vec<Task>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let snapshot = state.store.snapshot()?;
    match date {
        Some(date) => Ok(snapshot.tasks_on(&format_date(required_date(date)?))),
        None => Ok(snapshot.tasks.clone()),
    }
}

/// Seven day columns (Monday first) for the week containing `date`, tasks grouped
/// by the period their start time falls in.
pub fn week_view_impl<C>(state: &AppState<C>, date: &str) -> Result<WeekView, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let anchor = required_date(date)?;
    let snapshot = state.store.snapshot()?;
    let days = week_range(anchor);
    let week = iso_week(anchor);

    let columns = days
        .iter()
        .map(|day| {
            let day_tasks = snapshot.tasks_on(&format_date(*day));
            let periods = TimeTag::ALL
                .iter()
                .map(|period| {
                    let mut tasks = day_tasks
                        .iter()
                        .filter(|task| TimeTag::for_start_time(&task.start_time) == *period)
                        .cloned()
                        .collect::<Vec<_>>();
                    tasks.sort_by(|left, right| left.start_time.cmp(&right.start_time));
                    PeriodTasks {
                        period: *period,
                        tasks,
                    }
                })
                .collect();
            DayColumn {
                date: format_date(*day),
                weekday: weekday_label(*day),
                periods,
                total: day_tasks.len(),
            }
        })
        .collect();

    Ok(WeekView {
        week_start: format_date(days[0]),
        week_end: format_date(days[6]),
        year: week.year,
        week_number: week.week_number,
        days: columns,
        stats: weekly_stats(&week_tasks(&snapshot, anchor)),
    })
}

pub fn day_timeline_impl<C>(state: &AppState<C>, date: &str) -> Result<DayTimelineView, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let date = format_date(required_date(date)?);
    let tasks = state.store.snapshot()?.tasks_on(&date);
    let timeline = day_timeline(&tasks);

    Ok(DayTimelineView {
        date,
        lane_count: timeline.lane_count,
        height: timeline.height(),
        bars: timeline
            .bars
            .iter()
            .map(|bar| TimelineBarView {
                task: bar.task.clone(),
                lane: bar.lane,
                left: bar.left,
                width: bar.width,
                top: bar.top,
            })
            .collect(),
    })
}

pub fn add_goal_impl<C>(state: &AppState<C>, mut input: NewGoal) -> Result<Goal, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    input.content = input.content.trim().to_string();
    input.validate().map_err(InfraError::InvalidInput)?;
    let goal = state.store.add_goal(input)?;
    state.log_info("add_goal", &format!("created goal_id={}", goal.id));
    Ok(goal)
}

pub fn update_goal_impl<C>(
    state: &AppState<C>,
    goal_id: &str,
    mut patch: GoalPatch,
) -> Result<Option<Goal>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let goal_id = required_id(goal_id, "goal_id")?;
    patch.content = patch.content.map(|content| content.trim().to_string());
    patch.validate().map_err(InfraError::InvalidInput)?;
    let updated = state.store.update_goal(goal_id, &patch)?;
    if updated.is_some() {
        state.log_info("update_goal", &format!("updated goal_id={goal_id}"));
    }
    Ok(updated)
}

pub fn delete_goal_impl<C>(state: &AppState<C>, goal_id: &str) -> Result<bool, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let goal_id = required_id(goal_id, "goal_id")?;
    let removed = state.store.delete_goal(goal_id)?.is_some();
    if removed {
        state.log_info("delete_goal", &format!("deleted goal_id={goal_id}"));
    }
    Ok(removed)
}

pub fn monthly_goals_impl<C>(state: &AppState<C>, year: i32, month: u32) -> Result<Vec<Goal>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    if !(1..=12).contains(&month) {
        return Err(InfraError::InvalidInput("month must be within 1..=12".to_string()));
    }
    Ok(state.store.snapshot()?.monthly_goals(year, month))
}

pub fn yearly_goal_impl<C>(state: &AppState<C>, year: i32) -> Result<Option<Goal>, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    Ok(state.store.snapshot()?.yearly_goal(year).cloned())
}

/// Rewrites the year's canonical goal in place, or adds one when the year has none.
pub fn set_yearly_goal_impl<C>(state: &AppState<C>, year: i32, content: &str) -> Result<Goal, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let content = content.trim();
    if content.is_empty() {
        return Err(InfraError::InvalidInput("goal.content must not be empty".to_string()));
    }

    let existing = state.store.snapshot()?.yearly_goal(year).map(|goal| goal.id.clone());
    if let Some(goal_id) = existing {
        let patch = GoalPatch {
            content: Some(content.to_string()),
            ..GoalPatch::default()
        };
        if let Some(updated) = state.store.update_goal(&goal_id, &patch)? {
            state.log_info("set_yearly_goal", &format!("updated goal_id={goal_id}"));
            return Ok(updated);
        }
    }
    add_goal_impl(state, NewGoal::yearly(year, content))
}

pub fn weekly_review_impl<C>(state: &AppState<C>, date: &str) -> Result<WeeklyReviewView, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let anchor = required_date(date)?;
    let snapshot = state.store.snapshot()?;
    let week = iso_week(anchor);

    Ok(WeeklyReviewView {
        year: week.year,
        week_number: week.week_number,
        stats: weekly_stats(&week_tasks(&snapshot, anchor)),
        review: snapshot.review(week.year, week.week_number).cloned(),
    })
}

/// Saves the review of the week containing `date`; the completion rate is computed
/// from that week's tasks.
pub fn save_weekly_review_impl<C>(
    state: &AppState<C>,
    date: &str,
    comment: &str,
) -> Result<WeeklyReview, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let anchor = required_date(date)?;
    let week = iso_week(anchor);
    let snapshot = state.store.snapshot()?;
    let stats = weekly_stats(&week_tasks(&snapshot, anchor));
    let input = NewReview {
        year: week.year,
        week_number: week.week_number,
        completion_rate: stats.overall.rate,
        comment: comment.trim().to_string(),
    };
    input.validate().map_err(InfraError::InvalidInput)?;

    let review = state.store.add_review(input)?;
    state.log_info(
        "save_weekly_review",
        &format!(
            "saved review year={} week={} rate={}",
            review.year, review.week_number, review.completion_rate
        ),
    );
    Ok(review)
}

pub fn set_theme_impl<C>(state: &AppState<C>, theme: Theme) -> Result<Theme, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    state.store.set_theme(theme)?;
    state.log_info("set_theme", &format!("theme={}", theme.as_str()));
    Ok(theme)
}

pub fn toggle_theme_impl<C>(state: &AppState<C>) -> Result<Theme, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let next = state.store.snapshot()?.settings.theme.toggled();
    set_theme_impl(state, next)
}

pub fn begin_google_sign_in_impl<C>(
    state: &AppState<C>,
    config: OAuthConfig,
) -> Result<GoogleSignInRequest, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let manager = OAuthManager::new(config);
    let auth_state = next_id("oauth-state");
    let authorization_url = manager.build_authorization_url(&auth_state)?;
    state.log_info("begin_google_sign_in", "issued authorization url");
    Ok(GoogleSignInRequest {
        authorization_url,
        state: auth_state,
    })
}

pub fn complete_google_sign_in_impl<C>(
    state: &AppState<C>,
    config: OAuthConfig,
    redirect_url: &str,
    expected_state: &str,
) -> Result<(), InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    let grant = OAuthManager::new(config).parse_redirect(redirect_url, expected_state)?;
    if let Some(scope) = grant.scope.as_deref() {
        if !scope.split(' ').any(|granted| granted.starts_with(CALENDAR_SCOPE_PREFIX)) {
            return Err(InfraError::OAuth(format!("calendar access was not granted (scope: {scope})")));
        }
    }

    let token_type = grant.token_type.as_deref().unwrap_or("Bearer").to_string();
    let expires_in = grant.expires_in;
    state.store.set_google_connected(true, Some(grant.access_token))?;
    state.log_info(
        "complete_google_sign_in",
        &format!(
            "google calendar connected token_type={token_type} expires_in={}",
            expires_in.map_or_else(|| "unknown".to_string(), |seconds| format!("{seconds}s"))
        ),
    );
    info!(%token_type, ?expires_in, "google calendar connected");
    Ok(())
}

pub fn sign_out_google_impl<C>(state: &AppState<C>) -> Result<(), InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    state.store.set_google_connected(false, None)?;
    state.log_info("sign_out_google", "google calendar disconnected");
    Ok(())
}

/// The persisted planner document as pretty-printed JSON.
pub fn export_state_impl<C>(state: &AppState<C>) -> Result<String, InfraError>
where
    C: GoogleCalendarClient + 'static,
{
    state.repository.export_json()
}

fn spawn_remote<F>(command: &'static str, future: F) -> Option<JoinHandle<()>>
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => Some(handle.spawn(future)),
        Err(_) => {
            warn!(command, "no async runtime available; calendar mirroring skipped");
            None
        }
    }
}

/// Writes the event id back through the store. The SQLite write runs on the
/// blocking pool so runtime workers stay free.
async fn attach_event_id(store: Arc<PlannerStore>, task_id: String, event_id: String) {
    let write_task_id = task_id.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        store.update_task(&write_task_id, &TaskPatch::google_event_id(event_id))
    })
    .await;

    match outcome {
        Ok(Ok(Some(_))) => {}
        Ok(Ok(None)) => warn!(%task_id, "task disappeared before its calendar event id was attached"),
        Ok(Err(error)) => warn!(%task_id, %error, "failed to persist calendar event id"),
        Err(error) => warn!(%task_id, %error, "calendar event id write-back did not complete"),
    }
}

fn week_tasks(snapshot: &PlannerState, anchor: NaiveDate) -> Vec<Task> {
    let days = week_range(anchor).map(format_date);
    snapshot
        .tasks
        .iter()
        .filter(|task| days.contains(&task.date))
        .cloned()
        .collect()
}

fn normalize_new_task(mut input: NewTask) -> NewTask {
    input.title = input.title.trim().to_string();
    input.date = input.date.trim().to_string();
    input.memo = normalize_memo(input.memo);
    if input.time_tag.is_none() {
        input.time_tag = Some(TimeTag::for_start_time(&input.start_time));
    }
    input
}

fn normalize_task_patch(mut patch: TaskPatch) -> TaskPatch {
    patch.title = patch.title.map(|title| title.trim().to_string());
    patch.date = patch.date.map(|date| date.trim().to_string());
    patch.memo = patch.memo.map(normalize_memo);
    patch
}

fn normalize_memo(memo: Option<String>) -> Option<String> {
    memo.as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
}

fn required_id<'a>(value: &'a str, field_name: &str) -> Result<&'a str, InfraError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(InfraError::InvalidInput(format!("{field_name} must not be empty")));
    }
    Ok(value)
}

fn required_date(value: &str) -> Result<NaiveDate, InfraError> {
    parse_date(value)
        .ok_or_else(|| InfraError::InvalidInput(format!("date must be YYYY-MM-DD: {value}")))
}
