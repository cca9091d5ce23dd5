use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Sort rank inside a time slot; lower ranks come first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::High => "상",
            Self::Medium => "중",
            Self::Low => "하",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("invalid priority: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TimeTag {
    Morning,
    Forenoon,
    Afternoon,
    Evening,
    Night,
}

impl TimeTag {
    /// Display order of the weekly grid rows.
    pub const ALL: [TimeTag; 5] = [
        TimeTag::Morning,
        TimeTag::Forenoon,
        TimeTag::Afternoon,
        TimeTag::Evening,
        TimeTag::Night,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Self::Morning => "아침",
            Self::Forenoon => "오전",
            Self::Afternoon => "오후",
            Self::Evening => "저녁",
            Self::Night => "밤",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Forenoon => "forenoon",
            Self::Afternoon => "afternoon",
            Self::Evening => "evening",
            Self::Night => "night",
        }
    }

    /// Period of the day an hour belongs to. Night wraps midnight (22..=3).
    pub fn for_hour(hour: u32) -> TimeTag {
        match hour {
            22.. | 0..=3 => Self::Night,
            4..=8 => Self::Morning,
            9..=12 => Self::Forenoon,
            13..=17 => Self::Afternoon,
            18..=21 => Self::Evening,
        }
    }

    /// Period for an `HH:MM` start time; unparseable values land in the forenoon row.
    pub fn for_start_time(value: &str) -> TimeTag {
        value
            .split(':')
            .next()
            .and_then(|hour| hour.trim().parse::<u32>().ok())
            .map(Self::for_hour)
            .unwrap_or(Self::Forenoon)
    }
}

impl FromStr for TimeTag {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "morning" => Ok(Self::Morning),
            "forenoon" => Ok(Self::Forenoon),
            "afternoon" => Ok(Self::Afternoon),
            "evening" => Ok(Self::Evening),
            "night" => Ok(Self::Night),
            other => Err(format!("invalid time tag: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GoalType {
    Yearly,
    Monthly,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Theme {
        match self {
            Self::Light => Self::Dark,
            Self::Dark => Self::Light,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            other => Err(format!("invalid theme: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_tag: Option<TimeTag>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_event_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Task {
    /// Ordering of the task collection: date, then start time, then priority rank.
    pub fn schedule_order(left: &Task, right: &Task) -> Ordering {
        left.date
            .cmp(&right.date)
            .then_with(|| left.start_time.cmp(&right.start_time))
            .then_with(|| left.priority.rank().cmp(&right.priority.rank()))
    }
}

/// Fields supplied when creating a task; id and timestamps are assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub date: String,
    pub start_time: String,
    pub end_time: String,
    pub priority: Priority,
    pub time_tag: Option<TimeTag>,
    pub memo: Option<String>,
    pub completed: bool,
}

impl NewTask {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.title, "task.title")?;
        validate_date(&self.date, "task.date")?;
        validate_hhmm(&self.start_time, "task.start_time")?;
        validate_hhmm(&self.end_time, "task.end_time")?;
        if self.end_time <= self.start_time {
            return Err("task.end_time must be after task.start_time".to_string());
        }
        Ok(())
    }
}

/// Partial task update. `None` leaves a field untouched; the nested options of the
/// optional fields distinguish "clear" (`Some(None)`) from "keep" (`None`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub date: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub priority: Option<Priority>,
    pub time_tag: Option<Option<TimeTag>>,
    pub memo: Option<Option<String>>,
    pub completed: Option<bool>,
    pub google_event_id: Option<Option<String>>,
}

impl TaskPatch {
    pub fn google_event_id(event_id: impl Into<String>) -> Self {
        Self {
            google_event_id: Some(Some(event_id.into())),
            ..Self::default()
        }
    }

    pub fn apply(&self, task: &Task, updated_at: i64) -> Task {
        let mut next = task.clone();
        if let Some(title) = &self.title {
            next.title = title.clone();
        }
        if let Some(date) = &self.date {
            next.date = date.clone();
        }
        if let Some(start_time) = &self.start_time {
            next.start_time = start_time.clone();
        }
        if let Some(end_time) = &self.end_time {
            next.end_time = end_time.clone();
        }
        if let Some(priority) = self.priority {
            next.priority = priority;
        }
        if let Some(time_tag) = self.time_tag {
            next.time_tag = time_tag;
        }
        if let Some(memo) = &self.memo {
            next.memo = memo.clone();
        }
        if let Some(completed) = self.completed {
            next.completed = completed;
        }
        if let Some(google_event_id) = &self.google_event_id {
            next.google_event_id = google_event_id.clone();
        }
        next.updated_at = updated_at;
        next
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(title) = &self.title {
            validate_non_empty(title, "task.title")?;
        }
        if let Some(date) = &self.date {
            validate_date(date, "task.date")?;
        }
        if let Some(start_time) = &self.start_time {
            validate_hhmm(start_time, "task.start_time")?;
        }
        if let Some(end_time) = &self.end_time {
            validate_hhmm(end_time, "task.end_time")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Goal {
    pub id: String,
    #[serde(rename = "type")]
    pub goal_type: GoalType,
    pub year: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub month: Option<u32>,
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGoal {
    pub goal_type: GoalType,
    pub year: i32,
    pub month: Option<u32>,
    pub content: String,
}

impl NewGoal {
    pub fn yearly(year: i32, content: impl Into<String>) -> Self {
        Self {
            goal_type: GoalType::Yearly,
            year,
            month: None,
            content: content.into(),
        }
    }

    pub fn monthly(year: i32, month: u32, content: impl Into<String>) -> Self {
        Self {
            goal_type: GoalType::Monthly,
            year,
            month: Some(month),
            content: content.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.content, "goal.content")?;
        match (self.goal_type, self.month) {
            (GoalType::Yearly, None) => Ok(()),
            (GoalType::Yearly, Some(_)) => Err("goal.month must be absent for yearly goals".to_string()),
            (GoalType::Monthly, Some(month)) => validate_month(month),
            (GoalType::Monthly, None) => Err("goal.month is required for monthly goals".to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoalPatch {
    pub year: Option<i32>,
    pub month: Option<u32>,
    pub content: Option<String>,
}

impl GoalPatch {
    /// Applies the patch; id, type and creation time are kept. A month is only
    /// meaningful for monthly goals and is ignored otherwise.
    pub fn apply(&self, goal: &Goal) -> Goal {
        let mut next = goal.clone();
        if let Some(year) = self.year {
            next.year = year;
        }
        if let Some(month) = self.month {
            if goal.goal_type == GoalType::Monthly {
                next.month = Some(month);
            }
        }
        if let Some(content) = &self.content {
            next.content = content.clone();
        }
        next
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(content) = &self.content {
            validate_non_empty(content, "goal.content")?;
        }
        if let Some(month) = self.month {
            validate_month(month)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReview {
    pub id: String,
    pub year: i32,
    pub week_number: u32,
    pub completion_rate: u8,
    pub comment: String,
    pub created_at: i64,
}

impl WeeklyReview {
    pub fn is_for(&self, year: i32, week_number: u32) -> bool {
        self.year == year && self.week_number == week_number
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReview {
    pub year: i32,
    pub week_number: u32,
    pub completion_rate: u8,
    pub comment: String,
}

impl NewReview {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=53).contains(&self.week_number) {
            return Err("review.week_number must be within 1..=53".to_string());
        }
        if self.completion_rate > 100 {
            return Err("review.completion_rate must be <= 100".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub google_connected: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_access_token: Option<String>,
    #[serde(default)]
    pub theme: Theme,
}

impl UserSettings {
    /// Bearer token to mirror with, present only while the connection flag is on.
    pub fn active_access_token(&self) -> Option<&str> {
        if !self.google_connected {
            return None;
        }
        self.google_access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
    }
}

/// The persisted snapshot: every collection the planner owns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlannerState {
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub reviews: Vec<WeeklyReview>,
    #[serde(default)]
    pub settings: UserSettings,
}

impl PlannerState {
    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn tasks_on(&self, date: &str) -> Vec<Task> {
        self.tasks
            .iter()
            .filter(|task| task.date == date)
            .cloned()
            .collect()
    }

    pub fn monthly_goals(&self, year: i32, month: u32) -> Vec<Goal> {
        self.goals
            .iter()
            .filter(|goal| {
                goal.goal_type == GoalType::Monthly && goal.year == year && goal.month == Some(month)
            })
            .cloned()
            .collect()
    }

    /// The first yearly goal for `year`; later duplicates are shadowed.
    pub fn yearly_goal(&self, year: i32) -> Option<&Goal> {
        self.goals
            .iter()
            .find(|goal| goal.goal_type == GoalType::Yearly && goal.year == year)
    }

    pub fn review(&self, year: i32, week_number: u32) -> Option<&WeeklyReview> {
        self.reviews
            .iter()
            .find(|review| review.is_for(year, week_number))
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

pub(crate) fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let valid = value.len() == 5 && NaiveTime::parse_from_str(value, "%H:%M").is_ok();
    if !valid {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

pub(crate) fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}

fn validate_month(month: u32) -> Result<(), String> {
    if !(1..=12).contains(&month) {
        return Err("goal.month must be within 1..=12".to_string());
    }
    Ok(())
}
