use crate::domain::models::Task;

pub const DEFAULT_TIME_ZONE: &str = "Asia/Seoul";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct CalendarEventDateTime {
    #[serde(rename = "dateTime")]
    pub date_time: String,
    #[serde(rename = "timeZone", skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct GoogleCalendarEvent {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub start: CalendarEventDateTime,
    pub end: CalendarEventDateTime,
}

/// Outbound event for a task. Times are wall-clock values in `time_zone`; the date
/// and `HH:MM` fields are copied verbatim.
pub fn encode_task_event(task: &Task, time_zone: &str) -> GoogleCalendarEvent {
    let priority_label = task.priority.label();
    let description = [
        task.memo.clone().unwrap_or_default(),
        task.time_tag
            .map(|tag| format!("시간대: {}", tag.label()))
            .unwrap_or_default(),
        format!("우선순위: {priority_label}"),
    ]
    .into_iter()
    .filter(|line| !line.trim().is_empty())
    .collect::<Vec<_>>()
    .join("\n");

    GoogleCalendarEvent {
        id: None,
        summary: Some(format!("[{priority_label}] {}", task.title)),
        description: Some(description),
        start: event_date_time(&task.date, &task.start_time, time_zone),
        end: event_date_time(&task.date, &task.end_time, time_zone),
    }
}

fn event_date_time(date: &str, time: &str, time_zone: &str) -> CalendarEventDateTime {
    CalendarEventDateTime {
        date_time: format!("{date}T{time}:00"),
        time_zone: Some(time_zone.to_string()),
    }
}
