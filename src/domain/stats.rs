use crate::domain::models::{Priority, Task};
use serde::Serialize;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct CompletionStats {
    pub total: u32,
    pub completed: u32,
    pub rate: u8,
}

impl CompletionStats {
    fn from_tasks<'a>(tasks: impl Iterator<Item = &'a Task>) -> Self {
        let (total, completed) = tasks.fold((0u32, 0u32), |(total, completed), task| {
            (total + 1, completed + u32::from(task.completed))
        });
        Self {
            total,
            completed,
            rate: completion_rate(completed, total),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
pub struct WeeklyStats {
    pub overall: CompletionStats,
    pub high: CompletionStats,
    pub medium: CompletionStats,
    pub low: CompletionStats,
}

impl WeeklyStats {
    pub fn for_priority(&self, priority: Priority) -> CompletionStats {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

pub fn weekly_stats(tasks: &[Task]) -> WeeklyStats {
    let by_priority =
        |priority: Priority| CompletionStats::from_tasks(tasks.iter().filter(move |task| task.priority == priority));
    WeeklyStats {
        overall: CompletionStats::from_tasks(tasks.iter()),
        high: by_priority(Priority::High),
        medium: by_priority(Priority::Medium),
        low: by_priority(Priority::Low),
    }
}

/// Rounded percentage of completed tasks; an empty set counts as 0%.
pub fn completion_rate(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let rate = (f64::from(completed) / f64::from(total) * 100.0).round();
    rate.clamp(0.0, 100.0) as u8
}
