use crate::domain::models::{
    Goal, GoalPatch, NewGoal, NewReview, NewTask, PlannerState, Task, TaskPatch, Theme,
    WeeklyReview,
};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::state_repository::StateRepository;
use crate::infrastructure::storage::KeyValueStore;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

pub type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id(prefix: &str) -> String {
    let sequence = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    format!("{prefix}-{}-{sequence}", Utc::now().timestamp_micros())
}

/// Receives every snapshot the store commits.
pub trait SnapshotSubscriber: Send + Sync {
    fn on_snapshot(&self, snapshot: &PlannerState) -> Result<(), InfraError>;
}

impl<K> SnapshotSubscriber for StateRepository<K>
where
    K: KeyValueStore,
{
    fn on_snapshot(&self, snapshot: &PlannerState) -> Result<(), InfraError> {
        self.save(snapshot)
    }
}

/// State container for tasks, goals, reviews and settings.
///
/// Every command derives a new [`PlannerState`] from the current one and swaps it in
/// whole, so readers holding an earlier snapshot never see a partial update.
/// Subscribers run after the swap while the state lock is still held, which keeps
/// persisted writes in commit order.
pub struct PlannerStore {
    state: Mutex<Arc<PlannerState>>,
    subscribers: Vec<Arc<dyn SnapshotSubscriber>>,
    now_provider: NowProvider,
    last_timestamp: AtomicI64,
}

impl PlannerStore {
    /// Timestamps handed out later never fall below the newest one in `initial`.
    pub fn new(initial: PlannerState) -> Self {
        let newest = latest_timestamp(&initial);
        Self {
            state: Mutex::new(Arc::new(initial)),
            subscribers: Vec::new(),
            now_provider: Arc::new(Utc::now),
            last_timestamp: AtomicI64::new(newest),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn SnapshotSubscriber>) -> Self {
        self.subscribers.push(subscriber);
        self
    }

    pub fn snapshot(&self) -> Result<Arc<PlannerState>, InfraError> {
        Ok(Arc::clone(&*self.lock_state()?))
    }

    pub fn add_task(&self, input: NewTask) -> Result<Task, InfraError> {
        let created = self.commit("add_task", |current| {
            let now = self.now_millis();
            let task = Task {
                id: next_id("tsk"),
                title: input.title,
                date: input.date,
                start_time: input.start_time,
                end_time: input.end_time,
                priority: input.priority,
                time_tag: input.time_tag,
                memo: input.memo,
                completed: input.completed,
                google_event_id: None,
                created_at: now,
                updated_at: now,
            };
            let mut next = current.clone();
            next.tasks.push(task.clone());
            next.tasks.sort_by(Task::schedule_order);
            Some((next, task))
        })?;
        created.ok_or_else(|| InfraError::InvalidInput("task was not added".to_string()))
    }

    /// Merges `patch` into the task. Unknown ids leave the snapshot untouched.
    pub fn update_task(&self, task_id: &str, patch: &TaskPatch) -> Result<Option<Task>, InfraError> {
        self.commit("update_task", |current| {
            let position = current.tasks.iter().position(|task| task.id == task_id)?;
            let mut next = current.clone();
            let updated = patch.apply(&next.tasks[position], self.now_millis());
            next.tasks[position] = updated.clone();
            Some((next, updated))
        })
    }

    pub fn delete_task(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        self.commit("delete_task", |current| {
            let position = current.tasks.iter().position(|task| task.id == task_id)?;
            let mut next = current.clone();
            let removed = next.tasks.remove(position);
            Some((next, removed))
        })
    }

    pub fn toggle_complete(&self, task_id: &str) -> Result<Option<Task>, InfraError> {
        self.commit("toggle_complete", |current| {
            let position = current.tasks.iter().position(|task| task.id == task_id)?;
            let mut next = current.clone();
            let task = &mut next.tasks[position];
            task.completed = !task.completed;
            task.updated_at = self.now_millis();
            let toggled = task.clone();
            Some((next, toggled))
        })
    }

    pub fn add_goal(&self, input: NewGoal) -> Result<Goal, InfraError> {
        let created = self.commit("add_goal", |current| {
            let goal = Goal {
                id: next_id("goal"),
                goal_type: input.goal_type,
                year: input.year,
                month: input.month,
                content: input.content,
                created_at: self.now_millis(),
            };
            let mut next = current.clone();
            next.goals.push(goal.clone());
            Some((next, goal))
        })?;
        created.ok_or_else(|| InfraError::InvalidInput("goal was not added".to_string()))
    }

    pub fn update_goal(&self, goal_id: &str, patch: &GoalPatch) -> Result<Option<Goal>, InfraError> {
        self.commit("update_goal", |current| {
            let position = current.goals.iter().position(|goal| goal.id == goal_id)?;
            let mut next = current.clone();
            let updated = patch.apply(&next.goals[position]);
            next.goals[position] = updated.clone();
            Some((next, updated))
        })
    }

    pub fn delete_goal(&self, goal_id: &str) -> Result<Option<Goal>, InfraError> {
        self.commit("delete_goal", |current| {
            let position = current.goals.iter().position(|goal| goal.id == goal_id)?;
            let mut next = current.clone();
            let removed = next.goals.remove(position);
            Some((next, removed))
        })
    }

    /// Stores the review, replacing any earlier one for the same year and week.
    pub fn add_review(&self, input: NewReview) -> Result<WeeklyReview, InfraError> {
        let created = self.commit("add_review", |current| {
            let review = WeeklyReview {
                id: next_id("rev"),
                year: input.year,
                week_number: input.week_number,
                completion_rate: input.completion_rate,
                comment: input.comment,
                created_at: self.now_millis(),
            };
            let mut next = current.clone();
            next.reviews
                .retain(|existing| !existing.is_for(review.year, review.week_number));
            next.reviews.push(review.clone());
            Some((next, review))
        })?;
        created.ok_or_else(|| InfraError::InvalidInput("review was not added".to_string()))
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), InfraError> {
        self.commit("set_theme", |current| {
            let mut next = current.clone();
            next.settings.theme = theme;
            Some((next, ()))
        })?;
        Ok(())
    }

    pub fn set_google_connected(
        &self,
        connected: bool,
        access_token: Option<String>,
    ) -> Result<(), InfraError> {
        self.commit("set_google_connected", |current| {
            let mut next = current.clone();
            next.settings.google_connected = connected;
            next.settings.google_access_token = access_token;
            Some((next, ()))
        })?;
        Ok(())
    }

    /// Runs a command against the current snapshot. `None` from `mutate` means the
    /// command matched nothing: the snapshot stays and subscribers are not called.
    fn commit<R, F>(&self, command: &str, mutate: F) -> Result<Option<R>, InfraError>
    where
        F: FnOnce(&PlannerState) -> Option<(PlannerState, R)>,
    {
        let mut state = self.lock_state()?;
        let current: &PlannerState = &state;
        let Some((next, output)) = mutate(current) else {
            debug!(command, "no matching record; snapshot unchanged");
            return Ok(None);
        };

        let next = Arc::new(next);
        *state = Arc::clone(&next);
        debug!(
            command,
            tasks = next.tasks.len(),
            goals = next.goals.len(),
            reviews = next.reviews.len(),
            "snapshot committed"
        );

        for subscriber in &self.subscribers {
            subscriber.on_snapshot(&next)?;
        }
        Ok(Some(output))
    }

    /// Wall-clock milliseconds, never lower than a value already handed out.
    fn now_millis(&self) -> i64 {
        let now = (self.now_provider)().timestamp_millis();
        let previous = self.last_timestamp.fetch_max(now, Ordering::SeqCst);
        previous.max(now)
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, Arc<PlannerState>>, InfraError> {
        self.state
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("planner state lock poisoned: {error}")))
    }
}

fn latest_timestamp(state: &PlannerState) -> i64 {
    let tasks = state
        .tasks
        .iter()
        .flat_map(|task| [task.created_at, task.updated_at]);
    let goals = state.goals.iter().map(|goal| goal.created_at);
    let reviews = state.reviews.iter().map(|review| review.created_at);
    tasks.chain(goals).chain(reviews).max().unwrap_or(i64::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{GoalType, Priority, TimeTag};
    use crate::infrastructure::storage::InMemoryKeyValueStore;
    use proptest::prelude::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct RecordingSubscriber {
        calls: AtomicUsize,
    }

    impl SnapshotSubscriber for RecordingSubscriber {
        fn on_snapshot(&self, _snapshot: &PlannerState) -> Result<(), InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingSubscriber;

    impl SnapshotSubscriber for FailingSubscriber {
        fn on_snapshot(&self, _snapshot: &PlannerState) -> Result<(), InfraError> {
            Err(InfraError::Io(std::io::Error::other("disk full")))
        }
    }

    fn fixed_clock(millis: i64) -> NowProvider {
        Arc::new(move || DateTime::from_timestamp_millis(millis).expect("valid timestamp"))
    }

    fn new_task(title: &str, start: &str, end: &str, priority: Priority) -> NewTask {
        NewTask {
            title: title.to_string(),
            date: "2024-06-03".to_string(),
            start_time: start.to_string(),
            end_time: end.to_string(),
            priority,
            time_tag: Some(TimeTag::for_start_time(start)),
            memo: None,
            completed: false,
        }
    }

    fn review(week_number: u32, comment: &str) -> NewReview {
        NewReview {
            year: 2024,
            week_number,
            completion_rate: 50,
            comment: comment.to_string(),
        }
    }

    #[test]
    fn add_task_returns_created_record_with_timestamps() {
        let store = PlannerStore::new(PlannerState::default())
            .with_now_provider(fixed_clock(1_717_372_800_000));

        let task = store
            .add_task(new_task("Standup", "09:00", "09:15", Priority::High))
            .expect("add task");

        assert!(task.id.starts_with("tsk-"));
        assert_eq!(task.created_at, 1_717_372_800_000);
        assert_eq!(task.updated_at, task.created_at);
        assert_eq!(task.google_event_id, None);
        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.task(&task.id), Some(&task));
    }

    // Property 4: the task collection stays ordered by date, start time, priority
    #[test]
    fn add_task_keeps_schedule_order() {
        let store = PlannerStore::new(PlannerState::default());
        store
            .add_task(new_task("Later low", "10:00", "11:00", Priority::Low))
            .expect("add low");
        store
            .add_task(new_task("Early high", "09:00", "10:00", Priority::High))
            .expect("add high");

        let snapshot = store.snapshot().expect("snapshot");
        let starts = snapshot
            .tasks
            .iter()
            .map(|task| task.start_time.as_str())
            .collect::<Vec<_>>();
        assert_eq!(starts, vec!["09:00", "10:00"]);
    }

    fn task_input() -> impl Strategy<Value = (u32, u32, u32, usize)> {
        (1u32..=28, 0u32..24, 0u32..60, 0usize..3)
    }

    // Property 4: the sort invariant holds after any sequence of adds
    proptest! {
        #[test]
        fn property4_tasks_sorted_after_any_adds(inputs in proptest::collection::vec(task_input(), 0..24)) {
            let store = PlannerStore::new(PlannerState::default());
            for (day, hour, minute, priority) in inputs {
                let start = format!("{hour:02}:{minute:02}");
                store.add_task(NewTask {
                    title: "task".to_string(),
                    date: format!("2024-06-{day:02}"),
                    start_time: start.clone(),
                    end_time: start,
                    priority: Priority::ALL[priority],
                    time_tag: None,
                    memo: None,
                    completed: false,
                }).expect("add task");
            }

            let snapshot = store.snapshot().expect("snapshot");
            for pair in snapshot.tasks.windows(2) {
                prop_assert_ne!(
                    Task::schedule_order(&pair[0], &pair[1]),
                    std::cmp::Ordering::Greater
                );
            }
        }
    }

    // Property 5: a second review for the same week replaces the first
    #[test]
    fn add_review_replaces_same_week() {
        let store = PlannerStore::new(PlannerState::default());
        store.add_review(review(23, "first")).expect("first review");
        store.add_review(review(24, "other week")).expect("other review");
        store.add_review(review(23, "second")).expect("second review");

        let snapshot = store.snapshot().expect("snapshot");
        let week_23 = snapshot
            .reviews
            .iter()
            .filter(|review| review.is_for(2024, 23))
            .collect::<Vec<_>>();
        assert_eq!(week_23.len(), 1);
        assert_eq!(week_23[0].comment, "second");
        assert_eq!(snapshot.reviews.len(), 2);
    }

    // Property 6: commands on a missing id change nothing and persist nothing
    #[test]
    fn missing_id_commands_are_no_ops() {
        let recorder = Arc::new(RecordingSubscriber::default());
        let store = PlannerStore::new(PlannerState::default())
            .with_subscriber(Arc::clone(&recorder) as Arc<dyn SnapshotSubscriber>);
        store
            .add_task(new_task("Keep", "09:00", "10:00", Priority::Medium))
            .expect("add task");
        let before = store.snapshot().expect("snapshot");

        let patch = TaskPatch {
            title: Some("renamed".to_string()),
            ..TaskPatch::default()
        };
        assert_eq!(store.update_task("missing", &patch).expect("update"), None);
        assert_eq!(store.delete_task("missing").expect("delete"), None);
        assert_eq!(store.toggle_complete("missing").expect("toggle"), None);
        assert_eq!(store.delete_goal("missing").expect("delete goal"), None);

        let after = store.snapshot().expect("snapshot");
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn update_and_toggle_refresh_updated_at_without_resorting() {
        let clock = Arc::new(AtomicI64::new(1_000));
        let clock_source = Arc::clone(&clock);
        let store = PlannerStore::new(PlannerState::default()).with_now_provider(Arc::new(move || {
            DateTime::from_timestamp_millis(clock_source.load(Ordering::SeqCst)).expect("valid timestamp")
        }));
        let first = store
            .add_task(new_task("First", "08:00", "09:00", Priority::High))
            .expect("add first");
        store
            .add_task(new_task("Second", "10:00", "11:00", Priority::High))
            .expect("add second");

        clock.store(2_000, Ordering::SeqCst);
        let moved = store
            .update_task(
                &first.id,
                &TaskPatch {
                    start_time: Some("12:00".to_string()),
                    end_time: Some("13:00".to_string()),
                    ..TaskPatch::default()
                },
            )
            .expect("update")
            .expect("task exists");
        assert_eq!(moved.updated_at, 2_000);
        assert_eq!(moved.created_at, 1_000);

        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.tasks[0].id, first.id);

        clock.store(3_000, Ordering::SeqCst);
        let toggled = store
            .toggle_complete(&first.id)
            .expect("toggle")
            .expect("task exists");
        assert!(toggled.completed);
        assert_eq!(toggled.updated_at, 3_000);
    }

    #[test]
    fn timestamps_never_go_backwards_when_clock_does() {
        let clock = Arc::new(AtomicI64::new(5_000));
        let clock_source = Arc::clone(&clock);
        let store = PlannerStore::new(PlannerState::default()).with_now_provider(Arc::new(move || {
            DateTime::from_timestamp_millis(clock_source.load(Ordering::SeqCst)).expect("valid timestamp")
        }));
        let task = store
            .add_task(new_task("Clock skew", "09:00", "10:00", Priority::Low))
            .expect("add task");

        clock.store(4_000, Ordering::SeqCst);
        let toggled = store
            .toggle_complete(&task.id)
            .expect("toggle")
            .expect("task exists");
        assert_eq!(toggled.updated_at, 5_000);
    }

    #[test]
    fn hydrated_timestamps_bound_later_ones_when_clock_is_behind() {
        let seeded = PlannerStore::new(PlannerState::default()).with_now_provider(fixed_clock(5_000));
        let task = seeded
            .add_task(new_task("Persisted", "09:00", "10:00", Priority::Low))
            .expect("add task");
        seeded
            .add_review(review(23, "late week"))
            .expect("add review");
        let saved = seeded.snapshot().expect("snapshot").as_ref().clone();

        let reloaded = PlannerStore::new(saved).with_now_provider(fixed_clock(4_000));
        let toggled = reloaded
            .toggle_complete(&task.id)
            .expect("toggle")
            .expect("task exists");
        assert!(toggled.updated_at >= 5_000);

        let goal = reloaded
            .add_goal(NewGoal::yearly(2024, "After reload"))
            .expect("add goal");
        assert!(goal.created_at >= 5_000);
    }

    #[test]
    fn update_goal_keeps_identity_and_creation_time() {
        let store = PlannerStore::new(PlannerState::default()).with_now_provider(fixed_clock(42));
        let goal = store
            .add_goal(NewGoal::yearly(2024, "Run a half marathon"))
            .expect("add goal");

        let updated = store
            .update_goal(
                &goal.id,
                &GoalPatch {
                    content: Some("Run a full marathon".to_string()),
                    month: Some(4),
                    ..GoalPatch::default()
                },
            )
            .expect("update goal")
            .expect("goal exists");

        assert_eq!(updated.id, goal.id);
        assert_eq!(updated.created_at, 42);
        assert_eq!(updated.goal_type, GoalType::Yearly);
        assert_eq!(updated.month, None);
        assert_eq!(updated.content, "Run a full marathon");
    }

    #[test]
    fn goals_keep_insertion_order_without_dedup() {
        let store = PlannerStore::new(PlannerState::default());
        store.add_goal(NewGoal::yearly(2024, "first")).expect("first");
        store.add_goal(NewGoal::yearly(2024, "second")).expect("second");

        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.goals.len(), 2);
        assert_eq!(
            snapshot.yearly_goal(2024).map(|goal| goal.content.as_str()),
            Some("first")
        );
    }

    #[test]
    fn settings_commands_replace_fields() {
        let store = PlannerStore::new(PlannerState::default());
        store.set_theme(Theme::Dark).expect("theme");
        store
            .set_google_connected(true, Some("token".to_string()))
            .expect("connect");

        let snapshot = store.snapshot().expect("snapshot");
        assert_eq!(snapshot.settings.theme, Theme::Dark);
        assert_eq!(snapshot.settings.active_access_token(), Some("token"));

        store.set_google_connected(false, None).expect("disconnect");
        let snapshot = store.snapshot().expect("snapshot");
        assert!(!snapshot.settings.google_connected);
        assert_eq!(snapshot.settings.google_access_token, None);
    }

    #[test]
    fn every_commit_is_written_through_the_repository() {
        let storage = Arc::new(InMemoryKeyValueStore::default());
        let repository = Arc::new(StateRepository::new(Arc::clone(&storage), "weekly-planner-storage"));
        let store = PlannerStore::new(repository.load().expect("hydrate"))
            .with_subscriber(Arc::clone(&repository) as Arc<dyn SnapshotSubscriber>);

        let task = store
            .add_task(new_task("Persist me", "09:00", "10:00", Priority::High))
            .expect("add task");
        store.set_theme(Theme::Dark).expect("theme");

        let persisted = repository.load().expect("reload");
        assert_eq!(persisted.task(&task.id), Some(&task));
        assert_eq!(persisted.settings.theme, Theme::Dark);
        assert_eq!(&persisted, store.snapshot().expect("snapshot").as_ref());
    }

    #[test]
    fn persistence_failure_is_surfaced_after_snapshot_swap() {
        let store = PlannerStore::new(PlannerState::default())
            .with_subscriber(Arc::new(FailingSubscriber));

        let result = store.add_task(new_task("Unsaved", "09:00", "10:00", Priority::High));
        assert!(matches!(result, Err(InfraError::Io(_))));
        assert_eq!(store.snapshot().expect("snapshot").tasks.len(), 1);
    }
}
