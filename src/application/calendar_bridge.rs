use crate::domain::models::Task;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::encode_task_event;
use crate::infrastructure::google_calendar_client::GoogleCalendarClient;
use std::future::Future;
use std::sync::Arc;
use tokio::time::{sleep, Duration as TokioDuration};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteUpdate {
    Updated,
    /// The task had no event yet; one was created and its id must be attached.
    Created(String),
    Failed,
}

impl RemoteUpdate {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed)
    }
}

/// Best-effort mirror of tasks into one Google calendar. Failures are logged and
/// reported as "nothing happened"; they never reach the caller as errors.
pub struct CalendarBridge<C>
where
    C: GoogleCalendarClient,
{
    calendar_client: Arc<C>,
    calendar_id: String,
    time_zone: String,
    retry_policy: RetryPolicy,
}

impl<C> CalendarBridge<C>
where
    C: GoogleCalendarClient,
{
    pub fn new(
        calendar_client: Arc<C>,
        calendar_id: impl Into<String>,
        time_zone: impl Into<String>,
    ) -> Self {
        Self {
            calendar_client,
            calendar_id: calendar_id.into(),
            time_zone: time_zone.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub async fn create_remote_event(&self, access_token: &str, task: &Task) -> Option<String> {
        let event = encode_task_event(task, &self.time_zone);
        let client = &self.calendar_client;
        let calendar_id = self.calendar_id.as_str();
        let event = &event;

        match self
            .with_retry(move || client.create_event(access_token, calendar_id, event))
            .await
        {
            Ok(event_id) => {
                info!(task_id = %task.id, event_id = %event_id, "calendar event created");
                Some(event_id)
            }
            Err(error) => {
                warn!(task_id = %task.id, %error, "calendar event creation failed");
                None
            }
        }
    }

    pub async fn update_remote_event(&self, access_token: &str, task: &Task) -> RemoteUpdate {
        let Some(event_id) = task.google_event_id.as_deref() else {
            return match self.create_remote_event(access_token, task).await {
                Some(created) => RemoteUpdate::Created(created),
                None => RemoteUpdate::Failed,
            };
        };

        let event = encode_task_event(task, &self.time_zone);
        let client = &self.calendar_client;
        let calendar_id = self.calendar_id.as_str();
        let event = &event;

        match self
            .with_retry(move || client.update_event(access_token, calendar_id, event_id, event))
            .await
        {
            Ok(()) => {
                info!(task_id = %task.id, event_id, "calendar event updated");
                RemoteUpdate::Updated
            }
            Err(error) => {
                warn!(task_id = %task.id, event_id, %error, "calendar event update failed");
                RemoteUpdate::Failed
            }
        }
    }

    pub async fn delete_remote_event(&self, access_token: &str, event_id: &str) -> bool {
        let client = &self.calendar_client;
        let calendar_id = self.calendar_id.as_str();

        match self
            .with_retry(move || client.delete_event(access_token, calendar_id, event_id))
            .await
        {
            Ok(()) => {
                info!(event_id, "calendar event deleted");
                true
            }
            Err(error) => {
                warn!(event_id, %error, "calendar event deletion failed");
                false
            }
        }
    }

    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T, InfraError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, InfraError>>,
    {
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempt: u8 = 0;

        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) if self.should_retry(&error) && attempt + 1 < max_attempts => {
                    let delay = self
                        .retry_policy
                        .base_delay_ms
                        .saturating_mul(2u64.saturating_pow(attempt as u32));
                    warn!(attempt = attempt + 1, delay_ms = delay, %error, "retrying calendar request");
                    sleep(TokioDuration::from_millis(delay)).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(error) => return Err(error),
            }
        }
    }

    fn should_retry(&self, error: &InfraError) -> bool {
        match error {
            InfraError::Calendar(message) => {
                let message = message.to_ascii_lowercase();
                message.contains("network error")
                    || message.contains("timeout")
                    || message.contains("timed out")
                    || message.contains("temporarily unavailable")
                    || message.contains("connection reset")
            }
            _ => false,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::models::{Priority, TimeTag};
    use crate::infrastructure::event_mapper::GoogleCalendarEvent;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    pub(crate) enum FakeResponse {
        Ok,
        NetworkError,
        HttpError,
    }

    /// Scripted calendar client. Responses are consumed per call; an empty script
    /// answers `Ok`. Created events are numbered `evt-1`, `evt-2`, ...
    #[derive(Debug, Default)]
    pub(crate) struct FakeGoogleCalendarClient {
        responses: Mutex<VecDeque<FakeResponse>>,
        pub(crate) create_calls: AtomicUsize,
        pub(crate) update_calls: AtomicUsize,
        pub(crate) delete_calls: AtomicUsize,
        pub(crate) events: Mutex<Vec<GoogleCalendarEvent>>,
        pub(crate) deleted: Mutex<Vec<String>>,
    }

    impl FakeGoogleCalendarClient {
        pub(crate) fn with_responses(responses: Vec<FakeResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                ..Self::default()
            }
        }

        fn next_response(&self, action: &str) -> Result<(), InfraError> {
            let response = self
                .responses
                .lock()
                .expect("response lock poisoned")
                .pop_front()
                .unwrap_or(FakeResponse::Ok);
            match response {
                FakeResponse::Ok => Ok(()),
                FakeResponse::NetworkError => Err(InfraError::Calendar(format!(
                    "network error while {action}: connection refused"
                ))),
                FakeResponse::HttpError => Err(InfraError::Calendar(format!(
                    "google calendar api error while {action}: http 403"
                ))),
            }
        }
    }

    #[async_trait]
    impl GoogleCalendarClient for FakeGoogleCalendarClient {
        async fn create_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<String, InfraError> {
            let call = self.create_calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.next_response("creating event")?;
            self.events.lock().expect("events lock poisoned").push(event.clone());
            Ok(format!("evt-{call}"))
        }

        async fn update_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            _event_id: &str,
            event: &GoogleCalendarEvent,
        ) -> Result<(), InfraError> {
            self.update_calls.fetch_add(1, Ordering::SeqCst);
            self.next_response("updating event")?;
            self.events.lock().expect("events lock poisoned").push(event.clone());
            Ok(())
        }

        async fn delete_event(
            &self,
            _access_token: &str,
            _calendar_id: &str,
            event_id: &str,
        ) -> Result<(), InfraError> {
            self.delete_calls.fetch_add(1, Ordering::SeqCst);
            self.next_response("deleting event")?;
            self.deleted
                .lock()
                .expect("deleted lock poisoned")
                .push(event_id.to_string());
            Ok(())
        }
    }

    fn sample_task(google_event_id: Option<&str>) -> Task {
        Task {
            id: "tsk-1".to_string(),
            title: "Dentist".to_string(),
            date: "2024-06-05".to_string(),
            start_time: "14:00".to_string(),
            end_time: "15:00".to_string(),
            priority: Priority::Medium,
            time_tag: Some(TimeTag::Afternoon),
            memo: None,
            completed: false,
            google_event_id: google_event_id.map(ToOwned::to_owned),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn fast_bridge(client: Arc<FakeGoogleCalendarClient>, max_attempts: u8) -> CalendarBridge<FakeGoogleCalendarClient> {
        CalendarBridge::new(client, "primary", "Asia/Seoul").with_retry_policy(RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
        })
    }

    #[tokio::test]
    async fn create_returns_event_id_and_sends_encoded_event() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let bridge = fast_bridge(Arc::clone(&client), 1);

        let event_id = bridge.create_remote_event("token", &sample_task(None)).await;

        assert_eq!(event_id.as_deref(), Some("evt-1"));
        let events = client.events.lock().expect("events lock");
        assert_eq!(events[0].summary.as_deref(), Some("[중] Dentist"));
        assert_eq!(events[0].start.date_time, "2024-06-05T14:00:00");
    }

    #[tokio::test]
    async fn create_failure_degrades_to_none() {
        let client = Arc::new(FakeGoogleCalendarClient::with_responses(vec![FakeResponse::HttpError]));
        let bridge = fast_bridge(Arc::clone(&client), 3);

        assert_eq!(bridge.create_remote_event("token", &sample_task(None)).await, None);
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn network_errors_are_retried_with_backoff() {
        let client = Arc::new(FakeGoogleCalendarClient::with_responses(vec![
            FakeResponse::NetworkError,
            FakeResponse::NetworkError,
        ]));
        let bridge = fast_bridge(Arc::clone(&client), 3);

        let event_id = bridge.create_remote_event("token", &sample_task(None)).await;

        assert_eq!(event_id.as_deref(), Some("evt-3"));
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_stop_after_max_attempts() {
        let client = Arc::new(FakeGoogleCalendarClient::with_responses(vec![
            FakeResponse::NetworkError,
            FakeResponse::NetworkError,
            FakeResponse::NetworkError,
        ]));
        let bridge = fast_bridge(Arc::clone(&client), 2);

        assert!(!bridge.delete_remote_event("token", "evt-9").await);
        assert_eq!(client.delete_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn update_without_event_id_falls_back_to_create() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let bridge = fast_bridge(Arc::clone(&client), 1);

        let outcome = bridge.update_remote_event("token", &sample_task(None)).await;

        assert_eq!(outcome, RemoteUpdate::Created("evt-1".to_string()));
        assert_eq!(client.update_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_with_event_id_updates_in_place() {
        let client = Arc::new(FakeGoogleCalendarClient::with_responses(vec![FakeResponse::Ok]));
        let bridge = fast_bridge(Arc::clone(&client), 1);

        let outcome = bridge
            .update_remote_event("token", &sample_task(Some("evt-7")))
            .await;

        assert_eq!(outcome, RemoteUpdate::Updated);
        assert!(outcome.succeeded());
        assert_eq!(client.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_failure_reports_failed() {
        let client = Arc::new(FakeGoogleCalendarClient::with_responses(vec![FakeResponse::HttpError]));
        let bridge = fast_bridge(Arc::clone(&client), 3);

        let outcome = bridge
            .update_remote_event("token", &sample_task(Some("evt-7")))
            .await;
        assert!(!outcome.succeeded());
    }

    #[tokio::test]
    async fn delete_success_reports_true() {
        let client = Arc::new(FakeGoogleCalendarClient::default());
        let bridge = fast_bridge(Arc::clone(&client), 1);

        assert!(bridge.delete_remote_event("token", "evt-4").await);
        assert_eq!(
            client.deleted.lock().expect("deleted lock").as_slice(),
            ["evt-4".to_string()]
        );
    }
}
