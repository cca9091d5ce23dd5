use crate::infrastructure::error::InfraError;
use crate::infrastructure::event_mapper::GoogleCalendarEvent;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use url::Url;

const CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3/";

/// The three event operations the planner mirrors tasks with.
#[async_trait]
pub trait GoogleCalendarClient: Send + Sync {
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError>;

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError>;

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestGoogleCalendarClient {
    client: Client,
    api_base: String,
}

impl Default for ReqwestGoogleCalendarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl ReqwestGoogleCalendarClient {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            api_base: CALENDAR_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        let mut api_base = api_base.into();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        self.api_base = api_base;
        self
    }

    fn ensure_non_empty(value: &str, field: &str) -> Result<(), InfraError> {
        if value.trim().is_empty() {
            return Err(InfraError::Calendar(format!("{field} must not be empty")));
        }
        Ok(())
    }

    fn events_endpoint(&self, calendar_id: &str, event_id: Option<&str>) -> Result<Url, InfraError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|error| InfraError::Calendar(format!("invalid calendar api base url: {error}")))?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::Calendar("calendar api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("calendars");
            segments.push(calendar_id);
            segments.push("events");
            if let Some(event_id) = event_id {
                segments.push(event_id);
            }
        }
        Ok(url)
    }

    /// Sends the request and returns the body of a 2xx response.
    async fn send(&self, request: RequestBuilder, action: &str) -> Result<String, InfraError> {
        let response = request
            .send()
            .await
            .map_err(|error| InfraError::Calendar(format!("network error while {action}: {error}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::Calendar(format!("failed reading response while {action}: {error}")))?;

        if !status.is_success() {
            let message = if body.trim().is_empty() {
                format!("google calendar api error while {action}: http {}", status.as_u16())
            } else {
                format!(
                    "google calendar api error while {action}: http {}; body={body}",
                    status.as_u16()
                )
            };
            return Err(InfraError::Calendar(message));
        }
        Ok(body)
    }
}

#[derive(Debug, serde::Deserialize)]
struct CreatedEventPayload {
    id: Option<String>,
}

#[async_trait]
impl GoogleCalendarClient for ReqwestGoogleCalendarClient {
    async fn create_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<String, InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;

        let endpoint = self.events_endpoint(calendar_id, None)?;
        let request = self.client.post(endpoint).bearer_auth(access_token).json(event);
        let body = self.send(request, "creating event").await?;

        let parsed: CreatedEventPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::Calendar(format!("invalid event create payload: {error}; body={body}"))
        })?;
        parsed
            .id
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| InfraError::Calendar("event create response did not include id".to_string()))
    }

    async fn update_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
        event: &GoogleCalendarEvent,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = self.events_endpoint(calendar_id, Some(event_id))?;
        let request = self.client.put(endpoint).bearer_auth(access_token).json(event);
        self.send(request, "updating event").await?;
        Ok(())
    }

    async fn delete_event(
        &self,
        access_token: &str,
        calendar_id: &str,
        event_id: &str,
    ) -> Result<(), InfraError> {
        Self::ensure_non_empty(access_token, "access token")?;
        Self::ensure_non_empty(calendar_id, "calendar id")?;
        Self::ensure_non_empty(event_id, "event id")?;

        let endpoint = self.events_endpoint(calendar_id, Some(event_id))?;
        let request = self.client.delete(endpoint).bearer_auth(access_token);
        self.send(request, "deleting event").await?;
        Ok(())
    }
}
