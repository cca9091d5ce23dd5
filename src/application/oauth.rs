use crate::infrastructure::error::InfraError;
use url::Url;

const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
pub const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8080/oauth2/callback";
pub const DEFAULT_SCOPE: &str = "https://www.googleapis.com/auth/calendar.events";

const CLIENT_ID_KEYS: [&str; 2] = ["WEEKPLAN_GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_ID"];
const REDIRECT_URI_KEYS: [&str; 2] = ["WEEKPLAN_GOOGLE_REDIRECT_URI", "GOOGLE_REDIRECT_URI"];
const SCOPE_KEYS: [&str; 2] = ["WEEKPLAN_GOOGLE_SCOPES", "GOOGLE_SCOPES"];

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scopes,
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }

    pub fn from_env() -> Result<Self, InfraError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, InfraError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let client_id = required_lookup_value(&lookup, &CLIENT_ID_KEYS, "google client id")?;
        let redirect_uri = optional_lookup_value(&lookup, &REDIRECT_URI_KEYS)
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string());
        let scopes = optional_lookup_value(&lookup, &SCOPE_KEYS)
            .map(|raw| parse_scope_list(&raw))
            .filter(|scopes| !scopes.is_empty())
            .unwrap_or_else(|| vec![DEFAULT_SCOPE.to_string()]);

        Ok(Self::new(client_id, redirect_uri, scopes))
    }
}

/// Token handed back in the redirect fragment of the implicit grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImplicitGrant {
    pub access_token: String,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

pub struct OAuthManager {
    config: OAuthConfig,
}

impl OAuthManager {
    pub fn new(config: OAuthConfig) -> Self {
        Self { config }
    }

    /// Browser URL that starts the token flow; the provider redirects back with the
    /// token in the fragment.
    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        let scope = self.config.scopes.join(" ");

        url.query_pairs_mut()
            .append_pair("response_type", "token")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &scope)
            .append_pair("include_granted_scopes", "true")
            .append_pair("state", state);

        Ok(url.to_string())
    }

    /// Reads the grant out of the redirect URL. The `state` must match the one the
    /// authorization URL was built with.
    pub fn parse_redirect(&self, redirect_url: &str, expected_state: &str) -> Result<ImplicitGrant, InfraError> {
        let url = Url::parse(redirect_url.trim())
            .map_err(|error| InfraError::OAuth(format!("invalid redirect url: {error}")))?;
        let fragment = url
            .fragment()
            .filter(|fragment| !fragment.is_empty())
            .ok_or_else(|| InfraError::OAuth("redirect url has no fragment".to_string()))?;

        let mut access_token = None;
        let mut token_type = None;
        let mut expires_in = None;
        let mut scope = None;
        let mut state = None;
        let mut error = None;
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()) {
            match key.as_ref() {
                "access_token" => access_token = Some(value.into_owned()),
                "token_type" => token_type = Some(value.into_owned()),
                "expires_in" => expires_in = value.parse::<i64>().ok(),
                "scope" => scope = Some(value.into_owned()),
                "state" => state = Some(value.into_owned()),
                "error" => error = Some(value.into_owned()),
                _ => {}
            }
        }

        if let Some(error) = error {
            return Err(InfraError::OAuth(format!("authorization denied: {error}")));
        }
        if state.as_deref() != Some(expected_state) {
            return Err(InfraError::OAuth("state mismatch in redirect".to_string()));
        }
        let access_token = access_token
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
            .ok_or_else(|| InfraError::OAuth("redirect did not include access_token".to_string()))?;

        Ok(ImplicitGrant {
            access_token,
            token_type,
            expires_in,
            scope,
        })
    }
}

fn required_lookup_value<F>(lookup: &F, keys: &[&str], field_name: &str) -> Result<String, InfraError>
where
    F: Fn(&str) -> Option<String>,
{
    optional_lookup_value(lookup, keys).ok_or_else(|| {
        InfraError::InvalidConfig(format!(
            "missing {} (set one of: {})",
            field_name,
            keys.join(", ")
        ))
    })
}

fn optional_lookup_value<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    for key in keys {
        if let Some(value) = lookup(key) {
            let normalized = value.trim();
            if !normalized.is_empty() {
                return Some(normalized.to_string());
            }
        }
    }
    None
}

fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split([',', ' ', '\n', '\t'])
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToOwned::to_owned)
        .collect()
}
