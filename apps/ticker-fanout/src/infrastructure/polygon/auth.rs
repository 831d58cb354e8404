//! Polygon Credentials
//!
//! Polygon authenticates a stream with a single API key sent as the first
//! command after the socket opens:
//!
//! ```json
//! {"action":"auth","params":"<api key>"}
//! ```
//!
//! The server answers with a `status` event (`auth_success` or
//! `auth_failed`). A missing key is not fatal: the connector still connects
//! and the provider rejects the session, which shows up in the logs.

use super::messages::ActionRequest;

/// Environment variable holding the API key.
pub const API_KEY_ENV: &str = "POLYGON_API_KEY";

/// Upstream API credentials.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    api_key: Option<String>,
}

impl Credentials {
    /// Create credentials from an API key. An empty key counts as missing.
    #[must_use]
    pub fn new(api_key: impl Into<String>) -> Self {
        let api_key = api_key.into();
        Self {
            api_key: (!api_key.trim().is_empty()).then_some(api_key),
        }
    }

    /// Credentials with no key.
    #[must_use]
    pub const fn missing() -> Self {
        Self { api_key: None }
    }

    /// Read the key from `POLYGON_API_KEY`.
    #[must_use]
    pub fn from_env() -> Self {
        std::env::var(API_KEY_ENV).map_or_else(|_| Self::missing(), Self::new)
    }

    /// Whether no key is configured.
    #[must_use]
    pub const fn is_missing(&self) -> bool {
        self.api_key.is_none()
    }

    /// The API key, or an empty string when missing.
    #[must_use]
    pub fn api_key(&self) -> &str {
        self.api_key.as_deref().unwrap_or_default()
    }

    /// Build the authentication command.
    #[must_use]
    pub fn to_auth_request(&self) -> ActionRequest {
        ActionRequest::auth(self.api_key())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field(
                "api_key",
                &if self.is_missing() { "[MISSING]" } else { "[REDACTED]" },
            )
            .finish()
    }
}
