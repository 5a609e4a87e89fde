// Error taxonomy for the bridge
// Every failure carries a stable code the host layer can switch on

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    /// Missing or malformed configuration supplied by the caller
    #[error("{0}")]
    Configuration(String),

    /// The discovery document could not be fetched or parsed
    #[error("Failed to fetch configuration: {0}")]
    ServiceConfigurationFetch(String),

    /// No user agent could present the authorization request
    #[error("{0}")]
    BrowserNotFound(String),

    /// The authorization redirect was an error, was cancelled, or carried no code
    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    TokenExchange(String),

    #[error("{0}")]
    TokenRefresh(String),

    #[error("{0}")]
    Registration(String),

    #[error("{0}")]
    EndSession(String),

    #[error("{0}")]
    Revocation(String),

    /// A redirect arrived that matches no pending request
    #[error("{0}")]
    Redirect(String),
}

impl AuthError {
    pub fn code(&self) -> &'static str {
        match self {
            AuthError::Configuration(_) => "configuration_error",
            AuthError::ServiceConfigurationFetch(_) => "service_configuration_fetch_error",
            AuthError::BrowserNotFound(_) => "browser_not_found",
            AuthError::Authentication(_) => "authentication_error",
            AuthError::TokenExchange(_) => "token_exchange_failed",
            AuthError::TokenRefresh(_) => "token_refresh_failed",
            AuthError::Registration(_) => "registration_failed",
            AuthError::EndSession(_) => "end_session_failed",
            AuthError::Revocation(_) => "revocation_failed",
            AuthError::Redirect(_) => "redirect_error",
        }
    }

    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        AuthError::Configuration(message.into())
    }
}

/// Serializable form of [`AuthError`] handed back across the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl From<AuthError> for ErrorPayload {
    fn from(error: AuthError) -> Self {
        ErrorPayload {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

/// Picks the human-readable part of an OAuth error response: the description
/// when the server sent one, otherwise the bare error code.
pub(crate) fn oauth_error_message(error: &str, description: Option<&str>) -> String {
    match description {
        Some(description) if !description.is_empty() => description.to_string(),
        _ => error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AuthError::configuration("x").code(), "configuration_error");
        assert_eq!(
            AuthError::ServiceConfigurationFetch("x".into()).code(),
            "service_configuration_fetch_error"
        );
        assert_eq!(AuthError::BrowserNotFound("x".into()).code(), "browser_not_found");
        assert_eq!(AuthError::Authentication("x".into()).code(), "authentication_error");
        assert_eq!(AuthError::TokenExchange("x".into()).code(), "token_exchange_failed");
        assert_eq!(AuthError::TokenRefresh("x".into()).code(), "token_refresh_failed");
        assert_eq!(AuthError::Registration("x".into()).code(), "registration_failed");
        assert_eq!(AuthError::EndSession("x".into()).code(), "end_session_failed");
        assert_eq!(AuthError::Revocation("x".into()).code(), "revocation_failed");
        assert_eq!(AuthError::Redirect("x".into()).code(), "redirect_error");
    }

    #[test]
    fn test_error_payload_conversion() {
        let payload: ErrorPayload =
            AuthError::ServiceConfigurationFetch("connection refused".into()).into();

        assert_eq!(payload.code, "service_configuration_fetch_error");
        assert_eq!(payload.message, "Failed to fetch configuration: connection refused");
        assert_eq!(
            payload.to_string(),
            "[service_configuration_fetch_error] Failed to fetch configuration: connection refused"
        );
    }

    #[test]
    fn test_oauth_error_message_prefers_description() {
        assert_eq!(oauth_error_message("access_denied", Some("User said no")), "User said no");
        assert_eq!(oauth_error_message("access_denied", Some("")), "access_denied");
        assert_eq!(oauth_error_message("access_denied", None), "access_denied");
    }
}
