// Configuration bags accepted by the bridge operations
// Field names follow the host layer's camelCase convention on the wire

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

use crate::error::AuthError;

fn default_true() -> bool {
    true
}

/// Endpoints of an authorization server, either supplied by the caller or
/// taken from the issuer's discovery document. Serialized camelCase for the
/// host; snake_case keys are accepted too so config files stay uniform.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfiguration {
    #[serde(default, alias = "authorization_endpoint")]
    pub authorization_endpoint: String,
    #[serde(default, alias = "token_endpoint")]
    pub token_endpoint: String,
    #[serde(default, alias = "registration_endpoint", skip_serializing_if = "Option::is_none")]
    pub registration_endpoint: Option<String>,
    #[serde(default, alias = "end_session_endpoint", skip_serializing_if = "Option::is_none")]
    pub end_session_endpoint: Option<String>,
    #[serde(default, alias = "revocation_endpoint", skip_serializing_if = "Option::is_none")]
    pub revocation_endpoint: Option<String>,
}

impl ServiceConfiguration {
    pub fn new(authorization_endpoint: impl Into<String>, token_endpoint: impl Into<String>) -> Self {
        ServiceConfiguration {
            authorization_endpoint: authorization_endpoint.into(),
            token_endpoint: token_endpoint.into(),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        if self.authorization_endpoint.trim().is_empty() {
            return Err(AuthError::configuration(
                "serviceConfiguration passed without an authorizationEndpoint",
            ));
        }
        if self.token_endpoint.trim().is_empty() {
            return Err(AuthError::configuration(
                "serviceConfiguration passed without a tokenEndpoint",
            ));
        }

        let optional = [
            ("registrationEndpoint", self.registration_endpoint.as_deref()),
            ("endSessionEndpoint", self.end_session_endpoint.as_deref()),
            ("revocationEndpoint", self.revocation_endpoint.as_deref()),
        ];
        let required = [
            ("authorizationEndpoint", Some(self.authorization_endpoint.as_str())),
            ("tokenEndpoint", Some(self.token_endpoint.as_str())),
        ];

        for (name, value) in required.into_iter().chain(optional) {
            if let Some(value) = value {
                Url::parse(value).map_err(|e| {
                    AuthError::configuration(format!("Invalid {} '{}': {}", name, value, e))
                })?;
            }
        }

        Ok(())
    }
}

/// The HTTP exchanges a custom header can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Register,
    Authorize,
    Token,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomHeaders {
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub register: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub authorize: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub token: HashMap<String, String>,
}

impl CustomHeaders {
    pub fn for_phase(&self, phase: RequestPhase) -> &HashMap<String, String> {
        match phase {
            RequestPhase::Register => &self.register,
            RequestPhase::Authorize => &self.authorize,
            RequestPhase::Token => &self.token,
        }
    }
}

/// How the client secret is presented to the token endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAuthMethod {
    #[default]
    Basic,
    Post,
}

/// Transport settings shared by every configuration bag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default)]
    pub custom_headers: CustomHeaders,
    #[serde(default)]
    pub dangerously_allow_insecure_http_requests: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_timeout_seconds: Option<u64>,
}

impl ConnectionOptions {
    pub fn connection_timeout(&self) -> Option<Duration> {
        self.connection_timeout_seconds.map(Duration::from_secs)
    }
}

/// Configuration for authorize, exchange, refresh, revoke and prefetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_configuration: Option<ServiceConfiguration>,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub redirect_url: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub additional_parameters: HashMap<String, String>,
    #[serde(default = "default_true", rename = "usePKCE")]
    pub use_pkce: bool,
    #[serde(default = "default_true")]
    pub use_nonce: bool,
    #[serde(default)]
    pub skip_code_exchange: bool,
    #[serde(default)]
    pub client_auth_method: ClientAuthMethod,
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl AuthConfiguration {
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_url: impl Into<String>,
    ) -> Self {
        AuthConfiguration {
            issuer: Some(issuer.into()),
            service_configuration: None,
            client_id: client_id.into(),
            client_secret: None,
            redirect_url: redirect_url.into(),
            scopes: Vec::new(),
            additional_parameters: HashMap::new(),
            use_pkce: true,
            use_nonce: true,
            skip_code_exchange: false,
            client_auth_method: ClientAuthMethod::default(),
            connection: ConnectionOptions::default(),
        }
    }

    pub fn validate(&self) -> Result<(), AuthError> {
        validate_endpoint_source(self.issuer.as_deref(), self.service_configuration.as_ref())?;

        if self.client_id.trim().is_empty() {
            return Err(AuthError::configuration("Config error: clientId must be a string"));
        }
        if self.redirect_url.trim().is_empty() {
            return Err(AuthError::configuration("Config error: redirectUrl must be a string"));
        }

        Ok(())
    }
}

/// Configuration for dynamic client registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_configuration: Option<ServiceConfiguration>,
    pub redirect_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grant_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_endpoint_auth_method: Option<String>,
    #[serde(default)]
    pub additional_parameters: HashMap<String, String>,
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl RegistrationConfiguration {
    pub fn validate(&self) -> Result<(), AuthError> {
        validate_endpoint_source(self.issuer.as_deref(), self.service_configuration.as_ref())?;

        if self.redirect_urls.is_empty() {
            return Err(AuthError::configuration(
                "Config error: redirectUrls must contain at least one url",
            ));
        }
        for redirect in &self.redirect_urls {
            Url::parse(redirect).map_err(|e| {
                AuthError::configuration(format!("Invalid redirect url '{}': {}", redirect, e))
            })?;
        }

        Ok(())
    }
}

/// Configuration for an RP-initiated logout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_configuration: Option<ServiceConfiguration>,
    pub id_token: String,
    pub post_logout_redirect_url: String,
    #[serde(default)]
    pub additional_parameters: HashMap<String, String>,
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl EndSessionConfiguration {
    pub fn validate(&self) -> Result<(), AuthError> {
        validate_endpoint_source(self.issuer.as_deref(), self.service_configuration.as_ref())?;

        if self.id_token.trim().is_empty() {
            return Err(AuthError::configuration("Please pass in the ID token hint"));
        }
        if self.post_logout_redirect_url.trim().is_empty() {
            return Err(AuthError::configuration(
                "Config error: postLogoutRedirectUrl must be a string",
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevokeRequest {
    pub token_to_revoke: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type_hint: Option<String>,
    #[serde(default)]
    pub send_client_id: bool,
}

fn validate_endpoint_source(
    issuer: Option<&str>,
    service_configuration: Option<&ServiceConfiguration>,
) -> Result<(), AuthError> {
    match (issuer, service_configuration) {
        (_, Some(configuration)) => configuration.validate(),
        (Some(issuer), None) if !issuer.trim().is_empty() => Url::parse(issuer)
            .map(|_| ())
            .map_err(|e| AuthError::configuration(format!("Invalid issuer '{}': {}", issuer, e))),
        _ => Err(AuthError::configuration(
            "Config error: you must provide either an issuer or a service endpoints",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_configuration_defaults_from_json() {
        let config: AuthConfiguration = serde_json::from_value(json!({
            "issuer": "https://accounts.example.com",
            "clientId": "native-app",
            "redirectUrl": "com.example.app:/oauth2redirect",
            "scopes": ["openid", "profile"]
        }))
        .unwrap();

        assert!(config.use_pkce);
        assert!(config.use_nonce);
        assert!(!config.skip_code_exchange);
        assert_eq!(config.client_auth_method, ClientAuthMethod::Basic);
        assert!(!config.connection.dangerously_allow_insecure_http_requests);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_auth_configuration_reads_bridge_field_names() {
        let config: AuthConfiguration = serde_json::from_value(json!({
            "serviceConfiguration": {
                "authorizationEndpoint": "https://idp.example.com/authorize",
                "tokenEndpoint": "https://idp.example.com/token"
            },
            "clientId": "native-app",
            "redirectUrl": "com.example.app:/oauth2redirect",
            "usePKCE": false,
            "clientAuthMethod": "post",
            "customHeaders": { "token": { "X-Tenant": "blue" } },
            "dangerouslyAllowInsecureHttpRequests": true,
            "connectionTimeoutSeconds": 5
        }))
        .unwrap();

        assert!(!config.use_pkce);
        assert_eq!(config.client_auth_method, ClientAuthMethod::Post);
        assert_eq!(
            config.connection.custom_headers.for_phase(RequestPhase::Token).get("X-Tenant"),
            Some(&"blue".to_string())
        );
        assert!(config.connection.custom_headers.for_phase(RequestPhase::Register).is_empty());
        assert!(config.connection.dangerously_allow_insecure_http_requests);
        assert_eq!(config.connection.connection_timeout(), Some(Duration::from_secs(5)));
    }

    #[test]
    fn test_validation_requires_issuer_or_endpoints() {
        let mut config = AuthConfiguration::new("", "client", "app:/cb");
        config.issuer = None;
        let err = config.validate().unwrap_err();
        assert_eq!(err.code(), "configuration_error");

        config.service_configuration = Some(ServiceConfiguration {
            authorization_endpoint: "https://idp.example.com/authorize".into(),
            ..Default::default()
        });
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tokenEndpoint"));

        config.service_configuration = Some(ServiceConfiguration::new(
            "https://idp.example.com/authorize",
            "https://idp.example.com/token",
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_urls_and_ids() {
        let config = AuthConfiguration::new("not a url", "client", "app:/cb");
        assert!(config.validate().unwrap_err().to_string().contains("Invalid issuer"));

        let config = AuthConfiguration::new("https://idp.example.com", " ", "app:/cb");
        assert!(config.validate().unwrap_err().to_string().contains("clientId"));

        let mut service = ServiceConfiguration::new("https://idp/authorize", "https://idp/token");
        service.revocation_endpoint = Some("::".into());
        assert!(service.validate().unwrap_err().to_string().contains("revocationEndpoint"));
    }

    #[test]
    fn test_registration_and_end_session_validation() {
        let registration = RegistrationConfiguration {
            issuer: Some("https://idp.example.com".into()),
            ..Default::default()
        };
        assert!(registration.validate().unwrap_err().to_string().contains("redirectUrls"));

        let end_session = EndSessionConfiguration {
            issuer: Some("https://idp.example.com".into()),
            id_token: "eyJ...".into(),
            post_logout_redirect_url: String::new(),
            ..Default::default()
        };
        assert!(end_session
            .validate()
            .unwrap_err()
            .to_string()
            .contains("postLogoutRedirectUrl"));
    }
}
