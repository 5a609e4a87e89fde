// Dynamic client registration (RFC 7591)

use log::{info, warn};
use oauth2::basic::BasicErrorResponse;
use oauth2::http::header::{ACCEPT, CONTENT_TYPE};
use oauth2::http::{Method, Request};
use oauth2::AsyncHttpClient;
use serde_json::{Map, Value};

use crate::connection::{describe_http_error, ConnectionBuilder};
use crate::error::{oauth_error_message, AuthError};
use crate::request::{RegistrationConfiguration, ServiceConfiguration};
use crate::response::{registration_result, RawRegistrationResponse, RegistrationResult};

const APPLICATION_TYPE_NATIVE: &str = "native";

/// Builds the registration document. Additional parameters become top-level
/// members but never replace the standard ones.
pub fn registration_body(config: &RegistrationConfiguration) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("redirect_uris".to_string(), Value::from(config.redirect_urls.clone()));
    body.insert("application_type".to_string(), Value::from(APPLICATION_TYPE_NATIVE));

    if let Some(response_types) = &config.response_types {
        body.insert("response_types".to_string(), Value::from(response_types.clone()));
    }
    if let Some(grant_types) = &config.grant_types {
        body.insert("grant_types".to_string(), Value::from(grant_types.clone()));
    }
    if let Some(subject_type) = &config.subject_type {
        body.insert("subject_type".to_string(), Value::from(subject_type.clone()));
    }
    if let Some(method) = &config.token_endpoint_auth_method {
        body.insert("token_endpoint_auth_method".to_string(), Value::from(method.clone()));
    }

    for (key, value) in &config.additional_parameters {
        if body.contains_key(key) {
            warn!("Ignoring additional registration parameter '{}' that shadows a standard member", key);
            continue;
        }
        body.insert(key.clone(), Value::from(value.clone()));
    }

    body
}

pub async fn register_client(
    service: &ServiceConfiguration,
    config: &RegistrationConfiguration,
    connection: &ConnectionBuilder,
) -> Result<RegistrationResult, AuthError> {
    let endpoint = service.registration_endpoint.as_deref().ok_or_else(|| {
        AuthError::configuration("Registration endpoint not available in the service configuration")
    })?;

    let body = serde_json::to_vec(&registration_body(config))
        .map_err(|e| AuthError::Registration(format!("Failed to encode registration request: {}", e)))?;

    let request = Request::builder()
        .method(Method::POST)
        .uri(endpoint)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCEPT, "application/json")
        .body(body)
        .map_err(|e| AuthError::configuration(format!("Invalid registration endpoint '{}': {}", endpoint, e)))?;

    info!("Registering client at {}", endpoint);

    let response = connection
        .call(request)
        .await
        .map_err(|e| AuthError::Registration(describe_http_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        let message = match serde_json::from_slice::<BasicErrorResponse>(response.body()) {
            Ok(error) => oauth_error_message(
                &error.error().to_string(),
                error.error_description().map(String::as_str),
            ),
            Err(_) => format!("Registration endpoint returned HTTP status {}", status),
        };
        warn!("Client registration failed: {}", message);
        return Err(AuthError::Registration(message));
    }

    let parsed: RawRegistrationResponse = serde_json::from_slice(response.body())
        .map_err(|e| AuthError::Registration(format!("Invalid registration response: {}", e)))?;

    info!("Registered client {}", parsed.client_id);
    Ok(registration_result(parsed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    #[test]
    fn test_registration_body() {
        let mut additional_parameters = HashMap::new();
        additional_parameters.insert("client_name".to_string(), "Example".to_string());
        additional_parameters.insert("application_type".to_string(), "web".to_string());

        let config = RegistrationConfiguration {
            issuer: Some("https://idp.example.com".into()),
            redirect_urls: vec!["com.example.app:/cb".into()],
            grant_types: Some(vec!["authorization_code".into(), "refresh_token".into()]),
            token_endpoint_auth_method: Some("none".into()),
            additional_parameters,
            ..Default::default()
        };

        let body = Value::Object(registration_body(&config));
        assert_eq!(
            body,
            json!({
                "redirect_uris": ["com.example.app:/cb"],
                "application_type": "native",
                "grant_types": ["authorization_code", "refresh_token"],
                "token_endpoint_auth_method": "none",
                "client_name": "Example"
            })
        );
    }
}
