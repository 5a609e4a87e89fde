// Token revocation (RFC 7009)

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{info, warn};
use oauth2::basic::BasicErrorResponse;
use oauth2::http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use oauth2::http::{Method, Request};
use oauth2::AsyncHttpClient;
use url::form_urlencoded;

use crate::connection::{describe_http_error, ConnectionBuilder};
use crate::error::{oauth_error_message, AuthError};
use crate::request::{AuthConfiguration, ClientAuthMethod, RevokeRequest, ServiceConfiguration};

/// Client credentials for the Authorization header, form-encoded first as
/// RFC 6749 section 2.3.1 requires.
fn basic_authorization(client_id: &str, client_secret: &str) -> String {
    let id: String = form_urlencoded::byte_serialize(client_id.as_bytes()).collect();
    let secret: String = form_urlencoded::byte_serialize(client_secret.as_bytes()).collect();
    format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
}

pub async fn revoke_token(
    service: &ServiceConfiguration,
    config: &AuthConfiguration,
    revoke: &RevokeRequest,
    connection: &ConnectionBuilder,
) -> Result<(), AuthError> {
    let endpoint = service.revocation_endpoint.as_deref().ok_or_else(|| {
        AuthError::configuration("Revocation endpoint not available in the service configuration")
    })?;

    if revoke.token_to_revoke.is_empty() {
        return Err(AuthError::configuration("Please include the token to revoke"));
    }

    let mut form = form_urlencoded::Serializer::new(String::new());
    form.append_pair("token", &revoke.token_to_revoke);
    if let Some(hint) = &revoke.token_type_hint {
        form.append_pair("token_type_hint", hint);
    }

    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(endpoint)
        .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
        .header(ACCEPT, "application/json");

    match (config.client_secret.as_deref(), config.client_auth_method) {
        (Some(secret), ClientAuthMethod::Basic) => {
            builder = builder.header(AUTHORIZATION, basic_authorization(&config.client_id, secret));
            if revoke.send_client_id {
                form.append_pair("client_id", &config.client_id);
            }
        }
        (Some(secret), ClientAuthMethod::Post) => {
            form.append_pair("client_id", &config.client_id);
            form.append_pair("client_secret", secret);
        }
        (None, _) => {
            if revoke.send_client_id {
                form.append_pair("client_id", &config.client_id);
            }
        }
    }

    let request = builder
        .body(form.finish().into_bytes())
        .map_err(|e| AuthError::configuration(format!("Invalid revocation endpoint '{}': {}", endpoint, e)))?;

    let response = connection
        .call(request)
        .await
        .map_err(|e| AuthError::Revocation(describe_http_error(&e)))?;

    let status = response.status();
    if !status.is_success() {
        let message = match serde_json::from_slice::<BasicErrorResponse>(response.body()) {
            Ok(error) => oauth_error_message(
                &error.error().to_string(),
                error.error_description().map(String::as_str),
            ),
            Err(_) => format!("Revocation endpoint returned HTTP status {}", status),
        };
        warn!("Token revocation failed: {}", message);
        return Err(AuthError::Revocation(message));
    }

    info!("Token revoked at {}", endpoint);
    Ok(())
}
