// RP-initiated logout request building

use openidconnect::{EndSessionUrl, PostLogoutRedirectUrl};
use url::Url;

use crate::error::AuthError;
use crate::request::{EndSessionConfiguration, ServiceConfiguration};

/// Builds the end-session URL for `state`. Parameters already present on the
/// endpoint are kept.
pub fn end_session_url(
    service: &ServiceConfiguration,
    config: &EndSessionConfiguration,
    state: &str,
) -> Result<Url, AuthError> {
    let endpoint = service.end_session_endpoint.as_deref().ok_or_else(|| {
        AuthError::configuration("End session endpoint not available in the service configuration")
    })?;

    let endpoint = EndSessionUrl::new(endpoint.to_string())
        .map_err(|e| AuthError::configuration(format!("Invalid end session endpoint '{}': {}", endpoint, e)))?;
    let post_logout_redirect = PostLogoutRedirectUrl::new(config.post_logout_redirect_url.clone())
        .map_err(|e| {
            AuthError::configuration(format!(
                "Invalid post logout redirect url '{}': {}",
                config.post_logout_redirect_url, e
            ))
        })?;

    let mut url = endpoint.url().clone();
    {
        let mut query = url.query_pairs_mut();
        query.append_pair("id_token_hint", &config.id_token);
        query.append_pair("post_logout_redirect_uri", post_logout_redirect.url().as_str());
        query.append_pair("state", state);

        let mut extra: Vec<_> = config.additional_parameters.iter().collect();
        extra.sort();
        for (key, value) in extra {
            query.append_pair(key, value);
        }
    }

    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn service() -> ServiceConfiguration {
        ServiceConfiguration {
            end_session_endpoint: Some("https://idp.example.com/logout?tenant=blue".into()),
            ..ServiceConfiguration::new("https://idp.example.com/authorize", "https://idp.example.com/token")
        }
    }

    #[test]
    fn test_end_session_url_parameters() {
        let mut additional_parameters = HashMap::new();
        additional_parameters.insert("ui_locales".to_string(), "fr".to_string());

        let config = EndSessionConfiguration {
            id_token: "id.token.value".into(),
            post_logout_redirect_url: "com.example.app:/logout".into(),
            additional_parameters,
            ..Default::default()
        };

        let url = end_session_url(&service(), &config, "logout-state").unwrap();
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/logout");
        assert_eq!(params["tenant"], "blue");
        assert_eq!(params["id_token_hint"], "id.token.value");
        assert_eq!(params["post_logout_redirect_uri"], "com.example.app:/logout");
        assert_eq!(params["state"], "logout-state");
        assert_eq!(params["ui_locales"], "fr");
    }

    #[test]
    fn test_missing_endpoint_is_configuration_error() {
        let config = EndSessionConfiguration {
            id_token: "id".into(),
            post_logout_redirect_url: "app:/logout".into(),
            ..Default::default()
        };
        let service = ServiceConfiguration::new("https://idp/authorize", "https://idp/token");

        let err = end_session_url(&service, &config, "s").unwrap_err();
        assert_eq!(err.code(), "configuration_error");
    }
}
