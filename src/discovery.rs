//! OpenID Connect discovery and per-issuer caching.
//!
//! Service configurations are fetched from `{issuer}/.well-known/openid-configuration`
//! once per issuer and reused by register, authorize, refresh, revoke and
//! logout for the rest of the process lifetime. Configurations supplied by the
//! caller short-circuit the lookup entirely.
//!
//! Concurrent lookups for an issuer that is not cached yet are not
//! coalesced; each one performs its own fetch and the last writer wins.

use log::{debug, info, warn};
use oauth2::http::{header::ACCEPT, Method, Request};
use oauth2::AsyncHttpClient;
use openidconnect::ProviderMetadataWithLogout;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::RwLock;
use url::Url;

use crate::connection::{describe_http_error, ConnectionBuilder};
use crate::error::AuthError;
use crate::request::ServiceConfiguration;

const WELL_KNOWN_PATH: &str = ".well-known/openid-configuration";

/// Members the typed provider metadata does not model.
#[derive(Debug, Default, Deserialize)]
struct RevocationMetadata {
    #[serde(default)]
    revocation_endpoint: Option<String>,
}

/// Builds the discovery URL for an issuer, keeping any tenant path.
pub fn discovery_url(issuer: &str) -> Result<Url, AuthError> {
    let issuer_url = Url::parse(issuer)
        .map_err(|e| AuthError::configuration(format!("Invalid issuer '{}': {}", issuer, e)))?;

    let mut url = issuer_url.clone();
    let path = issuer_url.path().trim_end_matches('/');
    url.set_path(&format!("{}/{}", path, WELL_KNOWN_PATH));
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

fn cache_key(issuer: &str) -> String {
    issuer.trim_end_matches('/').to_string()
}

/// Fetches and parses the discovery document of `issuer`.
pub async fn fetch_service_configuration(
    issuer: &str,
    connection: &ConnectionBuilder,
) -> Result<ServiceConfiguration, AuthError> {
    let url = discovery_url(issuer)?;
    info!("Fetching OIDC configuration from {}", url);

    let request = Request::builder()
        .method(Method::GET)
        .uri(url.as_str())
        .header(ACCEPT, "application/json")
        .body(Vec::new())
        .map_err(|e| AuthError::ServiceConfigurationFetch(e.to_string()))?;

    let response = connection.call(request).await.map_err(|e| {
        warn!("OIDC discovery request to {} failed: {}", url, e);
        AuthError::ServiceConfigurationFetch(describe_http_error(&e))
    })?;

    if !response.status().is_success() {
        return Err(AuthError::ServiceConfigurationFetch(format!(
            "{} returned HTTP status {}",
            url,
            response.status()
        )));
    }

    let body = response.body();
    let metadata: ProviderMetadataWithLogout = serde_json::from_slice(body).map_err(|e| {
        AuthError::ServiceConfigurationFetch(format!("Invalid discovery document: {}", e))
    })?;
    let revocation: RevocationMetadata = serde_json::from_slice(body).unwrap_or_default();

    let advertised_issuer = metadata.issuer().url().as_str().trim_end_matches('/').to_string();
    if advertised_issuer != cache_key(issuer) {
        warn!(
            "Discovery document issuer {} differs from requested issuer {}",
            advertised_issuer, issuer
        );
    }

    let token_endpoint = metadata.token_endpoint().ok_or_else(|| {
        AuthError::configuration(format!("Discovery document for {} has no token_endpoint", issuer))
    })?;

    let configuration = ServiceConfiguration {
        authorization_endpoint: metadata.authorization_endpoint().url().as_str().to_string(),
        token_endpoint: token_endpoint.url().as_str().to_string(),
        registration_endpoint: metadata
            .registration_endpoint()
            .map(|endpoint| endpoint.url().as_str().to_string()),
        end_session_endpoint: metadata
            .additional_metadata()
            .end_session_endpoint
            .as_ref()
            .map(|endpoint| endpoint.url().as_str().to_string()),
        revocation_endpoint: revocation.revocation_endpoint,
    };

    debug!(
        "Discovered endpoints for {}: authorization={}, token={}",
        issuer, configuration.authorization_endpoint, configuration.token_endpoint
    );

    Ok(configuration)
}

/// In-memory map of issuer to service configuration.
#[derive(Debug, Default)]
pub struct DiscoveryCache {
    entries: RwLock<HashMap<String, ServiceConfiguration>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, issuer: &str) -> Option<ServiceConfiguration> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(&cache_key(issuer)).cloned()
    }

    pub fn insert(&self, issuer: &str, configuration: ServiceConfiguration) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(cache_key(issuer), configuration);
    }

    pub fn invalidate(&self, issuer: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(&cache_key(issuer)).is_some()
    }

    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Supplied configuration first, then the cache, then the network.
    pub async fn resolve(
        &self,
        issuer: Option<&str>,
        supplied: Option<&ServiceConfiguration>,
        connection: &ConnectionBuilder,
    ) -> Result<ServiceConfiguration, AuthError> {
        if let Some(configuration) = supplied {
            configuration.validate()?;
            debug!("Using supplied service configuration");
            return Ok(configuration.clone());
        }

        let issuer = issuer.filter(|issuer| !issuer.trim().is_empty()).ok_or_else(|| {
            AuthError::configuration(
                "Config error: you must provide either an issuer or a service endpoints",
            )
        })?;

        if let Some(configuration) = self.get(issuer) {
            debug!("Using cached service configuration for {}", issuer);
            return Ok(configuration);
        }

        let configuration = fetch_service_configuration(issuer, connection).await?;
        self.insert(issuer, configuration.clone());
        Ok(configuration)
    }
}
