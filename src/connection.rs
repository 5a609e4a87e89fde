// Connection strategy for every HTTP exchange with the authorization server
// Wraps reqwest so oauth2 requests pick up custom headers, timeouts and the TLS policy

use log::{debug, warn};
use oauth2::http::header::{HeaderMap, HeaderName, HeaderValue};
use oauth2::{AsyncHttpClient, HttpClientError, HttpRequest, HttpResponse};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::config::NetworkConfig;
use crate::error::AuthError;
use crate::request::{ConnectionOptions, RequestPhase};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Effective transport settings for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub allow_insecure: bool,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        ConnectionSettings {
            allow_insecure: false,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl ConnectionSettings {
    pub fn from_network(network: &NetworkConfig) -> Self {
        ConnectionSettings {
            allow_insecure: network.dangerously_allow_insecure_http_requests,
            connect_timeout: Duration::from_secs(network.connection_timeout_seconds),
            read_timeout: Duration::from_secs(network.read_timeout_seconds),
        }
    }

    /// Per-call options win over the process defaults. A per-call timeout
    /// applies to both the connect and the read phase.
    pub fn merged_with(&self, options: &ConnectionOptions) -> Self {
        let mut settings = self.clone();
        settings.allow_insecure |= options.dangerously_allow_insecure_http_requests;
        if let Some(timeout) = options.connection_timeout() {
            settings.connect_timeout = timeout;
            settings.read_timeout = timeout;
        }
        settings
    }
}

/// HTTP client for a single request phase.
#[derive(Debug, Clone)]
pub struct ConnectionBuilder {
    client: reqwest::Client,
    headers: HeaderMap,
    allow_insecure: bool,
}

impl ConnectionBuilder {
    pub fn new(
        settings: &ConnectionSettings,
        headers: &HashMap<String, String>,
    ) -> Result<Self, AuthError> {
        let mut builder = reqwest::Client::builder()
            // Following redirects opens the client up to SSRF
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.connect_timeout + settings.read_timeout);

        if settings.allow_insecure {
            warn!("Insecure HTTP requests allowed: plain http and invalid certificates will be accepted");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let client = builder
            .build()
            .map_err(|e| AuthError::configuration(format!("Failed to create HTTP client: {}", e)))?;

        Ok(ConnectionBuilder {
            client,
            headers: parse_headers(headers)?,
            allow_insecure: settings.allow_insecure,
        })
    }

    pub fn for_phase(
        settings: &ConnectionSettings,
        options: &ConnectionOptions,
        phase: RequestPhase,
    ) -> Result<Self, AuthError> {
        let settings = settings.merged_with(options);
        Self::new(&settings, options.custom_headers.for_phase(phase))
    }

    pub fn allows_insecure(&self) -> bool {
        self.allow_insecure
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    fn prepare(&self, request: &mut HttpRequest) -> Result<(), HttpClientError<reqwest::Error>> {
        if !self.allow_insecure && request.uri().scheme_str() != Some("https") {
            return Err(HttpClientError::Other(format!(
                "only https connections are permitted: {}",
                request.uri()
            )));
        }

        for (name, value) in &self.headers {
            request.headers_mut().insert(name.clone(), value.clone());
        }

        debug!("{} {}", request.method(), request.uri());
        Ok(())
    }
}

impl<'c> AsyncHttpClient<'c> for ConnectionBuilder {
    type Error = HttpClientError<reqwest::Error>;
    type Future =
        Pin<Box<dyn Future<Output = Result<HttpResponse, Self::Error>> + Send + Sync + 'c>>;

    fn call(&'c self, mut request: HttpRequest) -> Self::Future {
        Box::pin(async move {
            self.prepare(&mut request)?;
            AsyncHttpClient::call(&self.client, request).await
        })
    }
}

fn parse_headers(headers: &HashMap<String, String>) -> Result<HeaderMap, AuthError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| AuthError::configuration(format!("Invalid header name '{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            AuthError::configuration(format!("Invalid value for header '{}': {}", name, e))
        })?;
        map.insert(name, value);
    }
    Ok(map)
}

/// Renders a transport error with its source chain; oauth2 wraps the useful
/// detail a couple of levels down.
pub(crate) fn describe_http_error(error: &(dyn std::error::Error + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
