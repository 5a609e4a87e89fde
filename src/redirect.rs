//! Routing of authorization and end-session redirects back to their waiters.
//!
//! Each in-flight request registers its `state` value and receives a
//! [`PendingRedirect`]. A redirect URL delivered through
//! [`RedirectRouter::deliver`] (from a deep-link handler or the loopback
//! listener) is parsed, matched by `state`, and handed to that single waiter.
//! Entries are removed on delivery, on cancellation and when the waiter is
//! dropped, so every attempt resolves at most once.

use axum::extract::{OriginalUri, Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::{TokioIo, TokioTimer};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::Service;
use url::Url;

use crate::config::RedirectConfig;
use crate::error::{oauth_error_message, AuthError};

const STANDARD_PARAMETERS: &[&str] = &["state", "code", "error", "error_description", "error_uri", "scope"];

/// Parameters carried by a redirect, from its query and fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectPayload {
    pub url: Url,
    pub parameters: HashMap<String, String>,
}

impl RedirectPayload {
    /// Query parameters win over fragment parameters with the same name.
    pub fn parse(raw: &str) -> Result<Self, AuthError> {
        let url = Url::parse(raw)
            .map_err(|e| AuthError::Redirect(format!("Invalid redirect url: {}", e)))?;

        let mut parameters: HashMap<String, String> = url.query_pairs().into_owned().collect();
        if let Some(fragment) = url.fragment() {
            for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()).into_owned() {
                parameters.entry(key).or_insert(value);
            }
        }

        Ok(RedirectPayload { url, parameters })
    }

    fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn state(&self) -> Option<&str> {
        self.parameter("state")
    }

    pub fn code(&self) -> Option<&str> {
        self.parameter("code").filter(|code| !code.is_empty())
    }

    pub fn error(&self) -> Option<&str> {
        self.parameter("error")
    }

    pub fn error_description(&self) -> Option<&str> {
        self.parameter("error_description")
    }

    pub fn scope(&self) -> Option<&str> {
        self.parameter("scope")
    }

    /// `error_description` when present, otherwise `error`.
    pub fn error_message(&self) -> Option<String> {
        self.error()
            .map(|error| oauth_error_message(error, self.error_description()))
    }

    /// Everything except the protocol parameters.
    pub fn additional_parameters(&self) -> HashMap<String, String> {
        self.parameters
            .iter()
            .filter(|(key, _)| !STANDARD_PARAMETERS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<RedirectPayload>>>>;

fn lock(pending: &PendingMap) -> MutexGuard<'_, HashMap<String, oneshot::Sender<RedirectPayload>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

/// Map from `state` to the waiter of that request.
#[derive(Debug, Clone, Default)]
pub struct RedirectRouter {
    pending: PendingMap,
}

impl RedirectRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, state: &str) -> Result<PendingRedirect, AuthError> {
        if state.is_empty() {
            return Err(AuthError::Redirect("Cannot wait for a redirect without a state".to_string()));
        }

        let (sender, receiver) = oneshot::channel();
        let mut pending = lock(&self.pending);
        if pending.contains_key(state) {
            return Err(AuthError::Redirect(format!(
                "A request with state {} is already pending",
                state
            )));
        }
        pending.insert(state.to_string(), sender);
        debug!("Waiting for redirect ({} pending)", pending.len());

        Ok(PendingRedirect {
            state: state.to_string(),
            receiver,
            pending: Arc::clone(&self.pending),
        })
    }

    pub fn deliver(&self, url: &str) -> Result<(), AuthError> {
        self.deliver_payload(RedirectPayload::parse(url)?)
    }

    pub fn deliver_payload(&self, payload: RedirectPayload) -> Result<(), AuthError> {
        let state = payload
            .state()
            .ok_or_else(|| AuthError::Redirect("Redirect carries no state parameter".to_string()))?
            .to_string();

        let sender = lock(&self.pending).remove(&state).ok_or_else(|| {
            warn!("Ignoring redirect for unknown state");
            AuthError::Redirect("Redirect does not match any pending request".to_string())
        })?;

        sender
            .send(payload)
            .map_err(|_| AuthError::Redirect("The pending request is no longer waiting".to_string()))
    }

    pub fn cancel(&self, state: &str) -> bool {
        lock(&self.pending).remove(state).is_some()
    }

    pub fn cancel_all(&self) -> usize {
        let mut pending = lock(&self.pending);
        let cancelled = pending.len();
        pending.clear();
        cancelled
    }

    pub fn is_pending(&self, state: &str) -> bool {
        lock(&self.pending).contains_key(state)
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

/// Waiter side of a registered request. Dropping it unregisters the state.
#[derive(Debug)]
pub struct PendingRedirect {
    state: String,
    receiver: oneshot::Receiver<RedirectPayload>,
    pending: PendingMap,
}

impl PendingRedirect {
    pub fn state(&self) -> &str {
        &self.state
    }

    pub async fn wait(mut self) -> Result<RedirectPayload, AuthError> {
        (&mut self.receiver)
            .await
            .map_err(|_| AuthError::Authentication("Authorization request was cancelled".to_string()))
    }
}

impl Drop for PendingRedirect {
    fn drop(&mut self) {
        lock(&self.pending).remove(&self.state);
    }
}

const SUCCESS_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Signed in</title></head>\
<body><p>You can close this window and return to the application.</p></body></html>";

const FAILURE_PAGE: &str = "<!DOCTYPE html><html><head><meta charset=\"utf-8\"><title>Sign-in failed</title></head>\
<body><p>This sign-in request is no longer active. Return to the application and try again.</p></body></html>";

const DEFAULT_HEADER_READ_TIMEOUT: Duration = Duration::from_secs(10);
// Redirect URLs are small; hyper's floor for this buffer is 8 KiB
const MAX_REQUEST_HEAD_BYTES: usize = 16 * 1024;
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Clone)]
struct CallbackState {
    router: RedirectRouter,
    origin: String,
}

async fn receive_redirect(
    State(state): State<CallbackState>,
    OriginalUri(uri): OriginalUri,
    Query(parameters): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let url = match Url::parse(&format!("{}{}", state.origin, uri)) {
        Ok(url) => url,
        Err(e) => {
            debug!("Unparseable loopback redirect: {}", e);
            return (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE));
        }
    };

    match state.router.deliver_payload(RedirectPayload { url, parameters }) {
        Ok(()) => (StatusCode::OK, Html(SUCCESS_PAGE)),
        Err(e) => {
            debug!("Rejected loopback redirect: {}", e);
            (StatusCode::BAD_REQUEST, Html(FAILURE_PAGE))
        }
    }
}

/// Local HTTP endpoint that receives browser redirects and feeds the router.
#[derive(Debug)]
pub struct LoopbackListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    callback_path: String,
    header_read_timeout: Duration,
}

impl LoopbackListener {
    pub async fn bind(config: &RedirectConfig) -> Result<Self, AuthError> {
        let path = &config.callback_path;
        // axum treats `{`, `}` and `*` as route captures
        if !path.starts_with('/') || path.contains(['{', '}', '*', '?', '#']) {
            return Err(AuthError::configuration(format!(
                "Invalid redirect callback path '{}'",
                path
            )));
        }

        let address = (config.loopback_host.as_str(), config.loopback_port);
        let listener = TcpListener::bind(address).await.map_err(|e| {
            AuthError::configuration(format!(
                "Failed to bind redirect listener on {}:{}: {}",
                config.loopback_host, config.loopback_port, e
            ))
        })?;
        let local_addr = listener.local_addr().map_err(|e| {
            AuthError::configuration(format!("Failed to read redirect listener address: {}", e))
        })?;

        info!("Redirect listener bound on {}", local_addr);

        Ok(LoopbackListener {
            listener,
            local_addr,
            callback_path: path.clone(),
            header_read_timeout: DEFAULT_HEADER_READ_TIMEOUT,
        })
    }

    /// Connections that have not sent a complete request head within
    /// `timeout` are closed.
    pub fn with_header_read_timeout(mut self, timeout: Duration) -> Self {
        self.header_read_timeout = timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The URL to register as `redirect_uri` with the provider.
    pub fn redirect_url(&self) -> String {
        format!("http://{}{}", self.local_addr, self.callback_path)
    }

    fn app(&self, router: RedirectRouter) -> Router {
        let state = CallbackState {
            router,
            origin: format!("http://{}", self.local_addr),
        };

        Router::new()
            .route(&self.callback_path, get(receive_redirect))
            .fallback(|| async { (StatusCode::NOT_FOUND, "Not Found") })
            .with_state(state)
    }

    /// Serves until the returned task is aborted.
    pub fn spawn(self, router: RedirectRouter) -> JoinHandle<()> {
        let app = self.app(router);
        let header_read_timeout = self.header_read_timeout;
        let listener = self.listener;

        tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(connection) => connection,
                    Err(e) => {
                        warn!("Failed to accept redirect connection: {}", e);
                        tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                        continue;
                    }
                };

                let app = app.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |request: hyper::Request<Incoming>| {
                        app.clone().call(request)
                    });

                    let mut builder = http1::Builder::new();
                    builder
                        .timer(TokioTimer::new())
                        .header_read_timeout(header_read_timeout)
                        .max_buf_size(MAX_REQUEST_HEAD_BYTES)
                        .keep_alive(false);

                    if let Err(e) = builder.serve_connection(TokioIo::new(stream), service).await {
                        debug!("Redirect connection from {} closed: {}", peer, e);
                    }
                });
            }
        })
    }
}
