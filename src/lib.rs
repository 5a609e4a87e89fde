//! Native OAuth 2.0 / OpenID Connect authorization-code bridge.
//!
//! [`AppAuth`] exposes discovery prefetching, dynamic client registration,
//! authorization (with PKCE and nonce), code exchange, refresh, revocation and
//! RP-initiated logout to an embedding host. Protocol encoding is done by the
//! `oauth2` and `openidconnect` crates; this crate adds the connection policy,
//! the per-issuer discovery cache and the routing of browser redirects back
//! to the request that is waiting for them.

pub mod browser;
pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod end_session;
pub mod error;
pub mod logger;
pub mod redirect;
pub mod registration;
pub mod request;
pub mod response;
pub mod revocation;

#[cfg(feature = "tauri")]
pub mod plugin;

pub use browser::{ManualBrowser, SystemBrowser, UserAgent};
pub use client::AppAuth;
pub use connection::{ConnectionBuilder, ConnectionSettings};
pub use discovery::DiscoveryCache;
pub use error::{AuthError, ErrorPayload};
pub use redirect::{LoopbackListener, PendingRedirect, RedirectPayload, RedirectRouter};
pub use request::{
    AuthConfiguration, ClientAuthMethod, ConnectionOptions, CustomHeaders,
    EndSessionConfiguration, RegistrationConfiguration, RequestPhase, RevokeRequest,
    ServiceConfiguration,
};
pub use response::{
    AuthorizationCodeResult, AuthorizeOutcome, EndSessionResult, RegistrationResult, TokenResult,
};
