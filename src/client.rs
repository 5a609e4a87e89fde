//! The bridge facade.
//!
//! [`AppAuth`] takes the configuration bags handed over by the host, resolves
//! the service configuration through the discovery cache, drives the
//! authorization, token, registration, revocation and end-session exchanges,
//! and returns the flat result shapes from [`crate::response`].

use log::{debug, info, warn};
use oauth2::basic::{
    BasicErrorResponse, BasicRevocationErrorResponse, BasicTokenIntrospectionResponse,
};
use oauth2::{
    AuthType, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, CsrfToken,
    EndpointNotSet, EndpointSet, PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, RefreshToken,
    RequestTokenError, Scope, StandardRevocableToken, TokenUrl,
};
use openidconnect::Nonce;
use std::collections::HashMap;
use std::sync::Arc;

use crate::browser::{SystemBrowser, UserAgent};
use crate::config::NetworkConfig;
use crate::connection::{describe_http_error, ConnectionBuilder, ConnectionSettings};
use crate::discovery::DiscoveryCache;
use crate::end_session::end_session_url;
use crate::error::{oauth_error_message, AuthError};
use crate::redirect::RedirectRouter;
use crate::registration::register_client;
use crate::request::{
    AuthConfiguration, ClientAuthMethod, ConnectionOptions, EndSessionConfiguration,
    RegistrationConfiguration, RequestPhase, RevokeRequest, ServiceConfiguration,
};
use crate::response::{
    additional_parameters, split_scopes, token_result, AuthorizationCodeResult, AuthorizeOutcome,
    EndSessionResult, RawTokenResponse, RegistrationResult, TokenResult,
};
use crate::revocation::revoke_token;

type OAuthClient<HasAuthUrl, HasTokenUrl> = Client<
    BasicErrorResponse,
    RawTokenResponse,
    BasicTokenIntrospectionResponse,
    StandardRevocableToken,
    BasicRevocationErrorResponse,
    HasAuthUrl,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    HasTokenUrl,
>;

type ConfiguredClient = OAuthClient<EndpointSet, EndpointSet>;

fn oauth_client(
    config: &AuthConfiguration,
    service: &ServiceConfiguration,
) -> Result<ConfiguredClient, AuthError> {
    let auth_url = AuthUrl::new(service.authorization_endpoint.clone()).map_err(|e| {
        AuthError::configuration(format!(
            "Invalid authorization endpoint '{}': {}",
            service.authorization_endpoint, e
        ))
    })?;
    let token_url = TokenUrl::new(service.token_endpoint.clone()).map_err(|e| {
        AuthError::configuration(format!("Invalid token endpoint '{}': {}", service.token_endpoint, e))
    })?;
    let redirect_url = RedirectUrl::new(config.redirect_url.clone()).map_err(|e| {
        AuthError::configuration(format!("Invalid redirect url '{}': {}", config.redirect_url, e))
    })?;

    let auth_type = match config.client_auth_method {
        ClientAuthMethod::Basic => AuthType::BasicAuth,
        ClientAuthMethod::Post => AuthType::RequestBody,
    };

    let mut client = OAuthClient::<EndpointNotSet, EndpointNotSet>::new(ClientId::new(
        config.client_id.clone(),
    ))
    .set_auth_uri(auth_url)
    .set_token_uri(token_url)
    .set_redirect_uri(redirect_url)
    .set_auth_type(auth_type);

    if let Some(secret) = &config.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }

    Ok(client)
}

/// Parameters only meaningful to the authorization endpoint.
const AUTHORIZATION_ONLY_PARAMETERS: &[&str] = &["display", "login_hint", "prompt"];

/// Members of the code-exchange body that are set by the grant itself.
const TOKEN_REQUEST_PARAMETERS: &[&str] =
    &["grant_type", "code", "redirect_uri", "code_verifier", "client_id", "client_secret"];

/// Additional parameters carried over from the authorization request to the
/// code exchange.
fn token_exchange_parameters(
    parameters: &HashMap<String, String>,
) -> impl Iterator<Item = (&String, &String)> {
    parameters.iter().filter(|(key, _)| {
        !AUTHORIZATION_ONLY_PARAMETERS.contains(&key.as_str())
            && !TOKEN_REQUEST_PARAMETERS.contains(&key.as_str())
    })
}

fn token_error_message<RE>(error: &RequestTokenError<RE, BasicErrorResponse>) -> String
where
    RE: std::error::Error + 'static,
{
    match error {
        RequestTokenError::ServerResponse(response) => oauth_error_message(
            &response.error().to_string(),
            response.error_description().map(String::as_str),
        ),
        RequestTokenError::Request(e) => describe_http_error(e),
        RequestTokenError::Parse(e, _) => format!("Failed to parse token response: {}", e),
        RequestTokenError::Other(message) => message.clone(),
    }
}

/// Entry point for every bridge operation. Cheap to clone; clones share the
/// discovery cache and the redirect router.
#[derive(Clone)]
pub struct AppAuth {
    settings: ConnectionSettings,
    discovery: Arc<DiscoveryCache>,
    redirects: RedirectRouter,
    user_agent: Arc<dyn UserAgent>,
}

impl std::fmt::Debug for AppAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppAuth")
            .field("settings", &self.settings)
            .field("cached_issuers", &self.discovery.len())
            .field("pending_redirects", &self.redirects.pending_count())
            .finish()
    }
}

impl AppAuth {
    pub fn new(
        settings: ConnectionSettings,
        redirects: RedirectRouter,
        user_agent: Arc<dyn UserAgent>,
    ) -> Self {
        AppAuth {
            settings,
            discovery: Arc::new(DiscoveryCache::new()),
            redirects,
            user_agent,
        }
    }

    pub fn with_system_browser(network: &NetworkConfig) -> Self {
        Self::new(
            ConnectionSettings::from_network(network),
            RedirectRouter::new(),
            Arc::new(SystemBrowser),
        )
    }

    pub fn discovery(&self) -> &DiscoveryCache {
        &self.discovery
    }

    pub fn redirects(&self) -> &RedirectRouter {
        &self.redirects
    }

    pub fn settings(&self) -> &ConnectionSettings {
        &self.settings
    }

    fn connection(
        &self,
        options: &ConnectionOptions,
        phase: RequestPhase,
    ) -> Result<ConnectionBuilder, AuthError> {
        ConnectionBuilder::for_phase(&self.settings, options, phase)
    }

    async fn service_configuration(
        &self,
        issuer: Option<&str>,
        supplied: Option<&ServiceConfiguration>,
        connection: &ConnectionBuilder,
    ) -> Result<ServiceConfiguration, AuthError> {
        self.discovery.resolve(issuer, supplied, connection).await
    }

    /// Warms the discovery cache. A supplied configuration is stored under
    /// the issuer when one is given.
    pub async fn prefetch_configuration(&self, config: &AuthConfiguration) -> Result<bool, AuthError> {
        config.validate()?;
        let connection = self.connection(&config.connection, RequestPhase::Authorize)?;

        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;

        if config.service_configuration.is_some() {
            if let Some(issuer) = config.issuer.as_deref().filter(|issuer| !issuer.is_empty()) {
                self.discovery.insert(issuer, service);
            }
        }

        info!("Service configuration prefetched");
        Ok(true)
    }

    pub async fn register(&self, config: &RegistrationConfiguration) -> Result<RegistrationResult, AuthError> {
        config.validate()?;
        let connection = self.connection(&config.connection, RequestPhase::Register)?;

        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;

        register_client(&service, config, &connection).await
    }

    /// Runs the authorization-code flow. Returns tokens, or the raw code when
    /// `skip_code_exchange` is set.
    pub async fn authorize(&self, config: &AuthConfiguration) -> Result<AuthorizeOutcome, AuthError> {
        config.validate()?;
        let connection = self.connection(&config.connection, RequestPhase::Authorize)?;

        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;
        let client = oauth_client(config, &service)?;

        let mut request = client.authorize_url(CsrfToken::new_random);
        for scope in &config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }

        let pkce_verifier = if config.use_pkce {
            let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
            request = request.set_pkce_challenge(challenge);
            Some(verifier)
        } else {
            None
        };

        let nonce = if config.use_nonce {
            let nonce = Nonce::new_random();
            request = request.add_extra_param("nonce", nonce.secret().clone());
            Some(nonce)
        } else {
            None
        };

        for (key, value) in &config.additional_parameters {
            request = request.add_extra_param(key.clone(), value.clone());
        }

        let (authorization_url, state) = request.url();
        let pending = self.redirects.register(state.secret())?;

        info!(
            "Starting authorization for client {} at {}",
            config.client_id, service.authorization_endpoint
        );
        // The pending entry is dropped with `pending` if the browser fails
        self.user_agent.present(&authorization_url)?;

        let payload = pending.wait().await?;

        if let Some(message) = payload.error_message() {
            warn!("Authorization rejected: {}", message);
            return Err(AuthError::Authentication(message));
        }
        let code = payload
            .code()
            .ok_or_else(|| AuthError::Authentication("Authorization response carries no code".to_string()))?
            .to_string();

        let scopes = payload
            .scope()
            .map(split_scopes)
            .unwrap_or_else(|| config.scopes.clone());
        let authorize_parameters = additional_parameters(payload.additional_parameters());

        if config.skip_code_exchange {
            debug!("Skipping code exchange; returning authorization code to caller");
            return Ok(AuthorizeOutcome::Code(AuthorizationCodeResult {
                authorization_code: code,
                state: state.secret().clone(),
                code_verifier: pkce_verifier.map(|verifier| verifier.secret().clone()),
                nonce: nonce.map(|nonce| nonce.secret().clone()),
                scopes,
                additional_parameters: authorize_parameters,
            }));
        }

        let token_connection = self.connection(&config.connection, RequestPhase::Token)?;
        let tokens = self
            .exchange(
                &client,
                code,
                pkce_verifier,
                &config.additional_parameters,
                &token_connection,
                &scopes,
                authorize_parameters,
            )
            .await?;

        Ok(AuthorizeOutcome::Tokens(tokens))
    }

    /// Completes a flow started with `skip_code_exchange`.
    pub async fn exchange_code(
        &self,
        config: &AuthConfiguration,
        code: &AuthorizationCodeResult,
    ) -> Result<TokenResult, AuthError> {
        config.validate()?;
        if code.authorization_code.is_empty() {
            return Err(AuthError::configuration("Please pass in an authorization code"));
        }

        let connection = self.connection(&config.connection, RequestPhase::Token)?;
        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;
        let client = oauth_client(config, &service)?;

        self.exchange(
            &client,
            code.authorization_code.clone(),
            code.code_verifier.clone().map(PkceCodeVerifier::new),
            &config.additional_parameters,
            &connection,
            &code.scopes,
            code.additional_parameters.clone(),
        )
        .await
    }

    async fn exchange(
        &self,
        client: &ConfiguredClient,
        code: String,
        pkce_verifier: Option<PkceCodeVerifier>,
        extra_parameters: &HashMap<String, String>,
        connection: &ConnectionBuilder,
        scopes: &[String],
        authorize_parameters: serde_json::Map<String, serde_json::Value>,
    ) -> Result<TokenResult, AuthError> {
        let mut request = client.exchange_code(AuthorizationCode::new(code));
        if let Some(verifier) = pkce_verifier {
            request = request.set_pkce_verifier(verifier);
        }
        for (key, value) in token_exchange_parameters(extra_parameters) {
            request = request.add_extra_param(key.clone(), value.clone());
        }

        let response = request.request_async(connection).await.map_err(|e| {
            let message = token_error_message(&e);
            warn!("Code exchange failed: {}", message);
            AuthError::TokenExchange(message)
        })?;

        info!("Authorization code exchanged for tokens");
        Ok(token_result(&response, scopes, Some(authorize_parameters)))
    }

    pub async fn refresh(&self, config: &AuthConfiguration, refresh_token: &str) -> Result<TokenResult, AuthError> {
        config.validate()?;
        if refresh_token.trim().is_empty() {
            return Err(AuthError::configuration("Please pass in a refresh token"));
        }

        let connection = self.connection(&config.connection, RequestPhase::Token)?;
        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;
        let client = oauth_client(config, &service)?;

        let refresh_token = RefreshToken::new(refresh_token.to_string());
        let mut request = client
            .exchange_refresh_token(&refresh_token)
            .add_scopes(config.scopes.iter().cloned().map(Scope::new));
        for (key, value) in &config.additional_parameters {
            request = request.add_extra_param(key.clone(), value.clone());
        }

        let response = request.request_async(&connection).await.map_err(|e| {
            let message = token_error_message(&e);
            warn!("Token refresh failed: {}", message);
            AuthError::TokenRefresh(message)
        })?;

        info!("Tokens refreshed for client {}", config.client_id);
        Ok(token_result(&response, &config.scopes, None))
    }

    /// RP-initiated logout through the user agent.
    pub async fn logout(&self, config: &EndSessionConfiguration) -> Result<EndSessionResult, AuthError> {
        config.validate()?;
        let connection = self.connection(&config.connection, RequestPhase::Authorize)?;

        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;

        let state = CsrfToken::new_random();
        let url = end_session_url(&service, config, state.secret())?;
        let pending = self.redirects.register(state.secret())?;

        info!("Starting end session request");
        self.user_agent.present(&url)?;

        let payload = pending
            .wait()
            .await
            .map_err(|e| AuthError::EndSession(e.to_string()))?;

        if let Some(message) = payload.error_message() {
            warn!("End session rejected: {}", message);
            return Err(AuthError::EndSession(message));
        }

        Ok(EndSessionResult {
            state: state.secret().clone(),
            id_token_hint: config.id_token.clone(),
            post_logout_redirect_uri: config.post_logout_redirect_url.clone(),
        })
    }

    pub async fn revoke(&self, config: &AuthConfiguration, request: &RevokeRequest) -> Result<(), AuthError> {
        config.validate()?;
        let connection = self.connection(&config.connection, RequestPhase::Token)?;

        let service = self
            .service_configuration(
                config.issuer.as_deref(),
                config.service_configuration.as_ref(),
                &connection,
            )
            .await?;

        revoke_token(&service, config, request, &connection).await
    }

    /// Forwards a redirect received by the host (deep link, custom scheme).
    pub fn handle_redirect(&self, url: &str) -> Result<(), AuthError> {
        self.redirects.deliver(url)
    }

    pub fn cancel(&self, state: &str) -> bool {
        self.redirects.cancel(state)
    }

    pub fn cancel_all(&self) -> usize {
        self.redirects.cancel_all()
    }
}
