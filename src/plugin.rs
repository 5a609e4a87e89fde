// Tauri plugin exposing the bridge operations to the web front-end
//
// Commands resolve to the flat result shapes or reject with an ErrorPayload
// ({ code, message }).

use log::{debug, error};
use tauri::plugin::{Builder, TauriPlugin};
use tauri::{Manager, Runtime, State};

use crate::client::AppAuth;
use crate::error::ErrorPayload;
use crate::request::{
    AuthConfiguration, EndSessionConfiguration, RegistrationConfiguration, RevokeRequest,
};
use crate::response::{
    AuthorizationCodeResult, AuthorizeOutcome, EndSessionResult, RegistrationResult, TokenResult,
};

fn to_payload(operation: &str, error: crate::error::AuthError) -> ErrorPayload {
    error!("[BACKEND] {} failed: [{}] {}", operation, error.code(), error);
    ErrorPayload::from(error)
}

#[tauri::command]
async fn prefetch_configuration(
    state: State<'_, AppAuth>,
    config: AuthConfiguration,
) -> Result<bool, ErrorPayload> {
    debug!("[BACKEND] prefetch_configuration called");
    state
        .prefetch_configuration(&config)
        .await
        .map_err(|e| to_payload("prefetch_configuration", e))
}

#[tauri::command]
async fn register(
    state: State<'_, AppAuth>,
    config: RegistrationConfiguration,
) -> Result<RegistrationResult, ErrorPayload> {
    debug!("[BACKEND] register called");
    state.register(&config).await.map_err(|e| to_payload("register", e))
}

#[tauri::command]
async fn authorize(
    state: State<'_, AppAuth>,
    config: AuthConfiguration,
) -> Result<AuthorizeOutcome, ErrorPayload> {
    debug!("[BACKEND] authorize called");
    state.authorize(&config).await.map_err(|e| to_payload("authorize", e))
}

#[tauri::command]
async fn exchange_code(
    state: State<'_, AppAuth>,
    config: AuthConfiguration,
    authorization: AuthorizationCodeResult,
) -> Result<TokenResult, ErrorPayload> {
    debug!("[BACKEND] exchange_code called");
    state
        .exchange_code(&config, &authorization)
        .await
        .map_err(|e| to_payload("exchange_code", e))
}

#[tauri::command]
async fn refresh(
    state: State<'_, AppAuth>,
    config: AuthConfiguration,
    refresh_token: String,
) -> Result<TokenResult, ErrorPayload> {
    debug!("[BACKEND] refresh called");
    state
        .refresh(&config, &refresh_token)
        .await
        .map_err(|e| to_payload("refresh", e))
}

#[tauri::command]
async fn logout(
    state: State<'_, AppAuth>,
    config: EndSessionConfiguration,
) -> Result<EndSessionResult, ErrorPayload> {
    debug!("[BACKEND] logout called");
    state.logout(&config).await.map_err(|e| to_payload("logout", e))
}

#[tauri::command]
async fn revoke(
    state: State<'_, AppAuth>,
    config: AuthConfiguration,
    request: RevokeRequest,
) -> Result<(), ErrorPayload> {
    debug!("[BACKEND] revoke called");
    state
        .revoke(&config, &request)
        .await
        .map_err(|e| to_payload("revoke", e))
}

/// Deep-link handlers call this with the full redirect URL.
#[tauri::command]
fn handle_redirect(state: State<'_, AppAuth>, url: String) -> Result<(), ErrorPayload> {
    state.handle_redirect(&url).map_err(|e| to_payload("handle_redirect", e))
}

#[tauri::command]
fn cancel_pending(state: State<'_, AppAuth>) -> usize {
    state.cancel_all()
}

/// Registers the `appauth` plugin and manages `app_auth` as its state.
pub fn init<R: Runtime>(app_auth: AppAuth) -> TauriPlugin<R> {
    Builder::new("appauth")
        .invoke_handler(tauri::generate_handler![
            prefetch_configuration,
            register,
            authorize,
            exchange_code,
            refresh,
            logout,
            revoke,
            handle_redirect,
            cancel_pending
        ])
        .setup(move |app, _api| {
            app.manage(app_auth);
            Ok(())
        })
        .build()
}
