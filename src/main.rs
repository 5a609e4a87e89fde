use anyhow::{Context, Result};
use appauth_lib::config::{ConfigManager, ProviderProfile};
use appauth_lib::logger::Logger;
use appauth_lib::{
    AppAuth, AuthError, ConnectionSettings, ErrorPayload, LoopbackListener, ManualBrowser,
    RedirectRouter, RegistrationConfiguration, RevokeRequest, SystemBrowser, UserAgent,
};
use clap::{Parser, Subcommand};
use log::{error, info};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "appauth")]
#[command(about = "OAuth 2.0 / OpenID Connect authorization-code client")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding default.json and user.json
    #[arg(short, long, global = true, env = "APPAUTH_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Print URLs instead of opening the system browser
    #[arg(long, global = true)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List the enabled identity providers
    Providers,
    /// Fetch and cache a provider's discovery document
    Prefetch(ProviderArgs),
    /// Register a new client dynamically
    Register(ProviderArgs),
    /// Sign in and print the resulting tokens
    Authorize(AuthorizeArgs),
    /// Exchange a refresh token for new tokens
    Refresh(RefreshArgs),
    /// End the provider session
    Logout(LogoutArgs),
    /// Revoke an access or refresh token
    Revoke(RevokeArgs),
}

#[derive(clap::Args)]
struct ProviderArgs {
    /// Provider id from the configuration
    #[arg(short, long)]
    provider: String,
}

#[derive(clap::Args)]
struct AuthorizeArgs {
    #[command(flatten)]
    provider: ProviderArgs,
    /// Stop after the authorization code and print it with the PKCE verifier
    #[arg(long)]
    skip_code_exchange: bool,
}

#[derive(clap::Args)]
struct RefreshArgs {
    #[command(flatten)]
    provider: ProviderArgs,
    #[arg(long, env = "APPAUTH_REFRESH_TOKEN")]
    refresh_token: String,
}

#[derive(clap::Args)]
struct LogoutArgs {
    #[command(flatten)]
    provider: ProviderArgs,
    #[arg(long, env = "APPAUTH_ID_TOKEN")]
    id_token: String,
}

#[derive(clap::Args)]
struct RevokeArgs {
    #[command(flatten)]
    provider: ProviderArgs,
    /// Token to revoke
    #[arg(long, env = "APPAUTH_TOKEN")]
    token: String,
    /// access_token or refresh_token
    #[arg(long)]
    token_type_hint: Option<String>,
    /// Include client_id in the request body
    #[arg(long)]
    send_client_id: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config_manager = match load_config(&cli) {
        Ok(manager) => manager,
        Err(e) => {
            Logger::init_fallback();
            error!("Failed to load configuration: {:#}", e);
            exit_with(ErrorPayload {
                code: "configuration_error".to_string(),
                message: format!("{:#}", e),
            });
        }
    };

    let logging = &config_manager.get_config().logging;
    if logging.file_rotation && logging.file_path.is_none() {
        if let Err(e) = Logger::new(logging) {
            eprintln!("Failed to clean up old log files: {:#}", e);
        }
    }
    if let Err(e) = Logger::setup_logging(logging) {
        eprintln!("Failed to setup logging: {:#}", e);
        Logger::init_fallback();
        error!("Falling back to basic logging due to setup error: {:#}", e);
    }

    match run(&cli, &config_manager).await {
        Ok(output) => match serde_json::to_string_pretty(&output) {
            Ok(text) => println!("{}", text),
            Err(e) => exit_with(ErrorPayload {
                code: "output_error".to_string(),
                message: e.to_string(),
            }),
        },
        Err(e) => {
            error!("Command failed: {:#}", e);
            let payload = match e.downcast::<AuthError>() {
                Ok(auth_error) => ErrorPayload::from(auth_error),
                Err(other) => ErrorPayload {
                    code: "cli_error".to_string(),
                    message: format!("{:#}", other),
                },
            };
            exit_with(payload);
        }
    }
}

fn exit_with(payload: ErrorPayload) -> ! {
    match serde_json::to_string_pretty(&payload) {
        Ok(text) => println!("{}", text),
        Err(_) => eprintln!("{}", payload),
    }
    std::process::exit(1);
}

fn load_config(cli: &Cli) -> Result<ConfigManager> {
    match &cli.config_dir {
        Some(dir) => ConfigManager::from_dir(dir.clone()),
        None => ConfigManager::new(),
    }
}

fn provider<'a>(config_manager: &'a ConfigManager, id: &str) -> Result<&'a ProviderProfile> {
    let provider = config_manager
        .get_provider_by_id(id)
        .with_context(|| format!("Unknown provider '{}'", id))?;
    if !provider.enabled {
        anyhow::bail!("Provider '{}' is disabled", id);
    }
    Ok(provider)
}

async fn run(cli: &Cli, config_manager: &ConfigManager) -> Result<Value> {
    let network = config_manager.get_network();

    let user_agent: Arc<dyn UserAgent> = if cli.no_browser {
        Arc::new(ManualBrowser)
    } else {
        Arc::new(SystemBrowser)
    };
    let app = AppAuth::new(
        ConnectionSettings::from_network(network),
        RedirectRouter::new(),
        user_agent,
    );

    match &cli.command {
        Commands::Providers => {
            let providers: Vec<Value> = config_manager
                .get_enabled_providers()
                .into_iter()
                .map(|p| {
                    serde_json::json!({
                        "id": p.id,
                        "name": p.name,
                        "issuer": p.issuer,
                        "clientId": p.client_id,
                    })
                })
                .collect();
            Ok(Value::from(providers))
        }
        Commands::Prefetch(args) => {
            let profile = provider(config_manager, &args.provider)?;
            let config = profile.to_auth_configuration("http://127.0.0.1/", network);
            app.prefetch_configuration(&config).await?;
            let issuer = config.issuer.as_deref().unwrap_or_default();
            Ok(serde_json::to_value(app.discovery().get(issuer).or(config.service_configuration))?)
        }
        Commands::Register(args) => {
            let profile = provider(config_manager, &args.provider)?;
            let redirect_url = profile
                .registration_redirect_url(config_manager.get_redirect())
                .with_context(|| {
                    format!(
                        "Provider '{}' needs a redirect_url, or redirect.loopback_port must be set, before registering",
                        profile.id
                    )
                })?;

            let config = RegistrationConfiguration {
                issuer: profile.issuer.clone(),
                service_configuration: profile.service_configuration.clone(),
                redirect_urls: vec![redirect_url],
                grant_types: Some(vec!["authorization_code".to_string(), "refresh_token".to_string()]),
                response_types: Some(vec!["code".to_string()]),
                connection: profile.to_auth_configuration("", network).connection,
                ..Default::default()
            };
            Ok(serde_json::to_value(app.register(&config).await?)?)
        }
        Commands::Authorize(args) => {
            let profile = provider(config_manager, &args.provider.provider)?;
            let listener = LoopbackListener::bind(config_manager.get_redirect()).await?;
            let mut config = profile.to_auth_configuration(&listener.redirect_url(), network);
            config.skip_code_exchange = args.skip_code_exchange;

            let server = listener.spawn(app.redirects().clone());
            info!("Waiting for the authorization redirect");
            let outcome = app.authorize(&config).await;
            server.abort();

            Ok(serde_json::to_value(outcome?)?)
        }
        Commands::Refresh(args) => {
            let profile = provider(config_manager, &args.provider.provider)?;
            let config = profile.to_auth_configuration("http://127.0.0.1/", network);
            Ok(serde_json::to_value(app.refresh(&config, &args.refresh_token).await?)?)
        }
        Commands::Logout(args) => {
            let profile = provider(config_manager, &args.provider.provider)?;
            let listener = LoopbackListener::bind(config_manager.get_redirect()).await?;
            let config = profile.to_end_session_configuration(&args.id_token, &listener.redirect_url(), network);

            let server = listener.spawn(app.redirects().clone());
            let result = app.logout(&config).await;
            server.abort();

            Ok(serde_json::to_value(result?)?)
        }
        Commands::Revoke(args) => {
            let profile = provider(config_manager, &args.provider.provider)?;
            let config = profile.to_auth_configuration("http://127.0.0.1/", network);
            let request = RevokeRequest {
                token_to_revoke: args.token.clone(),
                token_type_hint: args.token_type_hint.clone(),
                send_client_id: args.send_client_id,
            };
            app.revoke(&config, &request).await?;
            Ok(serde_json::json!({ "revoked": true }))
        }
    }
}
