use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use anyhow::{Result, Context};
use log::{info, warn, debug, error};

use crate::request::{
    AuthConfiguration, ClientAuthMethod, ConnectionOptions, CustomHeaders,
    EndSessionConfiguration, ServiceConfiguration,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub version: String,
    pub logging: LoggingConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
    #[serde(default)]
    pub providers: Vec<ProviderProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub console: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_max_log_size_mb")]
    pub max_log_size_mb: u64,
    #[serde(default = "default_file_rotation")]
    pub file_rotation: bool,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_max_log_size_mb() -> u64 {
    10
}

fn default_file_rotation() -> bool {
    true
}

/// Process-wide transport defaults; per-call options can only loosen the
/// TLS policy or override the timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connection_timeout_seconds")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_read_timeout_seconds")]
    pub read_timeout_seconds: u64,
    #[serde(default)]
    pub dangerously_allow_insecure_http_requests: bool,
}

fn default_connection_timeout_seconds() -> u64 {
    15
}

fn default_read_timeout_seconds() -> u64 {
    10
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            connection_timeout_seconds: default_connection_timeout_seconds(),
            read_timeout_seconds: default_read_timeout_seconds(),
            dangerously_allow_insecure_http_requests: false,
        }
    }
}

/// Loopback listener used when no host forwards redirects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    #[serde(default = "default_loopback_host")]
    pub loopback_host: String,
    #[serde(default)]
    pub loopback_port: u16,
    #[serde(default = "default_callback_path")]
    pub callback_path: String,
}

fn default_loopback_host() -> String {
    "127.0.0.1".to_string()
}

fn default_callback_path() -> String {
    "/oauth2redirect".to_string()
}

impl RedirectConfig {
    /// The loopback redirect URL, known up front only when the port is pinned.
    pub fn fixed_redirect_url(&self) -> Option<String> {
        if self.loopback_port == 0 {
            return None;
        }
        let host = if self.loopback_host.contains(':') {
            format!("[{}]", self.loopback_host)
        } else {
            self.loopback_host.clone()
        };
        Some(format!("http://{}:{}{}", host, self.loopback_port, self.callback_path))
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        RedirectConfig {
            loopback_host: default_loopback_host(),
            loopback_port: 0,
            callback_path: default_callback_path(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub service_configuration: Option<ServiceConfiguration>,
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Left empty to use the loopback listener's address.
    #[serde(default)]
    pub redirect_url: Option<String>,
    #[serde(default)]
    pub post_logout_redirect_url: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    #[serde(default)]
    pub additional_parameters: HashMap<String, String>,
    #[serde(default = "default_true")]
    pub use_pkce: bool,
    #[serde(default = "default_true")]
    pub use_nonce: bool,
    #[serde(default)]
    pub client_auth_method: ClientAuthMethod,
    #[serde(default)]
    pub custom_headers: CustomHeaders,
}

impl ProviderProfile {
    fn connection_options(&self, network: &NetworkConfig) -> ConnectionOptions {
        ConnectionOptions {
            custom_headers: self.custom_headers.clone(),
            dangerously_allow_insecure_http_requests: network.dangerously_allow_insecure_http_requests,
            connection_timeout_seconds: None,
        }
    }

    /// Builds the configuration bag for authorize, refresh and revoke.
    /// `fallback_redirect_url` is used when the profile names none.
    pub fn to_auth_configuration(
        &self,
        fallback_redirect_url: &str,
        network: &NetworkConfig,
    ) -> AuthConfiguration {
        AuthConfiguration {
            issuer: self.issuer.clone(),
            service_configuration: self.service_configuration.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            redirect_url: self
                .redirect_url
                .clone()
                .unwrap_or_else(|| fallback_redirect_url.to_string()),
            scopes: self.scopes.clone(),
            additional_parameters: self.additional_parameters.clone(),
            use_pkce: self.use_pkce,
            use_nonce: self.use_nonce,
            skip_code_exchange: false,
            client_auth_method: self.client_auth_method,
            connection: self.connection_options(network),
        }
    }

    /// Redirect URL to register with the server. An ephemeral loopback port
    /// would be gone by the time authorize runs, so it is never used here.
    pub fn registration_redirect_url(&self, redirect: &RedirectConfig) -> Option<String> {
        self.redirect_url.clone().or_else(|| redirect.fixed_redirect_url())
    }

    pub fn to_end_session_configuration(
        &self,
        id_token: &str,
        fallback_redirect_url: &str,
        network: &NetworkConfig,
    ) -> EndSessionConfiguration {
        EndSessionConfiguration {
            issuer: self.issuer.clone(),
            service_configuration: self.service_configuration.clone(),
            id_token: id_token.to_string(),
            post_logout_redirect_url: self
                .post_logout_redirect_url
                .clone()
                .unwrap_or_else(|| fallback_redirect_url.to_string()),
            additional_parameters: HashMap::new(),
            connection: self.connection_options(network),
        }
    }
}

const DEFAULT_CONFIG_FILE: &str = "default.json";
const USER_CONFIG_FILE: &str = "user.json";

/// Loads `default.json`, overlays `user.json` and validates the result.
#[derive(Debug)]
pub struct ConfigManager {
    config: AppConfig,
    config_dir: PathBuf,
    default_config_path: PathBuf,
    user_config_path: PathBuf,
}

impl ConfigManager {
    pub fn new() -> Result<Self> {
        Self::from_dir(Self::get_config_directory()?)
    }

    pub fn new_with_paths(config_dir: PathBuf, default_config_path: PathBuf, user_config_path: PathBuf) -> Result<Self> {
        debug!(
            "Loading configuration from {:?} (default {:?}, user {:?})",
            config_dir, default_config_path, user_config_path
        );

        let config = Self::load_merged_config(&default_config_path, &user_config_path)?;

        Ok(ConfigManager {
            config,
            config_dir,
            default_config_path,
            user_config_path,
        })
    }

    pub fn from_dir(config_dir: PathBuf) -> Result<Self> {
        let default_config_path = config_dir.join(DEFAULT_CONFIG_FILE);
        let user_config_path = config_dir.join(USER_CONFIG_FILE);
        Self::new_with_paths(config_dir, default_config_path, user_config_path)
    }

    /// A `config/` directory beside the executable or up to three levels
    /// above it (covers `target/debug`), else the per-user data directory.
    fn get_config_directory() -> Result<PathBuf> {
        let exe = std::env::current_exe().context("Cannot locate the running executable")?;

        if let Some(found) = exe
            .ancestors()
            .skip(1)
            .take(4)
            .map(|dir| dir.join("config"))
            .find(|candidate| candidate.is_dir())
        {
            debug!("Using config directory {:?}", found);
            return Ok(found);
        }

        let config_dir = dirs::data_dir()
            .context("No per-user data directory on this platform")?
            .join("AppAuth")
            .join("config");
        std::fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config directory {:?}", config_dir))?;

        info!("Using config directory {:?}", config_dir);
        Ok(config_dir)
    }

    fn read_json(path: &Path) -> Result<Option<serde_json::Value>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let value = serde_json::from_str(&content).map_err(|e| {
            error!("Configuration file {:?} is not valid JSON: {}", path, e);
            anyhow::anyhow!("Failed to parse {:?}: {}", path, e)
        })?;
        Ok(Some(value))
    }

    fn load_merged_config(default_path: &Path, user_path: &Path) -> Result<AppConfig> {
        let mut merged = match Self::read_json(default_path)? {
            Some(value) => value,
            None => {
                info!("{:?} not found, starting from built-in defaults", default_path);
                serde_json::to_value(AppConfig::default())?
            }
        };

        match Self::read_json(user_path)? {
            Some(user) => {
                Self::merge_json_values(&mut merged, user);
                debug!("Applied user overrides from {:?}", user_path);
            }
            None => debug!("No user overrides at {:?}", user_path),
        }

        let config: AppConfig = serde_json::from_value(merged).context("Invalid configuration")?;
        Self::validate_config(&config)?;

        info!("Configuration loaded with {} provider(s)", config.providers.len());
        Ok(config)
    }

    /// Objects merge key by key; any other user value replaces the base.
    fn merge_json_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
        use serde_json::Value;

        match (base, overlay) {
            (Value::Object(base_map), Value::Object(overlay_map)) => {
                for (key, value) in overlay_map {
                    match base_map.get_mut(&key) {
                        Some(existing) => Self::merge_json_values(existing, value),
                        None => {
                            base_map.insert(key, value);
                        }
                    }
                }
            }
            (base, overlay) => *base = overlay,
        }
    }

    fn validate_provider(provider: &ProviderProfile) -> Result<()> {
        if provider.client_id.trim().is_empty() {
            anyhow::bail!("Provider '{}' has an empty client_id", provider.id);
        }

        if let Some(service) = &provider.service_configuration {
            return service
                .validate()
                .with_context(|| format!("Provider '{}' has an invalid service_configuration", provider.id));
        }

        let issuer = provider
            .issuer
            .as_deref()
            .with_context(|| format!("Provider '{}' needs an issuer or a service_configuration", provider.id))?;
        url::Url::parse(issuer)
            .with_context(|| format!("Provider '{}' has an invalid issuer '{}'", provider.id, issuer))?;

        Ok(())
    }

    fn validate_config(config: &AppConfig) -> Result<()> {
        let mut ids = HashSet::new();
        for provider in &config.providers {
            if provider.id.trim().is_empty() {
                anyhow::bail!("Every provider needs a non-empty id");
            }
            if !ids.insert(provider.id.as_str()) {
                anyhow::bail!("Provider id '{}' is used more than once", provider.id);
            }
            Self::validate_provider(provider)?;
        }
        if ids.is_empty() {
            warn!("No identity providers configured");
        }

        if !matches!(
            config.logging.level.to_ascii_lowercase().as_str(),
            "off" | "error" | "warn" | "warning" | "info" | "debug" | "trace"
        ) {
            anyhow::bail!("Unknown logging level '{}'", config.logging.level);
        }

        if !config.redirect.callback_path.starts_with('/') {
            anyhow::bail!(
                "Redirect callback_path '{}' must start with '/'",
                config.redirect.callback_path
            );
        }

        Ok(())
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn get_enabled_providers(&self) -> Vec<&ProviderProfile> {
        self.config.providers.iter().filter(|p| p.enabled).collect()
    }

    pub fn get_provider_by_id(&self, id: &str) -> Option<&ProviderProfile> {
        self.config.providers.iter().find(|p| p.id == id)
    }

    pub fn reload(&mut self) -> Result<()> {
        info!("Reloading configuration");
        self.config = Self::load_merged_config(&self.default_config_path, &self.user_config_path)?;
        Ok(())
    }

    pub fn get_config_dir(&self) -> &PathBuf {
        &self.config_dir
    }

    pub fn get_network(&self) -> &NetworkConfig {
        &self.config.network
    }

    pub fn get_redirect(&self) -> &RedirectConfig {
        &self.config.redirect
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            version: "0.1.0".to_string(),
            logging: LoggingConfig {
                level: "info".to_string(),
                file_path: None,
                console: true,
                log_dir: default_log_dir(),
                max_log_size_mb: default_max_log_size_mb(),
                file_rotation: default_file_rotation(),
            },
            network: NetworkConfig::default(),
            redirect: RedirectConfig::default(),
            providers: Vec::new(),
        }
    }
}
