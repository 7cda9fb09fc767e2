use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use config as cfg;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://cad.onshape.com";
pub const DEFAULT_KEY_FILE: &str = "APIKey.json";
const MAX_CONCURRENT_FETCHES: usize = 64;
const MAX_RETRIES: usize = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiSettings {
    #[serde(default = "ApiSettings::default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub secret_key: Option<SecretString>,
    #[serde(default = "ApiSettings::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "ApiSettings::default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "ApiSettings::default_api_version")]
    pub api_version: String,
}

impl ApiSettings {
    fn default_base_url() -> String {
        DEFAULT_BASE_URL.to_string()
    }

    fn default_timeout_secs() -> u64 {
        30
    }

    fn default_max_retries() -> usize {
        3
    }

    fn default_api_version() -> String {
        "v12".to_string()
    }

    /// Credentials from the configuration layers, when both halves are set.
    pub fn credentials(&self) -> Option<ApiCredentials> {
        match (&self.access_key, &self.secret_key) {
            (Some(access), Some(secret)) if !access.is_empty() => Some(ApiCredentials {
                access_key: access.clone(),
                secret_key: secret.clone(),
            }),
            _ => None,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: Self::default_base_url(),
            access_key: None,
            secret_key: None,
            timeout_secs: Self::default_timeout_secs(),
            max_retries: Self::default_max_retries(),
            api_version: Self::default_api_version(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionSettings {
    /// Upper bound on feature-tree fetches in flight at once.
    #[serde(default = "ExtractionSettings::default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,
    #[serde(default = "ExtractionSettings::default_true")]
    pub include_sibling_elements: bool,
    #[serde(default = "ExtractionSettings::default_true")]
    pub include_folder_documents: bool,
}

impl ExtractionSettings {
    fn default_max_concurrent_fetches() -> usize {
        4
    }

    fn default_true() -> bool {
        true
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: Self::default_max_concurrent_fetches(),
            include_sibling_elements: true,
            include_folder_documents: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebugSettings {
    /// Raw API responses are written here when set.
    #[serde(default)]
    pub dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "Settings::default_env")]
    pub env: String,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub extraction: ExtractionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub debug: DebugSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            env: Self::default_env(),
            api: ApiSettings::default(),
            extraction: ExtractionSettings::default(),
            logging: LoggingConfig::default(),
            debug: DebugSettings::default(),
        }
    }
}

impl Settings {
    fn default_env() -> String {
        env::var("SKETCHGRAPH_ENV")
            .ok()
            .or_else(|| env::var("APP_ENV").ok())
            .unwrap_or_else(|| "development".to_string())
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            !self.api.base_url.trim().is_empty(),
            "api.base_url cannot be empty"
        );
        anyhow::ensure!(self.api.timeout_secs > 0, "api.timeout_secs must be > 0");
        anyhow::ensure!(
            !self.api.api_version.trim().is_empty(),
            "api.api_version cannot be empty"
        );
        anyhow::ensure!(
            self.api.max_retries <= MAX_RETRIES,
            "api.max_retries must be <= {}",
            MAX_RETRIES
        );
        anyhow::ensure!(
            (1..=MAX_CONCURRENT_FETCHES).contains(&self.extraction.max_concurrent_fetches),
            "extraction.max_concurrent_fetches must be 1..={}",
            MAX_CONCURRENT_FETCHES
        );
        Ok(())
    }
}

/// API key pair used for basic authentication.
#[derive(Debug, Clone)]
pub struct ApiCredentials {
    pub access_key: String,
    pub secret_key: SecretString,
}

#[derive(Deserialize)]
struct KeyFile {
    access: String,
    secret: String,
}

impl ApiCredentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: SecretString::from(Into::<String>::into(secret_key)),
        }
    }

    /// Read a `{ "access": ..., "secret": ... }` key file.
    pub fn from_key_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading API key file {}", path.display()))?;
        let parsed: KeyFile = serde_json::from_str(&raw)
            .with_context(|| format!("parsing API key file {}", path.display()))?;
        anyhow::ensure!(
            !parsed.access.is_empty() && !parsed.secret.is_empty(),
            "API key file {} has an empty access or secret key",
            path.display()
        );
        Ok(Self::new(parsed.access, parsed.secret))
    }

    pub fn expose_secret(&self) -> &str {
        self.secret_key.expose_secret()
    }
}

#[derive(Debug, Clone)]
pub struct ConfigManager {
    settings: Settings,
    config_dir: PathBuf,
}

impl ConfigManager {
    /// Load and validate settings from `config_dir` (or the default directory).
    pub fn new(config_dir: Option<PathBuf>, env_override: Option<String>) -> Result<Self> {
        let config_dir = config_dir.unwrap_or_else(Self::default_config_dir);
        let env_name = env_override.unwrap_or_else(Settings::default_env);
        let settings = Self::load_from_sources(&config_dir, &env_name)?;
        settings.validate()?;
        Ok(Self {
            settings,
            config_dir,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Get the default configuration directory.
    ///
    /// Priority order:
    /// 1. ~/.sketchgraph/
    /// 2. ./config/
    /// 3. Current directory
    pub fn default_config_dir() -> PathBuf {
        if let Some(home_dir) = dirs::home_dir() {
            let user_dir = home_dir.join(".sketchgraph");
            if user_dir.exists() {
                info!("Using config directory: {:?}", user_dir);
                return user_dir;
            }
        }

        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let project_config = cwd.join("config");
        if project_config.exists() {
            info!("Using config directory: {:?}", project_config);
            return project_config;
        }

        info!("Using config directory: {:?}", cwd);
        cwd
    }

    /// Layer `default.toml`, `{env}.toml`, `local.toml` and `SKETCHGRAPH__*`
    /// environment variables, later sources overriding earlier ones.
    pub fn load_from_sources(config_dir: &Path, env_name: &str) -> Result<Settings> {
        debug!(?config_dir, env = env_name, "loading configuration");
        let settings: Settings = cfg::Config::builder()
            .add_source(cfg::File::from(config_dir.join("default.toml")).required(false))
            .add_source(
                cfg::File::from(config_dir.join(format!("{}.toml", env_name))).required(false),
            )
            .add_source(cfg::File::from(config_dir.join("local.toml")).required(false))
            .add_source(cfg::Environment::with_prefix("SKETCHGRAPH").separator("__"))
            .build()
            .context("building configuration")?
            .try_deserialize()
            .context("deserializing configuration")?;
        Ok(settings)
    }
}
