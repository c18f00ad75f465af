// Configuration loading and parsing (hexa.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Name of the main configuration file inside `config/` and `defaults/`.
pub const CONFIG_FILE: &str = "hexa.toml";

/// Name of the optional credentials file inside `config/`.
pub const CREDENTIALS_FILE: &str = "credentials.toml";

/// Environment variable consulted when no API key is present in
/// credentials.toml.
pub const API_KEY_ENV: &str = "OPENAI_API_KEY";

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub cors: CorsConfig,
    pub llm: LlmConfig,
    pub notebook: NotebookConfig,
    pub container: ContainerConfig,
    pub database: DatabaseConfig,
    pub voice: VoiceConfig,
    pub logging: LoggingConfig,
    pub credentials: CredentialsConfig,
}

// ---------------------------------------------------------------------------
// hexa.toml structs
// ---------------------------------------------------------------------------

/// Raw deserialization target for the entire hexa.toml file.
#[derive(Debug, Clone, Deserialize)]
struct HexaFile {
    server: ServerConfig,
    #[serde(default)]
    cors: CorsConfig,
    llm: LlmConfig,
    #[serde(default)]
    notebook: NotebookConfig,
    container: ContainerConfig,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    voice: VoiceConfig,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Prefix prepended to notebook URLs returned to the browser. Empty keeps
    /// them relative to this server.
    #[serde(default)]
    pub public_url: String,
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmConfig {
    pub api_base: String,
    pub flowchart: TaskSettings,
    pub code: TaskSettings,
    pub deep_dive: TaskSettings,
    pub notebook_plain: TaskSettings,
    pub notebook_direct: TaskSettings,
}

/// Model parameters for one kind of completion request.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TaskSettings {
    pub model: String,
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
}

/// How the notebook relay asks the model for a notebook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotebookStrategy {
    /// Ask for plain Python functions and wrap them into cells locally.
    #[default]
    Plain,
    /// Ask for a complete notebook returned as a JSON document.
    Direct,
    /// Build the notebook from the flowchart graph without calling the model.
    Template,
}

impl NotebookStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotebookStrategy::Plain => "plain",
            NotebookStrategy::Direct => "direct",
            NotebookStrategy::Template => "template",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotebookConfig {
    #[serde(default)]
    pub strategy: NotebookStrategy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContainerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Container API address (`/api/*` and the default proxy target).
    pub api_url: String,
    /// Notebook UI address (`/marimo/*`).
    pub notebook_url: String,
    /// Additional container API addresses tried in order when saving.
    #[serde(default)]
    pub fallback_urls: Vec<String>,
    #[serde(default = "default_true")]
    pub health_check: bool,
    /// Forward non-API requests to the container.
    #[serde(default = "default_true")]
    pub proxy: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub path: String,
}

impl DatabaseConfig {
    /// Resolve the database location. An empty path selects `hexa.db` in the
    /// platform data directory, falling back to the working directory.
    pub fn resolved_path(&self) -> PathBuf {
        if !self.path.is_empty() {
            return PathBuf::from(&self.path);
        }
        directories::ProjectDirs::from("dev", "codegen-hexa", "hexa")
            .map(|dirs| dirs.data_dir().join("hexa.db"))
            .unwrap_or_else(|| PathBuf::from("hexa.db"))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct VoiceConfig {
    #[serde(default)]
    pub realtime_model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log file path. When absent, logs go to stderr.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: default_log_filter(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_log_filter() -> String {
    "hexa_server=info,warn".to_string()
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub openai_api_key: Option<String>,
}

impl CredentialsConfig {
    /// Fill the API key from `env_key` when the file did not provide one.
    pub fn with_env_fallback(mut self, env_key: Option<String>) -> Self {
        let missing = self
            .openai_api_key
            .as_deref()
            .map_or(true, |k| k.trim().is_empty());
        if missing {
            self.openai_api_key = env_key.filter(|k| !k.trim().is_empty());
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/hexa.toml` and (optionally)
/// `config/credentials.toml`, relative to the given `base_dir`.
///
/// This does not copy defaults or consult the environment. Prefer
/// `load_config()` for the application entry point.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- hexa.toml (required) ---
    let main_path = config_dir.join(CONFIG_FILE);
    let main_text = read_file(&main_path)?;
    let file: HexaFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join(CREDENTIALS_FILE);
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        server: file.server,
        cors: file.cors,
        llm: file.llm,
        notebook: file.notebook,
        container: file.container,
        database: file.database,
        voice: file.voice,
        logging: file.logging,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Seed `config/` from the shipped `defaults/` directory.
///
/// Each default file missing from `config/` is copied over; files the user
/// already has are left alone. `*.example` files (such as the credentials
/// template) are never seeded, since they are meant to be filled in by hand.
/// Returns the seeded paths in name order.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    if !defaults_dir.is_dir() {
        if config_dir.is_dir() {
            debug!(dir = %config_dir.display(), "no defaults/ shipped; using config/ as is");
            return Ok(vec![]);
        }
        return Err(seed_error(format!(
            "neither defaults/ nor config/ directory found in {}; \
             run from the project root or ensure defaults/ is present",
            base_dir.display()
        )));
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| seed_error(format!("failed to create config directory: {e}")))?;

    let mut seeded = Vec::new();
    for source in seedable_defaults(&defaults_dir)? {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if target.exists() {
            debug!(file = %target.display(), "config file present; keeping it");
            continue;
        }
        std::fs::copy(&source, &target).map_err(|e| {
            seed_error(format!(
                "failed to copy {} to {}: {e}",
                source.display(),
                target.display()
            ))
        })?;
        info!(file = %target.display(), "seeded config file from defaults");
        seeded.push(target);
    }

    Ok(seeded)
}

/// Regular files in `defaults_dir`, minus `*.example` templates, sorted by name.
fn seedable_defaults(defaults_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let entries = std::fs::read_dir(defaults_dir)
        .map_err(|e| seed_error(format!("failed to read defaults directory: {e}")))?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| seed_error(format!("failed to read defaults entry: {e}")))?
            .path();
        let is_template = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(".example"));
        if path.is_file() && !is_template {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn seed_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Convenience wrapper: loads config relative to the current working directory,
/// copying defaults first and falling back to `OPENAI_API_KEY` for the key.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    let mut config = load_config_from(&cwd)?;
    config.credentials = config
        .credentials
        .with_env_fallback(std::env::var(API_KEY_ENV).ok());
    Ok(config)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError {
            field: "server.port".into(),
            message: "must be greater than 0".into(),
        });
    }

    if config.llm.api_base.trim().is_empty() {
        return Err(ConfigError::ValidationError {
            field: "llm.api_base".into(),
            message: "must not be empty".into(),
        });
    }

    let tasks: &[(&str, &TaskSettings)] = &[
        ("llm.flowchart", &config.llm.flowchart),
        ("llm.code", &config.llm.code),
        ("llm.deep_dive", &config.llm.deep_dive),
        ("llm.notebook_plain", &config.llm.notebook_plain),
        ("llm.notebook_direct", &config.llm.notebook_direct),
    ];
    for (name, task) in tasks {
        if task.model.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.model"),
                message: "must not be empty".into(),
            });
        }
        if !(0.0..=2.0).contains(&task.temperature) {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.temperature"),
                message: format!(
                    "must be between 0.0 and 2.0 inclusive, got {}",
                    task.temperature
                ),
            });
        }
        if task.max_tokens == Some(0) {
            return Err(ConfigError::ValidationError {
                field: format!("{name}.max_tokens"),
                message: "must be > 0 when set".into(),
            });
        }
    }

    let container = &config.container;
    let urls = std::iter::once(("container.api_url", &container.api_url))
        .chain(std::iter::once((
            "container.notebook_url",
            &container.notebook_url,
        )))
        .chain(
            container
                .fallback_urls
                .iter()
                .map(|u| ("container.fallback_urls", u)),
        );
    for (name, url) in urls {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::ValidationError {
                field: name.to_string(),
                message: format!("must be an http(s) URL, got {url:?}"),
            });
        }
    }

    if container.timeout_secs == 0 {
        return Err(ConfigError::ValidationError {
            field: "container.timeout_secs".into(),
            message: "must be > 0".into(),
        });
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
