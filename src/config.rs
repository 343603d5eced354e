use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::throttle::ThrottleWindow;

/// Health endpoints tried in order until one answers with a success status.
pub const DEFAULT_HEALTH_ENDPOINTS: &[&str] =
  &["/api/health", "/api/health-check", "/health", "/api/status"];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub features: FeatureFlags,
  pub throttle: ThrottleConfig,
  pub session: SessionConfig,
  pub health: HealthConfig,
  pub offline: OfflineConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  pub ws_url: String,
  pub request_timeout_ms: u64,
  pub health_check_timeout_ms: u64,
  pub max_retries: u32,
  pub retry_delay_ms: u64,
  /// Expiry applied to detail lookups in the response cache
  pub cache_ttl_ms: u64,
  pub health_endpoints: Vec<String>,
  pub refresh_path: String,
  /// Path under which resource collections live, e.g. `/api/categories`
  pub resource_prefix: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:8000".to_string(),
      ws_url: "ws://localhost:8000/ws".to_string(),
      request_timeout_ms: 30_000,
      health_check_timeout_ms: 5_000,
      max_retries: 3,
      retry_delay_ms: 1_000,
      cache_ttl_ms: 300_000,
      health_endpoints: DEFAULT_HEALTH_ENDPOINTS
        .iter()
        .map(|s| s.to_string())
        .collect(),
      refresh_path: "/api/auth/refresh".to_string(),
      resource_prefix: "/api".to_string(),
    }
  }
}

impl ApiConfig {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_millis(self.request_timeout_ms)
  }

  pub fn health_check_timeout(&self) -> Duration {
    Duration::from_millis(self.health_check_timeout_ms)
  }

  pub fn retry_delay(&self) -> Duration {
    Duration::from_millis(self.retry_delay_ms)
  }

  pub fn cache_ttl(&self) -> Duration {
    Duration::from_millis(self.cache_ttl_ms)
  }

  /// Base URL without a trailing slash, ready for path concatenation.
  pub fn base(&self) -> &str {
    self.base_url.trim_end_matches('/')
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
  /// Only carried for the UI layer; this crate opens no sockets itself
  pub enable_websocket: bool,
  pub enable_offline_mode: bool,
  pub enable_request_dedup: bool,
}

impl Default for FeatureFlags {
  fn default() -> Self {
    Self {
      enable_websocket: false,
      enable_offline_mode: true,
      enable_request_dedup: true,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
  pub interval_ms: u64,
  pub max_requests: usize,
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    let window = ThrottleWindow::default();
    Self {
      interval_ms: window.interval.as_millis() as u64,
      max_requests: window.max_requests,
    }
  }
}

impl ThrottleConfig {
  pub fn window(&self) -> ThrottleWindow {
    ThrottleWindow {
      interval: Duration::from_millis(self.interval_ms),
      max_requests: self.max_requests,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
  pub warning_threshold_ms: u64,
  pub tick_ms: u64,
  /// Spacing between automatic refresh attempts after a failed one
  pub refresh_retry_ms: u64,
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      warning_threshold_ms: 300_000,
      tick_ms: 1_000,
      refresh_retry_ms: 5_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
  pub probe_interval_ms: u64,
}

impl Default for HealthConfig {
  fn default() -> Self {
    Self {
      probe_interval_ms: 30_000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
  /// Cache generation; derived from the precache list when unset
  pub generation: Option<String>,
  pub precache: Vec<String>,
  pub offline_page: String,
  pub placeholder_image: String,
  pub api_prefix: String,
  /// SQLite file; defaults to the data directory
  pub store_path: Option<PathBuf>,
}

impl Default for OfflineConfig {
  fn default() -> Self {
    Self {
      generation: None,
      precache: vec![
        "/".to_string(),
        "/offline.html".to_string(),
        "/images/placeholder.png".to_string(),
        "/manifest.json".to_string(),
      ],
      offline_page: "/offline.html".to_string(),
      placeholder_image: "/images/placeholder.png".to_string(),
      api_prefix: "/api/".to_string(),
      store_path: None,
    }
  }
}

impl Config {
  /// Load configuration from file, falling back to defaults.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./lifeline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/lifeline/config.yaml
  ///
  /// `LIFELINE_API_URL` and `LIFELINE_WS_URL` override the file.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let mut config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Config::default(),
    };
    config.apply_env_overrides();
    Ok(config)
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("lifeline.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("lifeline").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn from_yaml(contents: &str) -> Result<Self> {
    // An empty document deserializes to unit, not to the defaults
    if contents.trim().is_empty() {
      return Ok(Config::default());
    }
    Ok(serde_yaml::from_str(contents)?)
  }

  fn apply_env_overrides(&mut self) {
    if let Ok(url) = std::env::var("LIFELINE_API_URL") {
      self.api.base_url = url;
    }
    if let Ok(url) = std::env::var("LIFELINE_WS_URL") {
      self.api.ws_url = url;
    }
  }

  /// Directory for the session file, offline store and logs.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("lifeline"))
  }

  /// Get a freshly issued session token from the environment.
  ///
  /// Reads `LIFELINE_TOKEN`, with the lifetime in seconds from
  /// `LIFELINE_TOKEN_EXPIRES_IN` (one hour when unset).
  pub fn get_session_token() -> Result<(String, i64)> {
    let token = std::env::var("LIFELINE_TOKEN")
      .map_err(|_| eyre!("Session token not found. Set LIFELINE_TOKEN environment variable."))?;
    let expires_in = match std::env::var("LIFELINE_TOKEN_EXPIRES_IN") {
      Ok(raw) => raw
        .parse()
        .map_err(|e| eyre!("Invalid LIFELINE_TOKEN_EXPIRES_IN '{}': {}", raw, e))?,
      Err(_) => 3600,
    };
    Ok((token, expires_in))
  }
}
