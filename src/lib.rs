//! portavia
//!
//! A web relay: browse third-party sites through one trusted origin. HTML
//! fetched upstream is rewritten so every link, script and form keeps
//! pointing at the relay; script-heavy sites can instead be rendered in a
//! per-client headless Chrome session and driven through coordinate
//! click/type APIs.

pub mod browser;
pub mod relay;
pub mod rewrite;
pub mod secrets;
pub mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{error, info, warn};

use browser::{RenderPool, RenderSessionConfig};
use relay::Forwarder;
use secrets::SecretStore;

/// Browser identity presented upstream by both relay paths.
pub const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Application configuration
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    /// Port the relay listens on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Serve `/proxy` through headless Chrome instead of direct fetch
    #[serde(default)]
    pub render_mode: bool,

    /// Run render sessions headless
    #[serde(default = "default_headless")]
    pub headless: bool,

    /// Explicit Chrome/Chromium executable, auto-detected when unset
    pub chrome_path: Option<String>,

    /// Seconds a render session may sit idle before eviction
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

fn default_port() -> u16 {
    8080
}

fn default_headless() -> bool {
    true
}

fn default_session_idle_secs() -> u64 {
    600
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            render_mode: false,
            headless: default_headless(),
            chrome_path: None,
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

/// Get log directory path (shared across modules)
pub fn log_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("portavia").join("logs"))
}

impl AppConfig {
    /// Get config file path
    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("portavia").join("config.json"))
    }

    /// Load config from file. The first run writes the defaults out so
    /// there is a file to edit.
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if path.exists() {
                match std::fs::read_to_string(&path) {
                    Ok(content) => match serde_json::from_str(&content) {
                        Ok(config) => {
                            info!("Loaded config from {:?}", path);
                            return config;
                        }
                        Err(e) => {
                            warn!("Failed to parse config file: {}", e);
                        }
                    },
                    Err(e) => {
                        warn!("Failed to read config file: {}", e);
                    }
                }
            } else {
                let config = Self::default();
                config.save();
                return config;
            }
        }
        Self::default()
    }

    /// Save config to file
    pub fn save(&self) {
        if let Some(path) = Self::config_path() {
            if let Some(parent) = path.parent() {
                if let Err(e) = std::fs::create_dir_all(parent) {
                    error!("Failed to create config directory: {}", e);
                    return;
                }
            }

            match serde_json::to_string_pretty(self) {
                Ok(content) => {
                    if let Err(e) = std::fs::write(&path, content) {
                        error!("Failed to save config: {}", e);
                    } else {
                        info!("Config saved to {:?}", path);
                    }
                }
                Err(e) => {
                    error!("Failed to serialize config: {}", e);
                }
            }
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Application configuration
    pub config: Arc<RwLock<AppConfig>>,
    /// Upstream HTTP client, swapped out when the outbound proxy changes
    pub forwarder: Arc<RwLock<Forwarder>>,
    /// Render session pool
    pub render_pool: Arc<RenderPool>,
    /// Secret store holding the outbound proxy
    pub secrets: Arc<SecretStore>,
}

impl AppState {
    /// Create new application state with loaded config
    pub fn new() -> anyhow::Result<Self> {
        let config = AppConfig::load();
        let secrets = Arc::new(SecretStore::open_default());

        let forwarder = Forwarder::new(secrets.load_outbound_proxy().as_ref())?;

        let render_pool =
            RenderPool::new(secrets.clone(), Duration::from_secs(config.session_idle_secs))
                .with_config(
                    RenderSessionConfig::default()
                        .headless(config.headless)
                        .chrome_path(config.chrome_path.clone()),
                );

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            forwarder: Arc::new(RwLock::new(forwarder)),
            render_pool: Arc::new(render_pool),
            secrets,
        })
    }
}

/// Initialize logging
pub fn init_logging() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false);

    if let Some(log_dir) = log_dir() {
        let _ = std::fs::create_dir_all(&log_dir);
        let file_appender = tracing_appender::rolling::daily(&log_dir, "portavia.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(non_blocking);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .with(file_layer)
            .init();

        Some(guard)
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(console_layer)
            .init();

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.port, 8080);
        assert!(!config.render_mode);
        assert!(config.headless);
        assert!(config.chrome_path.is_none());
        assert_eq!(config.session_idle_secs, 600);
    }

    #[test]
    fn test_config_partial_json_fills_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"renderMode": true}"#).unwrap();
        assert!(config.render_mode);
        assert_eq!(config.port, 8080);
        assert!(config.headless);
    }
}
