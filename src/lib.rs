//! Geofeed
//!
//! A business listing store with a real-time change stream:
//! - Mutation watcher that follows the store's ordered mutation log and
//!   restarts after failures
//! - Change bus fanning normalized events out to subscribers
//! - Streaming sessions delivering events to clients over Server-Sent Events

pub mod api;
pub mod events;
pub mod pipeline;
pub mod store;
pub mod stream;

#[cfg(test)]
pub(crate) mod test_helpers;

use anyhow::{Context, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use store::MemoryStoreOptions;
use stream::{OverflowPolicy, SessionConfig};

// ============================================================================
// YAML config structs (deserialization targets)
// ============================================================================

/// Top-level YAML configuration file structure
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub server: ServerYamlConfig,
    pub watcher: WatcherYamlConfig,
    pub stream: SessionConfig,
    pub store: StoreYamlConfig,
}

/// Server configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerYamlConfig {
    pub port: u16,
}

impl Default for ServerYamlConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

/// Mutation watcher configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherYamlConfig {
    /// Delay before re-subscribing after a log failure
    pub backoff_ms: u64,
    /// Bound on a single record lookup
    pub lookup_timeout_ms: u64,
}

impl Default for WatcherYamlConfig {
    fn default() -> Self {
        Self {
            backoff_ms: pipeline::DEFAULT_BACKOFF.as_millis() as u64,
            lookup_timeout_ms: pipeline::DEFAULT_LOOKUP_TIMEOUT.as_millis() as u64,
        }
    }
}

/// Record store configuration section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreYamlConfig {
    pub embed_full_document: bool,
    pub log_capacity: usize,
}

impl Default for StoreYamlConfig {
    fn default() -> Self {
        let options = MemoryStoreOptions::default();
        Self {
            embed_full_document: options.embed_full_document,
            log_capacity: options.log_capacity,
        }
    }
}

// ============================================================================
// Runtime config (what the application actually uses)
// ============================================================================

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub watcher_backoff: Duration,
    pub lookup_timeout: Duration,
    pub stream: SessionConfig,
    pub store: MemoryStoreOptions,
}

impl Config {
    /// Load configuration from environment variables only.
    /// Equivalent to from_yaml_and_env(None).
    pub fn from_env() -> Result<Self> {
        Self::from_yaml_and_env(None)
    }

    /// Load configuration from an optional YAML file, then override with env vars.
    ///
    /// Priority: env var > YAML > default
    ///
    /// If `yaml_path` is None, tries "config.yaml" in CWD. If the file doesn't
    /// exist, falls back to pure env var / defaults.
    pub fn from_yaml_and_env(yaml_path: Option<&Path>) -> Result<Self> {
        let yaml = Self::load_yaml(yaml_path);

        let overflow_policy = match std::env::var("STREAM_OVERFLOW_POLICY") {
            Ok(raw) => raw
                .parse::<OverflowPolicy>()
                .map_err(anyhow::Error::msg)
                .context("invalid STREAM_OVERFLOW_POLICY")?,
            Err(_) => yaml.stream.overflow_policy,
        };

        Ok(Self {
            server_port: env_or("SERVER_PORT", yaml.server.port),
            watcher_backoff: Duration::from_millis(env_or(
                "WATCHER_BACKOFF_MS",
                yaml.watcher.backoff_ms,
            )),
            lookup_timeout: Duration::from_millis(env_or(
                "LOOKUP_TIMEOUT_MS",
                yaml.watcher.lookup_timeout_ms,
            )),
            stream: SessionConfig {
                queue_capacity: env_or("STREAM_QUEUE_CAPACITY", yaml.stream.queue_capacity),
                overflow_policy,
            },
            store: MemoryStoreOptions {
                embed_full_document: env_or(
                    "STORE_EMBED_FULL_DOCUMENT",
                    yaml.store.embed_full_document,
                ),
                log_capacity: env_or("STORE_LOG_CAPACITY", yaml.store.log_capacity),
            },
        })
    }

    /// Try to load and parse a YAML config file. Returns defaults on any failure.
    fn load_yaml(yaml_path: Option<&Path>) -> YamlConfig {
        let default_path = Path::new("config.yaml");
        let path = yaml_path.unwrap_or(default_path);

        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yaml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded config from {}", path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {}. Using defaults.", path.display(), e);
                    YamlConfig::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No config file at {}, using env vars / defaults",
                    path.display()
                );
                YamlConfig::default()
            }
        }
    }
}

/// Read and parse an env var, falling back when it is unset or unparsable.
fn env_or<T: FromStr>(var: &str, fallback: T) -> T {
    match std::env::var(var) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring unparsable {}={:?}", var, raw);
            fallback
        }),
        Err(_) => fallback,
    }
}

// ============================================================================
// Server
// ============================================================================

/// Start the HTTP server and the mutation watcher; runs until Ctrl-C.
pub async fn start_server(config: Config) -> Result<()> {
    let state = Arc::new(api::ServerState::new(&config));
    state.watcher.start();

    let app = api::create_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!("Server listening on {}", addr);

    let shutdown_state = state.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            tracing::info!("Shutdown signal received, closing streams");
            let closed = shutdown_state.sessions.close_all("server shutting down");
            tracing::info!(sessions = closed, "Stream sessions closed");
            shutdown_state.watcher.stop();
        })
        .await
        .context("Server error")?;

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
