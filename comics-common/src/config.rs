//! Configuration loading
//!
//! Resolution priority (highest first):
//! 1. Command-line arguments (applied by the binary)
//! 2. Environment variables
//! 3. TOML config file
//! 4. Compiled defaults

use crate::records::Catalog;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default listen address (all interfaces, port 8080)
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default coalescing window for snapshot file events
pub const DEFAULT_DEBOUNCE_MS: u64 = 500;

/// Default per-client outbound queue length
pub const DEFAULT_CLIENT_BUFFER: usize = 64;

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Socket address the HTTP server binds to
    pub bind: String,
    pub store: StoreConfig,
    pub snapshots: SnapshotConfig,
    pub sync: SyncConfig,
    pub media: MediaConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            store: StoreConfig::default(),
            snapshots: SnapshotConfig::default(),
            sync: SyncConfig::default(),
            media: MediaConfig::default(),
        }
    }
}

/// Which remote table store to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local tables (development and tests)
    #[default]
    Memory,
    /// Direct Postgres connection pool
    Postgres,
    /// Hosted table REST API (PostgREST-compatible)
    Rest,
}

impl std::str::FromStr for StoreBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "rest" | "supabase" => Ok(StoreBackend::Rest),
            other => Err(Error::Config(format!("Unknown store backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub postgres: PostgresConfig,
    pub rest: RestConfig,
}

/// Postgres connection settings; `url` wins over the individual fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub max_connections: Option<u32>,
}

impl PostgresConfig {
    /// Either a full URL or at least host and database are set
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || (self.host.is_some() && self.database.is_some())
    }
}

/// Hosted table API settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RestConfig {
    pub url: Option<String>,
    pub service_key: Option<String>,
}

/// Snapshot file locations per catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub comics: PathBuf,
    pub upcoming: PathBuf,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            comics: PathBuf::from("comic.json"),
            upcoming: PathBuf::from("upcomingcomics.json"),
        }
    }
}

impl SnapshotConfig {
    pub fn path(&self, catalog: Catalog) -> &Path {
        match catalog {
            Catalog::Comics => &self.comics,
            Catalog::Upcoming => &self.upcoming,
        }
    }
}

/// Reconciliation and live-update behaviour
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Watch snapshot files and reconcile on change
    pub watch: bool,
    /// Quiet period before a burst of file events fires one cycle
    pub debounce_ms: u64,
    /// Rewrite the snapshot from remote state after API writes
    pub write_back: bool,
    /// Reconcile every catalog once at startup
    pub sync_on_startup: bool,
    /// Outbound frames queued per live client before it is dropped
    pub client_buffer: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            watch: true,
            debounce_ms: DEFAULT_DEBOUNCE_MS,
            write_back: true,
            sync_on_startup: true,
            client_buffer: DEFAULT_CLIENT_BUFFER,
        }
    }
}

/// Remote media host credentials
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaConfig {
    pub cloud_name: Option<String>,
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Temporary storage for incoming uploads
    pub upload_dir: PathBuf,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            cloud_name: None,
            api_key: None,
            api_secret: None,
            upload_dir: PathBuf::from("uploads"),
        }
    }
}

impl MediaConfig {
    /// True when every credential is present
    pub fn is_configured(&self) -> bool {
        self.cloud_name.is_some() && self.api_key.is_some() && self.api_secret.is_some()
    }
}

impl ServiceConfig {
    /// Load the TOML file (explicit path, or the per-user default if present),
    /// then overlay process environment variables
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    info!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Overlay environment variables using `lookup` (injectable for tests)
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(port) = lookup("PORT") {
            match port.parse::<u16>() {
                Ok(port) => self.bind = format!("0.0.0.0:{}", port),
                Err(_) => warn!("Ignoring invalid PORT value: {}", port),
            }
        }
        if let Some(bind) = lookup("COMICS_BIND") {
            self.bind = bind;
        }

        if let Some(backend) = lookup("COMICS_STORE") {
            match backend.parse() {
                Ok(backend) => self.store.backend = backend,
                Err(e) => warn!("Ignoring COMICS_STORE: {}", e),
            }
        }

        let pg = &mut self.store.postgres;
        overlay(&mut pg.url, lookup("DATABASE_URL"));
        overlay(&mut pg.host, lookup("MYPOSTGRES_HOSTNAME"));
        overlay(&mut pg.database, lookup("MYPOSTGRES_DATABASE"));
        overlay(&mut pg.user, lookup("MYPOSTGRES_USERNAME"));
        overlay(&mut pg.password, lookup("MYPOSTGRES_PASSWORD"));
        if let Some(port) = lookup("MYPOSTGRES_PORT") {
            match port.parse() {
                Ok(port) => pg.port = Some(port),
                Err(_) => warn!("Ignoring invalid MYPOSTGRES_PORT value: {}", port),
            }
        }

        overlay(&mut self.store.rest.url, lookup("SUPABASE_URL"));
        overlay(
            &mut self.store.rest.service_key,
            lookup("SUPABASE_SERVICE_ROLE_KEY"),
        );

        if let Some(path) = lookup("COMICS_SNAPSHOT") {
            self.snapshots.comics = PathBuf::from(path);
        }
        if let Some(path) = lookup("UPCOMING_SNAPSHOT") {
            self.snapshots.upcoming = PathBuf::from(path);
        }

        // Production deployments do not watch local files unless asked to
        if lookup("COMICS_ENV").is_some_and(|env| env.eq_ignore_ascii_case("production")) {
            self.sync.watch = false;
        }
        if let Some(watch) = lookup("COMICS_WATCH") {
            self.sync.watch = parse_flag(&watch).unwrap_or(self.sync.watch);
        }
        if let Some(ms) = lookup("COMICS_DEBOUNCE_MS") {
            match ms.parse() {
                Ok(ms) => self.sync.debounce_ms = ms,
                Err(_) => warn!("Ignoring invalid COMICS_DEBOUNCE_MS value: {}", ms),
            }
        }

        overlay(&mut self.media.cloud_name, lookup("MYCLOUDNAME"));
        overlay(&mut self.media.api_key, lookup("API_KEY"));
        overlay(&mut self.media.api_secret, lookup("API_SECRET"));
        if let Some(dir) = lookup("COMICS_UPLOAD_DIR") {
            self.media.upload_dir = PathBuf::from(dir);
        }
    }

    /// Check that the selected backend has what it needs
    pub fn validate(&self) -> Result<()> {
        match self.store.backend {
            StoreBackend::Memory => {}
            StoreBackend::Postgres => {
                if !self.store.postgres.is_configured() {
                    return Err(Error::Config(
                        "Postgres store selected but no DATABASE_URL or MYPOSTGRES_HOSTNAME/MYPOSTGRES_DATABASE configured"
                            .to_string(),
                    ));
                }
            }
            StoreBackend::Rest => {
                if self.store.rest.url.is_none() || self.store.rest.service_key.is_none() {
                    return Err(Error::Config(
                        "REST store selected but SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY missing"
                            .to_string(),
                    ));
                }
            }
        }

        if self.sync.client_buffer == 0 {
            return Err(Error::Config("sync.client_buffer must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Per-user config file location (~/.config/comics-sync/config.toml on Linux)
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("comics-sync").join("config.toml"))
}

fn overlay(slot: &mut Option<String>, value: Option<String>) {
    if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
        *slot = Some(value);
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
