//! Server configuration: TOML file + CLI overrides.

use crate::hub::HubConfig;
use crate::session::SessionSettings;
use parley_core::{ParleyError, ParleyResult};
use serde::Deserialize;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable that overrides `[auth] jwt_secret`.
pub const JWT_SECRET_ENV: &str = "PARLEY_JWT_SECRET";

/// Upper bound for `idle_timeout_secs` (one day).
pub const MAX_IDLE_TIMEOUT_SECS: u64 = 86_400;

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub hub: HubSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub persistence: PersistenceSection,
}

/// `[server]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_path")]
    pub path: String,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            path: default_path(),
            max_message_size: default_max_message_size(),
            allowed_origins: Vec::new(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

/// `[session]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionSection {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_ping_interval")]
    pub ping_interval_secs: u64,
    #[serde(default = "default_write_timeout")]
    pub write_timeout_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            idle_timeout_secs: default_idle_timeout(),
            ping_interval_secs: default_ping_interval(),
            write_timeout_secs: default_write_timeout(),
        }
    }
}

/// `[hub]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct HubSection {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    #[serde(default)]
    pub echo_to_sender: bool,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            echo_to_sender: false,
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_max_handshakes")]
    pub max_handshakes_per_minute: u32,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            max_handshakes_per_minute: default_max_handshakes(),
        }
    }
}

/// `[persistence]` section of the config TOML.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PersistenceSection {
    #[serde(default)]
    pub path: Option<String>,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_path() -> String {
    "/ws".to_string()
}
fn default_max_message_size() -> usize {
    512 * 1024
}
fn default_shutdown_grace() -> u64 {
    5
}
fn default_queue_capacity() -> usize {
    256
}
fn default_idle_timeout() -> u64 {
    60
}
fn default_ping_interval() -> u64 {
    54
}
fn default_write_timeout() -> u64 {
    10
}
fn default_event_capacity() -> usize {
    256
}
fn default_max_handshakes() -> u32 {
    30
}

/// Values given on the command line; `None` keeps the file value.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub bind: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub persist: Option<String>,
    pub queue_capacity: Option<usize>,
    pub idle_timeout: Option<u64>,
    pub echo_to_sender: bool,
}

/// Resolved server configuration (paths expanded, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: SocketAddr,
    pub path: String,
    pub max_message_size: usize,
    pub allowed_origins: Vec<String>,
    pub shutdown_grace: Duration,
    pub session: SessionSettings,
    pub hub: HubConfig,
    pub jwt_secret: Option<String>,
    pub max_handshakes_per_minute: u32,
    pub persistence_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let server = ServerSection::default();
        let session = SessionSection::default();
        Self {
            listen: SocketAddr::new(IpAddr::from([0, 0, 0, 0]), server.port),
            path: server.path,
            max_message_size: server.max_message_size,
            allowed_origins: server.allowed_origins,
            shutdown_grace: Duration::from_secs(server.shutdown_grace_secs),
            session: SessionSettings {
                queue_capacity: session.queue_capacity,
                idle_timeout: Duration::from_secs(session.idle_timeout_secs),
                ping_interval: Duration::from_secs(session.ping_interval_secs),
                write_timeout: Duration::from_secs(session.write_timeout_secs),
            },
            hub: HubConfig::default(),
            jwt_secret: None,
            max_handshakes_per_minute: default_max_handshakes(),
            persistence_path: None,
        }
    }
}

impl ServerConfig {
    /// Load config from TOML file, then apply CLI overrides and the
    /// secret from the environment.
    pub fn load(config_path: Option<&Path>, cli: &CliOverrides) -> ParleyResult<Self> {
        let file_config = match config_path {
            Some(path) => {
                let expanded = expand_tilde(path);
                if expanded.exists() {
                    info!(path = %expanded.display(), "loading config file");
                    let content = std::fs::read_to_string(&expanded)?;
                    toml::from_str::<ConfigFile>(&content)
                        .map_err(|e| ParleyError::Config(format!("config parse error: {e}")))?
                } else {
                    info!(path = %expanded.display(), "config file not found, using defaults");
                    ConfigFile::default()
                }
            }
            None => ConfigFile::default(),
        };

        let env_secret = std::env::var(JWT_SECRET_ENV).ok().filter(|s| !s.is_empty());
        Self::from_file(file_config, cli, env_secret)
    }

    /// Merge a parsed file with CLI overrides and validate the result.
    pub fn from_file(
        file: ConfigFile,
        cli: &CliOverrides,
        env_secret: Option<String>,
    ) -> ParleyResult<Self> {
        let bind = cli.bind.clone().unwrap_or(file.server.bind);
        let ip: IpAddr = bind
            .parse()
            .map_err(|e| ParleyError::Config(format!("invalid bind address {bind:?}: {e}")))?;
        let port = cli.port.unwrap_or(file.server.port);

        let path = cli.path.clone().unwrap_or(file.server.path);
        if !path.starts_with('/') {
            return Err(ParleyError::Config(format!(
                "endpoint path must start with '/': {path:?}"
            )));
        }

        let queue_capacity = cli.queue_capacity.unwrap_or(file.session.queue_capacity);
        if queue_capacity == 0 {
            return Err(ParleyError::Config("queue_capacity must be at least 1".into()));
        }
        if file.hub.event_capacity == 0 {
            return Err(ParleyError::Config("event_capacity must be at least 1".into()));
        }

        let idle_secs = cli.idle_timeout.unwrap_or(file.session.idle_timeout_secs);
        if idle_secs == 0 || idle_secs > MAX_IDLE_TIMEOUT_SECS {
            return Err(ParleyError::Config(format!(
                "idle_timeout_secs must be between 1 and {MAX_IDLE_TIMEOUT_SECS}, got {idle_secs}"
            )));
        }
        let idle_timeout = Duration::from_secs(idle_secs);
        let mut ping_interval = Duration::from_secs(file.session.ping_interval_secs);
        if ping_interval.is_zero() || ping_interval >= idle_timeout {
            // Pings must land inside the idle window or healthy peers time out.
            ping_interval = idle_timeout * 9 / 10;
            warn!(
                ping_interval_ms = ping_interval.as_millis() as u64,
                "ping interval must be shorter than the idle timeout, clamped"
            );
        }

        let persistence_path = cli
            .persist
            .clone()
            .or(file.persistence.path)
            .map(|p| expand_tilde_str(&p));

        Ok(Self {
            listen: SocketAddr::new(ip, port),
            path,
            max_message_size: file.server.max_message_size,
            allowed_origins: file.server.allowed_origins,
            shutdown_grace: Duration::from_secs(file.server.shutdown_grace_secs),
            session: SessionSettings {
                queue_capacity,
                idle_timeout,
                ping_interval,
                write_timeout: Duration::from_secs(file.session.write_timeout_secs.max(1)),
            },
            hub: HubConfig {
                event_capacity: file.hub.event_capacity,
                echo_to_sender: cli.echo_to_sender || file.hub.echo_to_sender,
            },
            jwt_secret: env_secret.or(file.auth.jwt_secret),
            max_handshakes_per_minute: file.auth.max_handshakes_per_minute,
            persistence_path,
        })
    }
}

/// Expand `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    expand_tilde_str(&s)
}

fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
