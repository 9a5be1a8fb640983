use std::collections::BTreeMap;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use transport::{ListenConfig, Protocol};

pub const SERVICE_NAME: &str = "nimbus";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading {path} failed: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {path} failed: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("{var}={value:?} is not a port (use a negative value to disable)")]
    InvalidPort { var: String, value: String },
    #[error(transparent)]
    UnknownProtocol(#[from] UnknownProtocol),
}

#[derive(Debug, Error)]
#[error("unknown front-end protocol {0:?} in [rproxy.listeners]")]
pub struct UnknownProtocol(pub String);

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rproxy: RproxyConfig,
    pub manager: ManagerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RproxyConfig {
    pub control_listen: SocketAddr,
    pub function_port: u16,
    pub call_timeout_secs: u64,
    /// Accept loops of the reuseport front-ends; 0 means one per CPU.
    pub workers: usize,
    /// Enabled front-ends by protocol name.
    pub listeners: BTreeMap<String, SocketAddr>,
}

impl Default for RproxyConfig {
    fn default() -> Self {
        let listeners = [
            ("coap", SocketAddr::from(([0, 0, 0, 0], 5683))),
            ("grpc", SocketAddr::from(([0, 0, 0, 0], 9000))),
            ("http", SocketAddr::from(([0, 0, 0, 0], 8000))),
        ]
        .into_iter()
        .map(|(name, addr)| (name.to_string(), addr))
        .collect();
        Self {
            control_listen: SocketAddr::from(([127, 0, 0, 1], 8081)),
            function_port: 8000,
            call_timeout_secs: 30,
            workers: 0,
            listeners,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub listen: SocketAddr,
    pub control_url: String,
    /// Host name put into the function URLs returned by uploads.
    pub advertise_host: String,
    pub staging_dir: PathBuf,
    pub runtimes_dir: PathBuf,
    pub spawn_rproxy: bool,
    pub health_attempts: u32,
    pub health_interval_ms: u64,
    pub health_timeout_ms: u64,
    pub package_fetch_timeout_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 8080)),
            control_url: "http://127.0.0.1:8081".to_string(),
            advertise_host: "localhost".to_string(),
            staging_dir: PathBuf::from("./tmp"),
            runtimes_dir: PathBuf::from("./runtimes"),
            spawn_rproxy: true,
            health_attempts: 10,
            health_interval_ms: 1000,
            health_timeout_ms: 3000,
            package_fetch_timeout_secs: 60,
        }
    }
}

impl Config {
    /// Load `explicit` if given, otherwise the first config file found on the
    /// search path, otherwise built-in defaults. Port overrides from the
    /// process environment are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match config_search_paths().into_iter().find(|path| path.exists()) {
                Some(path) => Self::from_file(&path)?,
                None => {
                    tracing::warn!("no config file found for {}; using built-in defaults", SERVICE_NAME);
                    Config::default()
                }
            },
        };
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply `<PROTO>_PORT` overrides. A negative port disables the
    /// front-end; a port for a disabled front-end enables it on all
    /// interfaces.
    pub fn apply_env_with<F>(&mut self, env_get: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for protocol in Protocol::ALL {
            let name = protocol.name();
            let var = format!("{}_PORT", name.to_ascii_uppercase());
            let Some(raw) = env_get(&var) else {
                continue;
            };
            let invalid = || ConfigError::InvalidPort {
                var: var.clone(),
                value: raw.clone(),
            };
            let port: i64 = raw.trim().parse().map_err(|_| invalid())?;
            if port < 0 {
                tracing::info!("{} disabled by {}", name, var);
                self.rproxy.listeners.remove(name);
                continue;
            }
            let port = u16::try_from(port).map_err(|_| invalid())?;
            self.rproxy
                .listeners
                .entry(name.to_string())
                .and_modify(|addr| addr.set_port(port))
                .or_insert_with(|| SocketAddr::from(([0, 0, 0, 0], port)));
        }
        Ok(())
    }

    pub fn workers(&self) -> usize {
        match self.rproxy.workers {
            0 => num_cpus::get(),
            workers => workers,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.rproxy.call_timeout_secs)
    }

    /// Enabled front-ends, sorted by protocol name.
    pub fn enabled_front_ends(&self) -> Result<Vec<(Protocol, SocketAddr)>, UnknownProtocol> {
        self.rproxy
            .listeners
            .iter()
            .map(|(name, addr)| {
                name.parse::<Protocol>()
                    .map(|protocol| (protocol, *addr))
                    .map_err(|_| UnknownProtocol(name.clone()))
            })
            .collect()
    }

    pub fn listen_configs(&self) -> Result<Vec<ListenConfig>, UnknownProtocol> {
        let workers = self.workers();
        Ok(self
            .enabled_front_ends()?
            .into_iter()
            .map(|(protocol, addr)| ListenConfig::new(protocol, addr, workers))
            .collect())
    }

    /// `<scheme>://<advertise_host>:<port>` for every enabled front-end.
    pub fn front_end_urls(&self) -> Result<Vec<String>, UnknownProtocol> {
        Ok(self
            .enabled_front_ends()?
            .into_iter()
            .map(|(protocol, addr)| {
                format!(
                    "{}://{}:{}",
                    protocol.scheme(),
                    self.manager.advertise_host,
                    addr.port()
                )
            })
            .collect())
    }
}

fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(format!("./{}.toml", SERVICE_NAME))];
    if let Ok(home) = std::env::var("HOME") {
        paths.push(
            PathBuf::from(home)
                .join(".config")
                .join(SERVICE_NAME)
                .join("config.toml"),
        );
    }
    paths.push(PathBuf::from(format!("/etc/{}/config.toml", SERVICE_NAME)));
    paths
}
