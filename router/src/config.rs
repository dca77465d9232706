//! Configuration management via flags and environment variables
//!
//! Precedence: command-line flag, `FLEET_*` variable, deprecated `SWARM_*`
//! variable (with a warning), built-in default.

use crate::{cli::Cli, tls::TlsFiles};
use fleet_common::{
    error::{CommonError, RouterError, RouterResult},
    types::host_of,
};
use std::path::PathBuf;

/// Default listen port of the remote API
pub const DEFAULT_PORT: u16 = 2375;
/// Default seconds between node refreshes
pub const DEFAULT_HEARTBEAT_SECS: u64 = 25;

/// Get an environment variable with fallback to a deprecated name
///
/// If the new variable name is set, returns its value.
/// If only the old (deprecated) variable name is set, returns its value
/// and logs a deprecation warning.
///
/// # Example
/// ```
/// use fleet_router::config::get_env_with_fallback;
///
/// let port = get_env_with_fallback("FLEET_PORT", "SWARM_PORT");
/// ```
pub fn get_env_with_fallback(new_name: &str, old_name: &str) -> Option<String> {
    if let Ok(val) = std::env::var(new_name) {
        return Some(val);
    }
    if let Ok(val) = std::env::var(old_name) {
        tracing::warn!(
            "Environment variable '{}' is deprecated, use '{}' instead",
            old_name,
            new_name
        );
        return Some(val);
    }
    None
}

/// Get an environment variable with fallback and default value
pub fn get_env_with_fallback_or(new_name: &str, old_name: &str, default: &str) -> String {
    get_env_with_fallback(new_name, old_name).unwrap_or_else(|| default.to_string())
}

/// Get an environment variable with fallback, parsing to a specific type
///
/// Unlike a silent default, a value that is set but does not parse is an
/// error.
pub fn get_env_with_fallback_parse<T>(new_name: &str, old_name: &str) -> RouterResult<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match get_env_with_fallback(new_name, old_name) {
        Some(raw) => raw.trim().parse().map(Some).map_err(|e| {
            CommonError::Validation(format!("Invalid value '{}' for {}: {}", raw, new_name, e))
                .into()
        }),
        None => Ok(None),
    }
}

/// Boolean environment flag (`1`, `true`, `yes`, `on`)
pub fn get_env_flag(new_name: &str, old_name: &str) -> bool {
    get_env_with_fallback(new_name, old_name)
        .map(|value| {
            matches!(
                value.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
        .unwrap_or(false)
}

/// Resolved manager configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Bind address
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Node agent addresses (`host:port`)
    pub nodes: Vec<String>,
    /// Seconds between node refreshes
    pub heartbeat_secs: u64,
    /// Emit cross-origin headers
    pub cors: bool,
    /// Debug mode
    pub debug: bool,
    /// TLS material for node agent connections
    pub tls: TlsFiles,
}

impl ManagerConfig {
    /// Merge flags, environment and defaults, then validate.
    pub fn resolve(cli: &Cli) -> RouterResult<Self> {
        let host = cli
            .host
            .clone()
            .unwrap_or_else(|| get_env_with_fallback_or("FLEET_HOST", "SWARM_HOST", "0.0.0.0"));

        let port = match cli.port {
            Some(port) => port,
            None => {
                get_env_with_fallback_parse("FLEET_PORT", "SWARM_PORT")?.unwrap_or(DEFAULT_PORT)
            }
        };

        let nodes = if cli.nodes.is_empty() {
            get_env_with_fallback("FLEET_NODES", "SWARM_NODES")
                .map(|raw| split_nodes(&raw))
                .unwrap_or_default()
        } else {
            cli.nodes
                .iter()
                .flat_map(|entry| split_nodes(entry))
                .collect()
        };

        let heartbeat_secs = match cli.heartbeat {
            Some(secs) => secs,
            None => get_env_with_fallback_parse("FLEET_HEARTBEAT", "SWARM_HEARTBEAT")?
                .unwrap_or(DEFAULT_HEARTBEAT_SECS),
        };

        let tls = TlsFiles {
            ca_cert: path_setting(&cli.tlscacert, "FLEET_TLS_CACERT", "SWARM_TLS_CACERT"),
            cert: path_setting(&cli.tlscert, "FLEET_TLS_CERT", "SWARM_TLS_CERT"),
            key: path_setting(&cli.tlskey, "FLEET_TLS_KEY", "SWARM_TLS_KEY"),
        };

        let config = Self {
            host,
            port,
            nodes,
            heartbeat_secs,
            cors: cli.cors || get_env_flag("FLEET_CORS", "SWARM_CORS"),
            debug: cli.debug || get_env_flag("FLEET_DEBUG", "SWARM_DEBUG"),
            tls,
        };
        config.validate(cli.tlsverify)?;
        Ok(config)
    }

    fn validate(&self, tls_verify: bool) -> RouterResult<()> {
        if self.host.trim().is_empty() {
            return Err(RouterError::Config("listen host must not be empty".to_string()));
        }
        if self.nodes.is_empty() {
            return Err(RouterError::Config(
                "at least one node is required (--node or FLEET_NODES)".to_string(),
            ));
        }
        for node in &self.nodes {
            validate_node_addr(node)?;
        }
        if self.heartbeat_secs == 0 {
            return Err(RouterError::Config("heartbeat must be at least 1 second".to_string()));
        }
        if tls_verify && self.tls.ca_cert.is_none() {
            return Err(RouterError::Config("--tlsverify requires --tlscacert".to_string()));
        }
        Ok(())
    }

    /// `host:port` the API server binds
    pub fn listen_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn split_nodes(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn path_setting(flag: &Option<PathBuf>, new_name: &str, old_name: &str) -> Option<PathBuf> {
    flag.clone().or_else(|| {
        get_env_with_fallback(new_name, old_name)
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
    })
}

fn validate_node_addr(addr: &str) -> RouterResult<()> {
    let invalid = || {
        RouterError::Config(format!(
            "invalid node address '{}', expected host:port",
            addr
        ))
    };
    let (_, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host_of(addr).is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}
