//! CLI module for fleet-router
//!
//! Command-line flags for the cluster manager. Every flag falls back to an
//! environment variable (see `config`).

use clap::Parser;
use std::path::PathBuf;

/// Fleet Router - makes a fleet of container node agents look like one host
#[derive(Parser, Debug, Default)]
#[command(name = "fleet-router")]
#[command(version, about, long_about = None)]
#[command(after_help = r#"ENVIRONMENT VARIABLES:
    FLEET_HOST                   Bind address (default: 0.0.0.0)
    FLEET_PORT                   Listen port (default: 2375)
    FLEET_NODES                  Comma separated node agents (host:port)
    FLEET_HEARTBEAT              Node refresh interval in seconds (default: 25)
    FLEET_CORS                   Emit cross-origin headers (true/false)
    FLEET_DEBUG                  Debug mode (true/false)
    FLEET_TLS_CACERT             CA certificate for node agents
    FLEET_TLS_CERT               Client certificate for node agents
    FLEET_TLS_KEY                Client key for node agents
    FLEET_LOG_LEVEL              Log level (default: info)
    FLEET_LOG_DIR                Log directory (default: ~/.fleet/logs)
    FLEET_LOG_RETENTION_DAYS     Days of logs to keep (default: 7)

    SWARM_* names are accepted as deprecated aliases.
"#)]
pub struct Cli {
    /// Address to listen on
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(long, short = 'p')]
    pub port: Option<u16>,

    /// Node agent address (host:port); repeat or separate with commas
    #[arg(long = "node", short = 'n', value_delimiter = ',')]
    pub nodes: Vec<String>,

    /// Seconds between node refreshes
    #[arg(long)]
    pub heartbeat: Option<u64>,

    /// Emit permissive cross-origin headers
    #[arg(long)]
    pub cors: bool,

    /// Debug mode
    #[arg(long, short = 'D')]
    pub debug: bool,

    /// Require TLS towards node agents
    #[arg(long)]
    pub tlsverify: bool,

    /// CA certificate node agents must present a chain to
    #[arg(long)]
    pub tlscacert: Option<PathBuf>,

    /// Client certificate
    #[arg(long)]
    pub tlscert: Option<PathBuf>,

    /// Client private key
    #[arg(long)]
    pub tlskey: Option<PathBuf>,
}
