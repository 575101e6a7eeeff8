//! Command-line configuration
//!
//! The binary takes its settings from the command line only; there are no
//! environment variables and no config file.

use crate::server::ServerConfig;
use crate::storage::ExpiryConfig;
use clap::Parser;

/// QuickKV server
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(name = "quickkv")]
#[command(about = "A minimal in-memory key-value server speaking a RESP-style protocol")]
#[command(version)]
pub struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = crate::DEFAULT_PORT)]
    pub port: u16,

    /// Host to bind to
    #[arg(long, default_value = crate::DEFAULT_HOST)]
    pub host: String,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = crate::DEFAULT_MAX_CONNECTIONS)]
    pub max_connections: usize,

    /// Also remove expired keys in the background, not only when read
    #[arg(long)]
    pub active_expiry: bool,
}

impl Cli {
    /// Builds the server configuration from the parsed arguments.
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            max_connections: self.max_connections,
            active_expiry: self.active_expiry.then(ExpiryConfig::default),
        }
    }
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        cli.server_config()
    }
}
