/// Client configuration.
use std::path::Path;

use serde_derive::Deserialize;

use crate::errors::Error;

/// Knobs for the socket pool and the bootstrap step. Every field has a
/// default, so a TOML file (or a struct literal) only needs to name what it
/// changes.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct AdminConfig {
    #[serde(default = "default_max_connections_per_node")]
    pub max_connections_per_node: u32,

    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    #[serde(default = "default_socket_timeout_ms")]
    pub socket_timeout_ms: u64,

    #[serde(default = "default_socket_buffer_size")]
    pub socket_buffer_size: usize,

    #[serde(default)]
    pub socket_keepalive: bool,

    /// `tcp://host:port` addresses tried in order at construction. Unused
    /// after bootstrap.
    #[serde(default)]
    pub bootstrap_urls: Vec<String>,
}

fn default_max_connections_per_node() -> u32 {
    6
}

fn default_connection_timeout_ms() -> u64 {
    5_000
}

fn default_socket_timeout_ms() -> u64 {
    60_000
}

fn default_socket_buffer_size() -> usize {
    64 * 1024
}

impl Default for AdminConfig {
    fn default() -> AdminConfig {
        AdminConfig {
            max_connections_per_node: default_max_connections_per_node(),
            connection_timeout_ms: default_connection_timeout_ms(),
            socket_timeout_ms: default_socket_timeout_ms(),
            socket_buffer_size: default_socket_buffer_size(),
            socket_keepalive: false,
            bootstrap_urls: Vec::new(),
        }
    }
}

impl AdminConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<AdminConfig, Error> {
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                return Err(Error::Config(format!(
                    "could not read {}: {}",
                    path.as_ref().display(),
                    err
                )))
            }
        };

        toml::from_str(&contents).map_err(|err| Error::Config(err.to_string()))
    }
}
