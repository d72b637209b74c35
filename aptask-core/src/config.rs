use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::error::{DaemonError, DaemonResult};

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Directories {
    /// Scanned at startup for routine modules in the original system; kept
    /// for wire/config compatibility but unused by this implementation,
    /// which resolves routines from a compiled-in registry instead.
    #[serde(default)]
    pub routines: Option<String>,
    /// Writable directory for the (external) log sink.
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Keys {
    /// Absent or empty means allow-all.
    #[serde(default)]
    pub users: Option<Vec<String>>,
    /// Reserved; currently unused by any request.
    #[serde(default)]
    pub admins: Option<Vec<String>>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9981
}

fn default_num_procs() -> usize {
    4
}

fn default_loglevel() -> String {
    "WARNING".to_string()
}

/// Consumed by the manager (and the daemon's CLI wiring) at startup. Format
/// is informative, not part of the wire contract.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub directories: Directories,
    #[serde(default)]
    pub keys: Keys,
    #[serde(default = "default_loglevel")]
    pub loglevel: String,
    /// Size of the scheduler's active window. A fair FIFO with a bounded
    /// active set needs this number from somewhere, so it is accepted here
    /// as a config extension.
    #[serde(default = "default_num_procs")]
    pub num_procs: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: default_host(),
            port: default_port(),
            directories: Directories::default(),
            keys: Keys::default(),
            loglevel: default_loglevel(),
            num_procs: default_num_procs(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> DaemonResult<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            DaemonError::Config(format!("cannot read {:?}: {}", path.as_ref(), e))
        })?;
        let config: Config = serde_json::from_str(&contents)
            .map_err(|e| DaemonError::Config(format!("invalid config json: {}", e)))?;
        if config.num_procs == 0 {
            return Err(DaemonError::Config("num_procs must be at least 1".to_string()).into());
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_to_an_empty_object() {
        let config: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9981);
        assert_eq!(config.loglevel, "WARNING");
        assert_eq!(config.num_procs, 4);
        assert!(config.keys.users.is_none());
    }

    #[test]
    fn round_trips_the_documented_fields() {
        let json = r#"{
            "host": "0.0.0.0",
            "port": 4000,
            "directories": {"routines": "/opt/routines", "data": "/var/lib/aptaskd"},
            "keys": {"users": ["u"], "admins": []},
            "loglevel": "DEBUG",
            "num_procs": 2
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.port, 4000);
        assert_eq!(config.keys.users, Some(vec!["u".to_string()]));
        assert_eq!(config.num_procs, 2);
    }
}
