//! Process configuration: CLI-provided addresses plus an optional TOML
//! overlay for the knobs that have no command-line flag.

use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

/// Resolved name-server configuration.
#[derive(Debug, Clone)]
pub struct NsConfig {
    pub ip: String,
    pub port: u16,
    /// Whether the exec command is served. Executing stored bytes is a
    /// security boundary, so deployments can switch it off.
    pub exec_enabled: bool,
}

/// Resolved storage-server configuration.
#[derive(Debug, Clone)]
pub struct SsConfig {
    /// Public address advertised to clients.
    pub ip: String,
    pub port: u16,
    pub ns_ip: String,
    pub ns_port: u16,
    /// Root of the persistence layout.
    pub base_dir: PathBuf,
}

/// TOML-file keys for the name server.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NsFileConfig {
    pub exec_enabled: Option<bool>,
}

/// TOML-file keys for a storage server.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SsFileConfig {
    pub base_dir: Option<PathBuf>,
}

/// Loads a TOML config file; no path means all defaults.
pub fn load<T: DeserializeOwned + Default>(path: Option<&Path>) -> io::Result<T> {
    match path {
        None => Ok(T::default()),
        Some(path) => {
            let text = std::fs::read_to_string(path)?;
            toml::from_str(&text).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
        }
    }
}

/// clap value parser enforcing the service port range (1024, 65535].
pub fn port_in_range(s: &str) -> Result<u16, String> {
    let port: u16 = s.parse().map_err(|_| format!("`{s}` is not a valid port number"))?;
    if port <= 1024 {
        return Err("port must be between 1025 and 65535".to_owned());
    }
    Ok(port)
}

impl SsConfig {
    /// Default base directory for a server bound to `port`.
    pub fn default_base_dir(port: u16) -> PathBuf {
        PathBuf::from(format!("data/ss_{port}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_range_is_enforced() {
        assert!(port_in_range("1024").is_err());
        assert!(port_in_range("0").is_err());
        assert!(port_in_range("notaport").is_err());
        assert_eq!(port_in_range("1025"), Ok(1025));
        assert_eq!(port_in_range("65535"), Ok(65535));
    }

    #[test]
    fn toml_overlay_parses() {
        let parsed: NsFileConfig = toml::from_str("exec_enabled = false").unwrap();
        assert_eq!(parsed.exec_enabled, Some(false));
        let parsed: SsFileConfig = toml::from_str("base_dir = \"/srv/docfs\"").unwrap();
        assert_eq!(parsed.base_dir, Some(PathBuf::from("/srv/docfs")));
    }
}
