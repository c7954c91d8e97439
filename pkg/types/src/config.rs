use serde::{Deserialize, Serialize};

/// Host configuration file (YAML).
///
/// Example `host.yaml`:
/// ```yaml
/// port: 7480
/// data-dir: /var/lib/tablock/data
/// peers: 2
/// lease-ttl-ms: 30000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostConfigFile {
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default, alias = "data-dir")]
    pub data_dir: Option<String>,
    /// Number of in-host peers opened at startup
    #[serde(default)]
    pub peers: Option<usize>,
    #[serde(default, alias = "lease-ttl-ms")]
    pub lease_ttl_ms: Option<u64>,
}

/// Peer configuration file (YAML).
///
/// Example `peer.yaml`:
/// ```yaml
/// host: http://127.0.0.1:7480
/// lease-ttl-ms: 30000
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PeerConfigFile {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default, alias = "lease-ttl-ms")]
    pub lease_ttl_ms: Option<u64>,
}

/// Load a YAML config file, returning the default if the file doesn't exist.
pub fn load_config_file<T: serde::de::DeserializeOwned + Default>(path: &str) -> anyhow::Result<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok(T::default());
        }
        Err(e) => return Err(e.into()),
    };
    let config: T = serde_yaml::from_str(&content)?;
    Ok(config)
}
