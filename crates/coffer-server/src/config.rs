//! Server configuration loaded from environment variables.
//!
//! All settings have sensible defaults so the server can start with zero
//! configuration for local development. The listening port can also come
//! from a `port.info` file holding nothing but the port number, which is
//! how existing deployments configure it.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use coffer_shared::constants::{CIPHER_BLOCK_SIZE, DEFAULT_PORT, MAX_CONTENT_SIZE};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind.
    /// Env: `LISTEN_HOST`
    /// Default: `0.0.0.0`
    pub listen_host: IpAddr,

    /// TCP port. `LISTEN_PORT` wins over the port file.
    /// Env: `LISTEN_PORT`, else the contents of `PORT_INFO_PATH`
    /// Default: `1234`
    pub port: u16,

    /// Legacy port file.
    /// Env: `PORT_INFO_PATH`
    /// Default: `port.info`
    pub port_info_path: PathBuf,

    /// Directory holding decrypted backup blobs.
    /// Env: `STORAGE_DIR`
    /// Default: `./backups`
    pub storage_dir: PathBuf,

    /// SQLite registry file.
    /// Env: `DATABASE_PATH`
    /// Default: `./server.db`
    pub database_path: PathBuf,

    /// How long a session waits for each client message.
    /// Env: `READ_TIMEOUT_SECS`
    /// Default: `60`
    pub read_timeout: Duration,

    /// Uploads accepted per session before the server gives up.
    /// Env: `MAX_UPLOAD_ATTEMPTS`
    /// Default: `8`
    pub max_upload_attempts: u32,

    /// Maximum decrypted file size in bytes.
    /// Env: `MAX_FILE_SIZE`
    /// Default: 64 MiB
    pub max_file_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            port_info_path: PathBuf::from("port.info"),
            storage_dir: PathBuf::from("./backups"),
            database_path: PathBuf::from("./server.db"),
            read_timeout: Duration::from_secs(60),
            max_upload_attempts: 8,
            max_file_size: MAX_CONTENT_SIZE,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(host) = var("LISTEN_HOST") {
            match host.parse::<IpAddr>() {
                Ok(parsed) => config.listen_host = parsed,
                Err(_) => tracing::warn!(value = %host, "Invalid LISTEN_HOST, using default"),
            }
        }

        if let Some(path) = var("PORT_INFO_PATH") {
            config.port_info_path = PathBuf::from(path);
        }

        match var("LISTEN_PORT") {
            Some(port) => match parse_port(&port) {
                Ok(parsed) => config.port = parsed,
                Err(e) => tracing::warn!(error = %e, "Invalid LISTEN_PORT, using default"),
            },
            None => match read_port_file(&config.port_info_path) {
                Ok(Some(parsed)) => config.port = parsed,
                Ok(None) => tracing::debug!(
                    path = %config.port_info_path.display(),
                    "No port file, using default port"
                ),
                Err(e) => tracing::warn!(
                    path = %config.port_info_path.display(),
                    error = %e,
                    "Invalid port file, using default port"
                ),
            },
        }

        if let Some(path) = var("STORAGE_DIR") {
            config.storage_dir = PathBuf::from(path);
        }

        if let Some(path) = var("DATABASE_PATH") {
            config.database_path = PathBuf::from(path);
        }

        if let Some(val) = var("READ_TIMEOUT_SECS") {
            match val.parse::<u64>() {
                Ok(secs) if secs > 0 => config.read_timeout = Duration::from_secs(secs),
                _ => tracing::warn!(value = %val, "Invalid READ_TIMEOUT_SECS, using default"),
            }
        }

        if let Some(val) = var("MAX_UPLOAD_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.max_upload_attempts = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_UPLOAD_ATTEMPTS, using default"),
            }
        }

        if let Some(val) = var("MAX_FILE_SIZE") {
            match val.parse::<usize>() {
                // the wire format reports sizes as u32
                Ok(n) if n <= u32::MAX as usize => config.max_file_size = n,
                _ => tracing::warn!(value = %val, "Invalid MAX_FILE_SIZE, using default"),
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }

    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.port)
    }

    /// Upload ciphertext cap: the plaintext cap plus one padding block.
    pub fn max_content_size(&self) -> usize {
        self.max_file_size.saturating_add(CIPHER_BLOCK_SIZE)
    }
}

fn parse_port(raw: &str) -> Result<u16, String> {
    match raw.trim().parse::<u16>() {
        Ok(0) => Err("port 0 is not allowed".to_string()),
        Ok(port) => Ok(port),
        Err(e) => Err(format!("{:?}: {}", raw.trim(), e)),
    }
}

/// `Ok(None)` when the file does not exist.
fn read_port_file(path: &Path) -> Result<Option<u16>, String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse_port(&contents).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_with(vars: &[(&str, &str)]) -> ServerConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.listen_addr(), ([0, 0, 0, 0], 1234).into());
        assert_eq!(config.read_timeout, Duration::from_secs(60));
        assert_eq!(config.max_upload_attempts, 8);
        assert_eq!(config.max_file_size, 64 * 1024 * 1024);
        assert_eq!(config.max_content_size(), 64 * 1024 * 1024 + 16);
    }

    #[test]
    fn test_env_overrides() {
        let config = config_with(&[
            ("LISTEN_HOST", "127.0.0.1"),
            ("LISTEN_PORT", "4000"),
            ("STORAGE_DIR", "/srv/backups"),
            ("DATABASE_PATH", "/srv/registry.db"),
            ("READ_TIMEOUT_SECS", "5"),
            ("MAX_UPLOAD_ATTEMPTS", "3"),
            ("MAX_FILE_SIZE", "1024"),
            ("PORT_INFO_PATH", "/nonexistent/port.info"),
        ]);
        assert_eq!(config.listen_addr(), ([127, 0, 0, 1], 4000).into());
        assert_eq!(config.storage_dir, PathBuf::from("/srv/backups"));
        assert_eq!(config.database_path, PathBuf::from("/srv/registry.db"));
        assert_eq!(config.read_timeout, Duration::from_secs(5));
        assert_eq!(config.max_upload_attempts, 3);
        assert_eq!(config.max_file_size, 1024);
        assert_eq!(config.max_content_size(), 1040);
    }

    #[test]
    fn test_file_size_above_default_is_honoured() {
        let config = config_with(&[
            ("MAX_FILE_SIZE", "134217728"),
            ("PORT_INFO_PATH", "/nonexistent/port.info"),
        ]);
        assert_eq!(config.max_file_size, 128 * 1024 * 1024);
        assert!(config.max_content_size() > MAX_CONTENT_SIZE);
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = config_with(&[
            ("LISTEN_HOST", "not-an-ip"),
            ("LISTEN_PORT", "99999"),
            ("READ_TIMEOUT_SECS", "0"),
            ("MAX_UPLOAD_ATTEMPTS", "many"),
            ("PORT_INFO_PATH", "/nonexistent/port.info"),
        ]);
        let defaults = ServerConfig::default();
        assert_eq!(config.listen_host, defaults.listen_host);
        assert_eq!(config.port, defaults.port);
        assert_eq!(config.read_timeout, defaults.read_timeout);
        assert_eq!(config.max_upload_attempts, defaults.max_upload_attempts);
    }

    #[test]
    fn test_port_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.info");
        std::fs::write(&path, "8765\n").unwrap();
        let path_str = path.to_str().unwrap();

        let config = config_with(&[("PORT_INFO_PATH", path_str)]);
        assert_eq!(config.port, 8765);

        // LISTEN_PORT takes precedence over the file
        let config = config_with(&[("PORT_INFO_PATH", path_str), ("LISTEN_PORT", "4000")]);
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_read_port_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("port.info");

        assert_eq!(read_port_file(&path).unwrap(), None);

        std::fs::write(&path, "garbage").unwrap();
        assert!(read_port_file(&path).is_err());

        std::fs::write(&path, " 2020 ").unwrap();
        assert_eq!(read_port_file(&path).unwrap(), Some(2020));
    }

    #[test]
    fn test_parse_port_rejects_zero() {
        assert!(parse_port("0").is_err());
        assert_eq!(parse_port("1234").unwrap(), 1234);
    }
}
