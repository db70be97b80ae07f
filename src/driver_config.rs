//! The driver configuration file: where the tennicam server runs and the
//! durable copy of the transform applied to its observations.
//!
//! ```toml
//! [transform]
//! translation = [0.0, 1.0, 2.0]
//! rotation = [0.0, 0.1, 0.2]
//!
//! [server]
//! hostname = "127.0.0.1"
//! port = 7660
//! ```

use crate::transform::Transform;

use serde::{Deserialize, Serialize};
use std::{
    env, fmt, fs, io,
    path::{Path, PathBuf},
};

/// Environment variable overriding the default configuration file.
pub const CONFIG_ENV: &str = "TENNICAM_CLIENT_CONFIG";

/// Configuration file used when [`CONFIG_ENV`] is not set.
pub const DEFAULT_CONFIG_FILE: &str = "config/config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// `*` stands for any interface.
    pub hostname: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            hostname: "127.0.0.1".to_string(),
            port: 7660,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub server: ServerConfig,
}

/// Errors raised while reading or writing the configuration file.
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file does not exist.
    NotFound(PathBuf),

    /// Returned when io fails when reading or writing the file.
    Io(io::Error),

    /// The file content is not a valid configuration.
    Toml(toml::de::Error),

    /// The configuration could not be serialized.
    TomlSer(toml::ser::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::NotFound(path) => {
                write!(f, "configuration file not found: {}", path.display())
            }
            ConfigError::Io(error) => write!(f, "io error: {error}"),
            ConfigError::Toml(error) => write!(f, "invalid configuration: {error}"),
            ConfigError::TomlSer(error) => write!(f, "failed to serialize configuration: {error}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

impl From<toml::ser::Error> for ConfigError {
    fn from(value: toml::ser::Error) -> Self {
        Self::TomlSer(value)
    }
}

/// The configuration file to use when none is given on the command line.
pub fn default_config_file() -> PathBuf {
    env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE))
}

fn check_exists(path: &Path) -> Result<(), ConfigError> {
    if path.exists() {
        Ok(())
    } else {
        Err(ConfigError::NotFound(path.to_path_buf()))
    }
}

impl DriverConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        check_exists(path)?;
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    /// The address of the tennicam server, `hostname:port`.
    pub fn url(&self) -> String {
        let hostname = match self.server.hostname.as_str() {
            "*" => "0.0.0.0",
            hostname => hostname,
        };
        format!("{}:{}", hostname, self.server.port)
    }
}

/// Replaces the transform saved in the configuration file at `path`, leaving
/// the rest of the file as it was.
pub fn update_transform_config_file(
    path: impl AsRef<Path>,
    transform: &Transform,
) -> Result<(), ConfigError> {
    let path = path.as_ref();
    let mut config = DriverConfig::from_file(path)?;
    config.transform = *transform;
    config.to_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
[transform]
translation = [0.0, 1.0, 2.0]
rotation = [0.0, 0.1, 0.2]

[server]
hostname = "*"
port = 7661
"#;

    #[test]
    fn read_config() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), CONFIG).unwrap();
        let config = DriverConfig::from_file(file.path()).unwrap();
        assert_eq!(
            config.transform,
            Transform::new([0.0, 1.0, 2.0], [0.0, 0.1, 0.2])
        );
        assert_eq!(config.server.port, 7661);
        assert_eq!(config.url(), "0.0.0.0:7661");
    }

    #[test]
    fn missing_sections_use_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "[server]\nhostname = \"localhost\"\nport = 1\n").unwrap();
        let config = DriverConfig::from_file(file.path()).unwrap();
        assert_eq!(config.transform, Transform::default());
        assert_eq!(config.url(), "localhost:1");
    }

    #[test]
    fn missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        assert!(matches!(
            DriverConfig::from_file(&path),
            Err(ConfigError::NotFound(p)) if p == path
        ));
    }

    #[test]
    fn invalid_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), "[transform]\ntranslation = \"nope\"\n").unwrap();
        assert!(matches!(
            DriverConfig::from_file(file.path()),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn update_transform_keeps_server() {
        let file = tempfile::NamedTempFile::new().unwrap();
        fs::write(file.path(), CONFIG).unwrap();
        let transform = Transform::new([3.0, 4.0, 5.0], [0.5, 0.0, -0.5]);
        update_transform_config_file(file.path(), &transform).unwrap();

        let config = DriverConfig::from_file(file.path()).unwrap();
        assert_eq!(config.transform, transform);
        assert_eq!(config.server.hostname, "*");
        assert_eq!(config.server.port, 7661);
    }

    #[test]
    fn shipped_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_FILE);
        let config = DriverConfig::from_file(path).unwrap();
        assert_eq!(config.url(), "127.0.0.1:7660");
    }
}
