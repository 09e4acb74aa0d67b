//! Result server address supplied to the sender before it connects.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Where the collector listens
///
/// ```toml
/// host = "192.168.56.1"
/// port = 2042
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResultServerConfig {
    pub host: String,
    pub port: u16,
}

impl ResultServerConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        contents.parse()
    }

    /// `host:port` as accepted by `TcpStream::connect`
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "host",
                message: "must not be empty".into(),
            });
        }
        if self.port == 0 {
            return Err(ConfigError::Invalid {
                field: "port",
                message: "must be non-zero".into(),
            });
        }
        Ok(())
    }
}

impl FromStr for ResultServerConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: ResultServerConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse() {
        let config: ResultServerConfig = "host = \"10.0.0.1\"\nport = 2042\n".parse().unwrap();
        assert_eq!(config, ResultServerConfig::new("10.0.0.1", 2042));
        assert_eq!(config.addr(), "10.0.0.1:2042");
    }

    #[test]
    fn test_validation() {
        let err = "host = \"\"\nport = 2042".parse::<ResultServerConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "host", .. }));

        let err = "host = \"a\"\nport = 0".parse::<ResultServerConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "port", .. }));

        let err = "host = 1".parse::<ResultServerConfig>().unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("analysis.toml");
        fs::write(&path, "host = \"127.0.0.1\"\nport = 9000\n").unwrap();
        assert_eq!(
            ResultServerConfig::from_file(&path).unwrap().port,
            9000
        );

        let err = ResultServerConfig::from_file(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
