//! Runtime configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via STATEWIRE_CONFIG or --config)
//! 3. Environment variables
//! 4. Command-line flags (applied by the binaries)

use crate::engine::EngineSettings;
use serde::{Deserialize, Serialize};
use statewire_core::{MachineDefinition, MachineDefinitionRaw};
use statewire_protocol::{DEFAULT_LISTEN_PORT, DEFAULT_PEER_PORT};
use std::path::{Path, PathBuf};

/// Runtime configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Machine configuration.
    pub machine: MachineConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("STATEWIRE_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    /// Loads configuration from an explicit file (if any), then applies
    /// environment variable overrides.
    pub fn load_from(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.machine.apply_env_overrides();
    }

    /// Checks everything the generic runner needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.network.validate()?;
        if self.machine.path.is_none() {
            return Err(ConfigError::ValidationError(
                "machine definition path not set".to_string(),
            ));
        }
        Ok(())
    }

    /// Builds engine settings. `default_name` is announced in `READY` unless
    /// a name was configured.
    pub fn engine_settings(&self, default_name: &str) -> EngineSettings {
        EngineSettings {
            name: self
                .machine
                .name
                .clone()
                .unwrap_or_else(|| default_name.to_string()),
            bind_host: self.network.bind_host.clone(),
            listen_port: self.network.listen_port,
            peer_host: self.network.peer_host.clone(),
            peer_port: self.network.peer_port,
        }
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Local address to bind the socket to.
    pub bind_host: String,
    /// Local port inbound messages arrive on (0 = ephemeral).
    pub listen_port: u16,
    /// Observer host.
    pub peer_host: String,
    /// Observer port status messages are sent to.
    pub peer_port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_host: "127.0.0.1".to_string(),
            listen_port: DEFAULT_LISTEN_PORT,
            peer_host: "127.0.0.1".to_string(),
            peer_port: DEFAULT_PEER_PORT,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("STATEWIRE_BIND_HOST") {
            self.bind_host = host;
        }

        if let Ok(port) = std::env::var("STATEWIRE_LISTEN_PORT") {
            if let Ok(parsed) = port.parse() {
                self.listen_port = parsed;
            }
        }

        if let Ok(host) = std::env::var("STATEWIRE_PEER_HOST") {
            self.peer_host = host;
        }

        if let Ok(port) = std::env::var("STATEWIRE_PEER_PORT") {
            if let Ok(parsed) = port.parse() {
                self.peer_port = parsed;
            }
        }
    }

    /// Validates network configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bind_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "bind_host must not be empty".to_string(),
            ));
        }
        if self.peer_host.is_empty() {
            return Err(ConfigError::ValidationError(
                "peer_host must not be empty".to_string(),
            ));
        }
        if self.peer_port == 0 {
            return Err(ConfigError::ValidationError(
                "peer_port must not be 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Machine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MachineConfig {
    /// Path to the machine definition (JSON or YAML).
    pub path: Option<PathBuf>,
    /// Name announced in `READY`; defaults to the definition's name.
    pub name: Option<String>,
}

impl MachineConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("STATEWIRE_MACHINE") {
            self.path = Some(PathBuf::from(path));
        }
        if let Ok(name) = std::env::var("STATEWIRE_NAME") {
            if !name.is_empty() {
                self.name = Some(name);
            }
        }
    }

    /// Reads and validates the machine definition at `path`.
    ///
    /// Files ending in `.json` are parsed as JSON, anything else as YAML.
    pub fn load_definition(&self) -> Result<MachineDefinition, ConfigError> {
        let path = self.path.as_deref().ok_or_else(|| {
            ConfigError::ValidationError("machine definition path not set".to_string())
        })?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;

        let is_json = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let definition = if is_json {
            MachineDefinition::from_json_str(&content)
        } else {
            let raw: MachineDefinitionRaw = serde_yaml::from_str(&content)
                .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
            MachineDefinition::from_raw(raw)
        };
        definition.map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.report()))
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.network.bind_host, "127.0.0.1");
        assert_eq!(config.network.listen_port, 9001);
        assert_eq!(config.network.peer_port, 9000);
        assert!(config.machine.path.is_none());
    }

    #[test]
    fn test_validate() {
        let mut config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
        assert!(config.network.validate().is_ok());

        config.machine.path = Some(PathBuf::from("blink.yaml"));
        assert!(config.validate().is_ok());

        config.network.peer_port = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("peer_port"));
    }

    #[test]
    fn test_partial_yaml_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("statewire.yaml");
        std::fs::write(
            &path,
            "network:\n  peer_port: 9100\nmachine:\n  path: machines/blink.yaml\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.network.peer_port, 9100);
        assert_eq!(config.network.listen_port, 9001);
        assert_eq!(
            config.machine.path.as_deref(),
            Some(Path::new("machines/blink.yaml"))
        );
    }

    #[test]
    fn test_missing_and_invalid_files() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.yaml");
        assert!(matches!(
            Config::from_file(&missing),
            Err(ConfigError::IoError(..))
        ));

        let broken = dir.path().join("broken.yaml");
        std::fs::write(&broken, "network: [unclosed").unwrap();
        assert!(matches!(
            Config::from_file(&broken),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("saved.yaml");
        let mut config = Config::default();
        config.machine.name = Some("blink".to_string());
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.machine.name.as_deref(), Some("blink"));
        assert_eq!(loaded.network.peer_host, config.network.peer_host);
    }

    #[test]
    fn test_load_definition_by_extension() {
        let dir = TempDir::new().unwrap();

        let yaml = dir.path().join("blink.yaml");
        std::fs::write(
            &yaml,
            "name: blink\ninitial: Idle\nstates:\n  - name: Idle\n  - name: Blinking\n    action: toggle_led\ntransitions:\n  - from: Idle\n    to: Blinking\n    event: start\n  - from: Blinking\n    to: Blinking\n    delay_ms: 500\n",
        )
        .unwrap();
        let machine = MachineConfig {
            path: Some(yaml),
            name: None,
        };
        let definition = machine.load_definition().unwrap();
        assert_eq!(definition.name, "blink");
        assert_eq!(definition.transitions().len(), 2);

        let json = dir.path().join("oneshot.JSON");
        std::fs::write(
            &json,
            r#"{"name": "oneshot", "initial": "A", "states": [{"name": "A"}]}"#,
        )
        .unwrap();
        let machine = MachineConfig {
            path: Some(json),
            name: None,
        };
        assert_eq!(machine.load_definition().unwrap().name, "oneshot");
    }

    #[test]
    fn test_load_definition_errors() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MachineConfig::default().load_definition(),
            Err(ConfigError::ValidationError(_))
        ));

        let dangling = dir.path().join("dangling.json");
        std::fs::write(
            &dangling,
            r#"{"name": "x", "states": [{"name": "A"}], "transitions": [{"from": "A", "to": "B"}]}"#,
        )
        .unwrap();
        let machine = MachineConfig {
            path: Some(dangling),
            name: None,
        };
        assert!(matches!(
            machine.load_definition(),
            Err(ConfigError::ParseError(..))
        ));

        let truncated = dir.path().join("truncated.json");
        std::fs::write(&truncated, r#"{"name": "x", "states": ["#).unwrap();
        let machine = MachineConfig {
            path: Some(truncated.clone()),
            name: None,
        };
        match machine.load_definition() {
            Err(ConfigError::ParseError(path, _)) => assert_eq!(path, truncated),
            other => panic!("expected parse error, got {:?}", other.map(|d| d.name)),
        }
    }

    #[test]
    fn test_engine_settings() {
        let mut config = Config::default();
        let settings = config.engine_settings("blink");
        assert_eq!(settings.name, "blink");
        assert_eq!(settings.peer_port, 9000);

        config.machine.name = Some("traffic".to_string());
        assert_eq!(config.engine_settings("blink").name, "traffic");
    }
}
