//! Run files for the command-line drivers.
//!
//! A run file is YAML with a `network` and a `protocol` section:
//!
//! ```yaml
//! network:
//!   n: 1024
//!   a: 0.10
//!   Kr: 0.050
//!   Ki: 0.046
//!   K0: 0.0
//!   w0: 0.40
//!   synmodrate: 0.005
//!   preserveParameter: 0.5
//! protocol:
//!   spacing: 20
//!   patternSize: 20
//!   stutter: 2
//!   sequenceLength: 10
//! ```
//!
//! The keys shown are required; the inhibition constants, connection
//! probability, trial counts and noise take their defaults when absent.
//! Unknown keys are rejected so that a misspelt parameter never silently
//! falls back to a default.

use crate::core::NetError;
use crate::training::ProtocolConfig;
use crate::NetConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Error loading a run file.
#[derive(Debug)]
pub enum ConfigError {
    /// File could not be read
    Io(std::io::Error),
    /// File is not valid YAML for a run
    Parse(serde_yaml::Error),
    /// Parameters parsed but cannot be run
    Invalid(NetError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Cannot read run file: {}", e),
            ConfigError::Parse(e) => write!(f, "Cannot parse run file: {}", e),
            ConfigError::Invalid(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(e) => Some(e),
            ConfigError::Parse(e) => Some(e),
            ConfigError::Invalid(e) => Some(e),
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(e: serde_yaml::Error) -> Self {
        ConfigError::Parse(e)
    }
}

impl From<NetError> for ConfigError {
    fn from(e: NetError) -> Self {
        ConfigError::Invalid(e)
    }
}

/// Everything a driver needs to set up a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub network: NetConfig,
    pub protocol: ProtocolConfig,
}

impl RunConfig {
    /// Parse and validate a run file's contents.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a run file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    /// Read a run file for a driver that only needs the network section.
    ///
    /// The protocol section is parsed but not checked against the network.
    pub fn load_network(path: &Path) -> Result<NetConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        let config: RunConfig = serde_yaml::from_str(&text)?;
        config.network.validate()?;
        Ok(config.network)
    }

    /// Validate the network parameters and the protocol against them.
    pub fn validate(&self) -> Result<(), NetError> {
        self.network.validate()?;
        self.protocol.validate(self.network.num_neurons)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETWORK: &str = "network:\n  n: 200\n  a: 0.1\n  w0: 0.4\n  synmodrate: 0.01\n  preserveParameter: 0.5\n";
    const PROTOCOL: &str = "protocol:\n  spacing: 5\n  patternSize: 20\n  stutter: 1\n  sequenceLength: 20\n";

    #[test]
    fn test_optional_keys_take_defaults() {
        let config = RunConfig::from_yaml_str(&format!("{}{}", NETWORK, PROTOCOL)).unwrap();
        let defaults = NetConfig::default();
        assert_eq!(config.network.k0, defaults.k0);
        assert_eq!(config.network.ki, defaults.ki);
        assert_eq!(config.network.kr, defaults.kr);
        assert_eq!(config.network.connection_probability, 0.1);
        assert!(!config.network.is_competitive);
        assert_eq!(config.protocol.training_trials, 120);
        assert_eq!(config.protocol.testing_trials, 10);
        assert_eq!(config.protocol.early_trial_to_save, 10);
        assert_eq!(config.protocol.p_external_off_noise, 0.0);
        assert_eq!(config.protocol.desired_activity_on_last_train, None);
    }

    #[test]
    fn test_truncated_file_rejected() {
        assert!(matches!(
            RunConfig::from_yaml_str("{}"),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            RunConfig::from_yaml_str(NETWORK),
            Err(ConfigError::Parse(_))
        ));

        for key in ["n", "a", "w0", "synmodrate", "preserveParameter"] {
            let network: String = NETWORK
                .lines()
                .filter(|line| !line.trim_start().starts_with(&format!("{}:", key)))
                .map(|line| format!("{}\n", line))
                .collect();
            let err = RunConfig::from_yaml_str(&format!("{}{}", network, PROTOCOL)).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "missing {key}");
        }
        for key in ["spacing", "patternSize", "stutter", "sequenceLength"] {
            let protocol: String = PROTOCOL
                .lines()
                .filter(|line| !line.trim_start().starts_with(&format!("{}:", key)))
                .map(|line| format!("{}\n", line))
                .collect();
            let err = RunConfig::from_yaml_str(&format!("{}{}", NETWORK, protocol)).unwrap_err();
            assert!(matches!(err, ConfigError::Parse(_)), "missing {key}");
        }
    }

    #[test]
    fn test_published_keys() {
        let text = "
network:
  n: 1024
  a: 0.10
  Kr: 0.050
  Ki: 0.046
  K0: 0.0
  w0: 0.40
  synmodrate: 0.005
  preserveParameter: 0.5
  isCompetitive: true
protocol:
  spacing: 20
  patternSize: 20
  stutter: 2
  sequenceLength: 10
  a_last_train: 0.2
";
        let config = RunConfig::from_yaml_str(text).unwrap();
        assert_eq!(config.network.num_neurons, 1024);
        assert_eq!(config.network.ki, 0.046);
        assert_eq!(config.network.k0, 0.0);
        assert_eq!(config.network.learning_rate, 0.005);
        assert!(config.network.is_competitive);
        assert_eq!(config.protocol.stutter, 2);
        assert_eq!(config.protocol.desired_activity_on_last_train, Some(0.2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let text = format!("{}{}", NETWORK.replace("a: 0.1", "a: 1.5"), PROTOCOL);
        let err = RunConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        // 19 * 5 + 20 = 115 neurons needed.
        let text = format!("{}{}", NETWORK.replace("n: 200", "n: 100"), PROTOCOL);
        let err = RunConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_overflowing_spacing_is_an_error() {
        let text = format!(
            "{}{}",
            NETWORK,
            PROTOCOL.replace("spacing: 5", "spacing: 9223372036854775807")
        );
        let err = RunConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(NetError::InvalidConfig(_))));
    }

    #[test]
    fn test_unknown_section_rejected() {
        let text = format!("{}{}netwrok:\n  n: 100\n", NETWORK, PROTOCOL);
        let err = RunConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_type_rejected() {
        let text = format!("{}{}", NETWORK.replace("n: 200", "n: many"), PROTOCOL);
        let err = RunConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_network_ignores_protocol_fit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        let network = NETWORK.replace("n: 200", "n: 10").replace("a: 0.1", "a: 0.2");
        fs::write(&path, format!("{}{}", network, PROTOCOL)).unwrap();

        assert!(RunConfig::load(&path).is_err());
        let network = RunConfig::load_network(&path).unwrap();
        assert_eq!(network.num_neurons, 10);
        assert_eq!(network.desired_activity, 0.2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = RunConfig::load(Path::new("/nonexistent/ca3net/run.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
