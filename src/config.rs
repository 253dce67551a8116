use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    #[serde(default = "default_ports")]
    pub ports: Vec<String>,

    #[serde(default)]
    pub actions: HashMap<String, MonitorConfigAction>,
}

impl MonitorConfig {
    pub fn from_str(config_text: &str) -> Result<MonitorConfig, String> {
        let config: MonitorConfig = serde_yaml::from_str(config_text).map_err(|err| {
            format!(
                "could not read config: contained invalid yaml values: {}",
                err
            )
        })?;
        if config.ports.is_empty() {
            return Result::Err("could not read config: no serial ports listed".to_string());
        }
        return Result::Ok(config);
    }

    /// Reads the config file, falling back to the defaults when it does not
    /// exist.
    pub fn load(config_filename: &str) -> Result<MonitorConfig, String> {
        match fs::read_to_string(config_filename) {
            Result::Ok(config_text) => MonitorConfig::from_str(&config_text),
            Result::Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("{} not found, using default config", config_filename);
                Result::Ok(MonitorConfig::default())
            }
            Result::Err(err) => Result::Err(format!(
                "failed to read file: {}: {}",
                config_filename, err
            )),
        }
    }

    pub fn has_port(&self, port: &str) -> bool {
        return self.ports.iter().any(|p| p == port);
    }
}

impl Default for MonitorConfig {
    fn default() -> MonitorConfig {
        return MonitorConfig {
            ports: default_ports(),
            actions: HashMap::new(),
        };
    }
}

fn default_ports() -> Vec<String> {
    return ["COM1", "COM2", "COM3", "COM4"]
        .iter()
        .map(|port| port.to_string())
        .collect();
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfigAction {
    /// Literal text written to the device, without JSON wrapping.
    pub command: String,
}
