use lazy_static::lazy_static;
use log::info;
use serde::{Deserialize, Serialize};
use serde_yml;
use std::error::Error;
use std::fs;
use std::path::Path;
use std::sync::RwLock;
use thiserror::Error;

use crate::metering_zwave::node::NodeInfo;

fn mqtt_client_name_default() -> String { return "zwave2mqtt".to_string() }

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub ha_enabled: bool,
    #[serde(default="mqtt_client_name_default")]
    pub client_name: String,
}

fn node_supports_get_default() -> bool { true }
fn node_poll_interval_default() -> u64 { 60 }

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct MeterNodeConfig {
    pub name: String,
    pub node_id: u8,
    pub version: u8,                    // Negotiated Meter command class version
    #[serde(default="node_supports_get_default")]
    pub supports_get: bool,
    #[serde(default="node_poll_interval_default")]
    pub poll_interval: u64,             // Seconds between value requests, 0 disables polling
}

impl NodeInfo for MeterNodeConfig {
    fn node_id(&self) -> u8 {
        self.node_id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn negotiated_version(&self) -> u8 {
        self.version
    }

    fn supports_proactive_get(&self) -> bool {
        self.supports_get
    }
}

fn zwave_nodes_default() -> Vec<MeterNodeConfig> { return Vec::new() }

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ZWaveConfig {
    #[serde(default="zwave_nodes_default")]
    pub nodes: Vec<MeterNodeConfig>,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    pub mqtt: MqttConfig,
    #[serde(default)]
    pub zwave: ZWaveConfig,
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;

        for node in &config.zwave.nodes {
            if node.version == 0 {
                return Err(ConfigError::InvalidNode(node.name.clone(), "version must be 1 or higher"));
            }
        }

        Ok(config)
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unable to parse config file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Node {0}: {1}")]
    InvalidNode(String, &'static str),
}

pub struct ConfigHolder {
    pub config: Config,
}

pub enum ConfigBases {
    Mqtt(MqttConfig),
    ZWave(ZWaveConfig),
}

impl ConfigHolder {
    pub fn load() -> Self {
        /* Check for the two paths of the config file */
        let path = if Path::new("config/zw2m.yaml").exists() {
            "config/zw2m.yaml"
        } else {
            "zw2m.yaml"
        };

        match ConfigHolder::load_from(path) {
            Ok(c) => c,
            Err(e) => panic!("Unable to load the config on config/zw2m.yaml or zw2m.yaml: {e}"),
        }
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        let config = Config::from_yaml(&contents)?;
        info!("Config loaded from {path} with {} Z-Wave nodes", config.zwave.nodes.len());

        Ok(ConfigHolder { config })
    }

    pub fn get_copy(&self, base: &str) -> Result<ConfigBases, Box<dyn Error>> {
        match base {
            "mqtt" => { return Ok(ConfigBases::Mqtt(self.config.mqtt.clone())) },
            "zwave" => { return Ok(ConfigBases::ZWave(self.config.zwave.clone())) },
            _ => { Err("Type not known")? }
        }
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<ConfigHolder> = RwLock::new(ConfigHolder::load());
}

#[macro_export]
macro_rules! get_config_or_panic {
    ($base: expr, $pat: path) => {
        {
            let c = CONFIG.read().unwrap().get_copy($base).unwrap();
            if let $pat(a) = c {
                a
            } else {
                panic!(
                    "mismatch variant when cast to {}",
                    stringify!($pat));
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const EXAMPLE: &str = r#"
mqtt:
  host: localhost
  port: 1883
  user: zw
  pass: secret
  ha_enabled: true
zwave:
  nodes:
    - name: plug_kitchen
      node_id: 5
      version: 3
    - name: water_main
      node_id: 12
      version: 4
      supports_get: false
      poll_interval: 0
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = Config::from_yaml(EXAMPLE).unwrap();
        assert_eq!(config.mqtt.client_name, "zwave2mqtt");
        assert!(config.mqtt.ha_enabled);

        let nodes = &config.zwave.nodes;
        assert_eq!(nodes.len(), 2);
        assert!(nodes[0].supports_get);
        assert_eq!(nodes[0].poll_interval, 60);
        assert!(!nodes[1].supports_get);
        assert_eq!(nodes[1].poll_interval, 0);

        assert_eq!(nodes[1].node_id(), 12);
        assert_eq!(nodes[1].negotiated_version(), 4);
        assert!(!nodes[1].supports_proactive_get());
    }

    #[test]
    fn test_zwave_section_is_optional() {
        let config = Config::from_yaml("mqtt: { host: h, port: 1, user: u, pass: p, ha_enabled: false }").unwrap();
        assert!(config.zwave.nodes.is_empty());
    }

    #[test]
    fn test_version_zero_is_rejected() {
        let yaml = EXAMPLE.replace("version: 3", "version: 0");
        assert!(matches!(Config::from_yaml(&yaml), Err(ConfigError::InvalidNode(name, _)) if name == "plug_kitchen"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(EXAMPLE.as_bytes()).unwrap();

        let holder = ConfigHolder::load_from(file.path().to_str().unwrap()).unwrap();
        match holder.get_copy("zwave").unwrap() {
            ConfigBases::ZWave(z) => assert_eq!(z.nodes[0].name, "plug_kitchen"),
            _ => panic!("wrong config base"),
        }
        assert!(holder.get_copy("modbus").is_err());
        match holder.get_copy("mqtt").unwrap() {
            ConfigBases::Mqtt(m) => assert_eq!(m.port, 1883),
            _ => panic!("wrong config base"),
        }
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(ConfigHolder::load_from("/nonexistent/zw2m.yaml"), Err(ConfigError::Io(_))));
    }
}
