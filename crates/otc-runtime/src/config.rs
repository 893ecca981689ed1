//! Runtime configuration, loaded once at process start from a YAML file.

use rust_decimal::Decimal;
use serde::Deserialize;

use otc_types::PersistenceError;

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub client_id: i32,
    pub account: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HedgeDefaults {
    pub timer_trigger: u32,
    pub delta_target: Decimal,
    pub delta_range: Decimal,
}

impl Default for HedgeDefaults {
    fn default() -> Self {
        Self {
            timer_trigger: 5,
            delta_target: Decimal::ZERO,
            delta_range: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfig {
    pub gateway: GatewayConfig,
    #[serde(default = "default_timer_period_secs")]
    pub timer_period_secs: u64,
    pub persistence_dir: String,
    #[serde(default)]
    pub hedge_defaults: HedgeDefaults,
}

fn default_timer_period_secs() -> u64 {
    1
}

impl RuntimeConfig {
    pub fn load(path: &str) -> Result<Self, PersistenceError> {
        let contents = std::fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_string(),
            source,
        })?;
        Ok(serde_yaml::from_str(&contents)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let yaml = r#"
gateway:
  host: "127.0.0.1"
  port: 7497
  client_id: 1
  account: "DU12345"
persistence_dir: "./data"
"#;
        let config: RuntimeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.gateway.port, 7497);
        assert_eq!(config.timer_period_secs, 1);
        assert_eq!(config.hedge_defaults.timer_trigger, 5);
    }
}
