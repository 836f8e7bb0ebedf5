use crate::file_error;
use crate::family::FamilyName;

use anyhow::{bail, Result};
use log::info;
use serde::Deserialize;
use serde_with::{serde_as, DurationMilliSeconds};
use std::collections::HashSet;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub inverters: Vec<Inverter>,

    #[serde(default = "Config::default_loglevel")]
    pub loglevel: String,
}

// Inverter {{{
#[serde_as]
#[derive(Clone, Debug, Deserialize)]
pub struct Inverter {
    #[serde(default = "Config::default_enabled")]
    pub enabled: bool,

    pub host: String,
    #[serde(default = "Config::default_port")]
    pub port: u16,

    /// Defaults to the family's own address when absent.
    pub comm_addr: Option<u8>,

    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "timeout_ms", default = "Config::default_timeout")]
    pub timeout: Duration,

    #[serde(default = "Config::default_retries")]
    pub retries: u32,

    #[serde(default)]
    pub family: FamilyName,
}

impl Inverter {
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn comm_addr(&self) -> Option<u8> {
        self.comm_addr
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn family(&self) -> FamilyName {
        self.family
    }
} // }}}

impl Config {
    pub fn new(file: String) -> Result<Self> {
        let content = std::fs::read_to_string(&file)
            .map_err(|err| file_error!("error reading {}: {}", file, err))?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn enabled_inverters(&self) -> impl Iterator<Item = &Inverter> {
        self.inverters.iter().filter(|i| i.enabled())
    }

    pub fn loglevel(&self) -> &str {
        &self.loglevel
    }

    pub fn log_summary(&self) {
        info!(
            "  Inverters: {} configured, {} enabled",
            self.inverters.len(),
            self.enabled_inverters().count()
        );
        for (i, inv) in self.inverters.iter().enumerate() {
            info!("    Inverter[{}]:", i);
            info!("      Enabled: {}", inv.enabled);
            info!("      Host: {}:{}", inv.host, inv.port);
            info!("      Family: {:?}", inv.family);
            match inv.comm_addr {
                Some(addr) => info!("      Comm Addr: {:#04x}", addr),
                None => info!("      Comm Addr: family default"),
            }
            info!("      Timeout: {}ms", inv.timeout.as_millis());
            info!("      Retries: {}", inv.retries);
        }
        info!("  Log Level: {}", self.loglevel);
    }

    fn validate(&self) -> Result<()> {
        let mut hosts = HashSet::new();
        for (i, inverter) in self.inverters.iter().enumerate() {
            if inverter.host.is_empty() {
                bail!("inverter[{}].host cannot be empty", i);
            }
            if inverter.port == 0 {
                bail!("inverter[{}].port must be between 1 and 65535", i);
            }
            if inverter.retries == 0 {
                bail!("inverter[{}].retries must be at least 1", i);
            }
            if inverter.timeout.is_zero() {
                bail!("inverter[{}].timeout_ms must be greater than 0", i);
            }
            if !hosts.insert((inverter.host.as_str(), inverter.port)) {
                bail!(
                    "inverter[{}] duplicates {}:{}",
                    i,
                    inverter.host,
                    inverter.port
                );
            }
        }
        Ok(())
    }

    fn default_enabled() -> bool {
        true
    }

    fn default_port() -> u16 {
        8899
    }

    fn default_timeout() -> Duration {
        Duration::from_millis(1000)
    }

    fn default_retries() -> u32 {
        3
    }

    fn default_loglevel() -> String {
        "info".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::from_yaml("inverters:\n  - host: 10.0.0.5\n").unwrap();
        assert_eq!(config.loglevel(), "info");

        let inverter = &config.inverters[0];
        assert!(inverter.enabled());
        assert_eq!(inverter.port(), 8899);
        assert_eq!(inverter.comm_addr(), None);
        assert_eq!(inverter.timeout(), Duration::from_secs(1));
        assert_eq!(inverter.retries(), 3);
        assert_eq!(inverter.family(), FamilyName::Dt);
    }

    #[test]
    fn rejects_zero_retries() {
        let err = Config::from_yaml("inverters:\n  - host: a\n    retries: 0\n").unwrap_err();
        assert!(err.to_string().contains("retries"));
    }
}
