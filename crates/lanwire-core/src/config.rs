// SPDX-License-Identifier: AGPL-3.0
// Lanwire - Engine configuration

use crate::types::AppSettings;
use std::path::{Path, PathBuf};

/// Runtime configuration for the transfer engine.
///
/// Mirrors the persisted `AppSettings` but carries only the fields the
/// protocol core consumes; frontend-only settings (theme,
/// notifications) stay in the settings store.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub port: u16,
    pub device_name: String,
    pub download_dir: PathBuf,
    pub trusted_hosts: Vec<String>,
    pub receive_only: bool,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub approval_timeout_secs: Option<u64>,
}

impl EngineConfig {
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from(&AppSettings::default())
    }
}

impl From<&AppSettings> for EngineConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            port: settings.port,
            device_name: settings.device_name.clone(),
            download_dir: settings.download_dir.clone(),
            trusted_hosts: settings.trusted_hosts.clone(),
            receive_only: settings.receive_only,
            max_retries: settings.max_retries,
            retry_delay_ms: settings.retry_delay_ms,
            approval_timeout_secs: settings.approval_timeout_secs,
        }
    }
}

#[derive(Default)]
pub struct EngineConfigBuilder {
    port: Option<u16>,
    device_name: Option<String>,
    download_dir: Option<PathBuf>,
    trusted_hosts: Vec<String>,
    receive_only: bool,
    max_retries: Option<u32>,
    retry_delay_ms: Option<u64>,
    approval_timeout_secs: Option<u64>,
}

impl EngineConfigBuilder {
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = Some(name.into());
        self
    }

    pub fn download_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.download_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn trusted_hosts(mut self, hosts: Vec<String>) -> Self {
        self.trusted_hosts = hosts;
        self
    }

    pub fn receive_only(mut self, receive_only: bool) -> Self {
        self.receive_only = receive_only;
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay_ms(mut self, delay_ms: u64) -> Self {
        self.retry_delay_ms = Some(delay_ms);
        self
    }

    pub fn approval_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.approval_timeout_secs = secs;
        self
    }

    pub fn build(self) -> EngineConfig {
        let defaults = AppSettings::default();
        EngineConfig {
            port: self.port.unwrap_or(defaults.port),
            device_name: self.device_name.unwrap_or(defaults.device_name),
            download_dir: self.download_dir.unwrap_or(defaults.download_dir),
            trusted_hosts: self.trusted_hosts,
            receive_only: self.receive_only,
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(defaults.retry_delay_ms),
            approval_timeout_secs: self.approval_timeout_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_fills_defaults() {
        let config = EngineConfig::builder()
            .port(6000)
            .device_name("test-box")
            .build();
        assert_eq!(config.port, 6000);
        assert_eq!(config.device_name, "test-box");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay_ms, 1000);
        assert!(config.trusted_hosts.is_empty());
    }

    #[test]
    fn config_from_settings() {
        let mut settings = AppSettings::default();
        settings.port = 7000;
        settings.trusted_hosts.push("10.0.0.2".into());
        let config = EngineConfig::from(&settings);
        assert_eq!(config.port, 7000);
        assert_eq!(config.trusted_hosts, vec!["10.0.0.2".to_string()]);
    }
}
