use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::services::activator::ActivatorSettings;
use crate::services::registry::DiscoveryFilter;
use crate::services::tracker::TrackerSettings;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub monitor: MonitorConfig,
    pub discovery: DiscoveryConfig,
    pub activation: ActivationConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// compact | json
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub poll_interval_ms: u64,
    pub enumeration_timeout_ms: u64,
    pub tick_timeout_ms: u64,
    pub stale_after_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            enumeration_timeout_ms: 2000,
            tick_timeout_ms: 10_000,
            stale_after_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// pid, отслеживаемые независимо от имени
    pub track_pids: Vec<u32>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            include: vec!["pol.exe".to_string(), "ffxi*".to_string(), "windower*".to_string()],
            exclude: Vec::new(),
            track_pids: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub timeout_ms: u64,
    pub max_attempts: u32,
    pub backoff_ms: u64,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2000,
            max_attempts: 3,
            backoff_ms: 50,
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        let figment = Figment::new()
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("PROCSENTRY_").split("__"));

        Self::from_figment(figment)
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(toml)))
    }

    fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "json" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Интервал меньше минимального не ошибка: трекер поднимет его сам
        if self.monitor.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms должно быть больше 0");
        }
        if self.monitor.enumeration_timeout_ms == 0 {
            anyhow::bail!("enumeration_timeout_ms должно быть больше 0");
        }
        if self.monitor.tick_timeout_ms < self.monitor.enumeration_timeout_ms {
            anyhow::bail!("tick_timeout_ms не может быть меньше enumeration_timeout_ms");
        }
        if self.monitor.stale_after_ms < self.monitor.poll_interval_ms {
            anyhow::bail!("stale_after_ms не может быть меньше poll_interval_ms");
        }

        for pattern in self.discovery.include.iter().chain(&self.discovery.exclude) {
            if pattern.trim().is_empty() {
                anyhow::bail!("Пустой паттерн имени процесса");
            }
            if pattern.matches('*').count() > 1 {
                anyhow::bail!("Паттерн '{}' содержит больше одной '*'", pattern);
            }
        }
        if self.discovery.track_pids.contains(&0) {
            anyhow::bail!("pid 0 нельзя отслеживать");
        }

        if !(1..=10).contains(&self.activation.max_attempts) {
            anyhow::bail!("max_attempts должно быть от 1 до 10");
        }
        if self.activation.timeout_ms == 0 {
            anyhow::bail!("activation.timeout_ms должно быть больше 0");
        }
        if self.activation.backoff_ms > 10_000 {
            anyhow::bail!("backoff_ms не может превышать 10000");
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_millis(self.activation.timeout_ms)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            poll_interval: self.poll_interval(),
            enumeration_timeout: Duration::from_millis(self.monitor.enumeration_timeout_ms),
            tick_timeout: Duration::from_millis(self.monitor.tick_timeout_ms),
            stale_after: Duration::from_millis(self.monitor.stale_after_ms),
        }
    }

    pub fn activator_settings(&self) -> ActivatorSettings {
        ActivatorSettings {
            max_attempts: self.activation.max_attempts,
            backoff: Duration::from_millis(self.activation.backoff_ms),
        }
    }

    pub fn discovery_filter(&self) -> DiscoveryFilter {
        DiscoveryFilter::new(&self.discovery.include, &self.discovery.exclude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validation() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.discovery_filter().matches("ffxi-boot.exe"));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            [monitor]
            poll_interval_ms = 5000

            [discovery]
            include = ["game.exe"]
            exclude = ["crash*"]
            "#,
        )
        .unwrap();

        assert_eq!(config.poll_interval(), Duration::from_secs(5));
        assert_eq!(config.activation.max_attempts, 3);
        assert_eq!(config.logging.format, "compact");
        let filter = config.discovery_filter();
        assert!(filter.matches("GAME.exe"));
        assert!(!filter.matches("pol.exe"));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(Config::from_toml_str("[logging]\nlevel = \"loud\"").is_err());
        assert!(Config::from_toml_str("[discovery]\ninclude = [\"a*b*\"]").is_err());
        assert!(Config::from_toml_str("[activation]\nmax_attempts = 0").is_err());
        assert!(Config::from_toml_str("[monitor]\npoll_interval_ms = 60000").is_err());
        assert!(Config::from_toml_str("[activation]\nbackoff_ms = 60000").is_err());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/procsentry.toml").unwrap();
        assert_eq!(config.monitor.poll_interval_ms, MonitorConfig::default().poll_interval_ms);
    }
}
