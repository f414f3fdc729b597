use serde::Deserialize;
use crate::error::{Result, AppError};
use std::time::Duration;
use config::{Config as ConfigLoader, File, Environment};

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitSettings {
    /// Temporal slots available per `resolution_ms` window.
    pub capacity: usize,
    pub resolution_ms: u64,
    /// Calls allowed in flight at once.
    pub concurrency: usize,
    /// 0 waits forever.
    pub acquire_timeout_ms: u64,
}

impl RateLimitSettings {
    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        (self.acquire_timeout_ms > 0).then(|| Duration::from_millis(self.acquire_timeout_ms))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsolidatorSettings {
    pub delay_ms: u64,
    pub max_wait_ms: u64,
}

impl ConsolidatorSettings {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LimiterSettings {
    pub resolution_ms: u64,
}

impl LimiterSettings {
    pub fn resolution(&self) -> Duration {
        Duration::from_millis(self.resolution_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub log_level: String,
    pub rpc: RateLimitSettings,
    pub consolidator: ConsolidatorSettings,
    pub limiter: LimiterSettings,
}

impl Config {
    /// Defaults, then an optional `throttle.{toml,yaml,json}` file, then
    /// `THROTTLE__SECTION__KEY` environment variables (`.env` is honoured).
    /// `THROTTLE__RPC__CONCURRENCY=8` overrides `rpc.concurrency`.
    fn environment() -> Environment {
        Environment::with_prefix("THROTTLE")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();

        let config: Self = Self::defaults()?
            .add_source(File::with_name("throttle").required(false))
            .add_source(Self::environment())
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn defaults() -> Result<config::builder::ConfigBuilder<config::builder::DefaultState>> {
        Ok(ConfigLoader::builder()
            .set_default("log_level", "info")?
            .set_default("rpc.capacity", 10)?
            .set_default("rpc.resolution_ms", 1000)?
            .set_default("rpc.concurrency", 4)?
            .set_default("rpc.acquire_timeout_ms", 0)?
            .set_default("consolidator.delay_ms", 50)?
            .set_default("consolidator.max_wait_ms", 200)?
            .set_default("limiter.resolution_ms", 100)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.rpc.capacity == 0 {
            return Err(AppError::InvalidConfig("rpc.capacity must be positive".into()));
        }
        if self.rpc.concurrency == 0 {
            return Err(AppError::InvalidConfig("rpc.concurrency must be positive".into()));
        }
        if self.consolidator.max_wait_ms < self.consolidator.delay_ms {
            return Err(AppError::InvalidConfig(format!(
                "consolidator.max_wait_ms ({}) is below consolidator.delay_ms ({})",
                self.consolidator.max_wait_ms, self.consolidator.delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_defaults() -> Config {
        Config::defaults().unwrap().build().unwrap().try_deserialize().unwrap()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = from_defaults();
        assert!(config.validate().is_ok());
        assert_eq!(config.consolidator.delay(), Duration::from_millis(50));
        assert_eq!(config.consolidator.max_wait(), Duration::from_millis(200));
        assert_eq!(config.rpc.acquire_timeout(), None);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = from_defaults();
        config.rpc.concurrency = 0;
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));

        let mut config = from_defaults();
        config.consolidator.max_wait_ms = 10;
        assert!(matches!(config.validate(), Err(AppError::InvalidConfig(_))));
    }

    #[test]
    fn test_overrides_apply_over_defaults() {
        let config: Config = Config::defaults()
            .unwrap()
            .set_override("rpc.concurrency", 8)
            .unwrap()
            .set_override("rpc.acquire_timeout_ms", 250)
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.rpc.concurrency, 8);
        assert_eq!(config.rpc.acquire_timeout(), Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_environment_maps_nested_keys() {
        let vars: config::Map<String, String> = [
            ("THROTTLE__RPC__CONCURRENCY".to_string(), "3".to_string()),
            ("THROTTLE__LIMITER__RESOLUTION_MS".to_string(), "750".to_string()),
        ]
        .into_iter()
        .collect();

        let config: Config = Config::defaults()
            .unwrap()
            .add_source(Config::environment().source(Some(vars)))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.rpc.concurrency, 3);
        assert_eq!(config.limiter.resolution(), Duration::from_millis(750));
    }
}
