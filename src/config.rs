//! Domain configuration and configuration loading helpers.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::constants::{MAX_FANOUT, MAX_LEVELS};
use crate::error::RcuError;

/// Errors returned by configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error while reading config files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// TOML parse error.
    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
    /// Invalid value for a key.
    #[error("invalid value for {key}: {value}")]
    InvalidValue {
        /// Configuration key.
        key: String,
        /// Raw value string.
        value: String,
    },
    /// Unknown configuration key.
    #[error("unknown config key: {0}")]
    UnknownKey(String),
}

/// Runtime configuration of a [`GracePeriodDomain`](crate::GracePeriodDomain)
#[derive(Debug, Clone)]
pub struct RcuConfig {
    /// Number of contexts (CPUs) tracked by the domain
    pub nr_cpus: usize,
    /// Children per interior node
    pub fanout: usize,
    /// Contexts per leaf node
    pub fanout_leaf: usize,
    /// Delay before the first force-quiescent-state pass of a grace period
    pub first_fqs_delay: Duration,
    /// Delay between later force-quiescent-state passes
    pub next_fqs_delay: Duration,
    /// Callbacks invoked per `drain_done` batch
    pub blimit: usize,
    /// Queue length above which a context stops batching and forces progress
    pub qhimark: usize,
    /// Queue length below which the normal batch limit is restored
    pub qlowmark: usize,
    /// Queue length at which a context counts as callback-overloaded
    pub qovld: usize,
    /// Interval between re-signals of expedited holdouts
    pub expedited_kick_interval: Duration,
    /// Expedited wait after which a stall warning is logged
    pub expedited_stall_timeout: Duration,
    /// Name of the coordinator thread
    pub coordinator_name: String,
}

impl Default for RcuConfig {
    fn default() -> Self {
        let nr_cpus = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            nr_cpus,
            fanout: 64,
            fanout_leaf: 16,
            first_fqs_delay: Duration::from_millis(3),
            next_fqs_delay: Duration::from_millis(3),
            blimit: 10,
            qhimark: 10_000,
            qlowmark: 100,
            qovld: 20_000,
            expedited_kick_interval: Duration::from_millis(10),
            expedited_stall_timeout: Duration::from_secs(21),
            coordinator_name: "rcu_gp".to_string(),
        }
    }
}

impl RcuConfig {
    /// Create a configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of contexts
    pub fn with_nr_cpus(mut self, nr_cpus: usize) -> Self {
        self.nr_cpus = nr_cpus;
        self
    }

    /// Set the interior fan-out
    pub fn with_fanout(mut self, fanout: usize) -> Self {
        self.fanout = fanout;
        self
    }

    /// Set the leaf fan-out
    pub fn with_fanout_leaf(mut self, fanout_leaf: usize) -> Self {
        self.fanout_leaf = fanout_leaf;
        self
    }

    /// Set both force-quiescent-state delays
    pub fn with_fqs_delay(mut self, first: Duration, next: Duration) -> Self {
        self.first_fqs_delay = first;
        self.next_fqs_delay = next;
        self
    }

    /// Set the callback batch limit
    pub fn with_blimit(mut self, blimit: usize) -> Self {
        self.blimit = blimit;
        self
    }

    /// Set the overload watermarks
    pub fn with_watermarks(mut self, qlowmark: usize, qhimark: usize, qovld: usize) -> Self {
        self.qlowmark = qlowmark;
        self.qhimark = qhimark;
        self.qovld = qovld;
        self
    }

    /// Set the expedited re-signal interval and stall warning timeout
    pub fn with_expedited(mut self, kick_interval: Duration, stall_timeout: Duration) -> Self {
        self.expedited_kick_interval = kick_interval;
        self.expedited_stall_timeout = stall_timeout;
        self
    }

    /// Set the coordinator thread name
    pub fn with_coordinator_name(mut self, name: impl Into<String>) -> Self {
        self.coordinator_name = name.into();
        self
    }

    /// Check the configuration for values the tree cannot represent
    pub fn validate(&self) -> Result<(), RcuError> {
        if self.nr_cpus == 0 {
            return Err(RcuError::InvalidConfig("nr_cpus must be at least 1".into()));
        }
        for (name, value) in [("fanout", self.fanout), ("fanout_leaf", self.fanout_leaf)] {
            if !(2..=MAX_FANOUT).contains(&value) {
                return Err(RcuError::InvalidConfig(format!(
                    "{name} must be in 2..={MAX_FANOUT}, got {value}"
                )));
            }
        }
        let capacity = (1..MAX_LEVELS).fold(self.fanout_leaf as u128, |cap, _| {
            cap * self.fanout as u128
        });
        if self.nr_cpus as u128 > capacity {
            return Err(RcuError::InvalidConfig(format!(
                "{} contexts exceed the {MAX_LEVELS}-level tree capacity of {capacity}",
                self.nr_cpus
            )));
        }
        if self.blimit == 0 {
            return Err(RcuError::InvalidConfig("blimit must be at least 1".into()));
        }
        if self.qlowmark > self.qhimark {
            return Err(RcuError::InvalidConfig(
                "qlowmark must not exceed qhimark".into(),
            ));
        }
        if self.first_fqs_delay.is_zero() || self.next_fqs_delay.is_zero() {
            return Err(RcuError::InvalidConfig("fqs delays must be non-zero".into()));
        }
        if self.expedited_kick_interval.is_zero() {
            return Err(RcuError::InvalidConfig(
                "expedited kick interval must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Top-level configuration file schema.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RcuFileConfig {
    /// Tree shape.
    pub tree: Option<TreeConfigSpec>,
    /// Grace-period timing.
    pub grace_period: Option<GracePeriodConfigSpec>,
    /// Callback batching and overload.
    pub callbacks: Option<CallbackConfigSpec>,
    /// Expedited path.
    pub expedited: Option<ExpeditedConfigSpec>,
}

impl RcuFileConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from the `OXIRCU_CONFIG` env var (if set),
    /// then apply `OXIRCU__section__field` overrides.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        let config_path = env::var("OXIRCU_CONFIG").ok();
        let mut config = match config_path {
            Some(path) => Self::load_from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides()?;
        Ok(config)
    }

    /// Apply environment overrides in-place.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        for (key, value) in env::vars() {
            if !key.starts_with("OXIRCU__") {
                continue;
            }
            let path = key["OXIRCU__".len()..].to_ascii_lowercase();
            let parts: Vec<&str> = path.split("__").collect();
            let value = value.trim().to_string();

            match parts.as_slice() {
                ["tree", "nr_cpus"] => {
                    self.tree_mut().nr_cpus = Some(parse_value(&key, &value)?);
                }
                ["tree", "fanout"] => {
                    self.tree_mut().fanout = Some(parse_value(&key, &value)?);
                }
                ["tree", "fanout_leaf"] => {
                    self.tree_mut().fanout_leaf = Some(parse_value(&key, &value)?);
                }
                ["grace_period", "first_fqs_delay_ms"] => {
                    self.grace_period_mut().first_fqs_delay_ms = Some(parse_value(&key, &value)?);
                }
                ["grace_period", "next_fqs_delay_ms"] => {
                    self.grace_period_mut().next_fqs_delay_ms = Some(parse_value(&key, &value)?);
                }
                ["callbacks", "blimit"] => {
                    self.callbacks_mut().blimit = Some(parse_value(&key, &value)?);
                }
                ["callbacks", "qhimark"] => {
                    self.callbacks_mut().qhimark = Some(parse_value(&key, &value)?);
                }
                ["callbacks", "qlowmark"] => {
                    self.callbacks_mut().qlowmark = Some(parse_value(&key, &value)?);
                }
                ["callbacks", "qovld"] => {
                    self.callbacks_mut().qovld = Some(parse_value(&key, &value)?);
                }
                ["expedited", "kick_interval_ms"] => {
                    self.expedited_mut().kick_interval_ms = Some(parse_value(&key, &value)?);
                }
                ["expedited", "stall_timeout_ms"] => {
                    self.expedited_mut().stall_timeout_ms = Some(parse_value(&key, &value)?);
                }
                _ => return Err(ConfigError::UnknownKey(key)),
            }
        }

        Ok(())
    }

    /// Build an `RcuConfig` using defaults plus overrides.
    pub fn to_rcu_config(&self) -> RcuConfig {
        let mut config = RcuConfig::default();
        if let Some(tree) = &self.tree {
            tree.apply_to(&mut config);
        }
        if let Some(gp) = &self.grace_period {
            gp.apply_to(&mut config);
        }
        if let Some(callbacks) = &self.callbacks {
            callbacks.apply_to(&mut config);
        }
        if let Some(expedited) = &self.expedited {
            expedited.apply_to(&mut config);
        }
        config
    }

    fn tree_mut(&mut self) -> &mut TreeConfigSpec {
        self.tree.get_or_insert_with(TreeConfigSpec::default)
    }

    fn grace_period_mut(&mut self) -> &mut GracePeriodConfigSpec {
        self.grace_period
            .get_or_insert_with(GracePeriodConfigSpec::default)
    }

    fn callbacks_mut(&mut self) -> &mut CallbackConfigSpec {
        self.callbacks.get_or_insert_with(CallbackConfigSpec::default)
    }

    fn expedited_mut(&mut self) -> &mut ExpeditedConfigSpec {
        self.expedited.get_or_insert_with(ExpeditedConfigSpec::default)
    }
}

/// Tree shape overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TreeConfigSpec {
    /// Number of contexts.
    pub nr_cpus: Option<usize>,
    /// Interior fan-out.
    pub fanout: Option<usize>,
    /// Leaf fan-out.
    pub fanout_leaf: Option<usize>,
}

impl TreeConfigSpec {
    fn apply_to(&self, config: &mut RcuConfig) {
        if let Some(value) = self.nr_cpus {
            config.nr_cpus = value;
        }
        if let Some(value) = self.fanout {
            config.fanout = value;
        }
        if let Some(value) = self.fanout_leaf {
            config.fanout_leaf = value;
        }
    }
}

/// Grace-period timing overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GracePeriodConfigSpec {
    /// First FQS delay in milliseconds.
    pub first_fqs_delay_ms: Option<u64>,
    /// Later FQS delay in milliseconds.
    pub next_fqs_delay_ms: Option<u64>,
}

impl GracePeriodConfigSpec {
    fn apply_to(&self, config: &mut RcuConfig) {
        if let Some(value) = self.first_fqs_delay_ms {
            config.first_fqs_delay = Duration::from_millis(value.max(1));
        }
        if let Some(value) = self.next_fqs_delay_ms {
            config.next_fqs_delay = Duration::from_millis(value.max(1));
        }
    }
}

/// Callback batching overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CallbackConfigSpec {
    /// Batch limit.
    pub blimit: Option<usize>,
    /// High watermark.
    pub qhimark: Option<usize>,
    /// Low watermark.
    pub qlowmark: Option<usize>,
    /// Overload threshold.
    pub qovld: Option<usize>,
}

impl CallbackConfigSpec {
    fn apply_to(&self, config: &mut RcuConfig) {
        if let Some(value) = self.blimit {
            config.blimit = value.max(1);
        }
        if let Some(value) = self.qhimark {
            config.qhimark = value;
        }
        if let Some(value) = self.qlowmark {
            config.qlowmark = value;
        }
        if let Some(value) = self.qovld {
            config.qovld = value;
        }
    }
}

/// Expedited path overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExpeditedConfigSpec {
    /// Re-signal interval in milliseconds.
    pub kick_interval_ms: Option<u64>,
    /// Stall warning timeout in milliseconds.
    pub stall_timeout_ms: Option<u64>,
}

impl ExpeditedConfigSpec {
    fn apply_to(&self, config: &mut RcuConfig) {
        if let Some(value) = self.kick_interval_ms {
            config.expedited_kick_interval = Duration::from_millis(value.max(1));
        }
        if let Some(value) = self.stall_timeout_ms {
            config.expedited_stall_timeout = Duration::from_millis(value);
        }
    }
}

fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn test_default_is_valid() {
        RcuConfig::default().validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_fanout() {
        let err = RcuConfig::new().with_fanout(65).validate().unwrap_err();
        assert!(matches!(err, RcuError::InvalidConfig(_)));

        let err = RcuConfig::new().with_fanout_leaf(1).validate().unwrap_err();
        assert!(matches!(err, RcuError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_oversized_tree() {
        // 2 * 2 * 2 * 2 = 16 contexts fit in four levels.
        let config = RcuConfig::new()
            .with_fanout(2)
            .with_fanout_leaf(2)
            .with_nr_cpus(16);
        config.validate().unwrap();
        let err = config.with_nr_cpus(17).validate().unwrap_err();
        assert!(matches!(err, RcuError::InvalidConfig(_)));
    }

    #[test]
    fn test_validate_rejects_inverted_watermarks() {
        let err = RcuConfig::new()
            .with_watermarks(500, 100, 1000)
            .validate()
            .unwrap_err();
        assert!(matches!(err, RcuError::InvalidConfig(_)));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[tree]\nnr_cpus = 12\nfanout_leaf = 4\n\n[callbacks]\nblimit = 32\n\n[expedited]\nkick_interval_ms = 5"
        )
        .unwrap();

        let file_config = RcuFileConfig::load_from_path(file.path()).unwrap();
        let config = file_config.to_rcu_config();
        assert_eq!(config.nr_cpus, 12);
        assert_eq!(config.fanout_leaf, 4);
        assert_eq!(config.fanout, 64);
        assert_eq!(config.blimit, 32);
        assert_eq!(config.expedited_kick_interval, Duration::from_millis(5));
    }

    #[test]
    fn test_load_rejects_unknown_field() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[tree]\nradix = 3").unwrap();
        let err = RcuFileConfig::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("OXIRCU__tree__nr_cpus", "24");
        env::set_var("OXIRCU__grace_period__first_fqs_delay_ms", "7");
        env::set_var("OXIRCU__callbacks__qhimark", "500");

        let mut config = RcuFileConfig::default();
        let result = config.apply_env_overrides();

        env::remove_var("OXIRCU__tree__nr_cpus");
        env::remove_var("OXIRCU__grace_period__first_fqs_delay_ms");
        env::remove_var("OXIRCU__callbacks__qhimark");
        result.unwrap();

        assert_eq!(config.tree.as_ref().and_then(|t| t.nr_cpus), Some(24));
        let resolved = config.to_rcu_config();
        assert_eq!(resolved.first_fqs_delay, Duration::from_millis(7));
        assert_eq!(resolved.qhimark, 500);
    }

    #[test]
    fn test_env_override_invalid_value() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("OXIRCU__callbacks__blimit", "lots");
        let mut config = RcuFileConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var("OXIRCU__callbacks__blimit");

        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_env_override_unknown_key() {
        let _guard = ENV_LOCK.lock().unwrap();

        env::set_var("OXIRCU__tree__depth", "3");
        let mut config = RcuFileConfig::default();
        let result = config.apply_env_overrides();
        env::remove_var("OXIRCU__tree__depth");

        assert!(matches!(result, Err(ConfigError::UnknownKey(_))));
    }
}
