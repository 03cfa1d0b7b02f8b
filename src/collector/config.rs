use std::{
    collections::HashMap,
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use android_platform::{
    kernel_config::PROC_CONFIG_GZ,
    kmsg::DEV_KMSG,
    sources::{KMSG_PATH, LOGCAT_PATH},
};
use anyhow::{Context, Result, bail};
use logdump_core::sink::SYNC_THRESHOLD_DEFAULT;
use strum::{Display as StrumDisplay, EnumString};
use thiserror::Error;

/// INI section holding the collector settings.
const CONFIG_SECTION: &str = "collector";
const GRACE_PERIOD_DEFAULT_SECS: u64 = 3;

/// Raw `key = value` pairs of one INI section.
#[derive(Debug, Clone, Default)]
pub struct Section {
    inner: HashMap<String, String>,
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("{value} is not a valid value for field {field}: {err}")]
    InvalidValue {
        field: String,
        value: String,
        err: String,
    },
}

impl Section {
    pub fn insert(&mut self, key: String, value: String) -> Option<String> {
        self.inner.insert(key, value)
    }

    /// Returns an optional typed configuration value.
    pub fn optional<T>(&self, config_name: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        self.inner
            .get(config_name)
            .map(|value| parse(value, config_name))
            .transpose()
    }

    /// Returns a typed configuration value, or `default` when missing.
    pub fn with_default<T>(&self, config_name: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        <T as FromStr>::Err: Display,
    {
        Ok(self.optional(config_name)?.unwrap_or(default))
    }
}

fn parse<T>(value: &str, config_name: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    <T as FromStr>::Err: Display,
{
    T::from_str(value.trim()).map_err(|err| ConfigError::InvalidValue {
        field: config_name.to_string(),
        value: value.to_string(),
        err: err.to_string(),
    })
}

/// Whether SELinux denials are filtered and correlated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, StrumDisplay, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum AvcFilterMode {
    /// Enabled when the kernel is built with `CONFIG_AUDIT=y`.
    Autodetect,
    #[strum(serialize = "true")]
    Enabled,
    #[strum(serialize = "false")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorConfig {
    /// Logcat buffers passed to `-b`, empty for logcat's defaults.
    pub logcat_buffer: String,
    pub logcat_path: PathBuf,
    pub kmsg_path: PathBuf,
    /// Kernel log the boot time is reported to.
    pub dev_kmsg_path: PathBuf,
    pub kernel_config_path: PathBuf,
    /// Time left to the tailers after boot completed.
    pub grace_period: Duration,
    pub sync_threshold: usize,
    pub avc_filter: AvcFilterMode,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            logcat_buffer: String::new(),
            logcat_path: PathBuf::from(LOGCAT_PATH),
            kmsg_path: PathBuf::from(KMSG_PATH),
            dev_kmsg_path: PathBuf::from(DEV_KMSG),
            kernel_config_path: PathBuf::from(PROC_CONFIG_GZ),
            grace_period: Duration::from_secs(GRACE_PERIOD_DEFAULT_SECS),
            sync_threshold: SYNC_THRESHOLD_DEFAULT,
            avc_filter: AvcFilterMode::Autodetect,
        }
    }
}

impl TryFrom<&Section> for CollectorConfig {
    type Error = ConfigError;

    fn try_from(config: &Section) -> Result<Self, Self::Error> {
        let default = Self::default();
        Ok(Self {
            logcat_buffer: config.with_default("logcat_buffer", default.logcat_buffer)?,
            logcat_path: config.with_default("logcat_path", default.logcat_path)?,
            kmsg_path: config.with_default("kmsg_path", default.kmsg_path)?,
            dev_kmsg_path: config.with_default("dev_kmsg_path", default.dev_kmsg_path)?,
            kernel_config_path: config
                .with_default("kernel_config_path", default.kernel_config_path)?,
            grace_period: Duration::from_secs(
                config.with_default("grace_period_secs", GRACE_PERIOD_DEFAULT_SECS)?,
            ),
            sync_threshold: config.with_default("sync_threshold", default.sync_threshold)?,
            avc_filter: config.with_default("avc_filter", default.avc_filter)?,
        })
    }
}

impl CollectorConfig {
    /// Load the configuration from `config_file`, or use the defaults when none is given.
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        match config_file {
            None => Ok(Self::default()),
            Some(config_file) => {
                if !config_file.exists() {
                    bail!("Configuration file {} not found", config_file.display());
                }
                let conf = ini::Ini::load_from_file(config_file).with_context(|| {
                    format!("Error loading configuration from {config_file:?}")
                })?;
                Self::from_ini(&conf)
                    .with_context(|| format!("Invalid configuration in {config_file:?}"))
            }
        }
    }

    pub fn from_ini(conf: &ini::Ini) -> Result<Self, ConfigError> {
        let mut section = Section::default();
        if let Some(props) = conf.section(Some(CONFIG_SECTION)) {
            for (key, value) in props.iter() {
                log::debug!("{CONFIG_SECTION}.{key}={value}");
                section.insert(key.to_string(), value.to_string());
            }
        }
        Self::try_from(&section)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use logdump_core::test_utils::TempDir;

    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        assert_eq!(CollectorConfig::load(None).unwrap(), CollectorConfig::default());
    }

    #[test]
    fn values_override_defaults() {
        let conf = ini::Ini::load_from_str(
            "\
[collector]
logcat_buffer = all
grace_period_secs = 10
sync_threshold = 65536
avc_filter = false

[other]
logcat_buffer = ignored
",
        )
        .unwrap();
        let config = CollectorConfig::from_ini(&conf).unwrap();

        assert_eq!(config.logcat_buffer, "all");
        assert_eq!(config.grace_period, Duration::from_secs(10));
        assert_eq!(config.sync_threshold, 65536);
        assert_eq!(config.avc_filter, AvcFilterMode::Disabled);
        assert_eq!(config.kmsg_path, PathBuf::from(KMSG_PATH));
    }

    #[test]
    fn invalid_value_is_reported() {
        let conf = ini::Ini::load_from_str("[collector]\navc_filter = sometimes\n").unwrap();
        match CollectorConfig::from_ini(&conf) {
            Err(ConfigError::InvalidValue { field, value, .. }) => {
                assert_eq!(field, "avc_filter");
                assert_eq!(value, "sometimes");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn avc_filter_modes() {
        assert_eq!("autodetect".parse::<AvcFilterMode>(), Ok(AvcFilterMode::Autodetect));
        assert_eq!("true".parse::<AvcFilterMode>(), Ok(AvcFilterMode::Enabled));
        assert_eq!("false".parse::<AvcFilterMode>(), Ok(AvcFilterMode::Disabled));
        assert_eq!(AvcFilterMode::Enabled.to_string(), "true");
    }

    #[test]
    fn load_from_file() {
        let dir = TempDir::new("collector-config").unwrap();
        let path = dir.join("bootlogger.ini");
        fs::write(&path, "[collector]\nkmsg_path = /dev/null\n").unwrap();

        let config = CollectorConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.kmsg_path, PathBuf::from("/dev/null"));

        assert!(CollectorConfig::load(Some(dir.join("missing.ini").as_path())).is_err());
    }
}
