//! Kernel build configuration, as exposed through `/proc/config.gz`.

use std::{
    collections::HashMap,
    fs::File,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
};

use flate2::read::GzDecoder;
use strum::{Display, EnumString};
use thiserror::Error;

pub const PROC_CONFIG_GZ: &str = "/proc/config.gz";

/// State of a tristate kernel option.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum ConfigValue {
    #[strum(serialize = "y")]
    BuiltIn,
    #[strum(serialize = "m")]
    Module,
    #[strum(serialize = "n")]
    NotSet,
}

/// Symbol name (`CONFIG_*`) to tristate value. Options with string or
/// numeric values are not kept.
pub type KernelConfig = HashMap<String, ConfigValue>;

#[derive(Error, Debug)]
pub enum KernelConfigError {
    #[error("opening {} failed", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("reading kernel configuration failed")]
    Read(#[from] io::Error),
}

pub fn read_kernel_config() -> Result<KernelConfig, KernelConfigError> {
    read_kernel_config_from(PROC_CONFIG_GZ)
}

/// Read a gzip-compressed kernel configuration.
pub fn read_kernel_config_from<P: AsRef<Path>>(path: P) -> Result<KernelConfig, KernelConfigError> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|source| KernelConfigError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    parse(BufReader::new(GzDecoder::new(file)))
}

/// Parse the plain text `.config` format:
///
/// ```text
/// CONFIG_AUDIT=y
/// CONFIG_EXT4_FS=m
/// # CONFIG_KASAN is not set
/// ```
pub fn parse<R: BufRead>(reader: R) -> Result<KernelConfig, KernelConfigError> {
    let mut config = KernelConfig::new();
    for line in reader.lines() {
        let line = line?;
        let line = line.trim();

        if let Some(comment) = line.strip_prefix('#') {
            if let Some(symbol) = comment.trim().strip_suffix(" is not set") {
                if symbol.starts_with("CONFIG_") {
                    config.insert(symbol.to_string(), ConfigValue::NotSet);
                }
            }
            continue;
        }

        let Some((symbol, value)) = line.split_once('=') else {
            continue;
        };
        if let Ok(value) = value.parse::<ConfigValue>() {
            config.insert(symbol.to_string(), value);
        }
    }
    Ok(config)
}

/// SELinux denials only reach the logs when the kernel is built with `CONFIG_AUDIT=y`.
pub fn audit_supported(config: &KernelConfig) -> bool {
    config.get("CONFIG_AUDIT") == Some(&ConfigValue::BuiltIn)
}
