//! Android system properties.

use std::{
    io,
    process::{Command, Stdio},
    thread,
    time::Duration,
};

use thiserror::Error;

const GETPROP: &str = "/system/bin/getprop";
const SETPROP: &str = "/system/bin/setprop";
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Error, Debug)]
pub enum PropertyError {
    #[error("running {command} failed")]
    Spawn {
        command: &'static str,
        #[source]
        source: io::Error,
    },
    #[error("{command} {name} exited with {status}")]
    Failed {
        command: &'static str,
        name: String,
        status: std::process::ExitStatus,
    },
}

pub trait PropertyStore: Send + Sync {
    /// Current value, `None` when the property is unset.
    fn get(&self, name: &str) -> Result<Option<String>, PropertyError>;

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError>;

    /// Block until `name` holds exactly `value`.
    fn wait_for(&self, name: &str, value: &str) -> Result<(), PropertyError>;

    /// Current value, or `default` when unset, empty or unreadable.
    fn get_or(&self, name: &str, default: &str) -> String {
        match self.get(name) {
            Ok(Some(value)) if !value.is_empty() => value,
            Ok(_) => default.to_string(),
            Err(err) => {
                log::warn!("Reading property {name} failed: {err}");
                default.to_string()
            }
        }
    }

    /// Boolean value following bionic's rules, or `default` for anything else.
    fn get_bool(&self, name: &str, default: bool) -> bool {
        parse_bool(&self.get_or(name, "")).unwrap_or(default)
    }
}

pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "y" | "yes" | "on" | "true" => Some(true),
        "0" | "n" | "no" | "off" | "false" => Some(false),
        _ => None,
    }
}

/// Property store of the running device, reached through `getprop`/`setprop`.
#[derive(Debug, Clone)]
pub struct SystemProperties {
    poll_interval: Duration,
}

impl Default for SystemProperties {
    fn default() -> Self {
        Self {
            poll_interval: WAIT_POLL_INTERVAL,
        }
    }
}

impl SystemProperties {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PropertyStore for SystemProperties {
    fn get(&self, name: &str) -> Result<Option<String>, PropertyError> {
        let output = Command::new(GETPROP)
            .arg(name)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .map_err(|source| PropertyError::Spawn {
                command: GETPROP,
                source,
            })?;
        if !output.status.success() {
            return Err(PropertyError::Failed {
                command: GETPROP,
                name: name.to_string(),
                status: output.status,
            });
        }
        let value = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        Ok((!value.is_empty()).then_some(value))
    }

    fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        let status = Command::new(SETPROP)
            .arg(name)
            .arg(value)
            .stdin(Stdio::null())
            .status()
            .map_err(|source| PropertyError::Spawn {
                command: SETPROP,
                source,
            })?;
        if !status.success() {
            return Err(PropertyError::Failed {
                command: SETPROP,
                name: name.to_string(),
                status,
            });
        }
        Ok(())
    }

    fn wait_for(&self, name: &str, value: &str) -> Result<(), PropertyError> {
        log::debug!("Waiting for {name}={value}");
        loop {
            if self.get(name)?.as_deref() == Some(value) {
                return Ok(());
            }
            thread::sleep(self.poll_interval);
        }
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemoryProperties;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::{
        collections::HashMap,
        sync::{Condvar, Mutex},
    };

    use super::{PropertyError, PropertyStore};

    /// In-process property store.
    #[derive(Default)]
    pub struct MemoryProperties {
        values: Mutex<HashMap<String, String>>,
        changed: Condvar,
    }

    impl MemoryProperties {
        pub fn new<I, K, V>(values: I) -> Self
        where
            I: IntoIterator<Item = (K, V)>,
            K: Into<String>,
            V: Into<String>,
        {
            Self {
                values: Mutex::new(
                    values
                        .into_iter()
                        .map(|(k, v)| (k.into(), v.into()))
                        .collect(),
                ),
                changed: Condvar::new(),
            }
        }
    }

    impl PropertyStore for MemoryProperties {
        fn get(&self, name: &str) -> Result<Option<String>, PropertyError> {
            Ok(self.values.lock().unwrap().get(name).cloned())
        }

        fn set(&self, name: &str, value: &str) -> Result<(), PropertyError> {
            self.values
                .lock()
                .unwrap()
                .insert(name.to_string(), value.to_string());
            self.changed.notify_all();
            Ok(())
        }

        fn wait_for(&self, name: &str, value: &str) -> Result<(), PropertyError> {
            let values = self.values.lock().unwrap();
            let _values = self
                .changed
                .wait_while(values, |values| {
                    values.get(name).map(String::as_str) != Some(value)
                })
                .unwrap();
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn bool_parsing() {
        for value in ["1", "y", "yes", "on", "true"] {
            assert_eq!(parse_bool(value), Some(true), "{value}");
        }
        for value in ["0", "n", "no", "off", "false"] {
            assert_eq!(parse_bool(value), Some(false), "{value}");
        }
        assert_eq!(parse_bool("TRUE"), None);
        assert_eq!(parse_bool(""), None);
    }

    #[test]
    fn defaults_apply_to_unset_and_invalid() {
        let props = MemoryProperties::new([
            ("ro.logd.kernel", "true"),
            ("ro.empty", ""),
            ("ro.garbage", "maybe"),
        ]);
        assert!(props.get_bool("ro.logd.kernel", false));
        assert!(!props.get_bool("ro.missing", false));
        assert!(props.get_bool("ro.garbage", true));
        assert_eq!(props.get_or("ro.empty", "main"), "main");
        assert_eq!(props.get_or("ro.missing", ""), "");
    }

    #[test]
    fn wait_returns_once_value_is_set() {
        let props = Arc::new(MemoryProperties::default());
        let waiter = {
            let props = props.clone();
            thread::spawn(move || props.wait_for("sys.boot_completed", "1"))
        };

        props.set("sys.boot_completed", "0").unwrap();
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        props.set("sys.boot_completed", "1").unwrap();
        waiter.join().unwrap().unwrap();
    }
}
