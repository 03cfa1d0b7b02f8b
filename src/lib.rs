//! Bootlogger collects the kernel log and logcat of an Android device while
//! it boots, or on demand once it is up, into plain text files.
//!
//! The daemon is started by init with a log directory as its only argument:
//!
//! ```sh
//! # Capture the boot into /data/bootlogger/boot
//! bootlogger /data/bootlogger
//!
//! # Capture the running system into /data/bootlogger/system
//! LOGGER_MODE_SYSTEM=1 bootlogger /data/bootlogger
//! ```
//!
//! Each stream is written to `<stream>.txt`. Lines picked by a filter are
//! also written to `<filter>.<stream>.txt`: `avc` keeps SELinux denials and
//! `libc_props` keeps the first denied access to each property. Denials are
//! finally turned into suggested allow rules in `sepolicy.gen.txt`.
//!
//! The reading, filtering and rule generation live in [`logdump_core`],
//! everything touching the device in [`android_platform`].

use std::sync::Arc;

use android_platform::properties::SystemProperties;
use anyhow::Result;

pub mod cli;
pub mod collector;
pub mod utils;

use cli::BootloggerOpts;
use collector::{Collector, CollectorConfig, RunMode};

pub mod metadata {
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// Init logger. We log from info level and above.
/// If RUST_LOG is set, we assume the user wants to debug something
/// and use env_logger default behaviour.
pub fn init_logger(override_log_level: Option<log::LevelFilter>) {
    if std::env::var_os("RUST_LOG").is_some() {
        env_logger::init();
    } else {
        let level_filter = override_log_level.unwrap_or(log::LevelFilter::Info);

        env_logger::builder().filter_level(level_filter).init();
    }
}

pub async fn run(options: &BootloggerOpts) -> Result<()> {
    log::trace!("Bootlogger options: {options:?}");

    let config = CollectorConfig::load(options.config_file.as_deref())?;
    let collector = Collector::new(
        &options.log_dir,
        RunMode::from_env(),
        config,
        Arc::new(SystemProperties::new()),
    );
    collector.run().await
}
