//! Boot and system log collection.
//!
//! A [`Collector`] drains the kernel ring buffer and logcat into per-stream
//! files under `<log_root>/<mode>/` until a property tells it to stop:
//!
//! - [`RunMode::Boot`] stops once `sys.boot_completed=1`, reports the boot
//!   time to the kernel log and keeps capturing for a short grace period.
//! - [`RunMode::System`] stops once `persist.ext.logdump.enabled=false`.
//!
//! When the kernel supports auditing, SELinux denials are also copied to
//! `avc.*.txt` files and folded into suggested allow rules in
//! `sepolicy.gen.txt` once the tailers have stopped.

use std::{
    future::Future,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
};

use android_platform::{
    kernel_config, kmsg,
    properties::PropertyStore,
    sources::{KmsgSource, LogcatSource},
};
use anyhow::{Context, Result};
use logdump_core::{
    avc::{self, AvcBuffer},
    correlator,
    filter::{AvcFilter, LibcPropFilter},
    sink::LogSink,
    tailer::{LogSource, StreamTailer},
};
use strum::Display;
use tokio::signal::unix::{SignalKind, signal};

use crate::utils::report_error;

mod config;
mod logdir;

pub use config::{AvcFilterMode, CollectorConfig, ConfigError, Section};
pub use logdir::clear_directory;

/// Tag of the messages written to the kernel log.
pub const LOG_TAG: &str = "bootlogger";
/// Set in the environment to run in [`RunMode::System`].
pub const SYSTEM_MODE_ENV: &str = "LOGGER_MODE_SYSTEM";

const LOGD_KERNEL_PROP: &str = "ro.logd.kernel";
const LOGCAT_BUFFER_PROP: &str = "persist.ext.logdump.logcat_buffer";
const LOGGER_ENABLED_PROP: &str = "persist.ext.logdump.enabled";
const BOOT_COMPLETED_PROP: &str = "sys.boot_completed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    Boot,
    System,
}

impl RunMode {
    pub fn from_env() -> Self {
        if std::env::var_os(SYSTEM_MODE_ENV).is_some() {
            RunMode::System
        } else {
            RunMode::Boot
        }
    }

    /// Property and value ending the collection.
    fn stop_condition(self) -> (&'static str, &'static str) {
        match self {
            RunMode::Boot => (BOOT_COMPLETED_PROP, "1"),
            RunMode::System => (LOGGER_ENABLED_PROP, "false"),
        }
    }
}

pub struct Collector {
    log_root: PathBuf,
    mode: RunMode,
    config: CollectorConfig,
    properties: Arc<dyn PropertyStore>,
}

impl Collector {
    pub fn new<P: Into<PathBuf>>(
        log_root: P,
        mode: RunMode,
        config: CollectorConfig,
        properties: Arc<dyn PropertyStore>,
    ) -> Self {
        Self {
            log_root: log_root.into(),
            mode,
            config,
            properties,
        }
    }

    /// Directory the files of this run are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.log_root.join(self.mode.to_string())
    }

    /// Collect until the stop property is set or SIGINT/SIGTERM is received.
    pub async fn run(&self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let log_dir = self.log_dir();
        log::info!(
            "Logger starting in {} mode with logdir '{}'",
            self.mode,
            log_dir.display()
        );

        // A system run keeps the logs of the boot that preceded it.
        match self.mode {
            RunMode::Boot => clear_directory(&self.log_root),
            RunMode::System => clear_directory(&log_dir),
        };

        let records = self.audit_enabled().then(avc::new_buffer);

        std::fs::create_dir_all(&log_dir)
            .with_context(|| format!("Failed to create directory '{}'", log_dir.display()))?;

        let running = Arc::new(AtomicBool::new(true));
        let mut tailers = Vec::new();

        let read_kmsg = !self.properties.get_bool(LOGD_KERNEL_PROP, false);
        if read_kmsg {
            let source = KmsgSource::new(&self.config.kmsg_path);
            let mut dmesg = StreamTailer::new("dmesg", source, &log_dir)
                .sync_threshold(self.config.sync_threshold);
            if let Some(records) = &records {
                dmesg.attach_filter(&log_dir, Box::new(AvcFilter::new(records.clone())));
            }
            tailers.extend(spawn_tailer(dmesg, running.clone()));
        } else {
            log::info!("Kernel messages are captured by logd, skipping dmesg");
        }

        let source = LogcatSource::new(&self.config.logcat_path).buffer(self.logcat_buffer());
        let mut logcat = StreamTailer::new("logcat", source, &log_dir)
            .sync_threshold(self.config.sync_threshold);
        if let Some(records) = &records {
            logcat.attach_filter(&log_dir, Box::new(AvcFilter::new(records.clone())));
        }
        logcat.attach_filter(&log_dir, Box::new(LibcPropFilter::new()));
        tailers.extend(spawn_tailer(logcat, running.clone()));

        self.wait_for_stop(shutdown).await;

        log::info!("Stopping log capture");
        running.store(false, Ordering::SeqCst);
        if read_kmsg {
            // Readers of /proc/kmsg block until a new message arrives.
            let notice = format!("{LOG_TAG}: Stopping {} log capture", self.mode);
            if let Err(err) = kmsg::write_kmsg(&self.config.dev_kmsg_path, &notice) {
                log::warn!("Cannot wake up the dmesg tailer: {err}");
            }
        }

        for handle in tailers {
            let name = handle.thread().name().unwrap_or("tailer").to_string();
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Ok(())) => log::debug!("{name} tailer stopped"),
                Ok(Err(_)) => log::error!("{name} tailer panicked"),
                Err(err) => log::error!("Joining {name} tailer failed: {err}"),
            }
        }

        if let Some(records) = records {
            write_rules(&log_dir, &records);
        }

        log::info!("Logs written to '{}'", log_dir.display());
        Ok(())
    }

    fn audit_enabled(&self) -> bool {
        match self.config.avc_filter {
            AvcFilterMode::Enabled => true,
            AvcFilterMode::Disabled => {
                log::info!("AVC filters disabled by configuration");
                false
            }
            AvcFilterMode::Autodetect => {
                let path = &self.config.kernel_config_path;
                match kernel_config::read_kernel_config_from(path) {
                    Ok(config) if kernel_config::audit_supported(&config) => {
                        log::debug!("Kernel has CONFIG_AUDIT=y, enabling avc filters");
                        true
                    }
                    Ok(_) => {
                        log::info!("Kernel lacks CONFIG_AUDIT=y, disabling avc filters");
                        false
                    }
                    Err(err) => {
                        log::warn!(
                            "{:#}, disabling avc filters",
                            anyhow::Error::from(err)
                        );
                        false
                    }
                }
            }
        }
    }

    /// The property wins over the configuration file.
    fn logcat_buffer(&self) -> String {
        let buffer = self.properties.get_or(LOGCAT_BUFFER_PROP, "");
        if buffer.is_empty() {
            self.config.logcat_buffer.clone()
        } else {
            buffer
        }
    }

    async fn wait_for_stop<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let (name, value) = self.mode.stop_condition();
        log::info!("Collecting until {name}={value}");
        let properties = self.properties.clone();
        let waiter = tokio::task::spawn_blocking(move || properties.wait_for(name, value));

        let reached = tokio::select! {
            result = waiter => match result {
                Ok(Ok(())) => true,
                Ok(Err(err)) => {
                    report_error(&anyhow::Error::from(err).context(format!("Waiting for {name} failed")));
                    false
                }
                Err(err) => {
                    log::error!("Waiting for {name} failed: {err}");
                    false
                }
            },
            _ = &mut shutdown => {
                log::info!("Shutdown requested");
                return;
            }
        };

        if !reached {
            log::warn!("Collecting until terminated");
            shutdown.await;
            return;
        }

        if self.mode == RunMode::Boot {
            kmsg::record_boot_time(&self.config.dev_kmsg_path, LOG_TAG);
            tokio::select! {
                _ = tokio::time::sleep(self.config.grace_period) => {}
                _ = &mut shutdown => log::info!("Shutdown requested during grace period"),
            }
        }
    }
}

fn spawn_tailer<S>(mut tailer: StreamTailer<S>, running: Arc<AtomicBool>) -> Option<JoinHandle<()>>
where
    S: LogSource + 'static,
{
    let name = tailer.name().to_string();
    let spawned = thread::Builder::new().name(name.clone()).spawn(move || {
        log::debug!("{} tailer started", tailer.name());
        if let Err(err) = tailer.run(&running) {
            report_error(&anyhow::Error::from(err));
        }
    });
    match spawned {
        Ok(handle) => Some(handle),
        Err(err) => {
            log::error!("Cannot start the {name} tailer: {err}");
            None
        }
    }
}

fn write_rules(log_dir: &Path, records: &AvcBuffer) {
    let records = std::mem::take(&mut *avc::lock_buffer(records));
    log::info!("Correlating {} denials", records.len());
    let rules = correlator::correlate(records);

    let mut sink = LogSink::new(log_dir, correlator::RULES_FILE_NAME, false);
    match correlator::write_rules(&rules, &mut sink) {
        Ok(()) => log::info!("Generated {} allow rules", rules.len()),
        Err(err) => report_error(&anyhow::Error::from(err).context("Writing rules failed")),
    }
}

/// Resolves on SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let signals = signal(SignalKind::interrupt()).and_then(|sig_int| {
        signal(SignalKind::terminate()).map(|sig_term| (sig_int, sig_term))
    });
    let (mut sig_int, mut sig_term) = match signals {
        Ok(signals) => signals,
        Err(err) => {
            log::warn!("Cannot install signal handlers: {err}");
            return std::future::pending().await;
        }
    };

    tokio::select! {
        _ = sig_int.recv() => log::trace!("SIGINT received"),
        _ = sig_term.recv() => log::trace!("SIGTERM received"),
    }
}
