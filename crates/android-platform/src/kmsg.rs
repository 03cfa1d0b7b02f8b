//! Writing to the kernel log and measuring boot time.

use std::{fs::OpenOptions, io::Write, path::Path, time::Duration};

use nix::sys::sysinfo::sysinfo;

pub const DEV_KMSG: &str = "/dev/kmsg";

/// Append a single message to the kernel log at `path` (normally [`DEV_KMSG`]).
pub fn write_kmsg<P: AsRef<Path>>(path: P, message: &str) -> std::io::Result<()> {
    let mut kmsg = OpenOptions::new().append(true).open(path)?;
    kmsg.write_all(message.as_bytes())
}

/// Time since the kernel started.
pub fn uptime() -> nix::Result<Duration> {
    Ok(sysinfo()?.uptime())
}

/// "Boot completed in 1m 5s", minutes omitted when zero.
pub fn boot_completed_message(tag: &str, uptime: Duration) -> String {
    let secs = uptime.as_secs();
    let (mins, secs) = (secs / 60, secs % 60);
    if mins > 0 {
        format!("{tag}: Boot completed in {mins}m {secs}s")
    } else {
        format!("{tag}: Boot completed in {secs}s")
    }
}

/// Log how long the boot took to the kernel log.
pub fn record_boot_time<P: AsRef<Path>>(kmsg: P, tag: &str) {
    let uptime = match uptime() {
        Ok(uptime) => uptime,
        Err(err) => {
            log::warn!("Reading uptime failed: {err}");
            return;
        }
    };
    let message = boot_completed_message(tag, uptime);
    log::info!("{message}");
    if let Err(err) = write_kmsg(kmsg, &message) {
        log::warn!("Writing boot time to kernel log failed: {err}");
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use logdump_core::test_utils::TempDir;

    use super::*;

    #[test]
    fn message_format() {
        assert_eq!(
            boot_completed_message("bootlogger", Duration::from_secs(65)),
            "bootlogger: Boot completed in 1m 5s"
        );
        assert_eq!(
            boot_completed_message("bootlogger", Duration::from_millis(42_900)),
            "bootlogger: Boot completed in 42s"
        );
        assert_eq!(
            boot_completed_message("bootlogger", Duration::from_secs(600)),
            "bootlogger: Boot completed in 10m 0s"
        );
    }

    #[test]
    fn uptime_is_positive() {
        assert!(uptime().unwrap() > Duration::ZERO);
    }

    #[test]
    fn boot_time_written_to_kmsg() {
        let dir = TempDir::new("kmsg-write").unwrap();
        let kmsg = dir.join("kmsg");
        fs::write(&kmsg, "").unwrap();

        record_boot_time(&kmsg, "bootlogger");

        let content = fs::read_to_string(&kmsg).unwrap();
        assert!(content.starts_with("bootlogger: Boot completed in "));
        assert!(content.ends_with('s'));
    }

    #[test]
    fn missing_kmsg_is_not_fatal() {
        let dir = TempDir::new("kmsg-missing").unwrap();
        assert!(write_kmsg(dir.join("kmsg"), "hello").is_err());
        record_boot_time(dir.join("kmsg"), "bootlogger");
    }
}
