use std::{fs, io, path::Path};

/// Remove every entry of `dir`, returning how many were removed.
///
/// Failures are logged and skipped: a leftover file from a previous run is
/// not a reason to lose this one.
pub fn clear_directory(dir: &Path) -> usize {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            log::info!("Log directory '{}' does not exist yet", dir.display());
            return 0;
        }
        Err(err) => {
            log::error!("Failed to list log directory '{}': {err}", dir.display());
            return 0;
        }
    };

    let mut removed = 0;
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                log::warn!("Cannot read entry of '{}': {err}", dir.display());
                continue;
            }
        };
        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        let result = if is_dir {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => removed += 1,
            Err(err) => log::warn!("Cannot remove '{}': {err}", path.display()),
        }
    }

    if removed > 0 {
        log::info!("Cleared {removed} entries from '{}'", dir.display());
    } else {
        log::info!("Log directory '{}' was already empty", dir.display());
    }
    removed
}

#[cfg(test)]
mod tests {
    use logdump_core::test_utils::TempDir;

    use super::*;

    #[test]
    fn removes_files_and_directories() {
        let dir = TempDir::new("logdir-clear").unwrap();
        fs::write(dir.join("dmesg.txt"), "old").unwrap();
        fs::create_dir_all(dir.join("boot/nested")).unwrap();
        fs::write(dir.join("boot/nested/logcat.txt"), "old").unwrap();

        assert_eq!(clear_directory(dir.path()), 2);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn empty_and_missing_directories() {
        let dir = TempDir::new("logdir-empty").unwrap();
        assert_eq!(clear_directory(dir.path()), 0);
        assert_eq!(clear_directory(&dir.join("missing")), 0);
    }
}
