//! Backup file naming and pruning.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local};
use tokio::fs::{self, OpenOptions};

const EXTENSION: &str = ".db";

/// `<prefix>_YYYYMMDD_HHMMSS.db`
pub fn file_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{}_{}{}", prefix, at.format("%Y%m%d_%H%M%S"), EXTENSION)
}

/// Create `path` empty and owner-only, failing if it exists. The snapshot is
/// then written into it, so the copy is never readable by others.
pub async fn reserve(path: &Path) -> io::Result<()> {
    OpenOptions::new().write(true).create_new(true).mode(0o600).open(path).await?;
    Ok(())
}

fn is_backup(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('_'))
        .is_some_and(|rest| rest.ends_with(EXTENSION))
}

/// Remove backups in `dir` whose mtime is older than `max_age` at `now`.
/// Files that are not backups are left alone. Returns files removed.
pub async fn prune(dir: &Path, prefix: &str, max_age: Duration, now: SystemTime) -> io::Result<usize> {
    let mut entries = fs::read_dir(dir).await?;
    let mut removed = 0;

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        if !is_backup(&name.to_string_lossy(), prefix) {
            continue;
        }
        let path = entry.path();
        let modified = match entry.metadata().await.and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Cannot stat backup");
                continue;
            }
        };
        let age = now.duration_since(modified).unwrap_or_default();
        if age <= max_age {
            continue;
        }
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::info!(path = %path.display(), age_secs = age.as_secs(), "Removed old backup");
                removed += 1;
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Failed to remove old backup"),
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_file_name_format() {
        let at = Local.with_ymd_and_hms(2024, 3, 9, 7, 5, 1).unwrap();
        assert_eq!(file_name("steward", at), "steward_20240309_070501.db");
    }

    #[test]
    fn test_backup_name_matching() {
        assert!(is_backup("steward_20240309_070501.db", "steward"));
        assert!(!is_backup("steward.db", "steward"));
        assert!(!is_backup("other_20240309_070501.db", "steward"));
        assert!(!is_backup("steward_20240309_070501.db-wal", "steward"));
    }

    #[tokio::test]
    async fn test_reserve_is_owner_only_and_exclusive() {
        use std::os::unix::fs::PermissionsExt;

        let dir = std::env::temp_dir().join(format!("steward-reserve-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("steward_20240309_070501.db");

        reserve(&path).await.unwrap();
        let meta = std::fs::metadata(&path).unwrap();
        assert_eq!(meta.len(), 0);
        assert_eq!(meta.permissions().mode() & 0o777, 0o600);

        let err = reserve(&path).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_prune_by_age() {
        let dir = std::env::temp_dir().join(format!("steward-prune-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("steward_20200101_000000.db"), b"old").unwrap();
        std::fs::write(dir.join("notes.txt"), b"keep").unwrap();

        let day = Duration::from_secs(86_400);
        let now = SystemTime::now();
        assert_eq!(prune(&dir, "steward", day, now).await.unwrap(), 0);

        let later = now + Duration::from_secs(8 * 86_400);
        assert_eq!(prune(&dir, "steward", day, later).await.unwrap(), 1);
        assert!(dir.join("notes.txt").exists());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
