//! Staged writes of the engine document.
//!
//! A candidate is written next to the live file as `.<stem>.next.<ext>`,
//! validated there, and renamed over the live path only on success.

use std::fs::Permissions;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;

const OWNER_ONLY: u32 = 0o600;

/// A candidate document on disk, not yet live.
#[derive(Debug)]
pub struct StagedConfig {
    staged: PathBuf,
    live: PathBuf,
}

impl StagedConfig {
    pub fn path(&self) -> &Path {
        &self.staged
    }

    /// Replace the live document with the staged one.
    pub async fn commit(self) -> io::Result<()> {
        fs::rename(&self.staged, &self.live).await
    }

    /// Drop the candidate. The live document is untouched.
    pub async fn discard(self) {
        if let Err(e) = fs::remove_file(&self.staged).await {
            tracing::debug!(path = %self.staged.display(), error = %e, "Failed to remove staged config");
        }
    }
}

/// Sibling path used for a candidate of `live`. Keeps the extension, which
/// the engine uses to pick a decoder.
pub fn staging_path(live: &Path) -> PathBuf {
    let stem = live
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "config".to_string());
    let name = match live.extension() {
        Some(ext) => format!(".{}.next.{}", stem, ext.to_string_lossy()),
        None => format!(".{}.next", stem),
    };
    live.with_file_name(name)
}

/// Write `bytes` as an owner-only candidate for `live`.
pub async fn stage(live: &Path, bytes: &[u8]) -> io::Result<StagedConfig> {
    if let Some(parent) = live.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).await?;
    }

    let staged = staging_path(live);
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(OWNER_ONLY)
        .open(&staged)
        .await?;
    // mode() only applies on create; a leftover candidate keeps its old bits.
    fs::set_permissions(&staged, Permissions::from_mode(OWNER_ONLY)).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;

    Ok(StagedConfig {
        staged,
        live: live.to_path_buf(),
    })
}

/// Read the live document back.
pub async fn read_live(live: &Path) -> io::Result<serde_json::Value> {
    let raw = fs::read(live).await?;
    serde_json::from_slice(&raw).map_err(io::Error::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("steward-{}-{}", name, uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_staging_path_keeps_extension() {
        assert_eq!(
            staging_path(Path::new("/etc/xray/config.json")),
            PathBuf::from("/etc/xray/.config.next.json")
        );
        assert_eq!(staging_path(Path::new("engine")), PathBuf::from(".engine.next"));
    }

    #[tokio::test]
    async fn test_commit_replaces_live_with_owner_only_file() {
        let dir = scratch_dir("commit");
        let live = dir.join("config.json");
        std::fs::write(&live, b"{\"old\":true}").unwrap();

        let staged = stage(&live, b"{\"new\":true}").await.unwrap();
        assert_eq!(read_live(&live).await.unwrap()["old"], true);
        staged.commit().await.unwrap();

        assert_eq!(read_live(&live).await.unwrap()["new"], true);
        let mode = std::fs::metadata(&live).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        assert!(!staging_path(&live).exists());
        std::fs::remove_dir_all(dir).unwrap();
    }

    #[tokio::test]
    async fn test_discard_leaves_live_untouched() {
        let dir = scratch_dir("discard");
        let live = dir.join("nested").join("config.json");

        let first = stage(&live, b"{\"v\":1}").await.unwrap();
        first.commit().await.unwrap();

        let second = stage(&live, b"{\"v\":2}").await.unwrap();
        second.discard().await;

        assert_eq!(read_live(&live).await.unwrap()["v"], 1);
        assert!(!staging_path(&live).exists());
        std::fs::remove_dir_all(dir).unwrap();
    }
}
