use std::io;
use std::path::{Path, PathBuf};

use tokio::process::Command;
use tracing::{debug, info, warn};

/// Browser profile lock files left behind by a crashed client. While any of
/// them exists the client refuses to reopen the same session.
const STALE_LOCK_FILES: &[&str] = &["SingletonLock", "SingletonSocket", "SingletonCookie"];

const ORPHAN_PROCESS_PATTERNS: &[&str] = &["chromium.*wwebjs", "puppeteer"];

/// Cleans up the on-disk session before the transport boots. A previous
/// crash can leave lock files and orphaned browser processes that block
/// the next connection attempt.
pub struct SessionJanitor {
    session_path: PathBuf,
}

impl SessionJanitor {
    pub fn new(session_path: impl Into<PathBuf>) -> Self {
        Self { session_path: session_path.into() }
    }

    pub async fn prepare(&self) -> io::Result<()> {
        self.remove_stale_locks().await?;
        self.kill_orphan_browsers().await;
        Ok(())
    }

    /// Remove leftover singleton lock files anywhere under the session
    /// directory. A missing session directory is fine, first boot.
    pub async fn remove_stale_locks(&self) -> io::Result<()> {
        if !self.session_path.exists() {
            debug!(path = %self.session_path.display(), "session directory absent, nothing to clean");
            return Ok(());
        }

        let mut removed = 0usize;
        let mut pending = vec![self.session_path.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = tokio::fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                } else if is_stale_lock(&path) {
                    tokio::fs::remove_file(&path).await?;
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            info!(removed, path = %self.session_path.display(), "removed stale session locks");
        }
        Ok(())
    }

    /// Kill browser processes orphaned by a previous run. Failures here are
    /// advisory; the connect attempt proceeds either way.
    pub async fn kill_orphan_browsers(&self) {
        for pattern in ORPHAN_PROCESS_PATTERNS {
            match Command::new("pkill").arg("-f").arg(pattern).status().await {
                Ok(status) if status.success() => {
                    info!(pattern, "killed orphaned browser processes");
                }
                Ok(_) => {
                    debug!(pattern, "no orphaned browser processes found");
                }
                Err(spawn_error) => {
                    warn!(pattern, error = %spawn_error, "could not run pkill");
                }
            }
        }
    }
}

fn is_stale_lock(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| STALE_LOCK_FILES.contains(&name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::SessionJanitor;

    #[tokio::test]
    async fn removes_singleton_locks_recursively() {
        let dir = TempDir::new().expect("tempdir");
        let profile = dir.path().join("session").join("Default");
        tokio::fs::create_dir_all(&profile).await.expect("mkdir");

        let lock = dir.path().join("session").join("SingletonLock");
        let nested_lock = profile.join("SingletonCookie");
        let keep = profile.join("Preferences");
        tokio::fs::write(&lock, b"").await.expect("write");
        tokio::fs::write(&nested_lock, b"").await.expect("write");
        tokio::fs::write(&keep, b"{}").await.expect("write");

        let janitor = SessionJanitor::new(dir.path().join("session"));
        janitor.remove_stale_locks().await.expect("clean");

        assert!(!lock.exists());
        assert!(!nested_lock.exists());
        assert!(keep.exists());
    }

    #[tokio::test]
    async fn missing_session_directory_is_not_an_error() {
        let dir = TempDir::new().expect("tempdir");
        let janitor = SessionJanitor::new(dir.path().join("never-created"));

        janitor.remove_stale_locks().await.expect("clean");
    }
}
