//! Background maintenance: hourly memory decay, six-hourly upload cleanup.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant};
use tracing::{info, warn};

use talon_telegram::App;

const DECAY_INTERVAL: Duration = Duration::from_secs(3_600);
const UPLOAD_CLEANUP_INTERVAL: Duration = Duration::from_secs(6 * 3_600);
/// Downloaded attachments live for a day.
const UPLOAD_MAX_AGE: Duration = Duration::from_secs(24 * 3_600);

pub async fn run(app: Arc<App>, uploads_dir: std::path::PathBuf, mut shutdown: watch::Receiver<bool>) {
    let mut decay = interval_at(Instant::now() + DECAY_INTERVAL, DECAY_INTERVAL);
    let mut cleanup = interval_at(
        Instant::now() + UPLOAD_CLEANUP_INTERVAL,
        UPLOAD_CLEANUP_INTERVAL,
    );

    loop {
        tokio::select! {
            _ = decay.tick() => {
                if let Err(e) = app.memory.decay_sweep(Utc::now().timestamp()) {
                    warn!(error = %e, "decay sweep failed");
                }
            }
            _ = cleanup.tick() => {
                let removed = cleanup_uploads(&uploads_dir, UPLOAD_MAX_AGE).await;
                info!(removed, "upload cleanup pass done");
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("maintenance timers stopping");
                    break;
                }
            }
        }
    }
}

/// Delete files under `dir` older than `max_age`. Returns how many went.
pub async fn cleanup_uploads(dir: &Path, max_age: Duration) -> usize {
    let mut removed = 0;
    let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
        return 0;
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let age = meta
            .modified()
            .ok()
            .and_then(|m| m.elapsed().ok())
            .unwrap_or_default();
        if age >= max_age && tokio::fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fresh_files_survive_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("123-abc.jpg");
        tokio::fs::write(&file, b"data").await.unwrap();
        let removed = cleanup_uploads(dir.path(), UPLOAD_MAX_AGE).await;
        assert_eq!(removed, 0);
        assert!(file.exists());
    }

    #[tokio::test]
    async fn zero_max_age_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("a.jpg"), b"1").await.unwrap();
        tokio::fs::write(dir.path().join("b.ogg"), b"2").await.unwrap();
        let removed = cleanup_uploads(dir.path(), Duration::ZERO).await;
        assert_eq!(removed, 2);
    }

    #[tokio::test]
    async fn missing_directory_is_a_quiet_no_op() {
        let removed = cleanup_uploads(Path::new("/definitely/not/here"), Duration::ZERO).await;
        assert_eq!(removed, 0);
    }
}
