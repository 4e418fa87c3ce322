//! Polling-based registry file watcher.
//!
//! Checks a registry file's mtime every 2 seconds. When a change is detected,
//! debounces for 500 ms (editors write in stages), then invokes the reload
//! callback. A failed reload keeps the previous snapshot active — readers
//! never observe a broken registry.
//!
//! Shared by the dependency-graph and runbook registries.

use std::path::PathBuf;
use std::time::SystemTime;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::defaults::{WATCH_DEBOUNCE_MS, WATCH_POLL_INTERVAL_SECONDS};
use crate::error::PipelineError;

/// Events emitted by a registry watcher.
#[derive(Debug)]
pub enum RegistryEvent {
    /// Registry reloaded; carries the new snapshot hash.
    Reloaded { name: &'static str, hash: String },
    /// Reload attempted but failed; previous snapshot remains active.
    Error { name: &'static str, message: String },
}

/// Run a watcher loop for one registry file.
///
/// `reload` parses + validates the file and swaps the snapshot, returning the
/// new snapshot hash. Events go to `tx`; the loop ends on cancellation or a
/// closed channel.
pub async fn watch_registry<F>(
    name: &'static str,
    path: PathBuf,
    cancel: CancellationToken,
    tx: mpsc::Sender<RegistryEvent>,
    reload: F,
) where
    F: Fn(&std::path::Path) -> Result<String, PipelineError> + Send + 'static,
{
    tracing::info!(registry = name, path = %path.display(), "registry watcher started");

    let poll = std::time::Duration::from_secs(WATCH_POLL_INTERVAL_SECONDS);
    let debounce = std::time::Duration::from_millis(WATCH_DEBOUNCE_MS);
    let mut last_mtime = mtime(&path);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                tracing::debug!(registry = name, "registry watcher stopping");
                return;
            }
            () = tokio::time::sleep(poll) => {}
        }

        let current = match mtime(&path) {
            Some(t) => t,
            None => {
                if last_mtime.is_some() {
                    tracing::warn!(
                        registry = name,
                        path = %path.display(),
                        "registry file not accessible — keeping current snapshot, will retry"
                    );
                    last_mtime = None;
                }
                continue;
            }
        };

        let changed = match last_mtime {
            Some(prev) => current != prev,
            None => true, // file reappeared
        };
        if !changed {
            continue;
        }

        // Debounce, then confirm the write settled.
        tokio::time::sleep(debounce).await;
        if mtime(&path) != Some(current) {
            continue;
        }
        last_mtime = Some(current);

        let event = match reload(&path) {
            Ok(hash) => {
                tracing::info!(registry = name, hash = %hash, "registry hot-reloaded");
                RegistryEvent::Reloaded { name, hash }
            }
            Err(e) => {
                tracing::error!(
                    registry = name,
                    error = %e,
                    "registry hot-reload failed — keeping previous snapshot"
                );
                RegistryEvent::Error {
                    name,
                    message: e.to_string(),
                }
            }
        };

        if tx.send(event).await.is_err() {
            tracing::debug!(registry = name, "registry watcher channel closed, stopping");
            return;
        }
    }
}

/// Modification time of a file, None on any error.
fn mtime(path: &PathBuf) -> Option<SystemTime> {
    std::fs::metadata(path).ok().and_then(|m| m.modified().ok())
}
