//! Append-only message log.
//!
//! One JSON object per line, in the order messages were accepted.

use super::{PersistError, Persister};
use parley_core::Envelope;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{error, info};

/// Persister writing newline-delimited JSON envelopes to a file.
pub struct JsonlPersister {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlPersister {
    /// Open (creating if needed) the log at `path` for appending.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, PersistError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        info!(path = %path.display(), "message log opened");
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Get the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, envelope: &Envelope) -> Result<(), PersistError> {
        let mut line = serde_json::to_string(envelope)?;
        line.push('\n');
        let mut file = self.file.lock().await;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

impl Persister for JsonlPersister {
    fn create<'a>(
        &'a self,
        envelope: &'a Envelope,
    ) -> Pin<Box<dyn Future<Output = Result<(), PersistError>> + Send + 'a>> {
        Box::pin(self.append(envelope))
    }
}

/// Load every envelope from a log, skipping malformed lines.
pub async fn load_messages(path: &Path) -> std::io::Result<Vec<Envelope>> {
    let content = tokio::fs::read_to_string(path).await?;
    let mut messages = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(line) {
            Ok(envelope) => messages.push(envelope),
            Err(e) => {
                error!(error = %e, "skipping malformed message log line");
            }
        }
    }
    Ok(messages)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{InboundFrame, UserId};

    fn envelope(text: &str) -> Envelope {
        Envelope::stamp(
            InboundFrame {
                receiver_id: UserId::random(),
                payload: text.into(),
            },
            UserId::random(),
        )
    }

    #[tokio::test]
    async fn appends_and_reloads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log").join("messages.jsonl");
        let persister = JsonlPersister::open(&path).await.unwrap();

        let first = envelope("first");
        let second = envelope("second");
        persister.create(&first).await.unwrap();
        persister.create(&second).await.unwrap();

        let loaded = load_messages(&path).await.unwrap();
        assert_eq!(loaded, vec![first, second]);
    }

    #[tokio::test]
    async fn reopening_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("messages.jsonl");
        JsonlPersister::open(&path)
            .await
            .unwrap()
            .create(&envelope("a"))
            .await
            .unwrap();
        JsonlPersister::open(&path)
            .await
            .unwrap()
            .create(&envelope("b"))
            .await
            .unwrap();
        tokio::fs::write(
            &path,
            format!("{}not json\n", tokio::fs::read_to_string(&path).await.unwrap()),
        )
        .await
        .unwrap();

        let loaded = load_messages(&path).await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].payload.as_text(), Some("b"));
    }
}
