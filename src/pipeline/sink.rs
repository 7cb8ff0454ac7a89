//! Destinations for streamed audio

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// A consumer of audio chunks as they are produced
#[async_trait]
pub trait LiveSink: Send {
    /// Forward one chunk
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` once the consumer has gone away
    async fn send(&mut self, chunk: &[u8]) -> Result<()>;
}

/// Live sink backed by a bounded channel, e.g. an HTTP response body
pub struct ChannelSink {
    tx: mpsc::Sender<Vec<u8>>,
}

impl ChannelSink {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<Vec<u8>>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl LiveSink for ChannelSink {
    async fn send(&mut self, chunk: &[u8]) -> Result<()> {
        self.tx
            .send(chunk.to_vec())
            .await
            .map_err(|_| Error::Cancelled("live consumer disconnected".to_string()))
    }
}

/// Live sink that drops everything, for runs with no listener
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl LiveSink for DiscardSink {
    async fn send(&mut self, _chunk: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Audio file that only survives if explicitly committed
///
/// Dropping an uncommitted sink deletes its file, so every early return
/// and every cancelled future leaves nothing behind.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    written: usize,
}

impl FileSink {
    /// Create a uniquely named `<uuid>_output.mp3` in `dir`
    ///
    /// # Errors
    ///
    /// Returns error if the directory or file cannot be created
    pub async fn create(dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(format!("{}_output.mp3", uuid::Uuid::new_v4()));

        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        tracing::debug!(path = %path.display(), "opened audio file");
        Ok(Self {
            path,
            file: Some(file),
            written: 0,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes written so far
    #[must_use]
    pub const fn written(&self) -> usize {
        self.written
    }

    /// Append a chunk and flush it before returning
    ///
    /// # Errors
    ///
    /// Returns `Io` if the write fails or the sink is already closed
    pub async fn write(&mut self, chunk: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| std::io::Error::other("audio file already closed"))?;

        file.write_all(chunk).await?;
        file.flush().await?;
        self.written += chunk.len();
        Ok(())
    }

    /// Close the file and keep it
    ///
    /// # Errors
    ///
    /// Returns `Io` if the final sync fails; the file is removed in that case
    pub async fn commit(mut self) -> Result<PathBuf> {
        if let Some(file) = self.file.as_mut() {
            file.flush().await?;
            file.sync_all().await?;
        }
        self.file = None;

        tracing::debug!(path = %self.path.display(), bytes = self.written, "audio file committed");
        Ok(std::mem::take(&mut self.path))
    }

    /// Close and delete the file
    pub async fn abort(mut self) {
        if self.file.take().is_some() {
            match tokio::fs::remove_file(&self.path).await {
                Ok(()) => {
                    tracing::debug!(
                        path = %self.path.display(),
                        bytes = self.written,
                        "audio file discarded"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "failed to remove audio file"
                    );
                }
            }
        }
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        if self.file.take().is_some() {
            if let Err(e) = std::fs::remove_file(&self.path) {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to remove audio file"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(&dir.path().join("out")).await.unwrap();
        sink.write(b"ab").await.unwrap();
        sink.write(b"c").await.unwrap();

        let path = sink.commit().await.unwrap();
        assert!(path.file_name().unwrap().to_str().unwrap().ends_with("_output.mp3"));
        assert_eq!(std::fs::read(&path).unwrap(), b"abc");
    }

    #[tokio::test]
    async fn abort_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(dir.path()).await.unwrap();
        sink.write(b"partial").await.unwrap();
        let path = sink.path().to_path_buf();

        sink.abort().await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn drop_removes_uncommitted_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::create(dir.path()).await.unwrap();
        let path = sink.path().to_path_buf();
        assert!(path.exists());

        drop(sink);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn names_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = FileSink::create(dir.path()).await.unwrap();
        let b = FileSink::create(dir.path()).await.unwrap();
        assert_ne!(a.path(), b.path());
    }

    #[tokio::test]
    async fn channel_sink_reports_cancellation() {
        let (tx, rx) = mpsc::channel(1);
        let mut sink = ChannelSink::new(tx);
        drop(rx);

        assert!(matches!(sink.send(b"x").await, Err(Error::Cancelled(_))));
    }
}
