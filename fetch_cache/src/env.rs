// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Filesystem + clock abstraction, async throughout since the whole
//! fetch pipeline suspends on I/O rather than blocking a thread per
//! in-flight fetch.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::pin::Pin;
use std::time::SystemTime;

use async_trait::async_trait;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;

/// A byte source that can be asked to start at an offset, used when
/// resuming a cache read for a caller that already consumed part of a
/// `BufferStream` before a retry.
pub type BoxedAsyncRead = Pin<Box<dyn AsyncRead + Send>>;

/// A byte sink a caller writes a body to incrementally, one chunk at a
/// time, rather than handing over a fully-assembled buffer.
pub type BoxedAsyncWrite = Pin<Box<dyn AsyncWrite + Send>>;

#[async_trait]
pub trait CacheEnv: Send + Sync + std::fmt::Debug + Clone + 'static {
  /// Opens `path` for streaming read, seeking to `offset` bytes in first.
  async fn open_read(&self, path: &Path, offset: u64) -> io::Result<BoxedAsyncRead>;
  async fn read_file_bytes(&self, path: &Path) -> io::Result<Option<Vec<u8>>>;
  /// Writes `bytes` to `path`, creating any missing parent directories.
  /// "Atomic-enough": a reader mid-write may observe a short file, but
  /// never a mix of two different writes.
  async fn atomic_write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
  /// Opens `path` for streaming writes, truncating any existing contents
  /// and creating missing parent directories the same way
  /// `atomic_write_file` does. A caller writes chunks to the handle as
  /// they arrive instead of buffering a whole response before the first
  /// byte reaches disk.
  async fn create_write_stream(&self, path: &Path) -> io::Result<BoxedAsyncWrite>;
  async fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>>;
  async fn is_file(&self, path: &Path) -> bool;
  async fn is_dir(&self, path: &Path) -> bool;
  async fn create_dir(&self, path: &Path) -> io::Result<()>;
  async fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
  fn time_now(&self) -> SystemTime;
}

/// The real filesystem, backed by `tokio::fs`.
#[derive(Debug, Clone, Default)]
pub struct RealCacheEnv;

#[async_trait]
impl CacheEnv for RealCacheEnv {
  async fn open_read(&self, path: &Path, offset: u64) -> io::Result<BoxedAsyncRead> {
    use tokio::io::AsyncSeekExt;
    let mut file = tokio::fs::File::open(path).await?;
    if offset > 0 {
      file.seek(io::SeekFrom::Start(offset)).await?;
    }
    Ok(Box::pin(file))
  }

  async fn read_file_bytes(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
      Ok(bytes) => Ok(Some(bytes)),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err),
    }
  }

  async fn atomic_write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut writer = self.create_write_stream(path).await?;
    writer.write_all(bytes).await?;
    writer.flush().await
  }

  async fn create_write_stream(&self, path: &Path) -> io::Result<BoxedAsyncWrite> {
    match tokio::fs::File::create(path).await {
      Ok(file) => Ok(Box::pin(file)),
      Err(err) if err.kind() == io::ErrorKind::NotFound => {
        if let Some(parent) = path.parent() {
          crate::path_util::mkdirp(self, parent, crate::path_util::DEFAULT_INDEX_NAME).await?;
        }
        Ok(Box::pin(tokio::fs::File::create(path).await?))
      }
      Err(err) => Err(err),
    }
  }

  async fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>> {
    match tokio::fs::metadata(path).await {
      Ok(metadata) => Ok(Some(metadata.modified()?)),
      Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(err) => Err(err),
    }
  }

  async fn is_file(&self, path: &Path) -> bool {
    tokio::fs::metadata(path)
      .await
      .map(|m| m.is_file())
      .unwrap_or(false)
  }

  async fn is_dir(&self, path: &Path) -> bool {
    tokio::fs::metadata(path)
      .await
      .map(|m| m.is_dir())
      .unwrap_or(false)
  }

  async fn create_dir(&self, path: &Path) -> io::Result<()> {
    tokio::fs::create_dir(path).await
  }

  async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
    tokio::fs::rename(from, to).await
  }

  fn time_now(&self) -> SystemTime {
    #[allow(clippy::disallowed_methods)]
    SystemTime::now()
  }
}

/// An in-memory filesystem for deterministic tests, scoped to exactly
/// what `CacheEnv` needs.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
  use super::*;
  use parking_lot::Mutex;
  use std::collections::HashMap;
  use std::io::Cursor;
  use std::sync::Arc;
  use std::task::Context;
  use std::task::Poll;

  #[derive(Debug, Default, Clone)]
  pub struct MemoryCacheEnv {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    dirs: Arc<Mutex<std::collections::HashSet<PathBuf>>>,
  }

  impl MemoryCacheEnv {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn contains_file(&self, path: &Path) -> bool {
      self.files.lock().contains_key(path)
    }

    pub fn file_bytes(&self, path: &Path) -> Option<Vec<u8>> {
      self.files.lock().get(path).cloned()
    }
  }

  #[async_trait]
  impl CacheEnv for MemoryCacheEnv {
    async fn open_read(&self, path: &Path, offset: u64) -> io::Result<BoxedAsyncRead> {
      let bytes = self
        .files
        .lock()
        .get(path)
        .cloned()
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no such file"))?;
      let start = (offset as usize).min(bytes.len());
      Ok(Box::pin(Cursor::new(bytes[start..].to_vec())))
    }

    async fn read_file_bytes(&self, path: &Path) -> io::Result<Option<Vec<u8>>> {
      Ok(self.files.lock().get(path).cloned())
    }

    async fn atomic_write_file(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
      if let Some(parent) = path.parent() {
        self.dirs.lock().insert(parent.to_path_buf());
      }
      self.files.lock().insert(path.to_path_buf(), bytes.to_vec());
      Ok(())
    }

    async fn create_write_stream(&self, path: &Path) -> io::Result<BoxedAsyncWrite> {
      if let Some(parent) = path.parent() {
        self.dirs.lock().insert(parent.to_path_buf());
      }
      self.files.lock().insert(path.to_path_buf(), Vec::new());
      Ok(Box::pin(MemoryWriter {
        files: self.files.clone(),
        path: path.to_path_buf(),
      }))
    }

    async fn modified(&self, path: &Path) -> io::Result<Option<SystemTime>> {
      Ok(if self.contains_file(path) {
        Some(SystemTime::UNIX_EPOCH)
      } else {
        None
      })
    }

    async fn is_file(&self, path: &Path) -> bool {
      self.contains_file(path)
    }

    async fn is_dir(&self, path: &Path) -> bool {
      self.dirs.lock().contains(path)
    }

    async fn create_dir(&self, path: &Path) -> io::Result<()> {
      self.dirs.lock().insert(path.to_path_buf());
      Ok(())
    }

    async fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
      let mut files = self.files.lock();
      if let Some(bytes) = files.remove(from) {
        files.insert(to.to_path_buf(), bytes);
        return Ok(());
      }
      drop(files);
      let mut dirs = self.dirs.lock();
      if dirs.remove(from) {
        dirs.insert(to.to_path_buf());
        return Ok(());
      }
      Err(io::Error::new(io::ErrorKind::NotFound, "no such file or directory"))
    }

    fn time_now(&self) -> SystemTime {
      SystemTime::UNIX_EPOCH
    }
  }

  /// The `MemoryCacheEnv` side of a `create_write_stream` handle: every
  /// `poll_write` appends straight into the shared map under `path`.
  struct MemoryWriter {
    files: Arc<Mutex<HashMap<PathBuf, Vec<u8>>>>,
    path: PathBuf,
  }

  impl AsyncWrite for MemoryWriter {
    fn poll_write(
      self: Pin<&mut Self>,
      _cx: &mut Context<'_>,
      buf: &[u8],
    ) -> Poll<io::Result<usize>> {
      self.files.lock().entry(self.path.clone()).or_default().extend_from_slice(buf);
      Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
      Poll::Ready(Ok(()))
    }
  }
}
