// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! A pass-through byte channel that tracks cumulative bytes forwarded.
//!
//! The writer half (`BufferWriter`) is held by `FetchState` and survives
//! retries: if a caller has already drained N bytes from a prior
//! strategy's partial write, a subsequent strategy resumes the *same*
//! writer/`len` pair so the caller sees one uninterrupted byte sequence
//! rather than a fresh, truncated stream.

use std::io;
use std::pin::Pin;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use bytes::Bytes;
use futures::Stream;
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct BufferWriter {
  sender: mpsc::Sender<io::Result<Bytes>>,
  len: Arc<AtomicU64>,
}

impl BufferWriter {
  /// Forwards a chunk, returning `Err` if the consumer has gone away
  /// (e.g. `CacheResult::abort` dropped the receiver).
  pub async fn write(&self, chunk: Bytes) -> Result<(), ConsumerGoneError> {
    self.len.fetch_add(chunk.len() as u64, Ordering::SeqCst);
    self.sender.send(Ok(chunk)).await.map_err(|_| ConsumerGoneError)
  }

  /// Emits an error on the stream. Per the ordering guarantees, this
  /// should only be called after all buffered bytes for this attempt
  /// have already been forwarded.
  pub async fn write_error(&self, err: io::Error) {
    let _ = self.sender.send(Err(err)).await;
  }

  /// Cumulative bytes forwarded so far; the offset a resumed read should
  /// start at.
  pub fn len(&self) -> u64 {
    self.len.load(Ordering::SeqCst)
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

#[derive(Debug, thiserror::Error)]
#[error("the stream consumer has gone away")]
pub struct ConsumerGoneError;

/// The readable half, handed to the caller inside `CacheResult`.
pub struct BufferStream {
  receiver: mpsc::Receiver<io::Result<Bytes>>,
}

impl BufferStream {
  pub fn channel(capacity: usize) -> (BufferWriter, BufferStream) {
    let (sender, receiver) = mpsc::channel(capacity);
    (
      BufferWriter {
        sender,
        len: Arc::new(AtomicU64::new(0)),
      },
      BufferStream { receiver },
    )
  }
}

impl Stream for BufferStream {
  type Item = io::Result<Bytes>;

  fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
    self.receiver.poll_recv(cx)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use futures::StreamExt;

  #[tokio::test]
  async fn forwards_bytes_and_tracks_len() {
    let (writer, mut stream) = BufferStream::channel(8);
    writer.write(Bytes::from_static(b"hel")).await.unwrap();
    writer.write(Bytes::from_static(b"lo")).await.unwrap();
    assert_eq!(writer.len(), 5);
    drop(writer);
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
      collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"hello");
  }

  #[tokio::test]
  async fn error_replays_after_prior_bytes() {
    let (writer, mut stream) = BufferStream::channel(8);
    writer.write(Bytes::from_static(b"ok")).await.unwrap();
    writer
      .write_error(io::Error::new(io::ErrorKind::Other, "boom"))
      .await;
    drop(writer);
    assert_eq!(stream.next().await.unwrap().unwrap(), Bytes::from_static(b"ok"));
    assert!(stream.next().await.unwrap().is_err());
  }
}
