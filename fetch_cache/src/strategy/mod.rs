// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! The strategy pipeline: each address is offered to `LocalFetch`,
//! `FileSystemCache`, and `RemoteFetch` in turn until one of them opens a
//! stream, asks for a retry, or every strategy declines.

pub mod filesystem_cache;
pub mod local_fetch;
pub mod remote_fetch;
pub mod transfer;

use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::sync::oneshot;

use crate::common::public_headers;
use crate::common::HeadersMap;
use crate::env::BoxedAsyncRead;
use crate::env::CacheEnv;
use crate::error::CacheError;
use crate::http_client::HttpClient;
use crate::result::CacheResult;
use crate::state::FetchState;

/// What a strategy did with the address it was offered.
pub enum StrategyOutcome {
  /// This strategy doesn't handle the address at all (wrong kind, or
  /// disabled by options); try the next one.
  NotApplicable,
  /// A stream was opened (or already was, from a prior strategy) and has
  /// now run to completion. The pipeline is done.
  Streaming,
  /// Restart the pipeline from strategy 0 immediately - used for
  /// redirects, where the new address needs a fresh look at the cache.
  RetryNow,
  /// Restart the pipeline from strategy 0 after `Duration` - used for
  /// transient network/server failures, once retry budget is consumed.
  RetryAfterDelay(Duration),
}

/// The oneshot half of delivering the first `CacheResult` to a caller,
/// paired with the stream it should carry. Threaded through every
/// strategy so whichever one first manages to open a read can fire it
/// exactly once.
pub struct StreamHandoff {
  pub tx: oneshot::Sender<Result<CacheResult, CacheError>>,
  pub stream: crate::buffer_stream::BufferStream,
}

#[async_trait]
pub trait Strategy<Env: CacheEnv, Http: HttpClient>: Send + Sync {
  async fn fetch(
    &self,
    state: &mut FetchState,
    env: &Env,
    http: &Http,
    on_stream: &mut Option<StreamHandoff>,
  ) -> Result<StrategyOutcome, CacheError>;
}

/// Shared by `LocalFetch` and `FileSystemCache`: both end up opening a
/// plain file for read and piping it to the caller's buffer. Resumes
/// from `state.buffer.len()` rather than 0 so a caller that already
/// consumed part of a prior attempt's bytes doesn't see them twice.
pub async fn open_local<Env: CacheEnv>(
  env: &Env,
  state: &mut FetchState,
  path: &std::path::Path,
  status: u16,
  message: String,
  headers: HeadersMap,
  on_stream: &mut Option<StreamHandoff>,
) -> Result<StrategyOutcome, CacheError> {
  let offset = state.buffer.len();
  let reader = env
    .open_read(path, offset)
    .await
    .map_err(crate::error::CacheErrorKind::Io)?;

  if !state.is_streaming {
    if let Some(handoff) = on_stream.take() {
      let result = CacheResult::new(
        handoff.stream,
        state.address.clone(),
        status,
        message,
        public_headers(&headers),
        state.control_tx.clone(),
      );
      let _ = handoff.tx.send(Ok(result));
    }
    state.is_streaming = true;
    state.streaming_permit = None;
  }

  pump_reader(reader, &state.buffer).await;
  Ok(StrategyOutcome::Streaming)
}

/// Copies a reader to the buffer in fixed-size chunks until EOF or the
/// consumer goes away. Read errors are forwarded to the consumer rather
/// than propagated, since by this point the stream is already open and
/// the only honest way to report a mid-read failure is on the stream
/// itself.
async fn pump_reader(mut reader: BoxedAsyncRead, buffer: &crate::buffer_stream::BufferWriter) {
  let mut chunk = vec![0u8; 64 * 1024];
  loop {
    match reader.read(&mut chunk).await {
      Ok(0) => break,
      Ok(n) => {
        if buffer.write(bytes::Bytes::copy_from_slice(&chunk[..n])).await.is_err() {
          break;
        }
      }
      Err(err) => {
        buffer.write_error(err).await;
        break;
      }
    }
  }
}
