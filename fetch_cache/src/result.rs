// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! The facade delivered to a caller of [`crate::Cache::fetch`].
//!
//! `CacheResult` observes the running fetch through a control channel; it
//! does not own the `FetchState` driving the pipeline.

use tokio::sync::mpsc;

use crate::address::Address;
use crate::buffer_stream::BufferStream;
use crate::common::HeadersMap;

/// Sent from a `CacheResult` back into the task running `fetch_detect`.
#[derive(Debug)]
pub enum ControlSignal {
  /// Restart the pipeline from strategy 0, if any retry budget remains.
  Retry(Option<String>),
  /// Terminate the current attempt and surface `err` (or a generic
  /// "aborted") on the stream.
  Abort(Option<String>),
}

pub struct CacheResult {
  pub stream: BufferStream,
  pub address: Address,
  pub status: u16,
  pub message: String,
  /// Response headers with internal `cget-*` fields stripped.
  pub headers: HeadersMap,
  control: mpsc::UnboundedSender<ControlSignal>,
}

impl CacheResult {
  pub(crate) fn new(
    stream: BufferStream,
    address: Address,
    status: u16,
    message: String,
    headers: HeadersMap,
    control: mpsc::UnboundedSender<ControlSignal>,
  ) -> Self {
    Self {
      stream,
      address,
      status,
      message,
      headers,
      control,
    }
  }

  /// Resets the pipeline to strategy 0 and consumes one unit of retry
  /// budget, resuming from the byte offset already delivered to the
  /// caller. A no-op if the underlying fetch has already finished or if
  /// no retry budget remains.
  pub fn retry(&self, err: Option<String>) {
    let _ = self.control.send(ControlSignal::Retry(err));
  }

  /// Forces the in-flight attempt to terminate and the stream to end in
  /// an error.
  pub fn abort(&self, err: Option<String>) {
    let _ = self.control.send(ControlSignal::Abort(err));
  }
}

impl std::fmt::Debug for CacheResult {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheResult")
      .field("address", &self.address)
      .field("status", &self.status)
      .field("message", &self.message)
      .finish()
  }
}
