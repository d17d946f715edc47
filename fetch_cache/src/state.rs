// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Mutable per-request context, owned by the pipeline until the final
//! strategy resolves.

use tokio::sync::mpsc;
use tokio::sync::OwnedSemaphorePermit;

use crate::address::Address;
use crate::buffer_stream::BufferStream;
use crate::buffer_stream::BufferWriter;
use crate::options::ResolvedOptions;
use crate::result::ControlSignal;

pub struct FetchState {
  pub options: ResolvedOptions,
  pub address: Address,
  pub retries_remaining: u32,
  /// How many retry attempts have been consumed so far, used to compute
  /// the exponential backoff delay for the next one.
  pub attempt: u32,
  /// Index into the strategy pipeline; reset to 0 on every retry.
  pub strategy_num: usize,
  pub buffer: BufferWriter,
  pub is_streaming: bool,
  pub control_tx: mpsc::UnboundedSender<ControlSignal>,
  /// The cache's concurrency-limiting permit, held from pipeline entry
  /// until the moment `is_streaming` flips to `true`, then dropped. Body
  /// transfer after that point runs unbounded by `concurrency` - only
  /// getting to a first byte is what's bounded.
  pub streaming_permit: Option<OwnedSemaphorePermit>,
}

impl FetchState {
  /// Returns the state, the stream half handed to a caller via
  /// `CacheResult`, and the receiver half of the control channel - kept
  /// separate from `Self` so the orchestrator loop can race it against a
  /// strategy's in-flight future without two overlapping mutable borrows
  /// of the same struct.
  pub fn new(
    options: ResolvedOptions,
    address: Address,
  ) -> (Self, BufferStream, mpsc::UnboundedReceiver<ControlSignal>) {
    let (buffer, stream) = BufferStream::channel(16);
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let retries_remaining = options.retry_count;
    let state = Self {
      options,
      address,
      retries_remaining,
      attempt: 0,
      strategy_num: 0,
      buffer,
      is_streaming: false,
      control_tx,
      streaming_permit: None,
    };
    (state, stream, control_rx)
  }

  /// The exponential backoff delay for the *next* retry, per
  /// `retry_delay * retry_backoff_factor ^ attempt`.
  pub fn next_retry_delay(&self) -> std::time::Duration {
    let factor = self.options.retry_backoff_factor.powi(self.attempt as i32);
    self.options.retry_delay.mul_f64(factor.max(0.0))
  }
}
