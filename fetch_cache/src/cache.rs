// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! `Cache`: the public entry point. Resolves an address, spawns the
//! strategy pipeline as a background task bounded by a concurrency
//! semaphore, and hands the caller back a `CacheResult` as soon as the
//! first strategy opens a stream.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::Semaphore;
use url::Url;

use crate::address::Address;
use crate::common::HeadersMap;
use crate::env::CacheEnv;
use crate::env::RealCacheEnv;
use crate::error::CacheError;
use crate::error::CacheErrorKind;
use crate::http_client::HttpClient;
use crate::http_client::ReqwestHttpClient;
use crate::options::CacheOptions;
use crate::options::FetchOptions;
use crate::options::ResolvedOptions;
use crate::result::CacheResult;
use crate::result::ControlSignal;
use crate::state::FetchState;
use crate::strategy::filesystem_cache;
use crate::strategy::filesystem_cache::FileSystemCache;
use crate::strategy::filesystem_cache::StoreData;
use crate::strategy::local_fetch::LocalFetch;
use crate::strategy::remote_fetch::RemoteFetch;
use crate::strategy::Strategy;
use crate::strategy::StreamHandoff;

pub struct Cache<Env: CacheEnv = RealCacheEnv, Http: HttpClient = ReqwestHttpClient> {
  env: Arc<Env>,
  http: Arc<Http>,
  options: CacheOptions,
  strategies: Arc<Vec<Box<dyn Strategy<Env, Http>>>>,
  semaphore: Arc<Semaphore>,
}

impl Cache<RealCacheEnv, ReqwestHttpClient> {
  /// The production cache: a real filesystem and a `reqwest` client.
  pub fn new(options: CacheOptions) -> Self {
    Self::with_env_and_client(RealCacheEnv, ReqwestHttpClient::new(), options)
  }
}

impl<Env: CacheEnv, Http: HttpClient> Cache<Env, Http> {
  pub fn with_env_and_client(env: Env, http: Http, options: CacheOptions) -> Self {
    let concurrency = options.concurrency.max(1);
    let strategies: Vec<Box<dyn Strategy<Env, Http>>> =
      vec![Box::new(LocalFetch), Box::new(FileSystemCache), Box::new(RemoteFetch)];
    Self {
      env: Arc::new(env),
      http: Arc::new(http),
      options,
      strategies: Arc::new(strategies),
      semaphore: Arc::new(Semaphore::new(concurrency)),
    }
  }

  /// Runs the strategy pipeline for `uri` and resolves once the first
  /// byte range is ready to stream (or the pipeline gives up). The rest
  /// of the transfer continues in a background task, bounded by this
  /// cache's concurrency limit, even after this call returns.
  pub async fn fetch(&self, uri: &str, fetch_options: FetchOptions) -> Result<CacheResult, CacheError> {
    let resolved = ResolvedOptions::new(&self.options, fetch_options);
    let base_url = resolved
      .cwd
      .as_ref()
      .and_then(|cwd| Url::from_directory_path(cwd).ok());
    let address = Address::parse(uri, base_url.as_ref(), resolved.cache_key.clone(), &resolved.index_name);

    let (mut state, stream, control_rx) = FetchState::new(resolved, address);
    let (tx, rx) = oneshot::channel();

    let env = self.env.clone();
    let http = self.http.clone();
    let strategies = self.strategies.clone();
    let semaphore = self.semaphore.clone();

    tokio::spawn(async move {
      let permit = semaphore.acquire_owned().await.expect("semaphore is never closed");
      state.streaming_permit = Some(permit);
      fetch_detect(strategies.as_slice(), state, control_rx, stream, env, http, tx).await;
    });

    match rx.await {
      Ok(result) => result,
      Err(_) => Err(
        CacheErrorKind::Aborted(Some("the fetch task ended without producing a result".to_string())).into_box(),
      ),
    }
  }

  /// Writes a cache entry directly, without going through the strategy
  /// pipeline. Rejects `file:` addresses - the cache only owns entries it
  /// fetched itself.
  pub async fn store(
    &self,
    uri: &str,
    data: Option<StoreData>,
    headers: Option<HeadersMap>,
  ) -> Result<(), CacheError> {
    let base_url = self
      .options
      .cwd
      .as_ref()
      .and_then(|cwd| Url::from_directory_path(cwd).ok());
    let address = Address::parse(uri, base_url.as_ref(), None, &self.options.index_name);
    filesystem_cache::store(self.env.as_ref(), &address, data, headers).await
  }
}

/// Offers `state.address` to each strategy in turn, restarting from
/// strategy 0 on a redirect or a backed-off retry, until one streams, one
/// returns an authoritative error, or all of them decline. A
/// `CacheResult` is delivered to `on_stream_tx` the moment any strategy
/// opens a read; everything after that runs purely for its side effects
/// (the caller already has its stream).
async fn fetch_detect<Env: CacheEnv, Http: HttpClient>(
  strategies: &[Box<dyn Strategy<Env, Http>>],
  mut state: FetchState,
  mut control_rx: mpsc::UnboundedReceiver<ControlSignal>,
  stream: crate::buffer_stream::BufferStream,
  env: Arc<Env>,
  http: Arc<Http>,
  on_stream_tx: oneshot::Sender<Result<CacheResult, CacheError>>,
) {
  let mut on_stream = Some(StreamHandoff { tx: on_stream_tx, stream });
  let mut last_err: Option<CacheError> = None;

  'outer: loop {
    while state.strategy_num < strategies.len() {
      let idx = state.strategy_num;
      let fut = strategies[idx].fetch(&mut state, env.as_ref(), http.as_ref(), &mut on_stream);
      tokio::pin!(fut);

      let outcome = loop {
        tokio::select! {
          biased;
          signal = control_rx.recv() => {
            match signal {
              Some(ControlSignal::Abort(message)) => {
                finish_aborted(&mut state, &mut on_stream, message).await;
                return;
              }
              Some(ControlSignal::Retry(_message)) => {
                if state.retries_remaining > 0 {
                  state.retries_remaining -= 1;
                  state.attempt += 1;
                  state.strategy_num = 0;
                  continue 'outer;
                }
                // No budget left: a manual retry() is a no-op, keep
                // waiting on the strategy already in flight.
              }
              None => {
                // The `CacheResult` (and its control sender) was
                // dropped; nothing left to steer us, keep going.
              }
            }
          }
          result = &mut fut => break result,
        }
      };

      match outcome {
        Ok(crate::strategy::StrategyOutcome::NotApplicable) => {
          state.strategy_num += 1;
        }
        Ok(crate::strategy::StrategyOutcome::Streaming) => {
          return;
        }
        Ok(crate::strategy::StrategyOutcome::RetryNow) => {
          continue 'outer;
        }
        Ok(crate::strategy::StrategyOutcome::RetryAfterDelay(delay)) => {
          sleep_cancellable(delay, &mut control_rx).await;
          state.strategy_num = 0;
          continue 'outer;
        }
        Err(err) => {
          // Every strategy error (a cached 4xx, a disabled access mode,
          // a redirect budget blown, a retry budget exhausted) is
          // terminal for the pipeline - there's no sense trying the
          // next strategy, since strategies are keyed to mutually
          // exclusive address kinds and a real failure from the one
          // that applies is authoritative.
          last_err = Some(err);
          break 'outer;
        }
      }
    }
    break 'outer;
  }

  if let Some(tx) = on_stream.take().map(|handoff| handoff.tx) {
    let err = last_err.unwrap_or_else(|| {
      CacheErrorKind::NoStrategyApplied {
        url: state.address.url.as_ref().map(|u| u.to_string()).unwrap_or_default(),
      }
      .into_box()
    });
    let _ = tx.send(Err(err));
  } else if let Some(err) = last_err {
    state.buffer.write_error(std::io::Error::new(std::io::ErrorKind::Other, err.to_string())).await;
  }
}

async fn finish_aborted(
  state: &mut FetchState,
  on_stream: &mut Option<StreamHandoff>,
  message: Option<String>,
) {
  if state.is_streaming {
    let err = std::io::Error::new(std::io::ErrorKind::Interrupted, message.unwrap_or_else(|| "aborted".to_string()));
    state.buffer.write_error(err).await;
  } else if let Some(handoff) = on_stream.take() {
    let _ = handoff.tx.send(Err(CacheErrorKind::Aborted(message).into_box()));
  }
}

/// Waits out a backoff delay, but still reacts to an `Abort` arriving
/// mid-wait (a `Retry` during backoff is redundant - we're already
/// about to restart from strategy 0 - so it's simply consumed).
async fn sleep_cancellable(delay: Duration, control_rx: &mut mpsc::UnboundedReceiver<ControlSignal>) {
  let sleep = tokio::time::sleep(delay);
  tokio::pin!(sleep);
  loop {
    tokio::select! {
      _ = &mut sleep => return,
      signal = control_rx.recv() => {
        if matches!(signal, None | Some(ControlSignal::Abort(_))) {
          return;
        }
      }
    }
  }
}
