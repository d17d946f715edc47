// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Reads a `file://` address straight off disk. Never touches the cache
//! directory - a local address isn't something this crate owns, so
//! there's nothing to store a sidecar for.

use async_trait::async_trait;
use log::debug;

use crate::common::HeadersMap;
use crate::env::CacheEnv;
use crate::error::CacheErrorKind;
use crate::http_client::HttpClient;
use crate::state::FetchState;

use super::open_local;
use super::Strategy;
use super::StrategyOutcome;
use super::StreamHandoff;

pub struct LocalFetch;

#[async_trait]
impl<Env: CacheEnv, Http: HttpClient> Strategy<Env, Http> for LocalFetch {
  async fn fetch(
    &self,
    state: &mut FetchState,
    env: &Env,
    _http: &Http,
    on_stream: &mut Option<StreamHandoff>,
  ) -> Result<StrategyOutcome, crate::error::CacheError> {
    if !state.address.is_local() {
      return Ok(StrategyOutcome::NotApplicable);
    }
    debug!("LocalFetch::fetch - path: {}", state.address.path.display());
    if !state.options.allow_local {
      return Err(
        CacheErrorKind::AccessDenied {
          operation: "local fetch",
          url: state.address.path.display().to_string(),
        }
        .into_box(),
      );
    }

    if env.modified(&state.address.path).await.map_err(CacheErrorKind::Io)?.is_none() {
      return Err(
        CacheErrorKind::Io(std::io::Error::new(
          std::io::ErrorKind::NotFound,
          format!("no such file: {}", state.address.path.display()),
        ))
        .into_box(),
      );
    }

    let path = state.address.path.clone();
    open_local(env, state, &path, 200, "OK".to_string(), HeadersMap::new(), on_stream).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::address::Address;
  use crate::env::memory::MemoryCacheEnv;
  use crate::http_client::test_double::ChannelHttpClient;
  use crate::options::CacheOptions;
  use crate::options::ResolvedOptions;
  use futures::StreamExt;
  use tokio::sync::oneshot;

  fn resolved(options: CacheOptions) -> crate::options::ResolvedOptions {
    ResolvedOptions::new(&options, Default::default())
  }

  #[tokio::test]
  async fn streams_an_existing_local_file() {
    let env = MemoryCacheEnv::new();
    env.atomic_write_file("/tmp/x.txt".as_ref(), b"hello").await.unwrap();
    let address = Address::parse("file:///tmp/x.txt", None, None, "index.html");
    let options = resolved(CacheOptions {
      allow_local: true,
      ..Default::default()
    });
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });

    let http = ChannelHttpClient::new();
    let outcome = LocalFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap();
    assert!(matches!(outcome, StrategyOutcome::Streaming));

    let mut result = rx.await.unwrap().unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = result.stream.next().await {
      collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"hello");
  }

  #[tokio::test]
  async fn rejects_without_allow_local() {
    let env = MemoryCacheEnv::new();
    let address = Address::parse("file:///tmp/x.txt", None, None, "index.html");
    let options = resolved(CacheOptions::default());
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, _rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });
    let http = ChannelHttpClient::new();
    let err = LocalFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap_err();
    assert!(matches!(err.into_kind(), CacheErrorKind::AccessDenied { .. }));
  }

  #[tokio::test]
  async fn missing_file_is_an_io_error() {
    let env = MemoryCacheEnv::new();
    let address = Address::parse("file:///tmp/missing.txt", None, None, "index.html");
    let options = resolved(CacheOptions {
      allow_local: true,
      ..Default::default()
    });
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, _rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });
    let http = ChannelHttpClient::new();
    let err = LocalFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap_err();
    assert!(matches!(err.into_kind(), CacheErrorKind::Io(e) if e.kind() == std::io::ErrorKind::NotFound));
  }
}
