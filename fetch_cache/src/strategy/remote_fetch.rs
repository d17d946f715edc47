// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Gates `transfer::run` on the address being remote and the caller
//! actually allowing network access.

use async_trait::async_trait;

use crate::env::CacheEnv;
use crate::error::CacheErrorKind;
use crate::http_client::HttpClient;
use crate::state::FetchState;

use super::transfer;
use super::Strategy;
use super::StrategyOutcome;
use super::StreamHandoff;

pub struct RemoteFetch;

#[async_trait]
impl<Env: CacheEnv, Http: HttpClient> Strategy<Env, Http> for RemoteFetch {
  async fn fetch(
    &self,
    state: &mut FetchState,
    env: &Env,
    http: &Http,
    on_stream: &mut Option<StreamHandoff>,
  ) -> Result<StrategyOutcome, crate::error::CacheError> {
    if !state.address.is_remote() {
      return Ok(StrategyOutcome::NotApplicable);
    }
    if !state.options.allow_remote {
      return Err(
        CacheErrorKind::AccessDenied {
          operation: "remote fetch",
          url: state
            .address
            .url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_default(),
        }
        .into_box(),
      );
    }

    transfer::run(state, env, http, on_stream).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::address::Address;
  use crate::env::memory::MemoryCacheEnv;
  use crate::http_client::test_double::ChannelHttpClient;
  use crate::http_client::test_double::ScriptedResponse;
  use crate::options::CacheOptions;
  use crate::options::ResolvedOptions;
  use bytes::Bytes;
  use futures::StreamExt;
  use tokio::sync::oneshot;

  fn resolved(options: CacheOptions) -> ResolvedOptions {
    ResolvedOptions::new(&options, Default::default())
  }

  #[tokio::test]
  async fn streams_a_200_and_writes_it_to_the_cache() {
    let env = MemoryCacheEnv::new();
    let http = ChannelHttpClient::new();
    http.push(ScriptedResponse::Status {
      status: 200,
      headers: http::HeaderMap::new(),
      chunks: vec![Bytes::from_static(b"hello "), Bytes::from_static(b"world")],
    });

    let address = Address::parse("https://example.com/a.js", None, None, "index.html");
    let path = address.path.clone();
    let options = resolved(CacheOptions::default());
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });

    let outcome = RemoteFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap();
    assert!(matches!(outcome, StrategyOutcome::Streaming));

    let mut result = rx.await.unwrap().unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = result.stream.next().await {
      collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"hello world");
    assert_eq!(env.file_bytes(&path).unwrap(), b"hello world");
  }

  #[tokio::test]
  async fn follows_a_redirect_then_streams() {
    let env = MemoryCacheEnv::new();
    let http = ChannelHttpClient::new();
    let mut redirect_headers = http::HeaderMap::new();
    redirect_headers.insert(http::header::LOCATION, "https://example.com/b.js".parse().unwrap());
    http.push(ScriptedResponse::Status {
      status: 302,
      headers: redirect_headers,
      chunks: vec![],
    });
    http.push(ScriptedResponse::Status {
      status: 200,
      headers: http::HeaderMap::new(),
      chunks: vec![Bytes::from_static(b"final")],
    });

    let address = Address::parse("https://example.com/a.js", None, None, "index.html");
    let options = resolved(CacheOptions::default());
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });

    let first = RemoteFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap();
    assert!(matches!(first, StrategyOutcome::RetryNow));
    assert_eq!(state.strategy_num, 0);
    assert!(state.address.url.as_ref().unwrap().as_str().ends_with("/b.js"));

    let second = RemoteFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap();
    assert!(matches!(second, StrategyOutcome::Streaming));
    let mut result = rx.await.unwrap().unwrap();
    let mut collected = Vec::new();
    while let Some(chunk) = result.stream.next().await {
      collected.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(collected, b"final");
  }

  #[tokio::test]
  async fn exhausted_retry_budget_surfaces_transient_error() {
    let env = MemoryCacheEnv::new();
    let http = ChannelHttpClient::new();
    http.push(ScriptedResponse::TransientFailure);

    let address = Address::parse("https://example.com/a.js", None, None, "index.html");
    let options = resolved(CacheOptions {
      retry_count: 0,
      ..Default::default()
    });
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, _rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });

    let err = RemoteFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap_err();
    assert!(matches!(
      err.into_kind(),
      crate::error::CacheErrorKind::Transient { .. }
    ));
  }

  #[tokio::test]
  async fn retryable_failure_with_budget_schedules_a_delayed_retry() {
    let env = MemoryCacheEnv::new();
    let http = ChannelHttpClient::new();
    http.push(ScriptedResponse::TransientFailure);

    let address = Address::parse("https://example.com/a.js", None, None, "index.html");
    let options = resolved(CacheOptions {
      retry_count: 3,
      ..Default::default()
    });
    let (mut state, stream, _control_rx) = FetchState::new(options, address);
    let (tx, _rx) = oneshot::channel();
    let mut handoff = Some(StreamHandoff { tx, stream });

    let outcome = RemoteFetch.fetch(&mut state, &env, &http, &mut handoff).await.unwrap();
    assert!(matches!(outcome, StrategyOutcome::RetryAfterDelay(_)));
    assert_eq!(state.retries_remaining, 2);
  }
}
