// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Runs one HTTP request to completion: classifies the response,
//! intercepts redirects instead of following them transport-side, retries
//! transient failures and 5xx with backoff, and on 200 tees the body to
//! both the caller's stream and the on-disk cache.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use futures::StreamExt;
use log::debug;
use log::warn;

use crate::common::public_headers;
use crate::common::HeadersMap;
use crate::env::CacheEnv;
use crate::error::CacheErrorKind;
use crate::error::CachedError;
use crate::error::RetryReason;
use crate::error::TransientKind;
use crate::http_client::HttpClient;
use crate::http_client::HttpRequest;
use crate::http_client::HttpSendError;
use crate::result::CacheResult;
use crate::sidecar::SidecarMetadata;
use crate::state::FetchState;

use super::StrategyOutcome;
use super::StreamHandoff;

fn headers_map(headers: &http::HeaderMap) -> HeadersMap {
  headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
    })
    .collect()
}

fn retry_later(
  state: &mut FetchState,
  reason: RetryReason,
  url: &url::Url,
) -> Result<StrategyOutcome, crate::error::CacheError> {
  if state.retries_remaining == 0 {
    return Err(CacheErrorKind::Transient { reason, url: url.clone() }.into_box());
  }
  let delay = state.next_retry_delay();
  state.retries_remaining -= 1;
  state.attempt += 1;
  warn!("Transfer::run - retrying {url} after {reason} ({delay:?}, {} attempts left)", state.retries_remaining);
  Ok(StrategyOutcome::RetryAfterDelay(delay))
}

pub async fn run<Env: CacheEnv, Http: HttpClient>(
  state: &mut FetchState,
  env: &Env,
  http: &Http,
  on_stream: &mut Option<StreamHandoff>,
) -> Result<StrategyOutcome, crate::error::CacheError> {
  let url = state
    .address
    .url
    .clone()
    .expect("a remote address always carries a parsed url");
  let request_url = match &state.options.rewrite {
    Some(rewrite) => rewrite(&url),
    None => url.clone(),
  };

  let mut headers = http::HeaderMap::new();
  if let (Some(username), Some(password)) = (&state.options.username, &state.options.password) {
    let token = BASE64.encode(format!("{username}:{password}"));
    if let Ok(value) = http::HeaderValue::from_str(&format!("Basic {token}")) {
      headers.insert(http::header::AUTHORIZATION, value);
    }
  }
  if let Some(user_agent) = &state.options.request_config.user_agent {
    if let Ok(value) = http::HeaderValue::from_str(user_agent) {
      headers.insert(http::header::USER_AGENT, value);
    }
  }

  debug!("Transfer::run - url: {request_url}");

  let request = HttpRequest {
    url: request_url,
    headers,
    timeout: state.options.timeout,
  };

  let response = match http.send(request).await {
    Ok(response) => response,
    Err(HttpSendError::Transient(io_err)) => {
      let kind = TransientKind::from_io_error(&io_err).unwrap_or(TransientKind::TimedOut);
      return retry_later(state, RetryReason::Network(kind), &url);
    }
    Err(HttpSendError::Fatal(io_err)) => return Err(CacheErrorKind::Io(io_err).into_box()),
  };

  if (300..=308).contains(&response.status) {
    return handle_redirect(state, env, &response).await;
  }

  if (500..600).contains(&response.status) {
    return retry_later(state, RetryReason::ServerError(response.status), &url);
  }

  let response_headers = headers_map(&response.headers);

  if response.status != 200 {
    let cached = CachedError {
      status: response.status,
      message: response.reason.clone(),
      headers: response_headers.clone(),
    };
    if state.options.allow_cache_write {
      let metadata = SidecarMetadata::new(env.time_now(), response.status, response.reason.clone(), response_headers);
      let _ = crate::sidecar::write_sidecar(env, &state.address.path, &metadata).await;
    }
    return Err(CacheErrorKind::Cached(cached).into_box());
  }

  stream_success_body(state, env, response, response_headers, on_stream).await
}

async fn handle_redirect<Env: CacheEnv>(
  state: &mut FetchState,
  env: &Env,
  response: &crate::http_client::HttpResponseStart,
) -> Result<StrategyOutcome, crate::error::CacheError> {
  let location = response
    .headers
    .get(http::header::LOCATION)
    .and_then(|v| v.to_str().ok());

  let Some(location) = location else {
    let headers = headers_map(&response.headers);
    return Err(
      CacheErrorKind::Cached(CachedError {
        status: response.status,
        message: "redirect response missing a Location header".to_string(),
        headers,
      })
      .into_box(),
    );
  };
  debug!("Transfer::handle_redirect - redirecting to {location:?}");

  let mut sidecar_headers = headers_map(&response.headers);
  sidecar_headers.insert(crate::common::STATUS_KEY.to_string(), response.status.to_string());
  sidecar_headers.insert(crate::common::MESSAGE_KEY.to_string(), response.reason.clone());

  if state.options.allow_cache_write {
    let metadata = SidecarMetadata::redirect(
      env.time_now(),
      response.status,
      response.reason.clone(),
      sidecar_headers.clone(),
      location.to_string(),
    );
    let _ = crate::sidecar::write_sidecar(env, &state.address.path, &metadata).await;
  }

  state.address.redirect(location, false, Some(sidecar_headers));
  state.strategy_num = 0;
  Ok(StrategyOutcome::RetryNow)
}

async fn stream_success_body<Env: CacheEnv>(
  state: &mut FetchState,
  env: &Env,
  response: crate::http_client::HttpResponseStart,
  response_headers: HeadersMap,
  on_stream: &mut Option<StreamHandoff>,
) -> Result<StrategyOutcome, crate::error::CacheError> {
  // Every hop along the way already has its own sidecar-only redirect
  // entry, written eagerly by `handle_redirect` as it was followed; by
  // the time a 200 lands here the whole chain already resolves, so there
  // is nothing left to backfill.
  let stamp = env.time_now();

  if !state.is_streaming {
    if let Some(handoff) = on_stream.take() {
      let result = CacheResult::new(
        handoff.stream,
        state.address.clone(),
        response.status,
        response.reason.clone(),
        public_headers(&response_headers),
        state.control_tx.clone(),
      );
      let _ = handoff.tx.send(Ok(result));
    }
    state.is_streaming = true;
    state.streaming_permit = None;
  }

  let mut body = response.body;
  let mut writer = if state.options.allow_cache_write {
    env.create_write_stream(&state.address.path).await.ok()
  } else {
    None
  };

  while let Some(item) = body.next().await {
    match item {
      Ok(chunk) => {
        if let Some(w) = writer.as_mut() {
          use tokio::io::AsyncWriteExt;
          if w.write_all(&chunk).await.is_err() {
            // Can't finish writing the cache copy; the caller's own
            // stream still gets every byte below.
            writer = None;
          }
        }
        if state.buffer.write(chunk).await.is_err() {
          // Caller dropped the stream; still worth finishing the write
          // to cache below if it's still going, but there's no more
          // reason to keep pumping bytes it'll never see.
          break;
        }
      }
      Err(err) => {
        state.buffer.write_error(err).await;
        writer = None;
        break;
      }
    }
  }

  if let Some(mut w) = writer {
    use tokio::io::AsyncWriteExt;
    if w.flush().await.is_ok() {
      let metadata = SidecarMetadata::new(stamp, response.status, response.reason, response_headers);
      let _ = crate::sidecar::write_sidecar(env, &state.address.path, &metadata).await;
    }
  }

  Ok(StrategyOutcome::Streaming)
}
