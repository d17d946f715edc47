// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Reads (and writes) the on-disk cache for remote addresses: a body file
//! plus a JSON sidecar of response headers, chained through any redirects
//! that were recorded when the entry was originally fetched.

use async_trait::async_trait;
use log::debug;

use crate::common::HeadersMap;
use crate::env::CacheEnv;
use crate::error::CachedError;
use crate::error::CacheErrorKind;
use crate::error::TooManyRedirectsError;
use crate::http_client::HttpClient;
use crate::sidecar;
use crate::sidecar::SidecarMetadata;
use crate::state::FetchState;

use super::open_local;
use super::Strategy;
use super::StrategyOutcome;
use super::StreamHandoff;

pub struct FileSystemCache;

struct ResolvedEntry {
  path: std::path::PathBuf,
  status: u16,
  message: String,
  headers: HeadersMap,
}

/// Follows the sidecar chain starting at `state.address`, mutating it in
/// place on every redirect (mirroring what a redirect response from
/// `RemoteFetch` would have done, just replayed from disk). Returns
/// `Ok(None)` on a plain cache miss - no sidecar, and no body either.
async fn resolve_cache_chain<Env: CacheEnv>(
  env: &Env,
  state: &mut FetchState,
) -> Result<Option<ResolvedEntry>, crate::error::CacheError> {
  let mut redirects_remaining = state.options.redirect_count;

  loop {
    let metadata = match sidecar::read_sidecar(env, &state.address.path).await.map_err(CacheErrorKind::Io)? {
      Some(metadata) => metadata,
      None => {
        // No sidecar: tolerate a body file with no metadata by treating
        // it as a plain 200, but a wholly absent entry is a miss.
        if !env.is_file(&state.address.path).await {
          return Ok(None);
        }
        return Ok(Some(ResolvedEntry {
          path: state.address.path.clone(),
          status: 200,
          message: "OK".to_string(),
          headers: HeadersMap::new(),
        }));
      }
    };

    if metadata.is_redirect() {
      if redirects_remaining == 0 {
        let url = state.address.url.clone().unwrap_or_else(|| url::Url::parse("about:blank").unwrap());
        return Err(
          CacheErrorKind::TooManyRedirects(TooManyRedirectsError {
            url,
            limit: state.options.redirect_count,
          })
          .into_box(),
        );
      }
      redirects_remaining -= 1;
      let target = metadata.target.clone().unwrap_or_default();
      state.address.redirect(&target, false, Some(metadata.headers.clone()));
      continue;
    }

    if (400..500).contains(&metadata.status) {
      return Err(
        CacheErrorKind::Cached(CachedError {
          status: metadata.status,
          message: metadata.message,
          headers: metadata.headers,
        })
        .into_box(),
      );
    }

    if !env.is_file(&state.address.path).await {
      // Sidecar is present but the body never landed (or was evicted
      // some other way) - treat it like a miss rather than serving an
      // empty body under the recorded headers.
      return Ok(None);
    }

    return Ok(Some(ResolvedEntry {
      path: state.address.path.clone(),
      status: metadata.status,
      message: metadata.message,
      headers: metadata.headers,
    }));
  }
}

#[async_trait]
impl<Env: CacheEnv, Http: HttpClient> Strategy<Env, Http> for FileSystemCache {
  async fn fetch(
    &self,
    state: &mut FetchState,
    env: &Env,
    _http: &Http,
    on_stream: &mut Option<StreamHandoff>,
  ) -> Result<StrategyOutcome, crate::error::CacheError> {
    // Owns everything that isn't a local file: both remote entries (the
    // common case) and urn-keyed entries, which are cache-only by
    // construction and only ever reach this crate through `store`.
    if state.address.is_local() || !state.options.allow_cache_read {
      return Ok(StrategyOutcome::NotApplicable);
    }
    debug!("FileSystemCache::fetch - path: {}", state.address.path.display());

    let Some(entry) = resolve_cache_chain(env, state).await? else {
      debug!("FileSystemCache::fetch - cache miss: {}", state.address.path.display());
      return Ok(StrategyOutcome::NotApplicable);
    };

    open_local(env, state, &entry.path, entry.status, entry.message, entry.headers, on_stream).await
  }
}

pub enum StoreData {
  Bytes(Vec<u8>),
  Text(String),
}

/// Writes (or just re-stamps the headers of) a cache entry directly,
/// bypassing the fetch pipeline entirely. Rejects local addresses - the
/// cache doesn't own files it didn't fetch itself.
pub async fn store<Env: CacheEnv>(
  env: &Env,
  address: &crate::address::Address,
  data: Option<StoreData>,
  headers: Option<HeadersMap>,
) -> Result<(), crate::error::CacheError> {
  if address.is_local() {
    return Err(
      CacheErrorKind::AccessDenied {
        operation: "store",
        url: address.path.display().to_string(),
      }
      .into_box(),
    );
  }

  if let Some(data) = data {
    let bytes: Vec<u8> = match data {
      StoreData::Bytes(bytes) => bytes,
      StoreData::Text(text) => text.into_bytes(),
    };
    env.atomic_write_file(&address.path, &bytes).await.map_err(CacheErrorKind::Io)?;
  }

  if let Some(headers) = headers {
    let metadata = SidecarMetadata::new(env.time_now(), 200, "OK".to_string(), headers);
    sidecar::write_sidecar(env, &address.path, &metadata).await.map_err(CacheErrorKind::Io)?;
  }

  Ok(())
}
