// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Tagged error enum for the cache pipeline: every distinguishable
//! failure gets its own enum variant rather than a runtime status flag.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::io;

use boxed_error::Boxed;
use thiserror::Error;
use url::Url;

use crate::common::HeadersMap;

/// Transient network conditions that are safe to retry (connection
/// refused/reset, timeouts, and the like).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
  ConnectionRefused,
  ConnectionReset,
  HostUnreachable,
  NotFound,
  BrokenPipe,
  TimedOut,
}

impl TransientKind {
  pub fn from_io_error(err: &io::Error) -> Option<Self> {
    use io::ErrorKind::*;
    match err.kind() {
      ConnectionRefused => Some(Self::ConnectionRefused),
      ConnectionReset => Some(Self::ConnectionReset),
      HostUnreachable => Some(Self::HostUnreachable),
      BrokenPipe => Some(Self::BrokenPipe),
      TimedOut => Some(Self::TimedOut),
      NotFound => Some(Self::NotFound),
      _ => None,
    }
  }

  /// Best-effort classification of a `reqwest::Error`. Connect and timeout
  /// failures are transient; anything else (body decode, builder, TLS) is
  /// treated as fatal for the current attempt.
  pub fn from_reqwest_error(err: &reqwest::Error) -> Option<Self> {
    if err.is_timeout() {
      return Some(Self::TimedOut);
    }
    if err.is_connect() {
      return Some(Self::ConnectionRefused);
    }
    if let Some(io_err) = err
      .source()
      .and_then(|s| s.downcast_ref::<io::Error>())
    {
      return Self::from_io_error(io_err);
    }
    None
  }
}

/// Why an attempt was classified as retryable, carried onto the final
/// error once the retry budget runs out so a caller can tell a dropped
/// connection from a server that kept 500-ing.
#[derive(Debug, Clone)]
pub enum RetryReason {
  Network(TransientKind),
  ServerError(u16),
}

impl std::fmt::Display for RetryReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      RetryReason::Network(kind) => write!(f, "{kind:?}"),
      RetryReason::ServerError(status) => write!(f, "server status {status}"),
    }
  }
}

#[derive(Debug, Error)]
#[error("{status} {message}")]
pub struct CachedError {
  pub status: u16,
  pub message: String,
  pub headers: HeadersMap,
}

#[derive(Debug, Error)]
#[error("Fetch of {url} failed, too many redirects (limit {limit}).")]
pub struct TooManyRedirectsError {
  pub url: Url,
  pub limit: u32,
}

#[derive(Debug, Boxed)]
pub struct CacheError(pub Box<CacheErrorKind>);

#[derive(Debug, Error)]
pub enum CacheErrorKind {
  #[error(transparent)]
  Io(#[from] io::Error),

  #[error(transparent)]
  Cached(#[from] CachedError),

  #[error(transparent)]
  TooManyRedirects(#[from] TooManyRedirectsError),

  #[error("Access denied for {operation} on {url}.")]
  AccessDenied { operation: &'static str, url: String },

  #[error("{reason} for {url}, retry budget exhausted.")]
  Transient { reason: RetryReason, url: Url },

  #[error("No strategy handled {url}.")]
  NoStrategyApplied { url: String },

  #[error("request aborted{}", .0.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
  Aborted(Option<String>),
}

impl CacheErrorKind {
  /// Whether the pipeline should retry (with backoff) rather than
  /// surface this error to the caller. `CachedError` is authoritative
  /// and never retried locally (it's already been persisted).
  pub fn is_retryable(&self) -> bool {
    matches!(self, CacheErrorKind::Transient { .. })
  }

  pub fn as_cached(&self) -> Option<&CachedError> {
    match self {
      CacheErrorKind::Cached(err) => Some(err),
      _ => None,
    }
  }
}

impl CachedError {
  pub fn public_headers(&self) -> HashMap<String, String> {
    self
      .headers
      .iter()
      .filter(|(k, _)| !k.starts_with("cget-"))
      .map(|(k, v)| (k.clone(), v.clone()))
      .collect()
  }
}
