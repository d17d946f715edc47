// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use url::Url;

/// A URL rewrite hook, applied to the initial request URL and again on
/// every followed redirect.
pub type RewriteFn = Arc<dyn Fn(&Url) -> Url + Send + Sync>;

/// Options that apply to every fetch made through a [`crate::Cache`],
/// overlaid per-call by [`FetchOptions`].
#[derive(Clone)]
pub struct CacheOptions {
  pub allow_local: bool,
  pub allow_remote: bool,
  pub allow_cache_read: bool,
  pub allow_cache_write: bool,
  pub rewrite: Option<RewriteFn>,
  pub username: Option<String>,
  pub password: Option<String>,
  pub timeout: Option<Duration>,
  pub cwd: Option<PathBuf>,
  pub request_config: RequestConfig,
  pub retry_count: u32,
  pub retry_delay: Duration,
  pub retry_backoff_factor: f64,
  pub redirect_count: u32,
  pub index_name: String,
  pub concurrency: usize,
}

impl std::fmt::Debug for CacheOptions {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheOptions")
      .field("allow_local", &self.allow_local)
      .field("allow_remote", &self.allow_remote)
      .field("allow_cache_read", &self.allow_cache_read)
      .field("allow_cache_write", &self.allow_cache_write)
      .field("has_rewrite", &self.rewrite.is_some())
      .field("timeout", &self.timeout)
      .field("cwd", &self.cwd)
      .field("retry_count", &self.retry_count)
      .field("retry_delay", &self.retry_delay)
      .field("retry_backoff_factor", &self.retry_backoff_factor)
      .field("redirect_count", &self.redirect_count)
      .field("index_name", &self.index_name)
      .field("concurrency", &self.concurrency)
      .finish()
  }
}

impl Default for CacheOptions {
  fn default() -> Self {
    Self {
      allow_local: false,
      allow_remote: true,
      allow_cache_read: true,
      allow_cache_write: true,
      rewrite: None,
      username: None,
      password: None,
      timeout: None,
      cwd: None,
      request_config: RequestConfig::default(),
      retry_count: 0,
      retry_delay: Duration::from_millis(0),
      retry_backoff_factor: 1.0,
      redirect_count: 10,
      index_name: "index.html".to_string(),
      concurrency: 2,
    }
  }
}

/// Per-call overrides, applied on top of a `Cache`'s `CacheOptions`.
/// `concurrency` has no per-call equivalent - it bounds a whole `Cache`,
/// not a single fetch.
#[derive(Clone, Default)]
pub struct FetchOptions {
  pub allow_local: Option<bool>,
  pub allow_remote: Option<bool>,
  pub allow_cache_read: Option<bool>,
  pub allow_cache_write: Option<bool>,
  pub rewrite: Option<RewriteFn>,
  pub username: Option<String>,
  pub password: Option<String>,
  pub timeout: Option<Duration>,
  pub cwd: Option<PathBuf>,
  pub cache_key: Option<String>,
  pub request_config: Option<RequestConfig>,
  pub retry_count: Option<u32>,
  pub retry_delay: Option<Duration>,
  pub retry_backoff_factor: Option<f64>,
  pub redirect_count: Option<u32>,
  pub index_name: Option<String>,
}

/// Opaque, pass-through configuration for the underlying HTTP client.
/// Kept minimal: this crate doesn't interpret most HTTP client knobs
/// itself.
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
  pub user_agent: Option<String>,
  pub accept_invalid_certs: bool,
}

/// The fully-resolved options for one fetch, after overlaying
/// `FetchOptions` onto a `Cache`'s `CacheOptions`.
#[derive(Clone)]
pub(crate) struct ResolvedOptions {
  pub allow_local: bool,
  pub allow_remote: bool,
  pub allow_cache_read: bool,
  pub allow_cache_write: bool,
  pub rewrite: Option<RewriteFn>,
  pub username: Option<String>,
  pub password: Option<String>,
  pub timeout: Option<Duration>,
  pub cwd: Option<PathBuf>,
  pub cache_key: Option<String>,
  pub request_config: RequestConfig,
  pub retry_count: u32,
  pub retry_delay: Duration,
  pub retry_backoff_factor: f64,
  pub redirect_count: u32,
  pub index_name: String,
}

impl ResolvedOptions {
  pub fn new(defaults: &CacheOptions, overrides: FetchOptions) -> Self {
    Self {
      allow_local: overrides.allow_local.unwrap_or(defaults.allow_local),
      allow_remote: overrides.allow_remote.unwrap_or(defaults.allow_remote),
      allow_cache_read: overrides
        .allow_cache_read
        .unwrap_or(defaults.allow_cache_read),
      allow_cache_write: overrides
        .allow_cache_write
        .unwrap_or(defaults.allow_cache_write),
      rewrite: overrides.rewrite.or_else(|| defaults.rewrite.clone()),
      username: overrides.username.or_else(|| defaults.username.clone()),
      password: overrides.password.or_else(|| defaults.password.clone()),
      timeout: overrides.timeout.or(defaults.timeout),
      cwd: overrides.cwd.or_else(|| defaults.cwd.clone()),
      cache_key: overrides.cache_key,
      request_config: overrides
        .request_config
        .unwrap_or_else(|| defaults.request_config.clone()),
      retry_count: overrides.retry_count.unwrap_or(defaults.retry_count),
      retry_delay: overrides.retry_delay.unwrap_or(defaults.retry_delay),
      retry_backoff_factor: overrides
        .retry_backoff_factor
        .unwrap_or(defaults.retry_backoff_factor),
      redirect_count: overrides.redirect_count.unwrap_or(defaults.redirect_count),
      index_name: overrides.index_name.unwrap_or_else(|| defaults.index_name.clone()),
    }
  }
}
