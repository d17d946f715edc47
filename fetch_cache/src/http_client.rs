// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! The HTTP transport trait `RemoteFetch`/`Transfer` are built against,
//! plus the one production implementation (`reqwest`-backed) and a
//! channel-driven test double. The choice of HTTP client library is
//! treated as an external concern: nothing above this module knows it's
//! `reqwest` under the hood.

use std::io;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use futures::StreamExt;
use http::HeaderMap;
use url::Url;

pub type BoxedByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

#[derive(Debug, Clone)]
pub struct HttpRequest {
  pub url: Url,
  pub headers: HeaderMap,
  pub timeout: Option<Duration>,
}

/// The response up to (not including) the body being fully read: status
/// line, headers, and a stream of body chunks. For a redirect response
/// the body is typically empty.
pub struct HttpResponseStart {
  pub status: u16,
  pub reason: String,
  pub headers: HeaderMap,
  pub body: BoxedByteStream,
}

impl std::fmt::Debug for HttpResponseStart {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("HttpResponseStart")
      .field("status", &self.status)
      .field("reason", &self.reason)
      .field("headers", &self.headers)
      .finish()
  }
}

#[async_trait]
pub trait HttpClient: Send + Sync + std::fmt::Debug + 'static {
  /// Issues one request. Redirects are never followed by the
  /// implementation - a 3xx comes back as an ordinary `HttpResponseStart`
  /// so `RemoteFetch` can consult the cache for the new location before
  /// deciding whether to follow it.
  async fn send(&self, request: HttpRequest) -> Result<HttpResponseStart, HttpSendError>;
}

#[derive(Debug, thiserror::Error)]
pub enum HttpSendError {
  #[error("transient: {0}")]
  Transient(io::Error),
  #[error("{0}")]
  Fatal(#[from] io::Error),
}

/// Production client, backed by `reqwest`. Redirects are disabled at the
/// client level (`redirect::Policy::none()`) so every 3xx surfaces as a
/// plain response rather than being silently followed underneath us;
/// `RemoteFetch` decides what to do with it instead.
#[derive(Debug, Clone)]
pub struct ReqwestHttpClient {
  client: reqwest::Client,
}

impl ReqwestHttpClient {
  pub fn new() -> Self {
    let client = reqwest::Client::builder()
      .redirect(reqwest::redirect::Policy::none())
      .gzip(true)
      .build()
      .expect("building the default reqwest client should never fail");
    Self { client }
  }
}

impl Default for ReqwestHttpClient {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
  async fn send(&self, request: HttpRequest) -> Result<HttpResponseStart, HttpSendError> {
    let mut builder = self.client.get(request.url).headers(request.headers);
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }
    let response = builder.send().await.map_err(|err| {
      if err.is_timeout() || err.is_connect() {
        HttpSendError::Transient(io::Error::new(io::ErrorKind::TimedOut, err.to_string()))
      } else {
        HttpSendError::Fatal(io::Error::new(io::ErrorKind::Other, err.to_string()))
      }
    })?;

    let status = response.status().as_u16();
    let reason = response
      .status()
      .canonical_reason()
      .unwrap_or("")
      .to_string();
    let headers = response.headers().clone();
    let body = response
      .bytes_stream()
      .map(|res| res.map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string())))
      .boxed();

    Ok(HttpResponseStart {
      status,
      reason,
      headers,
      body,
    })
  }
}

#[cfg(any(test, feature = "test-util"))]
pub mod test_double {
  //! An in-process fault injector: lets tests script a sequence of
  //! responses (including mid-stream errors and redirects) without a
  //! real socket.
  use super::*;
  use parking_lot::Mutex;
  use std::collections::VecDeque;
  use std::sync::Arc;

  pub enum ScriptedResponse {
    Status {
      status: u16,
      headers: HeaderMap,
      chunks: Vec<Bytes>,
    },
    /// A chunked body that errors partway through.
    ErrorMidStream {
      status: u16,
      headers: HeaderMap,
      chunks: Vec<Bytes>,
      error: io::ErrorKind,
    },
    TransientFailure,
  }

  #[derive(Debug, Clone, Default)]
  pub struct ChannelHttpClient {
    responses: Arc<Mutex<VecDeque<QueuedResponse>>>,
  }

  struct QueuedResponse {
    status: u16,
    reason: String,
    headers: HeaderMap,
    chunks: Vec<Bytes>,
    error: Option<io::ErrorKind>,
    transient: bool,
  }

  impl std::fmt::Debug for QueuedResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
      f.debug_struct("QueuedResponse").field("status", &self.status).finish()
    }
  }

  impl ChannelHttpClient {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) {
      let queued = match response {
        ScriptedResponse::Status { status, headers, chunks } => QueuedResponse {
          status,
          reason: "".to_string(),
          headers,
          chunks,
          error: None,
          transient: false,
        },
        ScriptedResponse::ErrorMidStream {
          status,
          headers,
          chunks,
          error,
        } => QueuedResponse {
          status,
          reason: "".to_string(),
          headers,
          chunks,
          error: Some(error),
          transient: false,
        },
        ScriptedResponse::TransientFailure => QueuedResponse {
          status: 0,
          reason: String::new(),
          headers: HeaderMap::new(),
          chunks: Vec::new(),
          error: None,
          transient: true,
        },
      };
      self.responses.lock().push_back(queued);
    }
  }

  #[async_trait]
  impl HttpClient for ChannelHttpClient {
    async fn send(&self, _request: HttpRequest) -> Result<HttpResponseStart, HttpSendError> {
      let queued = self
        .responses
        .lock()
        .pop_front()
        .ok_or_else(|| HttpSendError::Fatal(io::Error::new(io::ErrorKind::NotFound, "no scripted response queued")))?;

      if queued.transient {
        return Err(HttpSendError::Transient(io::Error::new(
          io::ErrorKind::ConnectionRefused,
          "scripted transient failure",
        )));
      }

      let error = queued.error;
      let mut items: Vec<io::Result<Bytes>> =
        queued.chunks.into_iter().map(Ok).collect();
      if let Some(kind) = error {
        items.push(Err(io::Error::new(kind, "scripted mid-stream error")));
      }
      let body = futures::stream::iter(items).boxed();

      Ok(HttpResponseStart {
        status: queued.status,
        reason: queued.reason,
        headers: queued.headers,
        body,
      })
    }
  }
}
