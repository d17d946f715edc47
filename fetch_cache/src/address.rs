// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! Classifies a URI into local/urn/remote, derives its cache key and
//! on-disk path, and tracks the redirect chain that produced it.

use std::path::PathBuf;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::common::HeadersMap;
use crate::path_util;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
  Local,
  Urn,
  Remote,
}

/// One prior stop along a redirect chain, recorded so a resolved chain of
/// cache entries can be materialized later (see `RemoteFetch`'s
/// sidecar-only redirect entries).
#[derive(Debug, Clone)]
pub struct HistoryEntry {
  pub url: Option<Url>,
  pub path: PathBuf,
  pub data: Option<HeadersMap>,
}

#[derive(Debug, Clone)]
pub struct Address {
  pub kind: AddressKind,
  /// Absent only for non-`file:` local paths that couldn't be turned into
  /// a URL (this never happens in practice since `Url::from_file_path`
  /// always succeeds for an absolute path, but the field stays optional
  /// to mirror the "parsing never fails" invariant).
  pub url: Option<Url>,
  pub path: PathBuf,
  /// An explicit cache key from `FetchOptions`, which overrides derivation
  /// and is preserved across redirects.
  pub explicit_cache_key: Option<String>,
  pub history: Vec<HistoryEntry>,
  pub was_local: bool,
  pub was_remote: bool,
  index_name: String,
}

impl Address {
  pub fn is_local(&self) -> bool {
    matches!(self.kind, AddressKind::Local)
  }

  pub fn is_remote(&self) -> bool {
    matches!(self.kind, AddressKind::Remote)
  }

  pub fn is_urn(&self) -> bool {
    matches!(self.kind, AddressKind::Urn)
  }

  /// Parses `uri`, resolving it against `base_url` when relative.
  /// `base_url` defaults to the process working directory expressed as a
  /// `file://` URL. Never fails: malformed input classifies as remote
  /// with a best-effort (possibly empty) sanitized path; downstream
  /// strategies detect the empty path and fail there instead.
  pub fn parse(
    uri: &str,
    base_url: Option<&Url>,
    explicit_cache_key: Option<String>,
    index_name: &str,
  ) -> Self {
    let default_base;
    let base_url = match base_url {
      Some(u) => u,
      None => {
        default_base = default_cwd_base_url();
        &default_base
      }
    };

    if let Some(path) = local_path_for_uri(uri, base_url) {
      let url = Url::from_file_path(&path).ok();
      return Self {
        kind: AddressKind::Local,
        url,
        path,
        explicit_cache_key,
        history: Vec::new(),
        was_local: true,
        was_remote: false,
        index_name: index_name.to_string(),
      };
    }

    if let Some(rest) = uri.strip_prefix("urn:") {
      let key = rest.replace(':', "/");
      let path = explicit_cache_key
        .clone()
        .map(|k| path_util::key_to_path(&k, index_name))
        .unwrap_or_else(|| path_util::key_to_path(&key, index_name));
      return Self {
        kind: AddressKind::Urn,
        url: None,
        path,
        explicit_cache_key,
        history: Vec::new(),
        was_local: false,
        was_remote: false,
        index_name: index_name.to_string(),
      };
    }

    // Remote (or unparsable, which we still classify as remote per the
    // "parsing never fails" contract; the sanitized path may come out
    // empty and strategies are expected to detect that).
    let parsed = base_url.join(uri).or_else(|_| Url::parse(uri));
    let url = parsed.ok();
    let path = match (&url, &explicit_cache_key) {
      (_, Some(key)) => path_util::key_to_path(key, index_name),
      (Some(url), None) => {
        path_util::key_to_path(&remote_cache_key(url), index_name)
      }
      (None, None) => PathBuf::new(),
    };

    Self {
      kind: AddressKind::Remote,
      url,
      path,
      explicit_cache_key,
      history: Vec::new(),
      was_local: false,
      was_remote: true,
      index_name: index_name.to_string(),
    }
  }

  /// Resolves `new_location` against the current URL, pushes the prior
  /// state onto `history` (unless `is_fake`), and reclassifies. An
  /// explicit cache key is preserved across the redirect, so `path`
  /// doesn't change in that case.
  pub fn redirect(&mut self, new_location: &str, is_fake: bool, data: Option<HeadersMap>) {
    let resolved = self
      .url
      .as_ref()
      .and_then(|base| base.join(new_location).ok())
      .or_else(|| Url::parse(new_location).ok());

    if !is_fake {
      self.history.push(HistoryEntry {
        url: self.url.clone(),
        path: self.path.clone(),
        data,
      });
    }

    self.was_local = self.was_local || self.is_local();
    self.was_remote = self.was_remote || self.is_remote();

    let Some(new_url) = resolved else {
      // Unparsable redirect target: keep the old address but note the
      // attempt in history; nothing else to do.
      return;
    };

    self.kind = classify_scheme(new_url.scheme());
    self.path = match &self.explicit_cache_key {
      Some(key) => path_util::key_to_path(key, &self.index_name),
      None => match self.kind {
        AddressKind::Remote => {
          path_util::key_to_path(&remote_cache_key(&new_url), &self.index_name)
        }
        AddressKind::Local => new_url
          .to_file_path()
          .unwrap_or_else(|_| PathBuf::from(new_url.path())),
        AddressKind::Urn => self.path.clone(),
      },
    };
    self.url = Some(new_url);
  }
}

fn classify_scheme(scheme: &str) -> AddressKind {
  match scheme {
    "file" => AddressKind::Local,
    "http" | "https" => AddressKind::Remote,
    "urn" => AddressKind::Urn,
    _ => AddressKind::Remote,
  }
}

fn default_cwd_base_url() -> Url {
  let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
  Url::from_directory_path(&cwd)
    .unwrap_or_else(|_| Url::parse("file:///").unwrap())
}

/// Returns `Some(path)` when `uri` should be treated as a local address:
/// an explicit `file://` URL, or an absolute/relative filesystem path
/// (detected by the absence of a `scheme://` prefix other than `file`).
fn local_path_for_uri(uri: &str, base_url: &Url) -> Option<PathBuf> {
  if let Ok(url) = Url::parse(uri) {
    if url.scheme() == "file" {
      return url.to_file_path().ok();
    }
    if url.scheme() == "http" || url.scheme() == "https" {
      return None;
    }
  }
  if uri.contains("://") {
    // A scheme we don't otherwise recognize (e.g. `urn:`, ftp, data:) -
    // not local.
    return None;
  }
  // Relative or absolute filesystem path.
  let resolved = base_url.join(uri).ok()?;
  if resolved.scheme() != "file" {
    return None;
  }
  resolved.to_file_path().ok()
}

/// `scheme`, `host` (no port), then the percent-decoded path and query
/// components, each kept as a separate part so `path_util::sanitize_key_parts`
/// joins them with `/` rather than running them together. A path ending
/// in `/` (or empty) marks the address as a "directory", so `key_to_path`
/// knows to append `index_name` - that signal comes from the URL's own
/// path, not from the final joined-and-sanitized string, since sanitizing
/// can itself introduce or remove trailing slashes.
pub fn remote_cache_key(url: &Url) -> String {
  let scheme = url.scheme();
  let host = url.host_str().unwrap_or("");
  let path = url.path();
  let ends_in_slash = path.ends_with('/') || path.is_empty();

  let mut parts: Vec<String> = vec![scheme.to_string(), host.to_string()];
  parts.extend(
    path
      .split('/')
      .filter(|p| !p.is_empty())
      .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned()),
  );
  if let Some(query) = url.query() {
    parts.extend(
      query
        .split(['/', ':', '?'])
        .filter(|p| !p.is_empty())
        .map(|p| percent_decode_str(p).decode_utf8_lossy().into_owned()),
    );
  }

  let key = path_util::sanitize_key_parts(parts);
  if ends_in_slash && !key.is_empty() {
    format!("{key}/")
  } else {
    key
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn classifies_remote_http() {
    let addr = Address::parse("http://example.com/a/b.js", None, None, "index.html");
    assert!(addr.is_remote());
    assert!(!addr.is_local());
    assert_eq!(addr.path, PathBuf::from("http/example.com/a/b.js"));
  }

  #[test]
  fn classifies_remote_with_query() {
    let addr = Address::parse("https://example.com/a/?x=y", None, None, "index.html");
    assert_eq!(addr.path, PathBuf::from("https/example.com/a/x_y/index.html"));
  }

  #[test]
  fn classifies_urn() {
    let addr = Address::parse("urn:a:b:c", None, None, "index.html");
    assert!(addr.is_urn());
    assert_eq!(addr.path, PathBuf::from("a/b/c"));
  }

  #[test]
  fn classifies_local_relative_path() {
    let addr = Address::parse("./fixtures/index.html", None, None, "index.html");
    assert!(addr.is_local());
  }

  #[test]
  fn explicit_cache_key_overrides_derivation() {
    let addr = Address::parse(
      "http://example.com/a",
      None,
      Some("custom/key".to_string()),
      "index.html",
    );
    assert_eq!(addr.path, PathBuf::from("custom/key"));
  }

  #[test]
  fn redirect_pushes_history_and_reclassifies() {
    let mut addr = Address::parse("http://example.com/", None, None, "index.html");
    let original_path = addr.path.clone();
    addr.redirect("http://example.com/a", false, None);
    assert_eq!(addr.history.len(), 1);
    assert_eq!(addr.history[0].path, original_path);
    assert!(addr.is_remote());
    assert_ne!(addr.path, original_path);
  }

  #[test]
  fn explicit_cache_key_survives_redirect() {
    let mut addr = Address::parse(
      "http://example.com/",
      None,
      Some("fixed/key".to_string()),
      "index.html",
    );
    addr.redirect("http://example.com/elsewhere", false, None);
    assert_eq!(addr.path, PathBuf::from("fixed/key"));
  }

  #[test]
  fn is_local_xor_is_remote() {
    for uri in ["http://example.com/a", "./local/file", "urn:a:b:c"] {
      let addr = Address::parse(uri, None, None, "index.html");
      assert_ne!(addr.is_local(), addr.is_remote() || addr.is_urn());
    }
  }
}
