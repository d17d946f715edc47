// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! URI-to-filesystem-path sanitization and the `mkdirp` directory healer.
//!
//! This is nominally an "external collaborator" per the design this crate
//! follows (a URI sanitizer and a recursive directory creator are the kind
//! of thing a larger system would vendor in), but a single crate has
//! nowhere else to put it, so it lives here, kept deliberately small and
//! mechanical.

use std::io;
use std::path::Component;
use std::path::Path;
use std::path::PathBuf;

use rand::Rng;

use crate::env::CacheEnv;

/// The index filename `mkdirp` heals a file/directory conflict into when
/// no cache-specific name is available (the real filesystem env doesn't
/// carry `CacheOptions`). Matches `CacheOptions::default().index_name`.
pub(crate) const DEFAULT_INDEX_NAME: &str = "index.html";

fn is_allowed_byte(b: u8) -> bool {
  matches!(b, b'-' | b'_' | b'.' | b'/' | b'0'..=b'9' | b'A'..=b'Z' | b'a'..=b'z')
}

/// Replaces any byte outside `[-_./0-9A-Za-z]` with `_`.
pub fn sanitize_bytes(input: &str) -> String {
  input
    .bytes()
    .map(|b| if is_allowed_byte(b) { b as char } else { '_' })
    .collect()
}

/// Strips leading/trailing runs of `-_./` from a single path component.
pub fn trim_component_edges(component: &str) -> &str {
  component.trim_matches(|c| matches!(c, '-' | '_' | '.' | '/'))
}

/// Joins sanitized, trimmed components with `/`, dropping components that
/// trim away to nothing (e.g. a part that was only punctuation).
pub fn sanitize_key_parts<I, S>(parts: I) -> String
where
  I: IntoIterator<Item = S>,
  S: AsRef<str>,
{
  parts
    .into_iter()
    .map(|p| sanitize_bytes(p.as_ref()))
    .map(|p| trim_component_edges(&p).to_string())
    .filter(|p| !p.is_empty())
    .collect::<Vec<_>>()
    .join("/")
}

/// Turns a logical, forward-slash-separated cache key into a platform path.
/// A key ending in `/` gets `index_name` appended as the final component,
/// per spec: a cached resource whose key names a "directory" is stored as
/// a file inside it.
pub fn key_to_path(key: &str, index_name: &str) -> PathBuf {
  let mut path = PathBuf::new();
  let ends_in_slash = key.ends_with('/') || key.is_empty();
  for part in key.split('/').filter(|p| !p.is_empty()) {
    path.push(part);
  }
  if ends_in_slash {
    path.push(index_name);
  }
  path
}

/// Ensures every directory from `dir_path` up to (not including) an
/// existing ancestor exists, healing file/directory collisions along the
/// way: if a path component that needs to be a directory is currently a
/// plain file, that file is renamed aside to `component/.{random}` and
/// then moved back in as `component/{index_name}`.
///
/// Tolerates `AlreadyExists` from a racing writer creating the same
/// directory; propagates any other I/O error.
pub async fn mkdirp<Env: CacheEnv>(
  env: &Env,
  dir_path: &Path,
  index_name: &str,
) -> io::Result<()> {
  // Walk from the root down, healing/creating each component in turn.
  // Building the list root-to-leaf up front means we don't need to
  // backtrack if a deep ancestor turns out to already exist.
  let mut components: Vec<PathBuf> = Vec::new();
  let mut current = PathBuf::new();
  for component in dir_path.components() {
    current.push(component);
    if !matches!(component, Component::RootDir | Component::Prefix(_)) {
      components.push(current.clone());
    }
  }

  for component_path in components {
    if env.is_dir(&component_path).await {
      continue;
    }
    if env.is_file(&component_path).await {
      heal_file_directory_conflict(env, &component_path, index_name).await?;
      continue;
    }
    match env.create_dir(&component_path).await {
      Ok(()) => {}
      Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
      Err(err) => return Err(err),
    }
  }

  Ok(())
}

async fn heal_file_directory_conflict<Env: CacheEnv>(
  env: &Env,
  component_path: &Path,
  index_name: &str,
) -> io::Result<()> {
  let random_suffix: u64 = rand::thread_rng().gen();
  let tmp_name = component_path.with_file_name(format!(
    "{}.{random_suffix:x}",
    component_path
      .file_name()
      .and_then(|n| n.to_str())
      .unwrap_or("tmp")
  ));
  env.rename(component_path, &tmp_name).await?;
  match env.create_dir(component_path).await {
    Ok(()) => {}
    Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {}
    Err(err) => return Err(err),
  }
  let moved_back = component_path.join(index_name);
  env.rename(&tmp_name, &moved_back).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn sanitizes_disallowed_bytes() {
    assert_eq!(sanitize_bytes("a b#c"), "a_b_c");
    assert_eq!(sanitize_bytes("foo-bar_baz.ts"), "foo-bar_baz.ts");
  }

  #[test]
  fn trims_edge_runs() {
    assert_eq!(trim_component_edges("--foo--"), "foo");
    assert_eq!(trim_component_edges("..foo.."), "foo");
    assert_eq!(trim_component_edges("___"), "");
  }

  #[test]
  fn joins_and_drops_empty_components() {
    assert_eq!(sanitize_key_parts(["https", "example.com", "--", "a"]), "https/example.com/a");
  }

  #[test]
  fn key_to_path_appends_index_for_directory_keys() {
    assert_eq!(
      key_to_path("example.com/a/", "index.html"),
      PathBuf::from("example.com/a/index.html")
    );
    assert_eq!(key_to_path("example.com/a/b", "index.html"), PathBuf::from("example.com/a/b"));
  }
}
