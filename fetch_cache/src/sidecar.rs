// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

//! The JSON sidecar that accompanies every cached body: arbitrary
//! response headers plus a handful of reserved `cget-*` bookkeeping
//! fields. A redirect entry is a sidecar with no body file alongside it.

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use serde::Deserialize;
use serde::Serialize;

use crate::common::HeadersMap;
use crate::env::CacheEnv;

fn default_status() -> u16 {
  200
}

fn default_message() -> String {
  "OK".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SidecarMetadata {
  #[serde(rename = "cget-stamp", default)]
  pub stamp: u128,
  #[serde(rename = "cget-status", default = "default_status")]
  pub status: u16,
  #[serde(rename = "cget-message", default = "default_message")]
  pub message: String,
  #[serde(rename = "cget-target", skip_serializing_if = "Option::is_none", default)]
  pub target: Option<String>,
  #[serde(flatten)]
  pub headers: HeadersMap,
}

impl SidecarMetadata {
  pub fn new(stamp: SystemTime, status: u16, message: String, headers: HeadersMap) -> Self {
    Self {
      stamp: stamp
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis(),
      status,
      message,
      target: None,
      headers,
    }
  }

  pub fn redirect(stamp: SystemTime, status: u16, message: String, headers: HeadersMap, target: String) -> Self {
    let mut metadata = Self::new(stamp, status, message, headers);
    metadata.target = Some(target);
    metadata
  }

  pub fn is_redirect(&self) -> bool {
    (300..=308).contains(&self.status) && self.target.is_some()
  }
}

/// The sidecar path for a given cache body path: `<path>.header.json`.
pub fn sidecar_path(cache_path: &Path) -> PathBuf {
  let mut name = cache_path.as_os_str().to_os_string();
  name.push(".header.json");
  PathBuf::from(name)
}

pub async fn read_sidecar<Env: CacheEnv>(
  env: &Env,
  cache_path: &Path,
) -> io::Result<Option<SidecarMetadata>> {
  let path = sidecar_path(cache_path);
  match env.read_file_bytes(&path).await? {
    Some(bytes) => {
      let metadata = serde_json::from_slice(&bytes)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
      Ok(Some(metadata))
    }
    None => Ok(None),
  }
}

pub async fn write_sidecar<Env: CacheEnv>(
  env: &Env,
  cache_path: &Path,
  metadata: &SidecarMetadata,
) -> io::Result<()> {
  let path = sidecar_path(cache_path);
  let bytes = serde_json::to_vec(metadata)
    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;
  env.atomic_write_file(&path, &bytes).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults_status_and_message_when_absent() {
    let json = r#"{"content-type": "text/plain"}"#;
    let metadata: SidecarMetadata = serde_json::from_str(json).unwrap();
    assert_eq!(metadata.status, 200);
    assert_eq!(metadata.message, "OK");
    assert_eq!(metadata.headers.get("content-type").unwrap(), "text/plain");
  }

  #[test]
  fn round_trips_through_json() {
    let mut headers = HeadersMap::new();
    headers.insert("content-type".to_string(), "text/html".to_string());
    let metadata = SidecarMetadata::new(UNIX_EPOCH, 200, "OK".to_string(), headers);
    let json = serde_json::to_string(&metadata).unwrap();
    let parsed: SidecarMetadata = serde_json::from_str(&json).unwrap();
    assert_eq!(metadata, parsed);
  }
}
