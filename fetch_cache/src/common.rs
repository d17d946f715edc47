// Copyright 2018-2024 the Deno authors. All rights reserved. MIT license.

use std::collections::HashMap;

/// Response headers as stored in a sidecar file and handed back to callers.
/// Arbitrary string keys (lower-cased by convention, not enforced) mapping
/// to a single joined value.
pub type HeadersMap = HashMap<String, String>;

/// Reserved sidecar header keys, never exposed as "public" headers to a
/// caller of [`crate::CacheResult`].
pub const RESERVED_PREFIX: &str = "cget-";
pub const STAMP_KEY: &str = "cget-stamp";
pub const STATUS_KEY: &str = "cget-status";
pub const MESSAGE_KEY: &str = "cget-message";
pub const TARGET_KEY: &str = "cget-target";

pub fn is_reserved_key(key: &str) -> bool {
  key.starts_with(RESERVED_PREFIX)
}

pub fn public_headers(headers: &HeadersMap) -> HeadersMap {
  headers
    .iter()
    .filter(|(k, _)| !is_reserved_key(k))
    .map(|(k, v)| (k.clone(), v.clone()))
    .collect()
}
