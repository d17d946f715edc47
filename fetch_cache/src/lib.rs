//! A streaming, content-addressable fetch cache: `local`, on-disk cache,
//! and remote strategies are offered an address in turn until one of
//! them opens a stream, mirroring redirects and retries back through the
//! same pipeline rather than recursing.

mod address;
mod buffer_stream;
mod cache;
mod common;
mod env;
mod error;
mod http_client;
mod options;
mod path_util;
mod result;
mod sidecar;
mod state;
mod strategy;

pub use address::Address;
pub use address::AddressKind;
pub use buffer_stream::BufferStream;
pub use cache::Cache;
pub use common::public_headers;
pub use common::HeadersMap;
pub use env::CacheEnv;
pub use env::RealCacheEnv;
pub use error::CacheError;
pub use error::CacheErrorKind;
pub use error::CachedError;
pub use error::RetryReason;
pub use error::TooManyRedirectsError;
pub use error::TransientKind;
pub use http_client::HttpClient;
pub use http_client::HttpRequest;
pub use http_client::HttpResponseStart;
pub use http_client::HttpSendError;
pub use http_client::ReqwestHttpClient;
pub use options::CacheOptions;
pub use options::FetchOptions;
pub use options::RequestConfig;
pub use options::RewriteFn;
pub use result::CacheResult;
pub use strategy::filesystem_cache::StoreData;

#[cfg(any(test, feature = "test-util"))]
pub use env::memory::MemoryCacheEnv;
#[cfg(any(test, feature = "test-util"))]
pub use http_client::test_double;
