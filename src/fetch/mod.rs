pub mod fetcher;
pub mod normalize;
pub mod transport;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::FetchError;
pub use fetcher::{AssetFetcher, FetchConfig};
pub use normalize::ImageNormalizer;
pub use transport::{HttpTransport, ReqwestTransport};

/// Anything that can turn a source URL into stored-ready asset bytes.
#[async_trait]
pub trait AssetSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError>;
}
