//! Port definition for fetching image bytes over the network.

use async_trait::async_trait;
use bytes::Bytes;

use crate::domain::entities::{Credential, ImageRequest};
use crate::domain::errors::FetchError;

/// Per-operation transport settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportOptions {
    /// Basic-auth credentials to present.
    pub credentials: Option<Credential>,
    /// Accept any server certificate.
    pub trust_all_certificates: bool,
}

/// Port for network retrieval of image bytes.
/// Implementations must be thread-safe.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ImageTransport: Send + Sync {
    /// Performs the request and returns the response body.
    async fn fetch(
        &self,
        request: ImageRequest,
        options: TransportOptions,
    ) -> Result<Bytes, FetchError>;
}
