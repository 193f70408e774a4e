//! HTTP transport backed by reqwest.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use reqwest::header::{CACHE_CONTROL, HeaderValue, PRAGMA};
use tracing::trace;

use crate::domain::entities::{ImageRequest, RequestCachePolicy};
use crate::domain::errors::FetchError;
use crate::domain::ports::{ImageTransport, TransportOptions};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// [`ImageTransport`] over HTTP(S).
///
/// Holds two connection pools: one verifying certificates and one that
/// accepts any certificate, picked per request from [`TransportOptions`].
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    insecure_client: Client,
}

impl HttpTransport {
    /// Creates the transport.
    ///
    /// # Errors
    /// Returns error if an HTTP client cannot be built.
    pub fn new() -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FetchError::network(format!("failed to create HTTP client: {e}")))?;
        let insecure_client = Client::builder()
            .user_agent(USER_AGENT)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| FetchError::network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            insecure_client,
        })
    }

    const fn client_for(&self, options: &TransportOptions) -> &Client {
        if options.trust_all_certificates {
            &self.insecure_client
        } else {
            &self.client
        }
    }

    fn build(
        &self,
        request: ImageRequest,
        options: &TransportOptions,
    ) -> Result<reqwest::Request, FetchError> {
        let mut builder = self
            .client_for(options)
            .request(request.method, request.url)
            .headers(request.headers)
            .timeout(request.timeout);

        if let Some(credentials) = &options.credentials {
            builder = builder.basic_auth(credentials.user(), Some(credentials.password()));
        }

        if request.cache_policy == RequestCachePolicy::ReloadIgnoringCache {
            builder = builder
                .header(CACHE_CONTROL, HeaderValue::from_static("no-cache"))
                .header(PRAGMA, HeaderValue::from_static("no-cache"));
        }

        builder.build().map_err(FetchError::from)
    }
}

#[async_trait]
impl ImageTransport for HttpTransport {
    async fn fetch(
        &self,
        request: ImageRequest,
        options: TransportOptions,
    ) -> Result<Bytes, FetchError> {
        let request = self.build(request, &options)?;
        let url = request.url().clone();
        trace!(url = %url, insecure = options.trust_all_certificates, "Sending image request");

        let response = self.client_for(&options).execute(request).await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                status: status.as_u16(),
                reason: status.canonical_reason().unwrap_or("Unknown").to_string(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FetchError::body(e.to_string()))?;
        trace!(url = %url, size = bytes.len(), "Received image response");
        Ok(bytes)
    }
}
