//! Outgoing image request value.

use std::time::Duration;

use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};
use tracing::warn;

use super::RequestCachePolicy;

/// `Accept` value favouring image content.
pub const IMAGE_ACCEPT: &str = "image/*, */*; q=0.5";

/// `Content-Type` sent with image requests.
pub const IMAGE_CONTENT_TYPE: &str = "application/octet-stream";

/// A fully described HTTP request for an image.
///
/// Owned per request; nothing in it is shared between submissions, including
/// the query string, which lives inside `url`.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    /// HTTP method.
    pub method: Method,
    /// Target URL.
    pub url: Url,
    /// Header set sent with the request.
    pub headers: HeaderMap,
    /// Transport cache handling.
    pub cache_policy: RequestCachePolicy,
    /// Request timeout.
    pub timeout: Duration,
}

impl ImageRequest {
    /// Creates a GET request carrying the default image headers.
    #[must_use]
    pub fn get(url: Url, cache_policy: RequestCachePolicy, timeout: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(IMAGE_ACCEPT));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(IMAGE_CONTENT_TYPE));
        Self {
            method: Method::GET,
            url,
            headers,
            cache_policy,
            timeout,
        }
    }

    /// Returns the host of the target URL.
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    /// Sets a header from string parts. Invalid names or values are skipped.
    pub fn set_header(&mut self, name: &str, value: &str) {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "Skipping invalid header"),
        }
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Appends query parameters to the URL.
    #[must_use]
    pub fn with_query<'a>(mut self, params: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        self.url.query_pairs_mut().extend_pairs(params);
        self
    }
}

/// Caller hook that rewrites a request right before submission.
pub type RequestCustomizer = std::sync::Arc<dyn Fn(ImageRequest) -> ImageRequest + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ImageRequest {
        ImageRequest::get(
            Url::parse("https://example.com/a.png").unwrap(),
            RequestCachePolicy::default(),
            Duration::from_secs(30),
        )
    }

    #[test]
    fn test_default_headers() {
        let req = request();

        assert_eq!(req.method, Method::GET);
        assert_eq!(req.header("accept"), Some(IMAGE_ACCEPT));
        assert_eq!(req.header("content-type"), Some(IMAGE_CONTENT_TYPE));
        assert_eq!(req.host(), Some("example.com"));
    }

    #[test]
    fn test_invalid_header_is_skipped() {
        let mut req = request();
        req.set_header("bad header", "x");
        req.set_header("X-Ok", "yes");

        assert_eq!(req.header("x-ok"), Some("yes"));
        assert_eq!(req.headers.len(), 3);
    }

    #[test]
    fn test_query_params_are_per_request() {
        let a = request().with_query([("w", "100")]);
        let b = request();

        assert_eq!(a.url.query(), Some("w=100"));
        assert_eq!(b.url.query(), None);
    }
}
