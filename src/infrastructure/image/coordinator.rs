//! Download coordination.
//!
//! Decides between cache and network per request, builds outgoing requests
//! from the host policy, and runs fetch operations on a bounded worker pool.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::Url;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, error, trace};

use crate::domain::entities::{
    CacheKey, Credential, DownloadOutcome, ImageRequest, ImageResult, OperationId,
    RequestCachePolicy, RequestCustomizer, RetrieveOptions,
};
use crate::domain::errors::{FetchError, SetupError};
use crate::domain::ports::{ImageRetriever, ImageTransport, TransportOptions};
use crate::domain::services::{CacheDecision, HostPolicyStore, KeyTransform, decide, needs_lookup};

use crate::infrastructure::config::ImageKitConfig;

use super::http_transport::HttpTransport;
use super::operation::{CompletionSink, FetchOperation, OperationHandle};
use super::tiered_cache::{TieredCache, TieredCacheConfig};

/// Default request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default age after which `Automatic` retrieval refetches.
pub const DEFAULT_STALE_INTERVAL: Duration = Duration::from_secs(30);

/// Default worker pool size.
pub const DEFAULT_MAX_CONCURRENT_DOWNLOADS: usize = 4;

/// Configuration for the download coordinator.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Per-request timeout.
    pub timeout: Duration,
    /// Cached entries older than this are refetched by `Automatic` retrieval.
    pub stale_interval: Duration,
    /// Maximum downloads in flight.
    pub max_concurrent_downloads: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            stale_interval: DEFAULT_STALE_INTERVAL,
            max_concurrent_downloads: DEFAULT_MAX_CONCURRENT_DOWNLOADS,
        }
    }
}

/// A fire-and-forget download.
#[derive(Clone)]
pub struct DownloadRequest {
    /// Target URL.
    pub url: Url,
    /// Transport cache handling.
    pub cache_policy: RequestCachePolicy,
    /// Hook applied to the request right before submission.
    pub customizer: Option<RequestCustomizer>,
    /// Identifier for cancel and invalidate. A random one is used if absent.
    pub identifier: Option<OperationId>,
}

impl DownloadRequest {
    /// Creates a request with the protocol cache policy.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            cache_policy: RequestCachePolicy::default(),
            customizer: None,
            identifier: None,
        }
    }

    /// Sets the transport cache policy.
    #[must_use]
    pub const fn with_cache_policy(mut self, cache_policy: RequestCachePolicy) -> Self {
        self.cache_policy = cache_policy;
        self
    }

    /// Sets the request customizer.
    #[must_use]
    pub fn with_customizer(mut self, customizer: RequestCustomizer) -> Self {
        self.customizer = Some(customizer);
        self
    }

    /// Sets the identifier.
    #[must_use]
    pub fn with_identifier(mut self, id: impl Into<OperationId>) -> Self {
        self.identifier = Some(id.into());
        self
    }
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("url", &self.url.as_str())
            .field("cache_policy", &self.cache_policy)
            .field("customizer", &self.customizer.is_some())
            .field("identifier", &self.identifier)
            .finish()
    }
}

/// Operations submitted and not yet terminal, by identifier.
///
/// Several operations may share one identifier.
#[derive(Clone, Default)]
struct PendingSet {
    inner: Arc<Mutex<HashMap<OperationId, Vec<OperationHandle>>>>,
}

impl PendingSet {
    fn insert(&self, handle: OperationHandle) {
        self.inner
            .lock()
            .entry(handle.id().clone())
            .or_default()
            .push(handle);
    }

    fn remove(&self, handle: &OperationHandle) {
        let mut inner = self.inner.lock();
        if let Some(handles) = inner.get_mut(handle.id()) {
            handles.retain(|h| !h.same_as(handle));
            if handles.is_empty() {
                inner.remove(handle.id());
            }
        }
    }

    fn get(&self, id: &OperationId) -> Vec<OperationHandle> {
        self.inner.lock().get(id).cloned().unwrap_or_default()
    }

    fn take(&self, id: &OperationId) -> Vec<OperationHandle> {
        self.inner.lock().remove(id).unwrap_or_default()
    }

    fn drain(&self) -> Vec<OperationHandle> {
        self.inner.lock().drain().flat_map(|(_, handles)| handles).collect()
    }

    fn len(&self) -> usize {
        self.inner.lock().values().map(Vec::len).sum()
    }

    fn contains(&self, id: &OperationId) -> bool {
        self.inner.lock().contains_key(id)
    }
}

/// State for the background dispatcher loop.
struct DispatcherState {
    transport: Arc<dyn ImageTransport>,
    pending: PendingSet,
    semaphore: Arc<Semaphore>,
    request_rx: mpsc::UnboundedReceiver<FetchOperation>,
}

/// Cache-aware image downloader with cancellation and per-host policy.
pub struct DownloadCoordinator {
    cache: TieredCache,
    keys: KeyTransform,
    policy: RwLock<HostPolicyStore>,
    trust_all: AtomicBool,
    pending: PendingSet,
    request_tx: mpsc::UnboundedSender<FetchOperation>,
    config: CoordinatorConfig,
}

impl std::fmt::Debug for DownloadCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadCoordinator")
            .field("cache", &self.cache)
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

impl DownloadCoordinator {
    /// Creates a coordinator over an existing cache and transport.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        config: CoordinatorConfig,
        cache: TieredCache,
        transport: Arc<dyn ImageTransport>,
    ) -> Self {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let pending = PendingSet::default();
        let state = DispatcherState {
            transport,
            pending: pending.clone(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_downloads.max(1))),
            request_rx,
        };

        tokio::spawn(Self::run_dispatcher(state));

        Self {
            cache,
            keys: KeyTransform::default(),
            policy: RwLock::new(HostPolicyStore::new()),
            trust_all: AtomicBool::new(false),
            pending,
            request_tx,
            config,
        }
    }

    /// Creates a coordinator that fetches over HTTP.
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be built.
    pub fn with_http_transport(
        config: CoordinatorConfig,
        cache: TieredCache,
    ) -> Result<Self, FetchError> {
        let transport = Arc::new(HttpTransport::new()?);
        Ok(Self::new(config, cache, transport))
    }

    /// Opens the cache namespace and an HTTP transport.
    ///
    /// # Errors
    /// Returns error if the cache directory or HTTP client cannot be created.
    pub fn open(
        cache_config: TieredCacheConfig,
        config: CoordinatorConfig,
    ) -> Result<Self, SetupError> {
        let cache = TieredCache::open(cache_config)?;
        Ok(Self::with_http_transport(config, cache)?)
    }

    /// Opens the cache namespace and HTTP transport described by a config file.
    ///
    /// # Errors
    /// Returns error if the cache directory or HTTP client cannot be created.
    pub fn from_config(config: &ImageKitConfig) -> Result<Self, SetupError> {
        Self::open(
            config.cache.to_cache_config(),
            config.download.to_coordinator_config(),
        )
    }

    /// Dispatcher loop: queues operations and starts them as permits free up.
    async fn run_dispatcher(mut state: DispatcherState) {
        let mut queue: VecDeque<FetchOperation> = VecDeque::new();

        loop {
            tokio::select! {
                op = state.request_rx.recv() => {
                    match op {
                        Some(op) => queue.push_back(op),
                        None => break,
                    }
                }
                Ok(permit) = state.semaphore.clone().acquire_owned(), if !queue.is_empty() => {
                    if let Some(op) = queue.pop_front() {
                        let transport = state.transport.clone();
                        let pending = state.pending.clone();
                        tokio::spawn(async move {
                            let handle = op.handle();
                            op.run(transport).await;
                            pending.remove(&handle);
                            drop(permit);
                        });
                    }
                }
            }
        }

        for op in queue.drain(..) {
            let handle = op.handle();
            handle.cancel();
            state.pending.remove(&handle);
        }
        debug!("Download dispatcher stopped");
    }

    /// The cache this coordinator reads and fills.
    #[must_use]
    pub const fn cache(&self) -> &TieredCache {
        &self.cache
    }

    /// Coordinator configuration.
    #[must_use]
    pub const fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Cache key for a URL.
    #[must_use]
    pub fn cache_key(&self, url: &Url) -> CacheKey {
        self.keys.key(url.as_str())
    }

    /// Starts a download. The terminal event goes to `sink`.
    ///
    /// Bypasses the cache entirely; see [`Self::retrieve_image`] for
    /// cache-aware retrieval.
    pub fn download_image(
        &self,
        request: DownloadRequest,
        sink: impl Into<CompletionSink>,
    ) -> OperationId {
        let id = request.identifier.unwrap_or_else(OperationId::generate);
        let (image_request, options) =
            self.build_request(request.url, request.cache_policy, request.customizer.as_ref());

        debug!(id = %id, url = %image_request.url, policy = ?image_request.cache_policy, "Queueing download");
        let op = FetchOperation::new(id.clone(), image_request, options, sink.into());
        let handle = op.handle();
        self.pending.insert(handle.clone());

        if let Err(e) = self.request_tx.send(op) {
            error!(id = %id, "Download dispatcher is gone");
            self.pending.remove(&handle);
            e.0.handle().cancel();
        }
        id
    }

    /// Retrieves an image from cache or network per `options.cache_type`.
    ///
    /// Successful downloads are stored before returning unless invalidated.
    pub async fn retrieve_image(&self, url: Url, options: RetrieveOptions) -> ImageResult {
        let RetrieveOptions {
            cache_type,
            customizer,
            identifier,
        } = options;
        let key = self.cache_key(&url);

        let cached = if needs_lookup(cache_type) {
            self.cache.fetch(&key).await
        } else {
            None
        };

        match (
            decide(cache_type, cached.as_ref(), Utc::now(), self.config.stale_interval),
            cached,
        ) {
            (CacheDecision::Serve, Some(entry)) => {
                trace!(url = %url, cache_type = ?cache_type, "Serving from cache");
                ImageResult::Image {
                    image: entry.image().clone(),
                    bytes: entry.payload().clone(),
                }
            }
            (CacheDecision::Download(cache_policy), _) => {
                let request = DownloadRequest {
                    url,
                    cache_policy,
                    customizer,
                    identifier,
                };
                self.download_and_store(request, key).await
            }
            _ => {
                trace!(url = %url, "Cache-only retrieval missed");
                ImageResult::CanceledOrInvalidated
            }
        }
    }

    async fn download_and_store(&self, request: DownloadRequest, key: CacheKey) -> ImageResult {
        let (tx, rx) = oneshot::channel();
        self.download_image(request, tx);

        let Ok(event) = rx.await else {
            return ImageResult::CanceledOrInvalidated;
        };

        if !event.invalidated
            && let DownloadOutcome::Success { image, bytes } = &event.outcome
        {
            self.cache
                .store(key, bytes.clone(), Some(image.clone()))
                .await;
        }
        ImageResult::from(event)
    }

    /// Cancels every pending download with this identifier.
    ///
    /// Unknown or finished identifiers are ignored.
    pub fn cancel_download(&self, id: &OperationId) {
        for handle in self.pending.take(id) {
            handle.cancel();
        }
    }

    /// Marks every pending download with this identifier as unwanted.
    ///
    /// They still complete, but their results are reported as
    /// [`ImageResult::CanceledOrInvalidated`] and never stored.
    pub fn invalidate_download(&self, id: &OperationId) {
        for handle in self.pending.get(id) {
            handle.invalidate();
        }
    }

    /// Cancels all pending downloads.
    pub fn cancel_all(&self) {
        let handles = self.pending.drain();
        let count = handles.len();
        for handle in handles {
            handle.cancel();
        }
        if count > 0 {
            debug!(count = count, "Cancelled all pending downloads");
        }
    }

    /// Number of downloads queued or in flight.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if a download with this identifier is queued or in flight.
    #[must_use]
    pub fn is_pending(&self, id: &OperationId) -> bool {
        self.pending.contains(id)
    }

    /// Sets or removes (`value = None`) a request header, globally or for one host.
    pub fn set_header_value(&self, value: Option<&str>, name: &str, host: Option<&str>) {
        self.policy.write().set_header(name, value, host);
    }

    /// Replaces the whole header set, globally or for one host.
    pub fn set_headers(&self, headers: HashMap<String, String>, host: Option<&str>) {
        self.policy.write().set_headers(headers, host);
    }

    /// Sets or removes basic-auth credentials, globally or for one host.
    pub fn set_basic_auth_credentials(&self, credential: Option<Credential>, host: Option<&str>) {
        self.policy.write().set_credentials(credential, host);
    }

    /// Accepts any server certificate from now on.
    pub fn trust_all_certificates(&self) {
        self.trust_all.store(true, Ordering::Release);
    }

    /// Returns true once certificate checks are disabled.
    #[must_use]
    pub fn trusts_all_certificates(&self) -> bool {
        self.trust_all.load(Ordering::Acquire)
    }

    fn build_request(
        &self,
        url: Url,
        cache_policy: RequestCachePolicy,
        customizer: Option<&RequestCustomizer>,
    ) -> (ImageRequest, TransportOptions) {
        let mut request = ImageRequest::get(url, cache_policy, self.config.timeout);
        let host = request.host().map(str::to_owned);

        let credentials = {
            let policy = self.policy.read();
            for (name, value) in policy.headers_for_host(host.as_deref()) {
                request.set_header(&name, &value);
            }
            policy.credentials_for_host(host.as_deref()).cloned()
        };

        if let Some(customize) = customizer {
            request = customize(request);
        }

        let options = TransportOptions {
            credentials,
            trust_all_certificates: self.trusts_all_certificates(),
        };
        (request, options)
    }
}

#[async_trait]
impl ImageRetriever for DownloadCoordinator {
    async fn retrieve_image(&self, url: Url, options: RetrieveOptions) -> ImageResult {
        Self::retrieve_image(self, url, options).await
    }

    fn cancel_download(&self, id: &OperationId) {
        Self::cancel_download(self, id);
    }

    fn invalidate_download(&self, id: &OperationId) {
        Self::invalidate_download(self, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::{CacheType, DownloadEvent};
    use crate::domain::ports::MockImageTransport;
    use crate::domain::ports::mocks::StubTransport;
    use bytes::Bytes;
    use std::io::Cursor;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    const URL: &str = "https://img.example.com/a.png";

    fn png_bytes(width: u32) -> Bytes {
        let img = image::DynamicImage::new_rgb8(width, 2);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
            .unwrap();
        Bytes::from(buf)
    }

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn coordinator_with(
        temp: &TempDir,
        transport: Arc<dyn ImageTransport>,
        config: CoordinatorConfig,
    ) -> DownloadCoordinator {
        let cache = assert_ok!(TieredCache::open(
            TieredCacheConfig::new("coordinator").with_base_dir(temp.path())
        ));
        DownloadCoordinator::new(config, cache, transport)
    }

    fn coordinator(temp: &TempDir, transport: Arc<dyn ImageTransport>) -> DownloadCoordinator {
        coordinator_with(temp, transport, CoordinatorConfig::default())
    }

    async fn eventually(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_from_config_opens_namespace() {
        let temp = TempDir::new().unwrap();
        let mut config = ImageKitConfig::default();
        config.cache.base_dir = Some(temp.path().to_path_buf());
        config.cache.namespace = "configured".to_string();
        config.download.max_concurrent_downloads = 2;

        let coordinator = assert_ok!(DownloadCoordinator::from_config(&config));

        assert!(temp.path().join("imagekit-configured").is_dir());
        assert_eq!(coordinator.config().max_concurrent_downloads, 2);
        assert!(!coordinator.trusts_all_certificates());
    }

    #[tokio::test]
    async fn test_from_cache_miss_never_touches_network() {
        let temp = TempDir::new().unwrap();
        let mut transport = MockImageTransport::new();
        transport.expect_fetch().never();
        let coordinator = coordinator(&temp, Arc::new(transport));

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::new(CacheType::FromCache))
            .await;

        assert!(matches!(result, ImageResult::CanceledOrInvalidated));
    }

    #[tokio::test]
    async fn test_from_cache_hit() {
        let temp = TempDir::new().unwrap();
        let mut transport = MockImageTransport::new();
        transport.expect_fetch().never();
        let coordinator = coordinator(&temp, Arc::new(transport));
        let key = coordinator.cache_key(&url(URL));
        coordinator.cache().store(key, png_bytes(3), None).await;

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::new(CacheType::FromCache))
            .await;

        assert_eq!(result.bytes(), Some(&png_bytes(3)));
    }

    #[tokio::test]
    async fn test_force_download_refetches_and_refreshes_cache() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::new());
        transport.respond(URL, Ok(png_bytes(5)));
        let coordinator = coordinator(&temp, transport.clone());
        let key = coordinator.cache_key(&url(URL));
        coordinator.cache().store(key.clone(), png_bytes(1), None).await;

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::new(CacheType::ForceDownload))
            .await;

        let ImageResult::Image { image, bytes } = result else {
            panic!("expected image, got {result:?}");
        };
        assert_eq!(image.width(), 5);
        assert_eq!(bytes, png_bytes(5));
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            transport.requests()[0].0.cache_policy,
            RequestCachePolicy::ReloadIgnoringCache
        );
        let cached = coordinator.cache().fetch(&key).await.unwrap();
        assert_eq!(cached.payload(), &png_bytes(5));
    }

    #[tokio::test]
    async fn test_protocol_uses_protocol_policy() {
        let temp = TempDir::new().unwrap();
        let mut transport = MockImageTransport::new();
        transport
            .expect_fetch()
            .withf(|request, _| request.cache_policy == RequestCachePolicy::UseProtocolCachePolicy)
            .times(1)
            .returning(|_, _| Ok(png_bytes(2)));
        let coordinator = coordinator(&temp, Arc::new(transport));

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::new(CacheType::Protocol))
            .await;

        assert!(result.is_image());
    }

    #[tokio::test]
    async fn test_automatic_serves_fresh_entry() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::new());
        let config = CoordinatorConfig {
            stale_interval: Duration::from_secs(3600),
            ..CoordinatorConfig::default()
        };
        let coordinator = coordinator_with(&temp, transport.clone(), config);
        let key = coordinator.cache_key(&url(URL));
        coordinator.cache().store(key, png_bytes(1), None).await;

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::default())
            .await;

        assert_eq!(result.bytes(), Some(&png_bytes(1)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_automatic_refetches_stale_entry() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::new());
        transport.respond(URL, Ok(png_bytes(4)));
        let config = CoordinatorConfig {
            stale_interval: Duration::ZERO,
            ..CoordinatorConfig::default()
        };
        let coordinator = coordinator_with(&temp, transport.clone(), config);
        let key = coordinator.cache_key(&url(URL));
        coordinator.cache().store(key, png_bytes(1), None).await;

        let result = coordinator
            .retrieve_image(url(URL), RetrieveOptions::default())
            .await;

        assert_eq!(result.bytes(), Some(&png_bytes(4)));
        assert_eq!(transport.calls(), 1);
        assert_eq!(
            transport.requests()[0].0.cache_policy,
            RequestCachePolicy::UseProtocolCachePolicy
        );
    }

    #[tokio::test]
    async fn test_cancel_before_resolve_never_yields_image() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::gated());
        transport.respond(URL, Ok(png_bytes(2)));
        let coordinator = Arc::new(coordinator(&temp, transport.clone()));
        let id = OperationId::new("cell-7");

        let task = {
            let coordinator = coordinator.clone();
            let options = RetrieveOptions::new(CacheType::ForceDownload).with_identifier(id.clone());
            tokio::spawn(async move { coordinator.retrieve_image(url(URL), options).await })
        };
        eventually(|| transport.calls() == 1).await;

        coordinator.cancel_download(&id);
        transport.release(1);

        let result = task.await.unwrap();
        assert!(matches!(result, ImageResult::CanceledOrInvalidated));
        assert!(!coordinator.is_pending(&id));
        let key = coordinator.cache_key(&url(URL));
        assert!(coordinator.cache().fetch(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidated_download_completes_but_is_not_stored() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::gated());
        transport.respond(URL, Ok(png_bytes(2)));
        let coordinator = Arc::new(coordinator(&temp, transport.clone()));
        let id = OperationId::new("cell-8");

        let task = {
            let coordinator = coordinator.clone();
            let options = RetrieveOptions::new(CacheType::ForceDownload).with_identifier(id.clone());
            tokio::spawn(async move { coordinator.retrieve_image(url(URL), options).await })
        };
        eventually(|| transport.calls() == 1).await;

        coordinator.invalidate_download(&id);
        assert!(coordinator.is_pending(&id));
        transport.release(1);

        let result = task.await.unwrap();
        assert!(matches!(result, ImageResult::CanceledOrInvalidated));
        eventually(|| coordinator.pending_count() == 0).await;
        let key = coordinator.cache_key(&url(URL));
        assert!(coordinator.cache().fetch(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_unknown_identifier_is_ignored() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(&temp, Arc::new(StubTransport::new()));

        coordinator.cancel_download(&OperationId::new("nope"));
        coordinator.invalidate_download(&OperationId::new("nope"));

        assert_eq!(coordinator.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_host_headers_and_credentials_are_isolated() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::new());
        let coordinator = coordinator(&temp, transport.clone());
        coordinator.set_header_value(Some("global"), "X-Client", None);
        coordinator.set_header_value(Some("one"), "X-Key", Some("h1.example.com"));
        coordinator.set_header_value(Some("two"), "X-Key", Some("h2.example.com"));
        coordinator.set_basic_auth_credentials(
            Some(Credential::new("alice", "secret")),
            Some("h1.example.com"),
        );

        let (tx, mut rx) = mpsc::unbounded_channel();
        coordinator.download_image(DownloadRequest::new(url("https://h1.example.com/x")), tx.clone());
        coordinator.download_image(DownloadRequest::new(url("https://h2.example.com/x")), tx);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let requests = transport.requests();
        let find = |host: &str| {
            requests
                .iter()
                .find(|(r, _)| r.host() == Some(host))
                .cloned()
                .unwrap()
        };
        let (h1, h1_options) = find("h1.example.com");
        let (h2, h2_options) = find("h2.example.com");

        assert_eq!(h1.header("x-key"), Some("one"));
        assert_eq!(h2.header("x-key"), Some("two"));
        assert_eq!(h1.header("x-client"), Some("global"));
        assert_eq!(h2.header("x-client"), Some("global"));
        assert_eq!(h1_options.credentials.as_ref().map(Credential::user), Some("alice"));
        assert!(h2_options.credentials.is_none());
    }

    #[tokio::test]
    async fn test_customizer_and_trust_flag_reach_transport() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::new());
        let coordinator = coordinator(&temp, transport.clone());
        coordinator.trust_all_certificates();
        let customizer: RequestCustomizer =
            Arc::new(|request: ImageRequest| request.with_query([("w", "64")]));

        let result = coordinator
            .retrieve_image(
                url(URL),
                RetrieveOptions::new(CacheType::ForceDownload).with_customizer(customizer),
            )
            .await;

        // Only the bare URL is scripted, so the customized one 404s.
        assert!(matches!(result, ImageResult::Error(FetchError::Status { status: 404, .. })));
        let (request, options) = transport.requests().remove(0);
        assert_eq!(request.url.query(), Some("w=64"));
        assert!(options.trust_all_certificates);
    }

    #[tokio::test]
    async fn test_worker_pool_is_bounded() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::gated());
        let config = CoordinatorConfig {
            max_concurrent_downloads: 2,
            ..CoordinatorConfig::default()
        };
        let coordinator = coordinator_with(&temp, transport.clone(), config);

        for i in 0..5 {
            coordinator.download_image(
                DownloadRequest::new(url(&format!("https://img.example.com/{i}.png"))),
                CompletionSink::Discard,
            );
        }
        eventually(|| transport.calls() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(transport.calls(), 2);
        assert_eq!(coordinator.pending_count(), 5);

        transport.release(5);
        eventually(|| coordinator.pending_count() == 0).await;
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test]
    async fn test_cancel_all_delivers_one_event_each() {
        let temp = TempDir::new().unwrap();
        let transport = Arc::new(StubTransport::gated());
        let config = CoordinatorConfig {
            max_concurrent_downloads: 1,
            ..CoordinatorConfig::default()
        };
        let coordinator = coordinator_with(&temp, transport.clone(), config);
        let (tx, mut rx) = mpsc::unbounded_channel::<DownloadEvent>();

        for i in 0..3 {
            coordinator.download_image(
                DownloadRequest::new(url(&format!("https://img.example.com/{i}.png")))
                    .with_identifier(format!("op-{i}")),
                tx.clone(),
            );
        }
        drop(tx);
        eventually(|| transport.calls() == 1).await;

        coordinator.cancel_all();
        transport.release(3);

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        assert_eq!(events.len(), 3);
        assert!(events
            .iter()
            .all(|e| matches!(e.outcome, DownloadOutcome::Canceled)));
        assert_eq!(coordinator.pending_count(), 0);
    }
}
