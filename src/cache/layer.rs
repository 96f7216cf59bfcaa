//! Cache-aside layer in front of a request handler

use crate::cache::capture::{CaptureState, CapturingSink, HIT};
use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::store::{CacheStore, FileStore, MemoryStore};
use crate::config::CacheConfig;
use crate::error::{HarborError, HarborResult};
use crate::server::{Request, RequestHandler, ResponseSink};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Decides whether a request may be served from the cache
pub type CachePredicate = Arc<dyn Fn(&Request) -> bool + Send + Sync>;

/// Where a request ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Not cacheable; handed straight to the handler
    Passthrough,
    /// Served from the store without calling the handler
    Hit,
    /// Produced by the handler; `stored` tells whether an entry was written
    Miss { stored: bool },
    /// The invalidation route cleared the store
    Invalidated(InvalidationReport),
}

/// Result of an invalidate-all sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    pub removed: usize,
    pub failed: usize,
}

/// Settings for the response cache
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub status_header: HeaderName,
    pub invalidate_path: String,
    pub vary_headers: Vec<HeaderName>,
    pub bypass_prefixes: Vec<String>,
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig) -> HarborResult<Self> {
        let status_header = parse_header_name("cache.status_header", &config.status_header)?;
        let vary_headers = config
            .vary_headers
            .iter()
            .map(|name| parse_header_name("cache.vary_headers", name))
            .collect::<HarborResult<Vec<_>>>()?;

        Ok(Self {
            status_header,
            invalidate_path: config.invalidate_path.clone(),
            vary_headers,
            bypass_prefixes: config.bypass_prefixes.clone(),
        })
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            status_header: HeaderName::from_static("x-cache"),
            invalidate_path: "/invalidate".to_string(),
            vary_headers: vec![],
            bypass_prefixes: vec![],
        }
    }
}

fn parse_header_name(setting: &str, name: &str) -> HarborResult<HeaderName> {
    HeaderName::try_from(name).map_err(|e| HarborError::SettingInvalid {
        setting: setting.to_string(),
        reason: format!("{name:?}: {e}"),
    })
}

/// Response cache wrapping an opaque request handler
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    settings: CacheSettings,
    predicate: CachePredicate,
}

impl ResponseCache {
    /// Create a cache that stores successful GET responses
    pub fn new(store: Arc<dyn CacheStore>, settings: CacheSettings) -> Self {
        let bypass = settings.bypass_prefixes.clone();
        let predicate: CachePredicate = Arc::new(move |request: &Request| {
            request.method() == Method::GET
                && !bypass.iter().any(|prefix| request.path().starts_with(prefix))
        });

        Self {
            store,
            settings,
            predicate,
        }
    }

    /// Build from configuration, using a file store when `store_dir` is set
    pub async fn from_config(config: &CacheConfig) -> HarborResult<Self> {
        let settings = CacheSettings::from_config(config)?;
        let store: Arc<dyn CacheStore> = match &config.store_dir {
            Some(dir) => Arc::new(FileStore::open(dir).await?),
            None => Arc::new(MemoryStore::new()),
        };
        Ok(Self::new(store, settings))
    }

    /// Replace the caching decision
    pub fn with_predicate(mut self, predicate: CachePredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn should_cache(&self, request: &Request) -> bool {
        (self.predicate)(request)
    }

    pub fn is_invalidation(&self, request: &Request) -> bool {
        request.method() == Method::POST && request.path() == self.settings.invalidate_path
    }

    pub fn key_for(&self, request: &Request) -> CacheKey {
        CacheKey::from_request(request, &self.settings.vary_headers)
    }

    /// Look up an entry; store failures count as a miss
    pub async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.store.get(key).await {
            Ok(entry) => entry.filter(|e| e.cacheable),
            Err(e) => {
                warn!("Cache lookup for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Remove every entry, continuing past individual failures
    pub async fn invalidate_all(&self) -> InvalidationReport {
        let mut report = InvalidationReport::default();

        match self.store.purge_unreadable().await {
            Ok(purged) => {
                report.removed += purged.removed;
                report.failed += purged.failed;
            }
            Err(e) => {
                warn!("Cache invalidation could not scan for unreadable entries: {}", e);
                report.failed += 1;
            }
        }

        let keys = match self.store.keys().await {
            Ok(keys) => keys,
            Err(e) => {
                warn!("Cache invalidation could not list entries: {}", e);
                report.failed += 1;
                return report;
            }
        };

        for key in keys {
            match self.store.delete(&key).await {
                Ok(_) => report.removed += 1,
                Err(e) => {
                    warn!("Failed to invalidate {}: {}", key, e);
                    report.failed += 1;
                }
            }
        }

        info!(
            "Cache invalidated: {} removed, {} failed",
            report.removed, report.failed
        );
        report
    }

    /// Serve `request` through the cache
    pub async fn handle(
        &self,
        request: &Request,
        handler: &dyn RequestHandler,
        sink: &mut dyn ResponseSink,
    ) -> HarborResult<CacheOutcome> {
        if self.is_invalidation(request) {
            let report = self.invalidate_all().await;
            write_invalidation_response(sink, report).await?;
            return Ok(CacheOutcome::Invalidated(report));
        }

        if !self.should_cache(request) {
            handler.handle(request, sink).await?;
            return Ok(CacheOutcome::Passthrough);
        }

        let key = self.key_for(request);
        if let Some(entry) = self.get(&key).await {
            debug!("Cache hit for {}", key);
            self.serve_entry(&entry, sink).await?;
            return Ok(CacheOutcome::Hit);
        }

        debug!("Cache miss for {}", key);
        let mut capture = CapturingSink::new(
            sink,
            self.store.as_ref(),
            key,
            self.settings.status_header.clone(),
        );
        handler.handle(request, &mut capture).await?;

        let stored = match capture.state() {
            CaptureState::Done { stored } => stored,
            CaptureState::Building => {
                debug!("Handler returned without finishing the response");
                false
            }
        };
        Ok(CacheOutcome::Miss { stored })
    }

    async fn serve_entry(&self, entry: &CacheEntry, sink: &mut dyn ResponseSink) -> HarborResult<()> {
        let mut headers = entry.header_map();
        headers.insert(self.settings.status_header.clone(), HeaderValue::from_static(HIT));

        sink.write_head(entry.status_code(), headers).await?;
        sink.finish(Some(entry.body.as_slice())).await
    }
}

async fn write_invalidation_response(
    sink: &mut dyn ResponseSink,
    report: InvalidationReport,
) -> HarborResult<()> {
    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );

    let mut body = format!("Cache invalidated: {} entries removed", report.removed);
    if report.failed > 0 {
        body.push_str(&format!(", {} failed", report.failed));
    }
    body.push('\n');

    sink.write_head(StatusCode::OK, headers).await?;
    sink.finish(Some(body.as_bytes())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::capture::MISS;
    use crate::server::BufferedResponse;
    use async_trait::async_trait;
    use http::header::ACCEPT_ENCODING;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Origin handler: `/error` fails, everything else says hello in two chunks
    #[derive(Default)]
    struct Origin {
        calls: AtomicUsize,
    }

    impl Origin {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl RequestHandler for Origin {
        async fn handle(&self, request: &Request, sink: &mut dyn ResponseSink) -> HarborResult<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let mut headers = HeaderMap::new();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));

            if request.path() == "/error" {
                sink.write_head(StatusCode::INTERNAL_SERVER_ERROR, headers)
                    .await?;
                return sink.finish(Some(b"failed")).await;
            }

            sink.write_head(StatusCode::OK, headers).await?;
            sink.write_chunk(b"hel").await?;
            sink.finish(Some(b"lo")).await
        }
    }

    /// Store that fails every operation
    struct DownStore;

    #[async_trait]
    impl CacheStore for DownStore {
        async fn get(&self, _key: &CacheKey) -> HarborResult<Option<CacheEntry>> {
            Err(HarborError::store("connection refused"))
        }
        async fn put(&self, _entry: CacheEntry) -> HarborResult<()> {
            Err(HarborError::store("connection refused"))
        }
        async fn delete(&self, _key: &CacheKey) -> HarborResult<bool> {
            Err(HarborError::store("connection refused"))
        }
        async fn keys(&self) -> HarborResult<Vec<CacheKey>> {
            Err(HarborError::store("connection refused"))
        }
    }

    /// Store that lists keys but refuses to delete one of them
    struct StickyStore {
        inner: MemoryStore,
        sticky: CacheKey,
    }

    #[async_trait]
    impl CacheStore for StickyStore {
        async fn get(&self, key: &CacheKey) -> HarborResult<Option<CacheEntry>> {
            self.inner.get(key).await
        }
        async fn put(&self, entry: CacheEntry) -> HarborResult<()> {
            self.inner.put(entry).await
        }
        async fn delete(&self, key: &CacheKey) -> HarborResult<bool> {
            if key == &self.sticky {
                return Err(HarborError::store("permission denied"));
            }
            self.inner.delete(key).await
        }
        async fn keys(&self) -> HarborResult<Vec<CacheKey>> {
            self.inner.keys().await
        }
    }

    fn cache() -> ResponseCache {
        ResponseCache::new(Arc::new(MemoryStore::new()), CacheSettings::default())
    }

    async fn send(cache: &ResponseCache, origin: &Origin, request: Request) -> (CacheOutcome, BufferedResponse) {
        let mut client = BufferedResponse::new();
        let outcome = cache.handle(&request, origin, &mut client).await.unwrap();
        (outcome, client)
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = cache();
        let origin = Origin::default();

        let (outcome, first) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
        assert_eq!(first.header("x-cache"), Some(MISS));
        assert_eq!(first.body_text(), "hello");

        let entry = cache.get(&CacheKey::new("/foo")).await.unwrap();
        assert_eq!(entry.body, b"hello");
        assert_eq!(entry.headers[0].0, "content-type");
        assert_eq!(entry.headers[0].1.as_bytes(), b"text/plain");
        assert_eq!(entry.header_map()["x-cache"], MISS);

        let (outcome, second) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(second.status, Some(StatusCode::OK));
        assert_eq!(second.header("x-cache"), Some(HIT));
        assert_eq!(second.header("content-type"), Some("text/plain"));
        assert_eq!(second.body, first.body);
        assert_eq!(second.headers.get_all("x-cache").iter().count(), 1);
        assert_eq!(origin.calls(), 1);
    }

    #[tokio::test]
    async fn error_responses_are_never_cached() {
        let cache = cache();
        let origin = Origin::default();

        for _ in 0..2 {
            let (outcome, response) = send(&cache, &origin, Request::get("/error")).await;
            assert_eq!(outcome, CacheOutcome::Miss { stored: false });
            assert_eq!(response.status, Some(StatusCode::INTERNAL_SERVER_ERROR));
            assert_eq!(response.header("x-cache"), Some(MISS));
        }

        assert_eq!(origin.calls(), 2);
        assert!(cache.store().get(&CacheKey::new("/error")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn non_get_passes_through() {
        let cache = cache();
        let origin = Origin::default();

        let (outcome, response) = send(&cache, &origin, Request::post("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Passthrough);
        assert_eq!(response.header("x-cache"), None);
        assert!(cache.store().keys().await.unwrap().is_empty());

        let (outcome, _) = send(&cache, &origin, Request::new(Method::HEAD, "/foo")).await;
        assert_eq!(outcome, CacheOutcome::Passthrough);
        assert_eq!(origin.calls(), 2);
    }

    #[tokio::test]
    async fn bypass_prefixes_pass_through() {
        let settings = CacheSettings {
            bypass_prefixes: vec!["/api/".to_string()],
            ..CacheSettings::default()
        };
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()), settings);
        let origin = Origin::default();

        let (outcome, _) = send(&cache, &origin, Request::get("/api/cart")).await;
        assert_eq!(outcome, CacheOutcome::Passthrough);
        let (outcome, _) = send(&cache, &origin, Request::get("/apiary")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
    }

    #[tokio::test]
    async fn custom_predicate() {
        let cache = cache().with_predicate(Arc::new(|request: &Request| {
            request.path().starts_with("/static/")
        }));
        let origin = Origin::default();

        assert!(!cache.should_cache(&Request::get("/foo")));
        assert!(cache.should_cache(&Request::post("/static/logo.svg")));
        let (outcome, _) = send(&cache, &origin, Request::get("/static/app.css")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
    }

    #[tokio::test]
    async fn invalidate_route_clears_everything() {
        let cache = cache();
        let origin = Origin::default();
        send(&cache, &origin, Request::get("/foo")).await;
        send(&cache, &origin, Request::get("/bar")).await;

        let (outcome, response) = send(&cache, &origin, Request::post("/invalidate")).await;
        assert_eq!(
            outcome,
            CacheOutcome::Invalidated(InvalidationReport {
                removed: 2,
                failed: 0
            })
        );
        assert_eq!(response.status, Some(StatusCode::OK));
        assert_eq!(response.header("content-type"), Some("text/plain; charset=utf-8"));
        assert_eq!(response.body_text(), "Cache invalidated: 2 entries removed\n");
        assert_eq!(origin.calls(), 2);

        let (outcome, _) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
        assert_eq!(origin.calls(), 3);
    }

    #[tokio::test]
    async fn get_on_invalidate_path_is_ordinary() {
        let cache = cache();
        let origin = Origin::default();

        let (outcome, _) = send(&cache, &origin, Request::get("/invalidate")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
    }

    #[tokio::test]
    async fn vary_headers_split_entries() {
        let settings = CacheSettings {
            vary_headers: vec![ACCEPT_ENCODING],
            ..CacheSettings::default()
        };
        let cache = ResponseCache::new(Arc::new(MemoryStore::new()), settings);
        let origin = Origin::default();

        let gzip = || {
            Request::get("/foo").with_header(ACCEPT_ENCODING, HeaderValue::from_static("gzip"))
        };
        send(&cache, &origin, gzip()).await;
        let (outcome, _) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
        let (outcome, _) = send(&cache, &origin, gzip()).await;
        assert_eq!(outcome, CacheOutcome::Hit);
    }

    #[tokio::test]
    async fn store_outage_degrades_to_uncached() {
        let cache = ResponseCache::new(Arc::new(DownStore), CacheSettings::default());
        let origin = Origin::default();

        for _ in 0..2 {
            let (outcome, response) = send(&cache, &origin, Request::get("/foo")).await;
            assert_eq!(outcome, CacheOutcome::Miss { stored: false });
            assert_eq!(response.body_text(), "hello");
        }
        assert_eq!(origin.calls(), 2);

        let report = cache.invalidate_all().await;
        assert_eq!(report, InvalidationReport { removed: 0, failed: 1 });
    }

    #[tokio::test]
    async fn invalidation_clears_corrupt_file_entries() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        let cache = ResponseCache::new(Arc::new(store), CacheSettings::default());
        let origin = Origin::default();
        send(&cache, &origin, Request::get("/ok")).await;

        // Truncated on disk, so it has no readable key
        let corrupt = dir.path().join("deadbeef.json");
        std::fs::write(&corrupt, "{truncated").unwrap();

        let report = cache.invalidate_all().await;

        assert_eq!(report, InvalidationReport { removed: 2, failed: 0 });
        assert!(!corrupt.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn partial_invalidation_reports_failures() {
        let store = StickyStore {
            inner: MemoryStore::new(),
            sticky: CacheKey::new("/bar"),
        };
        let cache = ResponseCache::new(Arc::new(store), CacheSettings::default());
        let origin = Origin::default();
        send(&cache, &origin, Request::get("/foo")).await;
        send(&cache, &origin, Request::get("/bar")).await;
        send(&cache, &origin, Request::get("/baz")).await;

        let (_, response) = send(&cache, &origin, Request::post("/invalidate")).await;
        assert_eq!(
            response.body_text(),
            "Cache invalidated: 2 entries removed, 1 failed\n"
        );

        // The sweep left nothing that blocks later requests
        let (outcome, _) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Miss { stored: true });
        let (outcome, _) = send(&cache, &origin, Request::get("/bar")).await;
        assert_eq!(outcome, CacheOutcome::Hit);
    }

    #[tokio::test]
    async fn from_config_with_file_store() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            enabled: true,
            store_dir: Some(dir.path().join("responses")),
            status_header: "X-Harbor-Cache".to_string(),
            ..CacheConfig::default()
        };
        let cache = ResponseCache::from_config(&config).await.unwrap();
        let origin = Origin::default();

        let (_, response) = send(&cache, &origin, Request::get("/foo")).await;
        assert_eq!(response.header("x-harbor-cache"), Some(MISS));

        // A second worker sharing the directory sees the entry
        let other = ResponseCache::from_config(&config).await.unwrap();
        let (outcome, response) = send(&other, &origin, Request::get("/foo")).await;
        assert_eq!(outcome, CacheOutcome::Hit);
        assert_eq!(response.body_text(), "hello");
    }

    #[test]
    fn settings_reject_bad_header_names() {
        let config = CacheConfig {
            vary_headers: vec!["Accept Encoding".to_string()],
            ..CacheConfig::default()
        };
        assert!(matches!(
            CacheSettings::from_config(&config),
            Err(HarborError::SettingInvalid { .. })
        ));
    }
}
