//! Response capture on cache misses
//!
//! [`CapturingSink`] wraps the client's sink. Every byte is forwarded as soon
//! as the handler writes it, and a copy is kept so that a successful response
//! can be stored once the handler finishes.

use crate::cache::entry::CacheEntry;
use crate::cache::key::CacheKey;
use crate::cache::store::CacheStore;
use crate::error::HarborResult;
use crate::server::ResponseSink;
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use tracing::{debug, warn};

/// Value of the cache-status header on responses produced by the handler
pub const MISS: &str = "MISS";

/// Value of the cache-status header on responses served from the store
pub const HIT: &str = "HIT";

/// Progress of a captured response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    /// The handler is still writing
    Building,
    /// The handler finished; `stored` tells whether an entry was persisted
    Done { stored: bool },
}

/// Decorator that tees a response into the cache store
pub struct CapturingSink<'a> {
    inner: &'a mut dyn ResponseSink,
    store: &'a dyn CacheStore,
    key: CacheKey,
    status_header: HeaderName,
    head: Option<(StatusCode, HeaderMap)>,
    chunks: Vec<Vec<u8>>,
    cacheable: bool,
    state: CaptureState,
}

impl<'a> CapturingSink<'a> {
    pub fn new(
        inner: &'a mut dyn ResponseSink,
        store: &'a dyn CacheStore,
        key: CacheKey,
        status_header: HeaderName,
    ) -> Self {
        Self {
            inner,
            store,
            key,
            status_header,
            head: None,
            chunks: Vec::new(),
            cacheable: false,
            state: CaptureState::Building,
        }
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    /// Handlers that write a body without a head get an implicit 200
    async fn ensure_head(&mut self) -> HarborResult<()> {
        if self.head.is_none() {
            self.write_head(StatusCode::OK, HeaderMap::new()).await?;
        }
        Ok(())
    }

    async fn persist(&mut self) -> bool {
        let Some((status, headers)) = &self.head else {
            return false;
        };

        let entry = CacheEntry::new(
            self.key.clone(),
            *status,
            headers,
            std::mem::take(&mut self.chunks).concat(),
        );

        match self.store.put(entry).await {
            Ok(()) => {
                debug!("Cached response for {}", self.key);
                true
            }
            Err(e) => {
                warn!("Failed to cache response for {}: {}", self.key, e);
                false
            }
        }
    }
}

#[async_trait]
impl<'a> ResponseSink for CapturingSink<'a> {
    async fn write_head(&mut self, status: StatusCode, mut headers: HeaderMap) -> HarborResult<()> {
        headers.insert(self.status_header.clone(), HeaderValue::from_static(MISS));
        self.cacheable = status.is_success();
        self.head = Some((status, headers.clone()));

        self.inner.write_head(status, headers).await
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> HarborResult<()> {
        self.ensure_head().await?;
        self.inner.write_chunk(chunk).await?;

        if self.cacheable {
            self.chunks.push(chunk.to_vec());
        }
        Ok(())
    }

    async fn finish(&mut self, last: Option<&[u8]>) -> HarborResult<()> {
        self.ensure_head().await?;

        if self.cacheable {
            if let Some(last) = last {
                self.chunks.push(last.to_vec());
            }
        }

        // Persist before the client sees the end of the response
        let stored = self.cacheable && self.persist().await;
        self.state = CaptureState::Done { stored };

        self.inner.finish(last).await
    }
}
