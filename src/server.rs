//! Request and response seams between the host server and handlers
//!
//! The host owns the sockets. Handlers see a [`Request`] and write their
//! response into a [`ResponseSink`]; the response cache decorates that sink.

use crate::error::{HarborError, HarborResult};
use async_trait::async_trait;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};

/// An incoming request as seen by handlers
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
}

impl Request {
    /// Create a request; `target` may include a query string
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        Self {
            method,
            path: path.to_string(),
            query,
            headers: HeaderMap::new(),
        }
    }

    /// Build from the parts a host server hands over
    pub fn from_parts(method: Method, uri: &Uri, headers: HeaderMap) -> Self {
        Self {
            method,
            path: uri.path().to_string(),
            query: uri.query().map(str::to_string),
            headers,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

/// Where a handler writes its response
///
/// Mirrors a streaming HTTP response: head once, any number of body chunks,
/// then `finish` with an optional final chunk.
#[async_trait]
pub trait ResponseSink: Send {
    /// Send the status line and headers
    async fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> HarborResult<()>;

    /// Send one body chunk
    async fn write_chunk(&mut self, chunk: &[u8]) -> HarborResult<()>;

    /// Complete the response
    async fn finish(&mut self, last: Option<&[u8]>) -> HarborResult<()>;
}

/// Handles requests by writing into a sink
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: &Request, sink: &mut dyn ResponseSink) -> HarborResult<()>;
}

/// Sink that keeps the whole response in memory
#[derive(Debug, Default)]
pub struct BufferedResponse {
    pub status: Option<StatusCode>,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    pub chunks: usize,
    pub finished: bool,
}

impl BufferedResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header value as a string, if present and visible ASCII
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[async_trait]
impl ResponseSink for BufferedResponse {
    async fn write_head(&mut self, status: StatusCode, headers: HeaderMap) -> HarborResult<()> {
        if self.status.is_some() {
            return Err(HarborError::Sink("head already written".to_string()));
        }
        self.status = Some(status);
        self.headers = headers;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> HarborResult<()> {
        if self.finished {
            return Err(HarborError::Sink("response already finished".to_string()));
        }
        self.body.extend_from_slice(chunk);
        self.chunks += 1;
        Ok(())
    }

    async fn finish(&mut self, last: Option<&[u8]>) -> HarborResult<()> {
        if let Some(last) = last {
            self.write_chunk(last).await?;
        }
        self.finished = true;
        Ok(())
    }
}
