use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Bytes, Incoming};
use hyper::{HeaderMap, Request};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::borrow::Cow;
use std::future::Future;
use tracing::debug;

use crate::error::{Error, Result};

pub type HeaderList = [(Cow<'static, str>, Cow<'static, str>)];

/// Status, headers and body of a response whose body has not been read yet.
pub struct TransportResponse<B> {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: B,
}

impl<B> TransportResponse<B> {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

/// A response body read incrementally, one network chunk at a time.
pub trait ResponseBody: Send {
    /// Next chunk of bytes, `None` at end of stream.
    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;
}

/// The HTTP operations the chat session needs: a GET whose body is discarded
/// and a POST whose body is streamed.
pub trait Transport: Send + Sync {
    type Body: ResponseBody;

    fn get(
        &self,
        url: &str,
        headers: &HeaderList,
    ) -> impl Future<Output = Result<TransportResponse<()>>> + Send;

    fn post(
        &self,
        url: &str,
        headers: &HeaderList,
        body: Bytes,
    ) -> impl Future<Output = Result<TransportResponse<Self::Body>>> + Send;
}

type HttpsConnector = hyper_rustls::HttpsConnector<HttpConnector>;

/// hyper client over rustls with webpki roots.
pub struct HttpTransport {
    full_client: Client<HttpsConnector, Full<Bytes>>,
    empty_client: Client<HttpsConnector, Empty<Bytes>>,
}

impl HttpTransport {
    pub fn new() -> Self {
        let connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_webpki_roots()
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .build();

        let full_client = Client::builder(TokioExecutor::new()).build(connector.clone());
        let empty_client = Client::builder(TokioExecutor::new()).build(connector);

        Self {
            full_client,
            empty_client,
        }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for HttpTransport {
    type Body = Incoming;

    async fn get(&self, url: &str, headers: &HeaderList) -> Result<TransportResponse<()>> {
        let mut req = Request::builder().method("GET").uri(url);
        for (name, value) in headers {
            req = req.header(name.as_ref(), value.as_ref());
        }
        let req = req
            .body(Empty::new())
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self
            .empty_client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let (parts, _) = response.into_parts();
        debug!(url = %url, status = parts.status.as_u16(), "GET completed");

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body: (),
        })
    }

    async fn post(
        &self,
        url: &str,
        headers: &HeaderList,
        body: Bytes,
    ) -> Result<TransportResponse<Incoming>> {
        let mut req = Request::builder().method("POST").uri(url);
        for (name, value) in headers {
            req = req.header(name.as_ref(), value.as_ref());
        }
        let req = req
            .body(Full::new(body))
            .map_err(|e| Error::Http(e.to_string()))?;

        let response = self
            .full_client
            .request(req)
            .await
            .map_err(|e| Error::Http(e.to_string()))?;

        let (parts, body) = response.into_parts();
        debug!(url = %url, status = parts.status.as_u16(), "POST headers received");

        Ok(TransportResponse {
            status: parts.status.as_u16(),
            headers: parts.headers,
            body,
        })
    }
}

impl ResponseBody for Incoming {
    async fn next_chunk(&mut self) -> Result<Option<Bytes>> {
        while let Some(frame) = self.frame().await {
            let frame = frame.map_err(|e| Error::Stream(e.to_string()))?;
            // Trailers carry no text
            if let Ok(data) = frame.into_data() {
                return Ok(Some(data));
            }
        }
        Ok(None)
    }
}

impl<B: ResponseBody> TransportResponse<B> {
    /// Drain the body into a lossy UTF-8 string, capped at `limit` characters.
    pub async fn text_preview(mut self, limit: usize) -> String {
        let mut bytes = Vec::new();
        while let Ok(Some(chunk)) = self.body.next_chunk().await {
            bytes.extend_from_slice(&chunk);
            if bytes.len() > limit * 4 {
                break;
            }
        }
        String::from_utf8_lossy(&bytes).chars().take(limit).collect()
    }
}
