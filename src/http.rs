//! HTTP transport.
//!
//! Every network call in the crate, whether it fetches a page or talks to a
//! translation API, is expressed as an [`HttpRequest`] and sent through a
//! [`Transport`]. Production code uses [`ReqwestTransport`]; tests plug in
//! scripted transports that count invocations.

use async_trait::async_trait;
use reqwest::{Client, Proxy};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

#[derive(Debug, Clone)]
pub enum Body {
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
}

/// A transport-agnostic request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Body>,
    pub timeout: Duration,
    /// Route through the configured proxy, if there is one.
    pub via_proxy: bool,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
            via_proxy: true,
        }
    }

    pub fn post_json(url: impl Into<String>, body: serde_json::Value, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(Body::Json(body)),
            timeout,
            via_proxy: true,
        }
    }

    pub fn post_form(url: impl Into<String>, form: Vec<(String, String)>, timeout: Duration) -> Self {
        Self {
            method: Method::Post,
            url: url.into(),
            headers: Vec::new(),
            body: Some(Body::Form(form)),
            timeout,
            via_proxy: true,
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn direct(mut self) -> Self {
        self.via_proxy = false;
        self
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Why a request produced no response at all.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("timed out: {0}")]
    Timeout(String),
    /// Could not reach the peer. `via_proxy` says whether the proxy was in the path.
    #[error("connect error: {message}")]
    Connect { message: String, via_proxy: bool },
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;

    /// Whether a proxy is configured at all.
    fn has_proxy(&self) -> bool {
        false
    }

    fn proxy_url(&self) -> Option<&str> {
        None
    }
}

/// `reqwest`-backed transport holding a direct client and, optionally, a proxied one.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    direct: Client,
    proxied: Option<(String, Client)>,
}

impl ReqwestTransport {
    pub fn new(proxy: Option<&str>) -> Result<Self, reqwest::Error> {
        let direct = Client::builder().build()?;
        let proxied = match proxy {
            Some(url) => Some((
                url.to_string(),
                Client::builder().proxy(Proxy::all(url)?).build()?,
            )),
            None => None,
        };
        Ok(Self { direct, proxied })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    #[instrument(level = "debug", skip_all, fields(url = %request.url, method = ?request.method))]
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let (client, via_proxy) = match (&self.proxied, request.via_proxy) {
            (Some((_, client)), true) => (client, true),
            _ => (&self.direct, false),
        };

        let mut builder = match request.method {
            Method::Get => client.get(&request.url),
            Method::Post => client.post(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match request.body {
            Some(Body::Json(json)) => builder.json(&json),
            Some(Body::Form(form)) => builder.form(&form),
            None => builder,
        };

        let classify = |e: reqwest::Error| {
            if e.is_timeout() {
                TransportError::Timeout(e.to_string())
            } else if e.is_connect() {
                TransportError::Connect {
                    message: e.to_string(),
                    via_proxy,
                }
            } else {
                TransportError::Other(e.to_string())
            }
        };

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(classify)?;
        debug!(status, bytes = body.len(), via_proxy, "HTTP response");
        Ok(HttpResponse { status, body })
    }

    fn has_proxy(&self) -> bool {
        self.proxied.is_some()
    }

    fn proxy_url(&self) -> Option<&str> {
        self.proxied.as_ref().map(|(url, _)| url.as_str())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builders() {
        let req = HttpRequest::get("https://example.com", Duration::from_secs(5))
            .header("User-Agent", "x")
            .direct();
        assert_eq!(req.method, Method::Get);
        assert!(!req.via_proxy);
        assert_eq!(req.headers, vec![("User-Agent".to_string(), "x".to_string())]);

        let req = HttpRequest::post_form("https://api", vec![("a".into(), "b".into())], Duration::from_secs(1));
        assert_eq!(req.method, Method::Post);
        assert!(matches!(req.body, Some(Body::Form(_))));
    }

    #[test]
    fn test_success_range() {
        assert!(HttpResponse { status: 204, body: String::new() }.is_success());
        assert!(!HttpResponse { status: 429, body: String::new() }.is_success());
    }

    #[test]
    fn test_reqwest_transport_reports_proxy() {
        let transport = ReqwestTransport::new(Some("http://127.0.0.1:7890")).unwrap();
        assert!(transport.has_proxy());
        assert_eq!(transport.proxy_url(), Some("http://127.0.0.1:7890"));
        assert!(!ReqwestTransport::new(None).unwrap().has_proxy());
    }
}
