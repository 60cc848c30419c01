//! Forwarding of admitted requests to the upstream service.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::header::{self, HeaderName, HeaderValue};
use axum::http::request::Parts;
use axum::http::uri::{Authority, PathAndQuery, Scheme};
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};

pub const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
pub const X_ORIGIN_HOST: HeaderName = HeaderName::from_static("x-origin-host");
pub const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Errors raised while forwarding a request.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("invalid upstream URI: {0}")]
    InvalidUpstreamUri(String),
    #[error("failed to build upstream client: {0}")]
    Client(reqwest::Error),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(reqwest::Error),
    #[error("upstream timed out: {0}")]
    UpstreamTimeout(reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::InvalidUpstreamUri(_) | Self::Client(_) | Self::UpstreamUnavailable(_) => {
                StatusCode::BAD_GATEWAY
            }
        };
        (status, self.to_string()).into_response()
    }
}

/// Points a request at its destination before it is sent.
pub trait RequestDirector: Send + Sync {
    fn direct(&self, parts: &mut Parts) -> Result<(), ProxyError>;
}

/// Sends every request to one upstream, keeping its path and query.
#[derive(Debug, Clone)]
pub struct UpstreamDirector {
    scheme: Scheme,
    authority: Authority,
    origin_host: HeaderValue,
}

impl UpstreamDirector {
    /// Only the scheme and authority of `target_url` are used.
    pub fn new(target_url: &str) -> Result<Self, ProxyError> {
        let uri: Uri = target_url
            .parse()
            .map_err(|e| ProxyError::InvalidUpstreamUri(format!("{target_url}: {e}")))?;

        let scheme = uri
            .scheme()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidUpstreamUri(format!("{target_url}: no scheme")))?;
        if scheme != Scheme::HTTP && scheme != Scheme::HTTPS {
            return Err(ProxyError::InvalidUpstreamUri(format!(
                "{target_url}: unsupported scheme {scheme}"
            )));
        }

        let authority = uri
            .authority()
            .cloned()
            .ok_or_else(|| ProxyError::InvalidUpstreamUri(format!("{target_url}: no host")))?;
        // Credentials in the authority would leak into X-Origin-Host.
        if authority.as_str().contains('@') {
            return Err(ProxyError::InvalidUpstreamUri(format!(
                "{}: credentials are not allowed in the upstream URL",
                authority.host()
            )));
        }
        let origin_host = HeaderValue::from_str(authority.as_str())
            .map_err(|e| ProxyError::InvalidUpstreamUri(e.to_string()))?;

        Ok(Self {
            scheme,
            authority,
            origin_host,
        })
    }
}

impl RequestDirector for UpstreamDirector {
    fn direct(&self, parts: &mut Parts) -> Result<(), ProxyError> {
        let original_host = parts.headers.get(header::HOST).cloned().or_else(|| {
            parts
                .uri
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
        });
        if let Some(host) = original_host {
            parts.headers.append(X_FORWARDED_HOST, host);
        }
        parts
            .headers
            .append(X_ORIGIN_HOST, self.origin_host.clone());

        let path_and_query = parts
            .uri
            .path_and_query()
            .cloned()
            .unwrap_or_else(|| PathAndQuery::from_static("/"));

        parts.uri = Uri::builder()
            .scheme(self.scheme.clone())
            .authority(self.authority.clone())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| ProxyError::InvalidUpstreamUri(e.to_string()))?;
        Ok(())
    }
}

/// Relays requests upstream, streaming both bodies.
#[derive(Clone)]
pub struct ForwardingProxy {
    http_client: reqwest::Client,
    director: Arc<dyn RequestDirector>,
}

impl ForwardingProxy {
    pub fn new(http_client: reqwest::Client, director: Arc<dyn RequestDirector>) -> Self {
        Self {
            http_client,
            director,
        }
    }

    /// Proxy to a single upstream URL with a client suited for relaying.
    pub fn to_upstream(target_url: &str, timeout: Option<Duration>) -> Result<Self, ProxyError> {
        let director = UpstreamDirector::new(target_url)?;
        Ok(Self::new(
            relay_client(timeout).map_err(ProxyError::Client)?,
            Arc::new(director),
        ))
    }

    /// Forward a request and relay whatever the upstream answers.
    pub async fn forward(&self, request: Request) -> Result<Response, ProxyError> {
        let (mut parts, body) = request.into_parts();

        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        strip_hop_by_hop(&mut parts.headers);
        self.director.direct(&mut parts)?;
        parts.headers.remove(header::HOST);
        if let Some(ip) = peer {
            append_forwarded_for(&mut parts.headers, &ip.to_string());
        }

        debug!(method = %parts.method, uri = %parts.uri, "Forwarding request upstream");

        let upstream = self
            .http_client
            .request(parts.method, parts.uri.to_string())
            .headers(parts.headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, "Upstream request failed");
                if e.is_timeout() {
                    ProxyError::UpstreamTimeout(e)
                } else {
                    ProxyError::UpstreamUnavailable(e)
                }
            })?;

        let status = upstream.status();
        let mut headers = upstream.headers().clone();
        strip_hop_by_hop(&mut headers);

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        *response.headers_mut() = headers;
        Ok(response)
    }
}

/// HTTP client for relaying: redirects are passed back to the caller.
pub fn relay_client(timeout: Option<Duration>) -> reqwest::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder().redirect(reqwest::redirect::Policy::none());
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    builder.build()
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, ip: &str) {
    let value = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{prior}, {ip}"),
        None => ip.to_string(),
    };
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(X_FORWARDED_FOR, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Bytes;
    use axum::http::Method;
    use futures_util::{stream, StreamExt};
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{body_string, header as has_header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn parts_for(uri: &str, host: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(host) = host {
            builder = builder.header(header::HOST, host);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn test_director_rewrites_scheme_and_host() {
        let director = UpstreamDirector::new("https://backend.internal:8443/ignored").unwrap();
        let mut parts = parts_for("/api/items?page=2", Some("proxy.example.com"));

        director.direct(&mut parts).unwrap();

        assert_eq!(
            parts.uri.to_string(),
            "https://backend.internal:8443/api/items?page=2"
        );
        assert_eq!(parts.headers[&X_FORWARDED_HOST], "proxy.example.com");
        assert_eq!(parts.headers[&X_ORIGIN_HOST], "backend.internal:8443");
    }

    #[test]
    fn test_director_without_host_header() {
        let director = UpstreamDirector::new("http://backend").unwrap();
        let mut parts = parts_for("/", None);

        director.direct(&mut parts).unwrap();

        assert!(parts.headers.get(&X_FORWARDED_HOST).is_none());
        assert_eq!(parts.headers[&X_ORIGIN_HOST], "backend");
    }

    #[test]
    fn test_invalid_targets() {
        assert!(UpstreamDirector::new("backend.internal").is_err());
        assert!(UpstreamDirector::new("ftp://backend.internal").is_err());
        assert!(UpstreamDirector::new("").is_err());
    }

    #[test]
    fn test_credentials_in_target_are_rejected() {
        let err = UpstreamDirector::new("http://user:pw@backend:8080").unwrap_err();
        assert!(!err.to_string().contains("pw"));

        let director = UpstreamDirector::new("http://backend:8080").unwrap();
        let mut parts = parts_for("/", None);
        director.direct(&mut parts).unwrap();
        assert_eq!(parts.headers[&X_ORIGIN_HOST], "backend:8080");
    }

    #[test]
    fn test_hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-debug"));
        headers.insert("x-debug", HeaderValue::from_static("1"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("*/*"));

        strip_hop_by_hop(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::ACCEPT));
    }

    #[test]
    fn test_forwarded_for_is_appended() {
        let mut headers = HeaderMap::new();
        append_forwarded_for(&mut headers, "10.0.0.1");
        append_forwarded_for(&mut headers, "10.0.0.2");
        assert_eq!(headers[&X_FORWARDED_FOR], "10.0.0.1, 10.0.0.2");
    }

    #[tokio::test]
    async fn test_forward_relays_request_and_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/orders"))
            .and(query_param("dry_run", "true"))
            .and(has_header("x-request-id", "abc"))
            .and(body_string("{\"qty\":1}"))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("x-upstream", "yes")
                    .set_body_string("created"),
            )
            .mount(&server)
            .await;

        let proxy = ForwardingProxy::to_upstream(&server.uri(), None).unwrap();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/orders?dry_run=true")
            .header(header::HOST, "proxy.local")
            .header("x-request-id", "abc")
            .body(Body::from("{\"qty\":1}"))
            .unwrap();

        let response = proxy.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(response.headers()["x-upstream"], "yes");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], b"created");

        let received = &server.received_requests().await.unwrap()[0];
        assert_eq!(received.headers["x-forwarded-host"], "proxy.local");
        assert_eq!(
            received.headers["x-origin-host"],
            server.address().to_string().as_str()
        );
    }

    #[tokio::test]
    async fn test_upstream_error_status_is_relayed() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("down"))
            .mount(&server)
            .await;

        let proxy = ForwardingProxy::to_upstream(&server.uri(), None).unwrap();
        let request = axum::http::Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();

        let response = proxy.forward(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_bad_gateway() {
        // Bind and drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let proxy = ForwardingProxy::to_upstream(&format!("http://{addr}"), None).unwrap();
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(request).await.unwrap_err();
        assert!(matches!(err, ProxyError::UpstreamUnavailable(_)));
        assert_eq!(err.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let proxy =
            ForwardingProxy::to_upstream(&server.uri(), Some(Duration::from_millis(200))).unwrap();
        let request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let err = proxy.forward(request).await.unwrap_err();
        assert_eq!(err.into_response().status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_request_body_is_streamed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let proxy = ForwardingProxy::to_upstream(&format!("http://{addr}"), None).unwrap();

        // First chunk arrives, then the upload stays open.
        let first = Ok::<_, std::io::Error>(Bytes::from_static(b"first-chunk"));
        let upload = stream::once(async { first }).chain(stream::pending());
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/upload")
            .body(Body::from_stream(upload))
            .unwrap();
        let forwarding = tokio::spawn(async move {
            let _ = proxy.forward(request).await;
        });

        let received = tokio::time::timeout(Duration::from_secs(2), async {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut seen = Vec::new();
            let mut buf = [0u8; 1024];
            while !seen.windows(11).any(|w| w == b"first-chunk") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                seen.extend_from_slice(&buf[..n]);
            }
            String::from_utf8_lossy(&seen).into_owned()
        })
        .await
        .expect("upstream saw nothing while the upload was still open");

        assert!(received.starts_with("POST /upload HTTP/1.1"));
        assert!(received.contains("first-chunk"));
        forwarding.abort();
    }
}
