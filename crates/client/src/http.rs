//! `reqwest`-backed [`Transport`].

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::trace;
use tuskit_protocol::{Headers, Method};

use crate::transport::{Request, Response, Transport, TransportError};

/// Settings for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    /// Whole-request timeout. `None` lets large chunks take as long as they need.
    pub timeout: Option<Duration>,
    /// Sent with every request (authentication, tenant ids).
    pub headers: Headers,
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            timeout: None,
            headers: Headers::new(),
            user_agent: concat!("tuskit/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// HTTP transport over `reqwest` with rustls.
///
/// Redirects are never followed: a `201 Created` with `Location` must reach
/// the client untouched.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        Self::with_config(&HttpConfig::default())
    }

    pub fn with_config(config: &HttpConfig) -> Result<Self, TransportError> {
        let mut defaults = HeaderMap::new();
        for (name, value) in config.headers.iter() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| TransportError::Config(format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| TransportError::Config(format!("invalid value for {name}")))?;
            defaults.insert(name, value);
        }

        let mut builder = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .default_headers(defaults);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }

        let http = builder.build().map_err(map_reqwest_error)?;
        Ok(Self { http })
    }

    async fn execute(&self, request: Request) -> Result<Response, TransportError> {
        let method = match request.method {
            Method::Options => reqwest::Method::OPTIONS,
            Method::Post => reqwest::Method::POST,
            Method::Head => reqwest::Method::HEAD,
            Method::Patch => reqwest::Method::PATCH,
            Method::Get => reqwest::Method::GET,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self.http.request(method, &request.url);
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let resp = builder.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        let headers: Headers = resp
            .headers()
            .iter()
            .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
            .collect();
        let body = resp.bytes().await.map_err(map_reqwest_error)?.to_vec();

        trace!(method = %request.method, url = %request.url, status, "http exchange");
        Ok(Response {
            status,
            headers,
            body,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(
        &self,
        request: Request,
    ) -> Pin<Box<dyn Future<Output = Result<Response, TransportError>> + Send + '_>> {
        Box::pin(self.execute(request))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if err.is_builder() {
        TransportError::Config(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::oneshot;

    /// Reads one request (head plus `Content-Length` body) as text.
    async fn read_request(stream: &mut TcpStream) -> String {
        let mut raw = Vec::new();
        let mut buf = [0u8; 4096];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            raw.extend_from_slice(&buf[..n]);
            let text = String::from_utf8_lossy(&raw).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                if raw.len() >= head_end + 4 + content_length {
                    break;
                }
            }
        }
        String::from_utf8_lossy(&raw).into_owned()
    }

    /// Starts a mock HTTP server that answers one request with `response`
    /// and hands back the raw request it received.
    async fn mock_server(response: &str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let url = format!("http://127.0.0.1:{port}");
        let response = response.to_string();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            if let Ok((mut stream, _)) = listener.accept().await {
                let request = read_request(&mut stream).await;
                let _ = stream.write_all(response.as_bytes()).await;
                let _ = stream.shutdown().await;
                let _ = tx.send(request);
            }
        });

        (url, rx)
    }

    #[tokio::test]
    async fn post_returns_location_without_following() {
        let (url, request_rx) = mock_server(
            "HTTP/1.1 201 Created\r\nLocation: /files/abc\r\nTus-Resumable: 1.0.0\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let transport = ReqwestTransport::new().unwrap();
        let request = Request::new(Method::Post, format!("{url}/files/"))
            .header("Tus-Resumable", "1.0.0")
            .header("Upload-Length", "42");
        let resp = transport.send(request).await.unwrap();

        assert_eq!(resp.status, 201);
        assert_eq!(resp.headers.get("location"), Some("/files/abc"));

        let raw = request_rx.await.unwrap().to_ascii_lowercase();
        assert!(raw.starts_with("post /files/ http/1.1"));
        assert!(raw.contains("upload-length: 42"));
        assert!(raw.contains("tus-resumable: 1.0.0"));
    }

    #[tokio::test]
    async fn patch_sends_body_and_default_headers() {
        let (url, request_rx) = mock_server(
            "HTTP/1.1 204 No Content\r\nUpload-Offset: 5\r\nConnection: close\r\n\r\n",
        )
        .await;

        let config = HttpConfig {
            headers: Headers::new().with("Authorization", "Bearer t0ken"),
            ..HttpConfig::default()
        };
        let transport = ReqwestTransport::with_config(&config).unwrap();
        let request = Request::new(Method::Patch, format!("{url}/files/abc"))
            .header("Content-Type", "application/offset+octet-stream")
            .header("Upload-Offset", "0")
            .body(b"hello".to_vec());
        let resp = transport.send(request).await.unwrap();

        assert_eq!(resp.status, 204);
        assert_eq!(resp.headers.get("Upload-Offset"), Some("5"));

        let raw = request_rx.await.unwrap();
        assert!(raw.ends_with("hello"));
        let lower = raw.to_ascii_lowercase();
        assert!(lower.contains("authorization: bearer t0ken"));
        assert!(lower.contains("content-length: 5"));
    }

    #[tokio::test]
    async fn redirects_are_returned_as_is() {
        let (url, _rx) = mock_server(
            "HTTP/1.1 301 Moved Permanently\r\nLocation: http://elsewhere.invalid/\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let transport = ReqwestTransport::new().unwrap();
        let resp = transport
            .send(Request::new(Method::Options, url))
            .await
            .unwrap();
        assert_eq!(resp.status, 301);
    }

    #[tokio::test]
    async fn error_body_is_kept() {
        let (url, _rx) = mock_server(
            "HTTP/1.1 460 Checksum Mismatch\r\nContent-Length: 8\r\nConnection: close\r\n\r\nmismatch",
        )
        .await;

        let transport = ReqwestTransport::new().unwrap();
        let resp = transport
            .send(Request::new(Method::Patch, url).body(vec![1, 2, 3]))
            .await
            .unwrap();
        assert_eq!(resp.status, 460);
        assert_eq!(resp.body_text(), "mismatch");
    }

    #[tokio::test]
    async fn refused_connection_is_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let transport = ReqwestTransport::new().unwrap();
        let err = transport
            .send(Request::new(Method::Head, format!("http://127.0.0.1:{port}/files/x")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)), "{err:?}");
    }

    #[tokio::test]
    async fn silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(stream);
        });

        let config = HttpConfig {
            timeout: Some(Duration::from_millis(200)),
            ..HttpConfig::default()
        };
        let transport = ReqwestTransport::with_config(&config).unwrap();
        let err = transport
            .send(Request::new(Method::Head, format!("http://127.0.0.1:{port}/files/x")))
            .await
            .unwrap_err();
        assert_eq!(err, TransportError::Timeout);

        handle.abort();
    }

    #[test]
    fn invalid_default_header_is_rejected() {
        let config = HttpConfig {
            headers: Headers::new().with("Bad Header", "x"),
            ..HttpConfig::default()
        };
        assert!(matches!(
            ReqwestTransport::with_config(&config),
            Err(TransportError::Config(_))
        ));
    }
}
