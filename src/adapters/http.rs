//! HTTP transport adapter built on reqwest
//!
//! Translates reqwest failures into [`RotaError`] variants at the boundary so
//! the retry core classifies them by type instead of by message text.

use std::error::Error as StdError;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use crate::error::{Result, RetryError, RotaError};
use crate::models::ProxyEndpoint;
use crate::proxy::retry::RetryExecutor;
use crate::proxy::session::SessionProvider;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Fetches pages through a given proxy
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    timeout: Duration,
    user_agent: String,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Build a cookie-holding client routed through `proxy`.
    ///
    /// `None` builds a direct client that also ignores system proxy variables.
    pub fn client_for(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
        let mut builder = Client::builder()
            .timeout(self.timeout)
            .cookie_store(true)
            .user_agent(&self.user_agent);

        builder = match proxy {
            Some(proxy) => {
                // Credentials travel in the URL so SOCKS proxies get them too
                let proxy = reqwest::Proxy::all(proxy.url())
                    .map_err(|e| RotaError::ClientBuild(error_chain(&e)))?;
                builder.proxy(proxy)
            }
            None => builder.no_proxy(),
        };

        builder
            .build()
            .map_err(|e| RotaError::ClientBuild(error_chain(&e)))
    }

    /// One GET through `proxy`, returning the body of a 2xx response
    pub async fn fetch(&self, proxy: Option<&ProxyEndpoint>, url: &str) -> Result<String> {
        let client = self.client_for(proxy)?;
        Self::fetch_with(&client, url).await
    }

    /// One GET with an existing client
    pub async fn fetch_with(client: &Client, url: &str) -> Result<String> {
        let response = client.get(url).send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error(status));
        }

        response.text().await.map_err(map_reqwest_error)
    }
}

fn status_error(status: StatusCode) -> RotaError {
    if status == StatusCode::PROXY_AUTHENTICATION_REQUIRED {
        RotaError::ProxyAuthRejected
    } else {
        RotaError::HttpStatus {
            status: status.as_u16(),
        }
    }
}

/// Translate a reqwest error into the crate's typed transport errors
pub fn map_reqwest_error(err: reqwest::Error) -> RotaError {
    if err.is_timeout() {
        return RotaError::Timeout;
    }
    if let Some(status) = err.status() {
        return status_error(status);
    }

    let chain = error_chain(&err);
    if err.is_connect() {
        // An https tunnel refused by the proxy surfaces as a connect error
        let lower = chain.to_lowercase();
        if lower.contains("407") || lower.contains("proxy authentication") || lower.contains("proxy authorization") {
            return RotaError::ProxyAuthRejected;
        }
        return RotaError::ProxyConnectionFailed(chain);
    }

    RotaError::Http(chain)
}

fn error_chain(err: &dyn StdError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Fetch `url` with retries and proxy rotation
pub async fn robust_fetch(
    executor: &RetryExecutor,
    fetcher: &HttpFetcher,
    url: &str,
) -> std::result::Result<String, RetryError<RotaError>> {
    let operation = format!("fetch {}", url);
    executor
        .execute(&operation, |proxy| async move {
            fetcher.fetch(proxy.as_deref(), url).await
        })
        .await
}

/// Opens one reqwest client (with its own cookie jar) per attempt
#[derive(Debug, Clone, Default)]
pub struct HttpSessionProvider {
    fetcher: HttpFetcher,
}

impl HttpSessionProvider {
    pub fn new(fetcher: HttpFetcher) -> Self {
        Self { fetcher }
    }
}

#[async_trait]
impl SessionProvider for HttpSessionProvider {
    type Session = Client;

    async fn open(&self, proxy: Option<&ProxyEndpoint>) -> Result<Client> {
        debug!(
            "Opening HTTP session via {}",
            proxy.map(|p| p.to_string()).unwrap_or_else(|| "direct".to_string())
        );
        self.fetcher.client_for(proxy)
    }

    async fn close(&self, session: Client) {
        // Dropping the last handle closes pooled connections and the cookie jar
        drop(session);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use crate::proxy::classify::{Classify, ErrorCategory};
    use crate::proxy::pool::{PoolSettings, ProxyPool};
    use crate::proxy::retry::BackoffPolicy;

    /// Answers every connection with `response`, like a minimal forward proxy
    async fn canned_server(response: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    let _ = stream.read(&mut buf).await;
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });
        addr
    }

    /// Accepts connections and never answers
    async fn silent_server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });
        addr
    }

    async fn closed_port() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    }

    fn endpoint(addr: SocketAddr) -> ProxyEndpoint {
        ProxyEndpoint::from_host_port("http", "127.0.0.1", addr.port())
    }

    #[test]
    fn test_client_builds_for_each_scheme() {
        let fetcher = HttpFetcher::default();
        let http = ProxyEndpoint::parse("http://user:pw@10.0.0.1:8080").unwrap();
        let socks = ProxyEndpoint::parse("socks5://10.0.0.2:1080").unwrap();

        assert!(fetcher.client_for(Some(&http)).is_ok());
        assert!(fetcher.client_for(Some(&socks)).is_ok());
        assert!(fetcher.client_for(None).is_ok());
    }

    #[tokio::test]
    async fn test_fetch_through_proxy() {
        let addr =
            canned_server("HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nok").await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));

        let body = fetcher
            .fetch(Some(&endpoint(addr)), "http://scrape.target.test/tags/rust")
            .await
            .unwrap();
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_proxy_auth_rejected() {
        let addr = canned_server(
            "HTTP/1.1 407 Proxy Authentication Required\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));

        let err = fetcher
            .fetch(Some(&endpoint(addr)), "http://scrape.target.test/")
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::ProxyAuthRejected));
        assert_eq!(err.category(), ErrorCategory::Authentication);
    }

    #[tokio::test]
    async fn test_error_status() {
        let addr = canned_server(
            "HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\nconnection: close\r\n\r\n",
        )
        .await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));

        let err = fetcher
            .fetch(None, &format!("http://{}/", addr))
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::HttpStatus { status: 503 }));
        assert_eq!(err.category(), ErrorCategory::Other("http_503".to_string()));
    }

    #[tokio::test]
    async fn test_dead_proxy_is_connection_failure() {
        let addr = closed_port().await;
        let fetcher = HttpFetcher::new(Duration::from_secs(5));

        let err = fetcher
            .fetch(Some(&endpoint(addr)), "http://scrape.target.test/")
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::ProxyConnectionFailed(_)));
        assert_eq!(err.category(), ErrorCategory::Connection);
    }

    #[tokio::test]
    async fn test_slow_proxy_times_out() {
        let addr = silent_server().await;
        let fetcher = HttpFetcher::new(Duration::from_millis(200));

        let err = fetcher
            .fetch(Some(&endpoint(addr)), "http://scrape.target.test/")
            .await
            .unwrap_err();
        assert!(matches!(err, RotaError::Timeout));
    }

    #[tokio::test]
    async fn test_robust_fetch_skips_dead_proxy() {
        let dead = closed_port().await;
        let live =
            canned_server("HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nhello").await;

        let settings = PoolSettings {
            strategy: crate::proxy::rotation::RotationStrategy::RoundRobin,
            ..PoolSettings::default()
        };
        let pool = ProxyPool::new(vec![endpoint(dead), endpoint(live)], settings).unwrap();
        let executor = RetryExecutor::new(Arc::new(pool)).with_backoff(BackoffPolicy {
            max_retries: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
            multiplier: 2.0,
        });
        let fetcher = HttpFetcher::new(Duration::from_secs(5));

        let body = robust_fetch(&executor, &fetcher, "http://scrape.target.test/")
            .await
            .unwrap();
        assert_eq!(body, "hello");

        let stats = executor.pool().proxy_stats();
        assert_eq!(stats[0].failed_requests, 1);
        assert_eq!(stats[1].successful_requests, 1);
    }

    #[tokio::test]
    async fn test_session_provider_opens_client() {
        let addr =
            canned_server("HTTP/1.1 200 OK\r\ncontent-length: 2\r\nconnection: close\r\n\r\nhi").await;
        let provider = HttpSessionProvider::new(HttpFetcher::new(Duration::from_secs(5)));

        let client = provider.open(Some(&endpoint(addr))).await.unwrap();
        let body = HttpFetcher::fetch_with(&client, "http://scrape.target.test/")
            .await
            .unwrap();
        assert_eq!(body, "hi");
        provider.close(client).await;
    }
}
