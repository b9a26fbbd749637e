use reqwest::Client;
use reqwest::header::HeaderName;
use serde_json::Value;
use std::time::Duration;

use super::config::ExchangeConfig;
use super::signer::RequestSigner;
use crate::error::ExchangeError;
use crate::records::Envelope;
use crate::resource::ResourceKind;

/// Parsed response of one poll
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub body: Value,
}

/// Source of exchange responses for a poll cycle
pub trait ResourceFetcher {
    async fn fetch(&self, kind: ResourceKind) -> Result<FetchResponse, ExchangeError>;
}

struct AuthHeaders {
    sign: HeaderName,
    api_key: HeaderName,
    timestamp: HeaderName,
    recv_window: HeaderName,
}

impl AuthHeaders {
    fn with_prefix(prefix: &str) -> Result<Self, ExchangeError> {
        let name = |suffix: &str| {
            HeaderName::from_bytes(format!("{}{}", prefix, suffix).as_bytes()).map_err(|e| {
                ExchangeError::Configuration(format!("invalid header prefix '{}': {}", prefix, e))
            })
        };

        Ok(Self {
            sign: name("SIGN")?,
            api_key: name("API-KEY")?,
            timestamp: name("TIMESTAMP")?,
            recv_window: name("RECV-WINDOW")?,
        })
    }
}

/// Read-only client for the signed Bybit REST endpoints
pub struct ExchangeClient {
    client: Client,
    base_url: String,
    signer: RequestSigner,
    headers: AuthHeaders,
    limit: u32,
    debug: bool,
}

impl ExchangeClient {
    /// Create a new exchange client
    pub fn new(config: &ExchangeConfig, limit: u32, debug: bool) -> Result<Self, ExchangeError> {
        url::Url::parse(&config.base_url)
            .map_err(|e| ExchangeError::Configuration(format!("invalid base_url: {}", e)))?;

        let client = Client::builder()
            .user_agent(format!("bybit-watch/{}", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.request_timeout))
            .build()
            .map_err(|e| {
                ExchangeError::Configuration(format!("failed to create HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            signer: RequestSigner::new(
                config.api_key.clone(),
                config.secret_key.clone(),
                config.recv_window,
            ),
            headers: AuthHeaders::with_prefix(&config.header_prefix)?,
            limit,
            debug,
        })
    }

    fn url_for(&self, kind: ResourceKind, query: &str) -> String {
        format!("{}{}?{}", self.base_url, kind.path(), query)
    }
}

impl ResourceFetcher for ExchangeClient {
    /// Issue one signed GET for `kind`
    ///
    /// Non-2xx statuses, unparseable bodies and non-zero `retCode`s are errors.
    /// Nothing is retried here.
    async fn fetch(&self, kind: ResourceKind) -> Result<FetchResponse, ExchangeError> {
        let query = kind.query(self.limit);
        let timestamp = RequestSigner::timestamp();
        let signature = self.signer.sign(&query, &timestamp)?;

        if self.debug {
            tracing::info!("param_str: {}", self.signer.canonical_string(&query, &timestamp));
            tracing::info!("signature: {}", signature);
        }

        let url = self.url_for(kind, &query);
        tracing::debug!("Fetching {} from: {}", kind, url);

        let response = self
            .client
            .get(&url)
            .header(self.headers.sign.clone(), signature)
            .header(self.headers.api_key.clone(), self.signer.api_key())
            .header(self.headers.timestamp.clone(), timestamp)
            .header(
                self.headers.recv_window.clone(),
                self.signer.recv_window().to_string(),
            )
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        tracing::info!("request status: {}", status.as_u16());
        if self.debug {
            tracing::info!("body: {}", text);
        }

        if !status.is_success() {
            return Err(ExchangeError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        let body: Value = serde_json::from_str(&text)?;
        if !body.is_object() {
            return Err(ExchangeError::Parse(format!(
                "expected a JSON object, got: {}",
                text
            )));
        }

        Envelope::check(&body)?;

        Ok(FetchResponse {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::task::JoinHandle;

    /// Serve one canned HTTP response and hand back the raw request head
    async fn serve_once(status_line: &str, body: &str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status_line,
            body.len(),
            body
        );

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            String::from_utf8_lossy(&request).to_string()
        });

        (format!("http://{}", addr), handle)
    }

    fn exchange_config(base_url: String) -> ExchangeConfig {
        ExchangeConfig {
            base_url,
            api_key: "test-key".to_string(),
            secret_key: "test-secret".to_string(),
            request_timeout: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fetch_signs_request_and_parses_body() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"retCode":0,"retMsg":"OK","result":{"list":[]}}"#).await;
        let client = ExchangeClient::new(&exchange_config(base_url), 10, false).unwrap();

        let response = client.fetch(ResourceKind::OrderHistory).await.unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.body["retMsg"], "OK");

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /v5/order/history?orderlinkid="));
        assert!(request.contains("&limit=10&category=spot"));
        assert!(request.contains("x-bapi-api-key: test-key"));
        assert!(request.contains("x-bapi-recv-window: 5000"));
        assert!(request.contains("x-bapi-timestamp: "));
        assert!(request.contains("x-bapi-sign: "));
    }

    #[tokio::test]
    async fn header_prefix_is_configurable() {
        let (base_url, server) =
            serve_once("200 OK", r#"{"retCode":0,"result":{"list":[]}}"#).await;
        let mut config = exchange_config(base_url);
        config.header_prefix = "X-".to_string();
        let client = ExchangeClient::new(&config, 10, false).unwrap();

        client.fetch(ResourceKind::Balances).await.unwrap();

        let request = server.await.unwrap().to_ascii_lowercase();
        assert!(request.starts_with("get /v5/account/wallet-balance?accounttype=unified"));
        assert!(request.contains("x-sign: "));
        assert!(request.contains("x-api-key: test-key"));
    }

    #[tokio::test]
    async fn non_success_status_is_http_error() {
        let (base_url, server) = serve_once("403 Forbidden", r#"{"retMsg":"denied"}"#).await;
        let client = ExchangeClient::new(&exchange_config(base_url), 10, false).unwrap();

        match client.fetch(ResourceKind::TradeHistory).await {
            Err(ExchangeError::Http { status, body }) => {
                assert_eq!(status, 403);
                assert!(body.contains("denied"));
            }
            other => panic!("expected http error, got {:?}", other),
        }
        server.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_body_is_parse_error() {
        let (base_url, server) = serve_once("200 OK", "<html>maintenance</html>").await;
        let client = ExchangeClient::new(&exchange_config(base_url), 10, false).unwrap();

        assert!(matches!(
            client.fetch(ResourceKind::Balances).await,
            Err(ExchangeError::Parse(_))
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn rejected_request_is_api_error() {
        let body = r#"{"retCode":10002,"retMsg":"invalid request, please check your server timestamp or recv_window param"}"#;
        let (base_url, server) = serve_once("200 OK", body).await;
        let client = ExchangeClient::new(&exchange_config(base_url), 10, false).unwrap();

        assert!(matches!(
            client.fetch(ResourceKind::Balances).await,
            Err(ExchangeError::Api { code: 10002, .. })
        ));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn unreachable_host_is_transport_error() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            ExchangeClient::new(&exchange_config(format!("http://{}", addr)), 10, false).unwrap();

        assert!(matches!(
            client.fetch(ResourceKind::Balances).await,
            Err(ExchangeError::Transport(_))
        ));
    }

    #[test]
    fn invalid_header_prefix_is_configuration_error() {
        let mut config = exchange_config("https://api.bybit.com".to_string());
        config.header_prefix = "bad prefix ".to_string();
        assert!(matches!(
            ExchangeClient::new(&config, 10, false),
            Err(ExchangeError::Configuration(_))
        ));
    }

    #[test]
    fn url_joins_base_path_and_query() {
        let config = exchange_config("https://api.bybit.com/".to_string());
        let client = ExchangeClient::new(&config, 10, false).unwrap();
        assert_eq!(
            client.url_for(ResourceKind::Balances, "accountType=UNIFIED"),
            "https://api.bybit.com/v5/account/wallet-balance?accountType=UNIFIED"
        );
    }
}
