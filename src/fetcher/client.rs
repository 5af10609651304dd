//! HTTP client shared by every fetch strategy
//!
//! Each fetcher owns one [`HttpClient`]. The proxy from the network config is
//! applied to all of them, and transport failures are classified here so the
//! strategies surface the same error taxonomy.

use crate::config::NetworkConfig;
use crate::fetcher::FetchError;
use reqwest::{Client, Proxy, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::error::Error as _;
use std::io::ErrorKind;
use std::time::Duration;

/// Builds an HTTP client with the configured timeouts and proxy
///
/// # Example
///
/// ```no_run
/// use ltk_harvest::config::NetworkConfig;
/// use ltk_harvest::fetcher::build_http_client;
///
/// let client = build_http_client(&NetworkConfig::default()).unwrap();
/// ```
pub fn build_http_client(config: &NetworkConfig) -> Result<Client, reqwest::Error> {
    let mut builder = Client::builder()
        .user_agent(config.user_agent.clone())
        .timeout(Duration::from_millis(config.request_timeout_ms))
        .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
        .gzip(true)
        .brotli(true);

    if let Some(proxy) = &config.proxy {
        builder = builder.proxy(Proxy::all(proxy.as_str())?);
    }

    builder.build()
}

/// Maps a transport error onto the fetch error taxonomy
///
/// Only a failed TCP connect while a proxy is configured is fatal: every
/// request goes through the proxy first, so that breaks the whole run. A
/// proxy that answers but refuses the tunnel to one host is a per-item
/// failure.
pub fn classify_request_error(error: reqwest::Error, url: &str, proxied: bool) -> FetchError {
    let url = url.to_string();

    if proxied && error.is_connect() && proxy_connect_failed(&error) {
        FetchError::ProxyUnreachable {
            url,
            message: error.to_string(),
        }
    } else if error.is_timeout() {
        FetchError::Timeout { url }
    } else if let Some(status) = error.status() {
        FetchError::Status {
            url,
            status: status.as_u16(),
        }
    } else if error.is_decode() || error.is_body() {
        FetchError::Payload {
            url,
            message: error.to_string(),
        }
    } else {
        FetchError::Network {
            url,
            message: error.to_string(),
        }
    }
}

/// Whether the connect error came from the socket to the proxy
///
/// Tunnel refusals surface as plain string errors from the CONNECT
/// exchange; socket failures carry an `io::Error` somewhere in the chain.
fn proxy_connect_failed(error: &reqwest::Error) -> bool {
    let mut source = error.source();
    while let Some(cause) = source {
        if let Some(io) = cause.downcast_ref::<std::io::Error>() {
            return matches!(
                io.kind(),
                ErrorKind::ConnectionRefused
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::AddrNotAvailable
                    | ErrorKind::TimedOut
            );
        }
        source = cause.source();
    }
    false
}

/// An HTTP client plus the knowledge needed to classify its failures
pub struct HttpClient {
    client: Client,
    proxied: bool,
}

impl HttpClient {
    pub fn from_config(config: &NetworkConfig) -> Result<Self, FetchError> {
        let client =
            build_http_client(config).map_err(|e| FetchError::Client(e.to_string()))?;
        Ok(Self {
            client,
            proxied: config.proxy.is_some(),
        })
    }

    async fn send(&self, url: &str, query: &[(&str, String)]) -> Result<Response, FetchError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }

    pub async fn get_text(&self, url: &str) -> Result<String, FetchError> {
        self.send(url, &[])
            .await?
            .text()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))
    }

    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let bytes = self
            .send(url, &[])
            .await?
            .bytes()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))?;
        Ok(bytes.to_vec())
    }

    /// GETs `url` with `query` appended and decodes the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, FetchError> {
        let body = self
            .send(url, query)
            .await?
            .text()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))?;

        decode_json(url, &body)
    }

    /// POSTs `body` as JSON and decodes the JSON response
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<T, FetchError> {
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let text = response
            .text()
            .await
            .map_err(|e| classify_request_error(e, url, self.proxied))?;
        decode_json(url, &text)
    }
}

fn decode_json<T: DeserializeOwned>(url: &str, body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| FetchError::Payload {
        url: url.to_string(),
        message: e.to_string(),
    })
}
