//! Minimal HTTP helper for capabilities that talk to REST APIs directly

use outpost_core::{Error, Result};
use reqwest::{header, redirect, Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Response with the body fully read
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// URL after redirects
    pub final_url: String,
}

impl HttpResponse {
    /// Check if response is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Fail on anything but 2xx; 401 and 403 are authentication failures
    pub fn ensure_success(self) -> Result<Self> {
        match self.status {
            200..=299 => Ok(self),
            401 | 403 => Err(Error::Authentication(format!("{}: {}", self.final_url, self.status))),
            status => Err(Error::Upstream(format!(
                "{} returned {}: {}",
                self.final_url,
                status,
                self.text()
            ))),
        }
    }

    /// Decode the body as JSON
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body).map_err(Error::from)
    }
}

/// Thin wrapper over a reqwest client
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Client with a 30s timeout that follows redirects
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::default()
    }

    /// One round trip. Headers are `(name, value)` pairs.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> Result<HttpResponse> {
        debug!("{} {}", method, url);
        let mut request = self.client.request(method, url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| Error::Http(e.to_string()))?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            final_url,
        })
    }

    /// Round trip decoding the body as `T`, whatever the status code
    pub async fn json<T: DeserializeOwned>(
        &self,
        method: Method,
        url: &str,
        body: Option<Vec<u8>>,
        headers: &[(&str, &str)],
    ) -> Result<T> {
        self.send(method, url, body, headers).await?.json()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str, headers: &[(&str, &str)]) -> Result<T> {
        self.json(Method::GET, url, None, headers).await
    }

    /// GET with `query` encoded onto `url`, decoding the body as `T`. The
    /// query is kept out of logs and errors since it may carry API keys.
    pub async fn get_json_query<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!("GET {} ({} query params)", url, query.len());
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| Error::Http(e.without_url().to_string()))?;
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Http(e.without_url().to_string()))?;
        serde_json::from_slice(&body).map_err(Error::from)
    }

    /// The underlying client, for callers that need streaming bodies
    pub fn inner(&self) -> &Client {
        &self.client
    }
}

/// Builder for [`HttpClient`]
#[derive(Debug, Clone)]
pub struct HttpClientBuilder {
    timeout: Duration,
    follow_redirects: bool,
    accept_invalid_certs: bool,
    user_agent: Option<String>,
    headers: Vec<(String, String)>,
}

impl Default for HttpClientBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            follow_redirects: true,
            accept_invalid_certs: false,
            user_agent: None,
            headers: Vec::new(),
        }
    }
}

impl HttpClientBuilder {
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn no_redirects(mut self) -> Self {
        self.follow_redirects = false;
        self
    }

    pub fn accept_invalid_certs(mut self) -> Self {
        self.accept_invalid_certs = true;
        self
    }

    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Header sent with every request
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn build(self) -> Result<HttpClient> {
        let mut headers = header::HeaderMap::new();
        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                header::HeaderValue::from_str(value),
            ) {
                headers.insert(name, value);
            }
        }

        let mut builder = Client::builder()
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .redirect(if self.follow_redirects {
                redirect::Policy::limited(10)
            } else {
                redirect::Policy::none()
            })
            .default_headers(headers)
            .danger_accept_invalid_certs(self.accept_invalid_certs);
        if let Some(agent) = &self.user_agent {
            builder = builder.user_agent(agent);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpClient { client })
    }
}

/// False when a site answers 503, or when a plain-http URL only redirects to
/// its own https mirror. Unreachable sites are not valid.
pub async fn is_valid_website(target: &str) -> bool {
    let client = match HttpClient::builder().no_redirects().accept_invalid_certs().build() {
        Ok(client) => client,
        Err(_) => return false,
    };
    let response = match client.send(Method::HEAD, target, None, &[]).await {
        Ok(response) => response,
        Err(_) => return false,
    };
    website_verdict(target, &response)
}

fn website_verdict(target: &str, response: &HttpResponse) -> bool {
    let unavailable = response.status == StatusCode::SERVICE_UNAVAILABLE.as_u16();
    let redirect = response.status == StatusCode::MOVED_PERMANENTLY.as_u16()
        || response.status == StatusCode::FOUND.as_u16();
    let parsed = reqwest::Url::parse(target).ok();
    let host = parsed
        .as_ref()
        .and_then(|url| url.host_str())
        .unwrap_or_default();
    let mirror = response
        .header("location")
        .map(|location| location.starts_with(&format!("https://{}", host)))
        .unwrap_or(false);
    let plain = parsed.map(|url| url.scheme() == "http").unwrap_or(false);

    !(unavailable || (redirect && mirror && plain))
}

/// Target of the `rel="next"` entry in a `Link` header
pub fn next_link(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let (target, params) = link.split_once(';')?;
        params
            .split(';')
            .any(|param| param.trim().replace(' ', "") == "rel=\"next\"")
            .then(|| target.trim().trim_start_matches('<').trim_end_matches('>').to_string())
    })
}
