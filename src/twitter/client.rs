// Source-platform HTTP client: bearer-authenticated v2 API over reqwest.
//
// One client is built at startup and handed to the rule manager, the stream
// connector, and the media fetcher. Ordinary requests get a timeout; the
// filtered stream request deliberately does not, since it stays open for
// as long as the platform keeps sending.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::{MirrorError, Result};

/// Timeout for everything except the long-lived stream body.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection-establishment timeout, applied to the stream handshake too.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub const RULES_PATH: &str = "/2/tweets/search/stream/rules";
pub const STREAM_PATH: &str = "/2/tweets/search/stream";
pub const TWEETS_PATH: &str = "/2/tweets";

/// Bearer-token client for the source platform's v2 API.
#[derive(Clone)]
pub struct TwitterClient {
    client: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TwitterClient {
    /// Create a client pointing at the given base URL.
    ///
    /// Pass a different URL for testing against a mock server.
    pub fn new(base_url: &str, bearer_token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("mirrorbird/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| MirrorError::Connection(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Start an authenticated request against an API path.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .bearer_auth(&self.bearer_token)
    }

    /// GET an API path and deserialize the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        debug!(endpoint, path, "GET request");
        let response = self
            .request(Method::GET, path)
            .query(params)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = expect_status(endpoint, response, |s| s.is_success()).await?;
        Ok(response.json::<T>().await?)
    }

    /// POST a JSON body to an API path, requiring an exact success status.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        path: &str,
        body: &B,
        expected: reqwest::StatusCode,
    ) -> Result<Response> {
        debug!(endpoint, path, "POST request");
        let response = self
            .request(Method::POST, path)
            .json(body)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        expect_status(endpoint, response, |s| s == expected).await
    }

    /// Plain unauthenticated GET for media CDN URLs.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get(url)
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?;
        let response = expect_status("media download", response, |s| s.is_success()).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Turn an unexpected status into a protocol error carrying the body text.
pub async fn expect_status(
    endpoint: &str,
    response: Response,
    ok: impl Fn(reqwest::StatusCode) -> bool,
) -> Result<Response> {
    let status = response.status();
    if ok(status) {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(MirrorError::Protocol {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        body,
    })
}
