// Filtered stream listener: one long-lived connection, reconnected forever.
//
// The stream body is newline-delimited JSON. A bare "\r\n" line is the
// platform's keepalive and is thrown away; every other line is one event
// that may batch several posts. Lines are read strictly one at a time, and
// all posts from a line are handled concurrently and joined before the next
// line is read.
//
// Every failure is survivable. Any event carrying an `errors` field ends the
// connection. Every reconnect, whether after a failed handshake or a dropped
// stream, waits the retry interval first: the platform keeps the old session
// open for a while and rejects a new one that arrives too soon.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use reqwest::Method;
use serde::Deserialize;
use tracing::{debug, error, info, warn};

use super::client::{TwitterClient, STREAM_PATH};
use super::post::{Includes, Post, RawTweet};
use crate::error::{MirrorError, Result};

/// The two-byte keepalive line sent while no posts match.
pub const KEEPALIVE: &[u8] = b"\r\n";

/// Default wait between failed connection attempts.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(300);

/// A stream of raw lines, each including its trailing newline if it had one.
pub type LineStream = BoxStream<'static, Result<Vec<u8>>>;

/// Field expansions requested on the stream connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamQuery {
    pub params: Vec<(String, String)>,
}

impl Default for StreamQuery {
    /// Everything the post model and the forwarding decision need: authors
    /// of both the post and whatever it references, media, and entities.
    fn default() -> Self {
        let params = [
            (
                "expansions",
                "author_id,attachments.media_keys,referenced_tweets.id,referenced_tweets.id.author_id",
            ),
            (
                "tweet.fields",
                "attachments,created_at,entities,in_reply_to_user_id,referenced_tweets,text",
            ),
            ("media.fields", "type,url"),
            ("user.fields", "name,username"),
        ];
        Self {
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

/// Opens the streaming connection. The seam between the listen loop and
/// the network, so the loop can be driven by scripted connections in tests.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    /// Open one streaming request. Fails with a connection error unless the
    /// handshake returns a success status.
    async fn connect(&self, query: &StreamQuery) -> Result<LineStream>;
}

/// Connector for the real filtered-stream endpoint.
pub struct HttpStreamConnector {
    client: TwitterClient,
}

impl HttpStreamConnector {
    pub fn new(client: TwitterClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl StreamConnector for HttpStreamConnector {
    async fn connect(&self, query: &StreamQuery) -> Result<LineStream> {
        // No request timeout: the body is meant to stay open indefinitely.
        let response = self
            .client
            .request(Method::GET, STREAM_PATH)
            .query(&query.params)
            .send()
            .await
            .map_err(|e| MirrorError::Connection(format!("Stream request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MirrorError::Connection(format!(
                "Cannot open stream (HTTP {status}): {body}"
            )));
        }

        Ok(split_lines(response.bytes_stream()).boxed())
    }
}

struct LineSplitter<S> {
    chunks: Pin<Box<S>>,
    buffer: Vec<u8>,
    done: bool,
}

/// Re-chunk a byte stream into newline-terminated lines.
///
/// A trailing fragment with no newline is yielded when the stream ends. The
/// first read error is yielded and then the stream ends.
pub fn split_lines<S, B, E>(chunks: S) -> impl Stream<Item = Result<Vec<u8>>>
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<MirrorError> + Send + 'static,
{
    let state = LineSplitter {
        chunks: Box::pin(chunks),
        buffer: Vec::new(),
        done: false,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buffer.iter().position(|&b| b == b'\n') {
                let line: Vec<u8> = st.buffer.drain(..=pos).collect();
                return Some((Ok(line), st));
            }
            if st.done {
                if st.buffer.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buffer);
                return Some((Ok(rest), st));
            }
            match st.chunks.next().await {
                Some(Ok(chunk)) => st.buffer.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buffer.clear();
                    return Some((Err(e.into()), st));
                }
                None => st.done = true,
            }
        }
    })
}

pub fn is_keepalive(line: &[u8]) -> bool {
    line == KEEPALIVE
}

/// `data` is a single object for most events but may be a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(item) => vec![item],
            OneOrMany::Many(items) => items,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MatchingRule {
    pub id: String,
    pub tag: Option<String>,
}

/// One parsed stream line.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEvent {
    pub data: Option<OneOrMany<RawTweet>>,
    #[serde(default)]
    pub includes: Includes,
    #[serde(default)]
    pub errors: Vec<serde_json::Value>,
    #[serde(default)]
    pub matching_rules: Vec<MatchingRule>,
}

impl StreamEvent {
    pub fn parse(line: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(line)?)
    }

    /// Any error payload means this connection is done for, even when
    /// posts arrived alongside it.
    pub fn is_fatal(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Resolve every post in the event against the shared side table.
    pub fn into_posts(self) -> Vec<Post> {
        let includes = self.includes;
        self.data
            .map(OneOrMany::into_vec)
            .unwrap_or_default()
            .iter()
            .map(|raw| Post::resolve(raw, &includes))
            .collect()
    }
}

/// Why a connection stopped being read.
#[derive(Debug, PartialEq, Eq)]
pub enum Disconnect {
    /// The server closed the body.
    Ended,
    /// The server sent an error payload.
    ErrorPayload,
    /// Reading the body failed.
    ReadError,
}

pub struct StreamClient<C> {
    connector: C,
    retry_interval: Duration,
}

impl<C: StreamConnector> StreamClient<C> {
    pub fn new(connector: C, retry_interval: Duration) -> Self {
        Self {
            connector,
            retry_interval,
        }
    }

    pub fn retry_interval(&self) -> Duration {
        self.retry_interval
    }

    /// Run `on_ready` once, then connect and dispatch posts forever.
    ///
    /// Only returns if `on_ready` fails; otherwise the loop runs until the
    /// future is dropped, which also drops the open connection.
    pub async fn listen<R, RFut, H, HFut>(
        &self,
        on_ready: R,
        query: &StreamQuery,
        on_post: H,
    ) -> anyhow::Result<()>
    where
        R: FnOnce() -> RFut,
        RFut: Future<Output = anyhow::Result<()>>,
        H: Fn(Post) -> HFut,
        HFut: Future<Output = ()>,
    {
        on_ready().await?;

        loop {
            let lines = match self.connector.connect(query).await {
                Ok(lines) => lines,
                Err(e) => {
                    error!(
                        error = %e,
                        retry_secs = self.retry_interval.as_secs(),
                        "Cannot connect to stream, retrying later"
                    );
                    tokio::time::sleep(self.retry_interval).await;
                    continue;
                }
            };

            info!("Connected to filtered stream");
            let reason = self.consume(lines, &on_post).await;
            warn!(
                reason = ?reason,
                retry_secs = self.retry_interval.as_secs(),
                "Stream disconnected, reconnecting later"
            );
            tokio::time::sleep(self.retry_interval).await;
        }
    }

    /// Read one connection until it ends. The connection is dropped (and
    /// its socket released) when this returns.
    pub async fn consume<H, HFut>(&self, mut lines: LineStream, on_post: &H) -> Disconnect
    where
        H: Fn(Post) -> HFut,
        HFut: Future<Output = ()>,
    {
        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    error!(error = %e, "Stream read failed");
                    return Disconnect::ReadError;
                }
            };

            if is_keepalive(&line) {
                debug!("Keepalive");
                continue;
            }

            let event = match StreamEvent::parse(&line) {
                Ok(event) => event,
                Err(e) => {
                    error!(
                        error = %e,
                        line = %String::from_utf8_lossy(&line),
                        "Skipping malformed stream line"
                    );
                    continue;
                }
            };

            if event.is_fatal() {
                error!(errors = ?event.errors, "Stream sent an error payload");
                return Disconnect::ErrorPayload;
            }

            let posts = event.into_posts();
            debug!(count = posts.len(), "Dispatching posts");
            join_all(posts.into_iter().map(on_post)).await;
        }

        Disconnect::Ended
    }
}
