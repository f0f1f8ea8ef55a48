// Per-post forwarding handler.
//
// Each post is decided, its photos fetched if it will become a new post,
// and the result published. Failures stay with the post that caused them:
// `handle` logs and returns, so one bad post never stops the stream or the
// other posts in its batch.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use super::decision::{Action, DecisionEngine};
use crate::dedup::DedupStore;
use crate::publish::{with_sanitized_retry, Publisher, Sanitizer};
use crate::twitter::client::TwitterClient;
use crate::twitter::media::{lookup_media, MediaDownloads};
use crate::twitter::post::Post;

pub struct Forwarder {
    engine: DecisionEngine,
    dedup: Arc<DedupStore>,
    publisher: Arc<dyn Publisher>,
    sanitizer: Arc<dyn Sanitizer>,
    client: TwitterClient,
    media_dir: PathBuf,
}

impl Forwarder {
    pub fn new(
        engine: DecisionEngine,
        dedup: Arc<DedupStore>,
        publisher: Arc<dyn Publisher>,
        sanitizer: Arc<dyn Sanitizer>,
        client: TwitterClient,
        media_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            dedup,
            publisher,
            sanitizer,
            client,
            media_dir,
        }
    }

    /// Stream callback. Never fails; errors are logged with the post id.
    pub async fn handle(&self, post: Post) {
        let post_id = post.id.clone();
        let author = post
            .author
            .as_ref()
            .map(|a| a.username.clone())
            .unwrap_or_default();

        match self.forward(post).await {
            Ok(Action::Abort) => debug!(post_id = %post_id, "Skipped post"),
            Ok(action) => info!(
                post_id = %post_id,
                author = %author,
                action = action.name(),
                "Forwarded post"
            ),
            Err(e) => error!(post_id = %post_id, error = %format!("{e:#}"), "Failed to forward post"),
        }
    }

    /// Forward one post and return the action taken.
    pub async fn forward(&self, mut post: Post) -> Result<Action> {
        let decision = self
            .engine
            .decide(&post)
            .await
            .context("Failed to decide how to forward")?;
        let publisher = self.publisher.as_ref();
        let sanitizer = self.sanitizer.as_ref();

        match &decision.action {
            Action::Abort => {}
            Action::Send { .. } => {
                let downloads = self.download_photos(&mut post).await?;
                let paths = downloads.paths();
                let published = with_sanitized_retry(&decision.text, sanitizer, move |text| async move {
                    publisher.send(&text, paths).await
                })
                .await
                .context("Destination rejected send")?;

                self.dedup
                    .record(&post.id, &published.destination_post_id)
                    .await
                    .context("Sent, but failed to record the forward")?;
                debug!(
                    post_id = %post.id,
                    destination_post_id = %published.destination_post_id,
                    "Recorded forward"
                );
                // `downloads` drops here and removes the photo files.
            }
            Action::Repost {
                destination_post_id,
            } => {
                with_sanitized_retry(&decision.text, sanitizer, move |text| async move {
                    publisher.repost(&text, destination_post_id).await
                })
                .await
                .context("Destination rejected repost")?;
            }
            Action::Comment {
                destination_post_id,
            } => {
                with_sanitized_retry(&decision.text, sanitizer, move |text| async move {
                    publisher.comment(&text, destination_post_id).await
                })
                .await
                .context("Destination rejected comment")?;
            }
        }

        Ok(decision.action)
    }

    /// Fill in media the stream left unresolved, then download the photos.
    async fn download_photos(&self, post: &mut Post) -> Result<MediaDownloads> {
        if !post.missing_media_keys().is_empty() {
            match lookup_media(&self.client, &post.id).await {
                Ok(fetched) => post.merge_media(&fetched),
                // Send what we have rather than drop the whole post.
                Err(e) => warn!(post_id = %post.id, error = %format!("{e:#}"), "Media lookup failed"),
            }
        }
        MediaDownloads::fetch(&self.client, &post.photos(), &self.media_dir).await
    }
}
