// Dry-run publisher: logs what would be posted instead of posting it.
//
// Lets the whole pipeline run end to end (rules, stream, decisions, dedup)
// without destination credentials. Ids it hands out are synthetic, so the
// dedup store fills with ids that exist nowhere; point MIRRORBIRD_DEDUP_PATH
// somewhere disposable when using it.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::info;

use super::{PublishError, Published, Publisher};

pub struct DryRunPublisher {
    next_id: AtomicU64,
}

impl DryRunPublisher {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }
}

impl Default for DryRunPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for DryRunPublisher {
    async fn send(&self, text: &str, media: &[PathBuf]) -> Result<Published, PublishError> {
        let id = format!("dry-run-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        info!(id = %id, images = media.len(), text = %text, "[dry run] send");
        Ok(Published {
            destination_post_id: id,
        })
    }

    async fn repost(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError> {
        info!(target_id = %destination_post_id, text = %text, "[dry run] repost");
        Ok(())
    }

    async fn comment(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError> {
        info!(target_id = %destination_post_id, text = %text, "[dry run] comment");
        Ok(())
    }
}
