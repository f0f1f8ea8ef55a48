// Publisher: the destination-platform side of a forward.
//
// Authentication, signing, and the actual network calls live behind this
// trait. The core only cares that publishing can fail, and that one kind
// of failure (the platform rejecting the text itself) is worth a single
// retry with sanitized text.

pub mod dry_run;

use std::future::Future;
use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

/// Result of a successful `send`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub destination_post_id: String,
}

#[derive(Error, Debug)]
pub enum PublishError {
    /// The destination refused the text (forbidden words and the like).
    #[error("Content rejected by destination (code {code}): {message}")]
    RejectedContent { code: i64, message: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Trait for posting to the destination platform. Implementations must be
/// async because every operation is a remote call.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Create a new standalone post with optional images.
    async fn send(&self, text: &str, media: &[PathBuf]) -> Result<Published, PublishError>;

    /// Quote an existing destination post. The platform does not return an
    /// id for the new post.
    async fn repost(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError>;

    /// Comment under an existing destination post.
    async fn comment(&self, text: &str, destination_post_id: &str) -> Result<(), PublishError>;
}

/// Rewrites text the destination rejected. Supplied by whoever knows the
/// destination's content rules.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, text: &str) -> String;
}

/// Leaves text untouched. The retry still happens, which covers transient
/// rejections.
pub struct IdentitySanitizer;

impl Sanitizer for IdentitySanitizer {
    fn sanitize(&self, text: &str) -> String {
        text.to_string()
    }
}

/// Run `op` on `text`; if the destination rejects the content, run it once
/// more on sanitized text and return whatever that yields.
pub async fn with_sanitized_retry<T, F, Fut>(
    text: &str,
    sanitizer: &dyn Sanitizer,
    op: F,
) -> Result<T, PublishError>
where
    F: Fn(String) -> Fut,
    Fut: Future<Output = Result<T, PublishError>>,
{
    match op(text.to_string()).await {
        Err(PublishError::RejectedContent { code, message }) => {
            warn!(code, message = %message, "Destination rejected content, retrying sanitized");
            op(sanitizer.sanitize(text)).await
        }
        other => other,
    }
}
