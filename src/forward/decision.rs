// Forwarding decisions: what to do with one resolved post.
//
// The table itself is a pure function of four facts about the post. The
// engine gathers those facts (subscription check, dedup lookup) and then
// composes the text, which can still turn a repost into a send when the
// text is too long for the destination's repost comment.

use std::sync::Arc;

use tracing::debug;

use super::compose::Composer;
use crate::dedup::DedupStore;
use crate::error::Result;
use crate::subscriptions::Subscriptions;
use crate::twitter::post::{Post, ReferenceKind};

/// Longest repost comment the destination accepts, in chars.
pub const REPOST_TEXT_BUDGET: usize = 233;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// A new standalone post. `link_to` names an already-mirrored
    /// destination post to link from the text.
    Send { link_to: Option<String> },
    /// Quote an existing destination post.
    Repost { destination_post_id: String },
    /// Comment under an existing destination post.
    Comment { destination_post_id: String },
    /// Do nothing. Not an error.
    Abort,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::Send { .. } => "send",
            Action::Repost { .. } => "repost",
            Action::Comment { .. } => "comment",
            Action::Abort => "abort",
        }
    }

    pub fn is_abort(&self) -> bool {
        matches!(self, Action::Abort)
    }
}

/// The forwarding table.
///
/// `kind` is `None` for an original post. `destination` is the dedup hit for
/// the referenced post; it only matters when the referenced author is
/// subscribed.
pub fn choose_action(
    kind: Option<ReferenceKind>,
    referenced_subscribed: bool,
    destination: Option<String>,
    has_media: bool,
) -> Action {
    let destination = destination.filter(|_| referenced_subscribed);
    match (kind, destination) {
        (None, _) => Action::Send { link_to: None },
        (Some(ReferenceKind::Retweeted), _) => Action::Abort,
        (Some(ReferenceKind::Quoted), None) => Action::Send { link_to: None },
        (Some(ReferenceKind::Quoted), Some(id)) if has_media => Action::Send { link_to: Some(id) },
        (Some(ReferenceKind::Quoted), Some(id)) => Action::Repost {
            destination_post_id: id,
        },
        (Some(ReferenceKind::RepliedTo), None) => Action::Abort,
        (Some(ReferenceKind::RepliedTo), Some(id)) => Action::Comment {
            destination_post_id: id,
        },
    }
}

/// An action and the text to publish with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub text: String,
}

pub struct DecisionEngine {
    subscriptions: Arc<Subscriptions>,
    dedup: Arc<DedupStore>,
    composer: Composer,
}

impl DecisionEngine {
    pub fn new(subscriptions: Arc<Subscriptions>, dedup: Arc<DedupStore>, composer: Composer) -> Self {
        Self {
            subscriptions,
            dedup,
            composer,
        }
    }

    /// Decide what to do with `post` and compose its text.
    ///
    /// Only fails if the dedup store cannot be read.
    pub async fn decide(&self, post: &Post) -> Result<Decision> {
        let kind = post.relationship.kind();
        let referenced_author = post.referenced_post().and_then(|p| p.author.as_ref());
        let subscribed = self.subscriptions.is_subscribed(referenced_author);

        // Only quotes and replies of our own accounts can thread onto
        // something we already mirrored.
        let destination = match (kind, post.relationship.referenced()) {
            (Some(ReferenceKind::Quoted | ReferenceKind::RepliedTo), Some(reference))
                if subscribed =>
            {
                self.dedup.lookup(&reference.id).await?
            }
            _ => None,
        };

        let mut action = choose_action(kind, subscribed, destination, post.has_media());
        let mut text = self.composer.compose(post, &action);

        if let Action::Repost {
            destination_post_id,
        } = &action
        {
            let length = text.chars().count();
            if length > REPOST_TEXT_BUDGET {
                debug!(
                    post_id = %post.id,
                    length,
                    budget = REPOST_TEXT_BUDGET,
                    "Repost text too long, sending instead"
                );
                action = Action::Send {
                    link_to: Some(destination_post_id.clone()),
                };
                text = self.composer.compose(post, &action);
            }
        }

        Ok(Decision { action, text })
    }
}
