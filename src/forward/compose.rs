// Text composition for mirrored posts.
//
// Every composed text starts with an optional spoiler banner, then a header
// naming the author and when they posted, then a body shaped by the action.
// Missing authors and timestamps shorten the header; they never fail it.

use std::sync::Arc;

use chrono::FixedOffset;

use super::decision::Action;
use crate::subscriptions::Subscriptions;
use crate::twitter::post::Post;

pub const SPOILER_BANNER: &str = "【剧透预警】本篇推文中含有少歌剧场版剧透内容\n";
pub const QUOTE_SEPARATOR: &str = "\n----------\n原推：\n";
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Shown in place of an author the side table did not include.
pub const UNKNOWN_AUTHOR: &str = "unknown";

/// Where a source post can still be read when its text was not included.
const SOURCE_STATUS_URL: &str = "https://twitter.com/i/web/status/";

pub struct Composer {
    subscriptions: Arc<Subscriptions>,
    offset: FixedOffset,
    spoiler_tag: String,
    link_base: String,
}

impl Composer {
    pub fn new(
        subscriptions: Arc<Subscriptions>,
        offset: FixedOffset,
        spoiler_tag: &str,
        link_base: &str,
    ) -> Self {
        Self {
            subscriptions,
            offset,
            spoiler_tag: spoiler_tag.to_string(),
            link_base: link_base.to_string(),
        }
    }

    /// Text for `action`. Abort has nothing to say and composes to "".
    pub fn compose(&self, post: &Post, action: &Action) -> String {
        let body = match action {
            Action::Abort => return String::new(),
            Action::Send { link_to } => match post.relationship.kind() {
                None => format!("发推：\n{}", post.text()),
                Some(_) => format!(
                    "{}{}{}",
                    self.quote_line(post),
                    QUOTE_SEPARATOR,
                    self.original_text(post, link_to.as_deref())
                ),
            },
            Action::Repost { .. } => self.quote_line(post),
            Action::Comment { .. } => format!("回复：\n{}", post.text()),
        };
        format!("{}{}", self.header(post), body)
    }

    /// Spoiler banner (if tagged) plus "<name>于<time>".
    pub fn header(&self, post: &Post) -> String {
        let mut header = String::new();
        if post.has_hashtag(&self.spoiler_tag) {
            header.push_str(SPOILER_BANNER);
        }
        header.push_str(&self.name_of(post));
        if let Some(created_at) = post.created_at {
            let local = created_at.with_timezone(&self.offset);
            header.push('于');
            header.push_str(&local.format(TIME_FORMAT).to_string());
        }
        header
    }

    /// Link to an already-mirrored destination post.
    pub fn destination_link(&self, destination_post_id: &str) -> String {
        format!("{}{}", self.link_base, destination_post_id)
    }

    fn name_of(&self, post: &Post) -> String {
        post.author
            .as_ref()
            .map(|a| self.subscriptions.author_name(a))
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string())
    }

    /// "转发了<ref>的推特：\n<text>"; replies sent standalone read the same.
    fn quote_line(&self, post: &Post) -> String {
        let referenced_name = post
            .referenced_post()
            .map(|p| self.name_of(p))
            .unwrap_or_else(|| UNKNOWN_AUTHOR.to_string());
        format!("转发了{}的推特：\n{}", referenced_name, post.text())
    }

    fn original_text(&self, post: &Post, link_to: Option<&str>) -> String {
        if let Some(id) = link_to {
            return self.destination_link(id);
        }
        match (post.referenced_post(), post.relationship.referenced()) {
            (Some(referenced), _) => referenced.text(),
            (None, Some(reference)) => format!("{SOURCE_STATUS_URL}{}", reference.id),
            (None, None) => String::new(),
        }
    }
}
