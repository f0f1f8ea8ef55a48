// Post object model: resolving flat API responses into a post graph.
//
// The filtered stream sends each tweet as a flat object full of IDs, plus an
// `includes` side table shared by the whole response that carries the
// referenced users, tweets, and media. Resolution looks IDs up in that
// table instead of building a live cyclic graph, and stops one level below
// the top post: a quoted tweet gets its author and media, but whatever the
// quoted tweet itself references is left as a bare ID.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How far referenced posts are materialized below the top-level post.
pub const MAX_REFERENCE_DEPTH: usize = 1;

// -- Flat wire types (what the API sends) --

/// A tweet object exactly as it appears in `data` or `includes.tweets`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawTweet {
    pub id: String,
    #[serde(default)]
    pub text: String,
    pub author_id: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub referenced_tweets: Vec<RawReference>,
    #[serde(default)]
    pub entities: Entities,
    pub attachments: Option<RawAttachments>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawReference {
    #[serde(rename = "type")]
    pub kind: ReferenceKind,
    pub id: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAttachments {
    #[serde(default)]
    pub media_keys: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawUser {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawMedia {
    pub media_key: String,
    #[serde(rename = "type")]
    pub kind: MediaKind,
    pub url: Option<String>,
}

/// The `includes` side table: related objects for a whole response, by kind.
///
/// Places and polls are carried as opaque JSON; nothing downstream reads them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Includes {
    #[serde(default)]
    pub users: Vec<RawUser>,
    #[serde(default)]
    pub tweets: Vec<RawTweet>,
    #[serde(default)]
    pub media: Vec<RawMedia>,
    #[serde(default)]
    pub places: Vec<serde_json::Value>,
    #[serde(default)]
    pub polls: Vec<serde_json::Value>,
}

/// An object that can be found in the side table by its unique field.
pub trait Included {
    fn unique_id(&self) -> &str;
}

impl Included for RawTweet {
    fn unique_id(&self) -> &str {
        &self.id
    }
}

impl Included for RawUser {
    fn unique_id(&self) -> &str {
        &self.id
    }
}

impl Included for RawMedia {
    fn unique_id(&self) -> &str {
        &self.media_key
    }
}

/// Find the first object in a side-table bucket whose unique field matches.
pub fn lookup<'a, T: Included>(bucket: &'a [T], id: &str) -> Option<&'a T> {
    bucket.iter().find(|obj| obj.unique_id() == id)
}

// -- Entities --

/// Entity annotations on a tweet. Offsets count Unicode scalar values.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub urls: Vec<UrlEntity>,
    #[serde(default)]
    pub hashtags: Vec<HashtagEntity>,
    #[serde(default)]
    pub mentions: Vec<MentionEntity>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UrlEntity {
    pub start: usize,
    pub end: usize,
    /// The shortened link as it appears in the raw text.
    #[serde(default)]
    pub url: String,
    pub expanded_url: Option<String>,
    /// Set when the link points at one of the tweet's own media attachments.
    pub media_key: Option<String>,
}

impl UrlEntity {
    /// What the shortened link should become in reconstructed text.
    ///
    /// Links to attached media are dropped since the media travels separately.
    pub fn replacement(&self) -> &str {
        if self.media_key.is_some() {
            return "";
        }
        self.expanded_url.as_deref().unwrap_or(&self.url)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HashtagEntity {
    pub start: usize,
    pub end: usize,
    pub tag: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MentionEntity {
    pub start: usize,
    pub end: usize,
    pub username: String,
}

// -- Resolved model --

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub id: String,
    pub username: String,
    pub name: Option<String>,
}

impl Author {
    pub fn new(id: &str, username: &str, name: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            username: username.to_string(),
            name: name.map(str::to_string),
        }
    }
}

impl From<&RawUser> for Author {
    fn from(raw: &RawUser) -> Self {
        Self {
            id: raw.id.clone(),
            username: raw.username.clone(),
            name: raw.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    AnimatedGif,
    Video,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAttachment {
    pub key: String,
    pub kind: MediaKind,
    /// Only photos have a directly fetchable URL.
    pub url: Option<String>,
}

impl MediaAttachment {
    pub fn new(key: &str, kind: MediaKind, url: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            kind,
            url: match kind {
                MediaKind::Photo => url.map(str::to_string),
                MediaKind::AnimatedGif | MediaKind::Video => None,
            },
        }
    }

    pub fn is_photo(&self) -> bool {
        self.kind == MediaKind::Photo
    }
}

impl From<&RawMedia> for MediaAttachment {
    fn from(raw: &RawMedia) -> Self {
        Self::new(&raw.media_key, raw.kind, raw.url.as_deref())
    }
}

/// A media key on a post and, if the side table had it, what it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSlot {
    pub key: String,
    pub attachment: Option<MediaAttachment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Retweeted,
    Quoted,
    RepliedTo,
}

/// The post this one points at. `post` is `None` when the referenced tweet
/// was not in the side table, or sits below the resolution depth cap.
#[derive(Debug, Clone)]
pub struct Referenced {
    pub id: String,
    pub post: Option<Box<Post>>,
}

#[derive(Debug, Clone)]
pub enum Relationship {
    Original,
    Retweeted(Referenced),
    Quoted(Referenced),
    RepliedTo(Referenced),
}

impl Relationship {
    fn from_reference(kind: ReferenceKind, referenced: Referenced) -> Self {
        match kind {
            ReferenceKind::Retweeted => Relationship::Retweeted(referenced),
            ReferenceKind::Quoted => Relationship::Quoted(referenced),
            ReferenceKind::RepliedTo => Relationship::RepliedTo(referenced),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Relationship::Original => "original",
            Relationship::Retweeted(_) => "retweeted",
            Relationship::Quoted(_) => "quoted",
            Relationship::RepliedTo(_) => "replied_to",
        }
    }

    /// The reference kind, or `None` for an original post.
    pub fn kind(&self) -> Option<ReferenceKind> {
        match self {
            Relationship::Original => None,
            Relationship::Retweeted(_) => Some(ReferenceKind::Retweeted),
            Relationship::Quoted(_) => Some(ReferenceKind::Quoted),
            Relationship::RepliedTo(_) => Some(ReferenceKind::RepliedTo),
        }
    }

    pub fn referenced(&self) -> Option<&Referenced> {
        match self {
            Relationship::Original => None,
            Relationship::Retweeted(r) | Relationship::Quoted(r) | Relationship::RepliedTo(r) => {
                Some(r)
            }
        }
    }
}

impl std::fmt::Display for Relationship {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A fully resolved post, built fresh for each incoming stream event.
#[derive(Debug, Clone)]
pub struct Post {
    pub id: String,
    pub raw_text: String,
    pub author: Option<Author>,
    pub created_at: Option<DateTime<Utc>>,
    pub relationship: Relationship,
    pub entities: Entities,
    pub media: Vec<MediaSlot>,
}

impl Post {
    /// Resolve a flat tweet against the response's side table.
    pub fn resolve(raw: &RawTweet, includes: &Includes) -> Self {
        Self::resolve_at_depth(raw, includes, 0)
    }

    fn resolve_at_depth(raw: &RawTweet, includes: &Includes, depth: usize) -> Self {
        let author = raw
            .author_id
            .as_deref()
            .and_then(|id| lookup(&includes.users, id))
            .map(Author::from);

        // Only the first reference counts; a reply that also quotes is a reply.
        let relationship = match raw.referenced_tweets.first() {
            None => Relationship::Original,
            Some(reference) => {
                let post = if depth < MAX_REFERENCE_DEPTH {
                    lookup(&includes.tweets, &reference.id)
                        .map(|t| Box::new(Self::resolve_at_depth(t, includes, depth + 1)))
                } else {
                    None
                };
                Relationship::from_reference(
                    reference.kind,
                    Referenced {
                        id: reference.id.clone(),
                        post,
                    },
                )
            }
        };

        let media = raw
            .attachments
            .iter()
            .flat_map(|a| a.media_keys.iter())
            .map(|key| MediaSlot {
                key: key.clone(),
                attachment: lookup(&includes.media, key).map(MediaAttachment::from),
            })
            .collect();

        Self {
            id: raw.id.clone(),
            raw_text: raw.text.clone(),
            author,
            created_at: raw.created_at,
            relationship,
            entities: raw.entities.clone(),
            media,
        }
    }

    /// The referenced post, if this post has one and it resolved.
    pub fn referenced_post(&self) -> Option<&Post> {
        self.relationship
            .referenced()
            .and_then(|r| r.post.as_deref())
    }

    pub fn has_media(&self) -> bool {
        !self.media.is_empty()
    }

    pub fn has_hashtag(&self, tag: &str) -> bool {
        self.entities.hashtags.iter().any(|h| h.tag == tag)
    }

    /// Media keys that the side table did not resolve.
    pub fn missing_media_keys(&self) -> Vec<&str> {
        self.media
            .iter()
            .filter(|slot| slot.attachment.is_none())
            .map(|slot| slot.key.as_str())
            .collect()
    }

    /// Resolved photo attachments, in post order.
    pub fn photos(&self) -> Vec<&MediaAttachment> {
        self.media
            .iter()
            .filter_map(|slot| slot.attachment.as_ref())
            .filter(|m| m.is_photo())
            .collect()
    }

    /// Fill unresolved media slots from separately fetched attachments.
    /// Slots that are already resolved are left alone.
    pub fn merge_media(&mut self, fetched: &[MediaAttachment]) {
        for slot in self.media.iter_mut().filter(|s| s.attachment.is_none()) {
            slot.attachment = fetched.iter().find(|m| m.key == slot.key).cloned();
        }
    }

    /// Display text with shortened links expanded and media links removed.
    pub fn text(&self) -> String {
        reconstruct_text(&self.raw_text, &self.entities.urls)
    }
}

/// Rebuild display text by replacing each URL entity span with its expansion.
///
/// Entities must be non-overlapping and sorted by `start`; unsorted input
/// produces unspecified (but never panicking) output. Offsets past the end
/// of the text are clamped.
pub fn reconstruct_text(raw: &str, urls: &[UrlEntity]) -> String {
    if urls.is_empty() {
        return raw.trim().to_string();
    }

    // Char offset -> byte offset, with one extra entry for end-of-text.
    let boundaries: Vec<usize> = raw
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(raw.len()))
        .collect();
    let byte_at = |chars: usize| boundaries[chars.min(boundaries.len() - 1)];

    let mut out = String::with_capacity(raw.len());
    let mut cursor = 0usize;
    for entity in urls {
        let start = byte_at(entity.start).max(cursor);
        out.push_str(&raw[cursor..start]);
        out.push_str(entity.replacement());
        cursor = byte_at(entity.end).max(start);
    }
    out.push_str(&raw[cursor..]);

    out.trim().to_string()
}
