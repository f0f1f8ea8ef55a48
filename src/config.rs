use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::FixedOffset;

/// Default source-platform API endpoint.
pub const DEFAULT_TWITTER_API_URL: &str = "https://api.twitter.com";

/// Hashtag that marks a post as containing spoilers.
pub const DEFAULT_SPOILER_TAG: &str = "劇場版スタァライトネタバレ";

/// Prefix used to link to an already-mirrored destination post.
pub const DEFAULT_DEST_LINK_BASE: &str = "https://t.bilibili.com/";

/// Central configuration loaded from environment variables.
///
/// The .env file is loaded by `main` via dotenvy before this runs, so values
/// can live in either place.
pub struct Config {
    pub bearer_token: String,
    pub twitter_api_url: String,
    /// JSON file listing the subscribed accounts.
    pub subscriptions_path: PathBuf,
    pub dedup_path: PathBuf,
    /// Scratch directory for photo downloads; files are removed after each post.
    pub media_dir: PathBuf,
    /// Fixed wait between stream reconnect attempts.
    pub retry_interval: Duration,
    pub retention: chrono::Duration,
    pub display_offset: FixedOffset,
    pub rule_tag: String,
    pub spoiler_tag: String,
    pub dest_link_base: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Everything except the bearer token has a default; the token is only
    /// checked by commands that talk to the source platform.
    pub fn load() -> Result<Self> {
        let retry_secs = parse_var("MIRRORBIRD_RETRY_SECS", 300u64)?;
        let retention_days = parse_var("MIRRORBIRD_RETENTION_DAYS", 7i64)?;
        let offset_hours = parse_var("MIRRORBIRD_UTC_OFFSET_HOURS", 8i32)?;

        let display_offset = FixedOffset::east_opt(offset_hours * 3600).with_context(|| {
            format!("MIRRORBIRD_UTC_OFFSET_HOURS={offset_hours} is not a valid UTC offset")
        })?;

        Ok(Self {
            bearer_token: env::var("TWITTER_BEARER_TOKEN").unwrap_or_default(),
            twitter_api_url: env::var("TWITTER_API_URL")
                .unwrap_or_else(|_| DEFAULT_TWITTER_API_URL.to_string()),
            subscriptions_path: env::var("MIRRORBIRD_SUBSCRIPTIONS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./subscriptions.json")),
            dedup_path: env::var("MIRRORBIRD_DEDUP_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir().join("forwarded.json")),
            media_dir: env::var("MIRRORBIRD_MEDIA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_data_dir().join("media")),
            retry_interval: Duration::from_secs(retry_secs),
            retention: chrono::Duration::days(retention_days),
            display_offset,
            rule_tag: env::var("MIRRORBIRD_RULE_TAG").unwrap_or_else(|_| "mirrorbird".to_string()),
            spoiler_tag: env::var("MIRRORBIRD_SPOILER_TAG")
                .unwrap_or_else(|_| DEFAULT_SPOILER_TAG.to_string()),
            dest_link_base: env::var("MIRRORBIRD_DEST_LINK_BASE")
                .unwrap_or_else(|_| DEFAULT_DEST_LINK_BASE.to_string()),
        })
    }

    /// Check that the source-platform bearer token is configured.
    /// Call this before anything that touches the rules or stream endpoints.
    pub fn require_twitter(&self) -> Result<()> {
        if self.bearer_token.is_empty() {
            anyhow::bail!(
                "TWITTER_BEARER_TOKEN not set. Add it to your .env file.\n\
                 See .env.example for the required variables."
            );
        }
        Ok(())
    }

    /// Check that the subscriptions file exists.
    pub fn require_subscriptions(&self) -> Result<()> {
        if !self.subscriptions_path.exists() {
            anyhow::bail!(
                "Subscriptions file not found at {}.\n\
                 Create it (a JSON list of {{\"username\", \"name\"}} objects) or point \
                 MIRRORBIRD_SUBSCRIPTIONS at one.",
                self.subscriptions_path.display()
            );
        }
        Ok(())
    }
}

/// Returns the default directory for the dedup file and media scratch space.
/// Uses the platform data directory: ~/.local/share/mirrorbird/ on Linux.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mirrorbird")
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name}={raw} could not be parsed")),
        Err(_) => Ok(default),
    }
}
