// Media fetching: photo downloads and lookup of media missing from includes.
//
// Only photos have a URL the API hands out, so only photos are ever
// downloaded; animated GIFs and videos are skipped before we get here.
// Downloads land in a scratch directory and are owned by a guard that
// deletes them on drop, whether or not the forward succeeded.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use super::client::{TwitterClient, TWEETS_PATH};
use super::post::{Includes, MediaAttachment};

/// Download a photo's bytes.
///
/// Fails for non-photo media, which has no fetchable URL.
pub async fn fetch_photo(client: &TwitterClient, media: &MediaAttachment) -> Result<Vec<u8>> {
    let url = match (&media.url, media.is_photo()) {
        (Some(url), true) => url,
        _ => anyhow::bail!("Media {} ({:?}) has no photo URL", media.key, media.kind),
    };
    client
        .download(url)
        .await
        .with_context(|| format!("Failed to download photo {}", media.key))
}

#[derive(Deserialize)]
struct LookupResponse {
    #[serde(default)]
    includes: Includes,
}

/// Fetch a tweet's media attachments by looking the tweet up directly.
///
/// Used when the stream's side table left some media keys unresolved.
pub async fn lookup_media(client: &TwitterClient, post_id: &str) -> Result<Vec<MediaAttachment>> {
    let path = format!("{TWEETS_PATH}/{post_id}");
    let response: LookupResponse = client
        .get_json(
            "tweet lookup",
            &path,
            &[
                ("expansions", "attachments.media_keys"),
                ("media.fields", "type,url"),
            ],
        )
        .await
        .with_context(|| format!("Failed to look up media for post {post_id}"))?;

    Ok(response
        .includes
        .media
        .iter()
        .map(MediaAttachment::from)
        .collect())
}

/// Photo files downloaded for one post. Deleted when dropped.
#[derive(Debug, Default)]
pub struct MediaDownloads {
    paths: Vec<PathBuf>,
}

impl MediaDownloads {
    /// Download every photo concurrently into `dir`.
    ///
    /// If any download fails, files already written are removed by the
    /// partially built guard before the error is returned.
    pub async fn fetch(
        client: &TwitterClient,
        photos: &[&MediaAttachment],
        dir: &Path,
    ) -> Result<Self> {
        if photos.is_empty() {
            return Ok(Self::default());
        }
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("Failed to create media directory: {}", dir.display()))?;

        let results = join_all(photos.iter().map(|media| async move {
            let bytes = fetch_photo(client, media).await?;
            let path = dir.join(file_name(media));
            tokio::fs::write(&path, &bytes)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            debug!(key = %media.key, path = %path.display(), bytes = bytes.len(), "Downloaded photo");
            Ok::<_, anyhow::Error>(path)
        }))
        .await;

        let mut downloads = Self::default();
        let mut first_error = None;
        for result in results {
            match result {
                Ok(path) => downloads.paths.push(path),
                Err(e) if first_error.is_none() => first_error = Some(e),
                Err(_) => {}
            }
        }
        match first_error {
            // `downloads` drops here and cleans up whatever did get written.
            Some(e) => Err(e),
            None => Ok(downloads),
        }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }
}

impl Drop for MediaDownloads {
    fn drop(&mut self) {
        for path in &self.paths {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove downloaded media");
            }
        }
    }
}

/// `<media key>.<extension from the URL>`, defaulting to jpg.
fn file_name(media: &MediaAttachment) -> String {
    let ext = media
        .url
        .as_deref()
        .and_then(|url| url.rsplit('/').next())
        .and_then(|last| last.split('?').next())
        .and_then(|last| last.rsplit_once('.'))
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.len() <= 5)
        .unwrap_or("jpg");
    format!("{}.{}", media.key, ext)
}
