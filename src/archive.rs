//! Asset archiver: download the activity map image embedded in a feed entry
//! and store it durably, exactly once per unique source reference.
//!
//! The fetch goes through [`AssetFetcher`], implemented by the live page as
//! an in-page `fetch()` so the download rides the authenticated cookie jar.
//! It is skipped entirely when a non-empty file for the same source already
//! exists, so re-running the harvest loop never re-downloads.

use crate::Result;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Extension used when the response carries no content-type header.
const DEFAULT_EXTENSION: &str = "png";

/// Filename stem used when the source URL has no usable path segment.
const DEFAULT_STEM: &str = "map";

/// A fetched asset: HTTP status, declared media type, raw bytes.
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl FetchedAsset {
    /// Whether the response status is a success.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network-fetch capability for asset downloads.
#[allow(async_fn_in_trait)]
pub trait AssetFetcher {
    /// GET `url` within the authenticated session.
    async fn fetch(&self, url: &str) -> Result<FetchedAsset>;
}

/// Derive a file extension from a content-type header value:
/// text after the `/`, before any `;` parameter. `image/png` -> `png`,
/// `image/jpeg;charset=binary` -> `jpeg`, absent -> `png`.
pub fn extension_for(content_type: Option<&str>) -> &str {
    let ext = content_type
        .unwrap_or_default()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .split(';')
        .next()
        .unwrap_or_default()
        .trim();
    if ext.is_empty() {
        DEFAULT_EXTENSION
    } else {
        ext
    }
}

/// Derive a filename stem from the last path segment of a source URL,
/// without its extension. Query strings and fragments are ignored; an empty
/// result falls back to `map`.
pub fn stem_for(src: &str) -> String {
    let without_fragment = src.split('#').next().unwrap_or_default();
    let without_query = without_fragment.split('?').next().unwrap_or_default();

    // Strip the scheme and authority so only the path remains.
    let path = match without_query.find("://") {
        Some(idx) => {
            let rest = &without_query[idx + 3..];
            match rest.find('/') {
                Some(slash) => &rest[slash..],
                None => "",
            }
        }
        None => without_query,
    };

    let segment = path.rsplit('/').next().unwrap_or_default();
    let stem = Path::new(segment)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    if stem.is_empty() {
        DEFAULT_STEM.to_string()
    } else {
        stem.to_string()
    }
}

/// Whether a non-empty archived file for `stem` (any extension) already
/// exists in `dir`.
fn already_archived(dir: &Path, stem: &str) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        let matches_stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| s == stem)
            .unwrap_or(false);
        if matches_stem {
            let non_empty = entry.metadata().map(|m| m.len() > 0).unwrap_or(false);
            if non_empty {
                return true;
            }
        }
    }
    false
}

/// Archive the map image at `src` into `dir`.
///
/// No-ops (returning `Ok(None)`) when the asset is already archived or the
/// fetch does not succeed; neither is an error. Returns the written path on
/// a fresh archive.
pub async fn archive_map<F: AssetFetcher>(
    fetcher: &F,
    src: &str,
    dir: &Path,
) -> Result<Option<PathBuf>> {
    let stem = stem_for(src);

    if already_archived(dir, &stem) {
        info!("Map: already exists for {}", stem);
        return Ok(None);
    }

    let asset = fetcher.fetch(src).await?;
    if !asset.ok() {
        debug!("Map: fetch returned status {} for {}", asset.status, src);
        return Ok(None);
    }

    let extension = extension_for(asset.content_type.as_deref());
    let target = dir.join(format!("{}.{}", stem, extension));

    // Same-name file can appear between the pre-check and the write when the
    // content type changed the extension; keep the existing bytes.
    if target.exists() && std::fs::metadata(&target).map(|m| m.len() > 0).unwrap_or(false) {
        info!("Map: already exists {}", target.display());
        return Ok(None);
    }

    tokio::fs::create_dir_all(dir).await?;
    tokio::fs::write(&target, &asset.body).await?;

    info!("Map: saved {}", target.display());
    Ok(Some(target))
}
