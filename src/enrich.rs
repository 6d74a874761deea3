//! Trailer enrichment: join a trailer key onto each trending item, then keep
//! only items that ended up with both a poster and a trailer (the carousel
//! shows fully enriched entries only).

use crate::catalog::{CatalogApi, CatalogRecord, VideoEntry};
use crate::models::{MediaItem, MediaType};
use futures::future::join_all;
use tracing::warn;

const TRAILER_SITE: &str = "YouTube";

/// First video whose declared type is "Trailer" hosted on the expected
/// platform. Site comparison is case-insensitive; the type is not.
pub fn select_trailer(videos: &[VideoEntry]) -> Option<String> {
    videos
        .iter()
        .find(|v| v.video_type == "Trailer" && v.site.eq_ignore_ascii_case(TRAILER_SITE))
        .map(|v| v.key.clone())
}

/// Pre-filter a trending feed: keep records tagged with the expected kind
/// that already have a poster. Records of other kinds are someone else's
/// feed leaking through and are dropped before we spend lookups on them.
pub fn trending_candidates(records: Vec<CatalogRecord>, media_type: MediaType) -> Vec<MediaItem> {
    records
        .into_iter()
        .filter(|r| r.parsed_media_type() == Some(media_type) && r.poster_path.is_some())
        .map(|r| r.into_item(media_type))
        .collect()
}

/// Issue one trailer lookup per item, all created before any is awaited, so
/// the batch costs one slowest lookup rather than the sum. A failed lookup
/// is logged and leaves that item trailer-less; it never fails the batch.
/// Survivors keep their input order.
pub async fn attach_trailers(
    catalog: &dyn CatalogApi,
    media_type: MediaType,
    items: Vec<MediaItem>,
) -> Vec<MediaItem> {
    let lookups = items.iter().map(|item| catalog.videos(media_type, item.id));
    let resolved = join_all(lookups).await;

    items
        .into_iter()
        .zip(resolved)
        .filter_map(|(mut item, result)| {
            match result {
                Ok(videos) => item.trailer_key = select_trailer(&videos),
                Err(e) => warn!("Trailer lookup failed for '{}': {e}", item.display_title()),
            }
            (item.poster_path.is_some() && item.trailer_key.is_some()).then_some(item)
        })
        .collect()
}

/// The full pipeline for one trending feed.
pub async fn enrich_trending(
    catalog: &dyn CatalogApi,
    media_type: MediaType,
    records: Vec<CatalogRecord>,
) -> Vec<MediaItem> {
    let candidates = trending_candidates(records, media_type);
    attach_trailers(catalog, media_type, candidates).await
}
