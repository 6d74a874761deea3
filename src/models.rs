use chrono::Utc;
use serde::{Deserialize, Serialize};

/// The two media kinds the catalog distinguishes. On the wire the catalog
/// calls series "tv", so that is what we serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MediaType {
    #[serde(rename = "movie")]
    Movie,
    #[serde(rename = "tv")]
    Series,
}

impl MediaType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaType::Movie => "movie",
            MediaType::Series => "tv",
        }
    }
}

/// One catalog entry as the view layer sees it. Movies carry `title`,
/// series carry `name`; `trailer_key` is attached by the enrichment
/// pipeline and is absent until then.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaItem {
    pub id: i32,
    pub media_type: MediaType,
    pub title: Option<String>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    pub backdrop_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trailer_key: Option<String>,
}

impl MediaItem {
    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("(sin título)")
    }
}

/// A saved item: a snapshot of the source catalog entry taken at save time,
/// never re-synced against the catalog afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FavoriteRecord {
    pub id: i32,
    pub media_type: MediaType,
    pub title: Option<String>,
    pub name: Option<String>,
    pub overview: Option<String>,
    pub poster_path: Option<String>,
    /// Milliseconds since the epoch, set on every save/overwrite.
    #[serde(rename = "savedAt")]
    pub saved_at: i64,
}

impl FavoriteRecord {
    /// Snapshot `item` as a favorite, stamped now.
    pub fn snapshot(item: &MediaItem) -> Self {
        Self {
            id: item.id,
            media_type: item.media_type,
            title: item.title.clone(),
            name: item.name.clone(),
            overview: item.overview.clone(),
            poster_path: item.poster_path.clone(),
            saved_at: Utc::now().timestamp_millis(),
        }
    }

    pub fn display_title(&self) -> &str {
        self.title
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("(sin título)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&MediaType::Movie).unwrap(),
            "\"movie\""
        );
        assert_eq!(serde_json::to_string(&MediaType::Series).unwrap(), "\"tv\"");
        let parsed: MediaType = serde_json::from_str("\"tv\"").unwrap();
        assert_eq!(parsed, MediaType::Series);
    }

    #[test]
    fn display_title_prefers_title_then_name() {
        let mut item = MediaItem {
            id: 1,
            media_type: MediaType::Series,
            title: None,
            name: Some("La serie".to_string()),
            overview: None,
            poster_path: None,
            backdrop_path: None,
            trailer_key: None,
        };
        assert_eq!(item.display_title(), "La serie");
        item.title = Some("El título".to_string());
        assert_eq!(item.display_title(), "El título");
    }

    #[test]
    fn snapshot_copies_fields_and_stamps_time() {
        let item = MediaItem {
            id: 42,
            media_type: MediaType::Movie,
            title: Some("Una película".to_string()),
            name: None,
            overview: Some("Sinopsis".to_string()),
            poster_path: Some("/p.jpg".to_string()),
            backdrop_path: Some("/b.jpg".to_string()),
            trailer_key: Some("abc".to_string()),
        };
        let record = FavoriteRecord::snapshot(&item);
        assert_eq!(record.id, 42);
        assert_eq!(record.title.as_deref(), Some("Una película"));
        assert_eq!(record.poster_path.as_deref(), Some("/p.jpg"));
        assert!(record.saved_at > 0);
    }
}
