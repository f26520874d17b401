use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

/// Composite identity of a playable item. The same id mirrored by two
/// providers is two distinct keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub id: String,
    pub source: String,
}

impl CacheKey {
    pub fn new(id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.id, self.source)
    }
}

/// Feed list entry as returned by `/api/search`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoRef {
    pub id: String,
    pub source: String,
    pub title: String,
    pub poster: String,
    pub category: String,
    pub year: Option<String>,
}

impl VideoRef {
    /// Feed entry for an item reached by key alone (a shared link), filled
    /// from its detail when one is at hand.
    pub fn for_key(key: &CacheKey, detail: Option<&VideoDetail>) -> Self {
        Self {
            id: key.id.clone(),
            source: key.source.clone(),
            title: detail.map(|d| d.title.clone()).unwrap_or_default(),
            poster: detail.map(|d| d.poster.clone()).unwrap_or_default(),
            category: detail.map(|d| d.category.clone()).unwrap_or_default(),
            year: None,
        }
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.id.clone(), self.source.clone())
    }
}

#[derive(Deserialize)]
struct RawVideoRef {
    #[serde(deserialize_with = "string_or_number")]
    id: String,
    #[serde(default)]
    source_name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    poster: String,
    #[serde(default)]
    category: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    year: Option<String>,
}

impl<'de> Deserialize<'de> for VideoRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawVideoRef::deserialize(deserializer)?;
        let source = raw
            .source_name
            .filter(|s| !s.trim().is_empty())
            .or(raw.source)
            .unwrap_or_default();
        Ok(VideoRef {
            id: raw.id,
            source,
            title: raw.title,
            poster: raw.poster,
            category: raw.category,
            year: raw.year.filter(|y| !y.trim().is_empty()),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Episode {
    #[serde(default)]
    pub name: String,
    pub url: String,
}

/// Full payload for one playable item, as returned by `/api/detail`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct VideoDetail {
    #[serde(default)]
    pub title: String,
    #[serde(default, alias = "content")]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub poster: String,
    #[serde(default)]
    pub episodes: Vec<Episode>,
}

impl VideoDetail {
    /// A detail without episodes is the residue of a failed fetch and must
    /// never reach the player.
    pub fn is_usable(&self) -> bool {
        self.media().is_some()
    }

    pub fn media(&self) -> Option<MediaSource> {
        self.episodes
            .iter()
            .find(|episode| !episode.url.trim().is_empty())
            .map(|episode| MediaSource::new(episode.url.trim(), &self.title))
    }

    pub fn plain_description(&self) -> String {
        clean_description(&self.description)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Hls,
    Progressive,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSource {
    pub url: String,
    pub label: String,
    pub kind: MediaKind,
}

impl MediaSource {
    pub fn new(url: &str, label: &str) -> Self {
        let lower = url.to_ascii_lowercase();
        let kind = if lower.contains(".m3u8") {
            MediaKind::Hls
        } else if lower.contains(".mp4") {
            MediaKind::Progressive
        } else {
            MediaKind::Other
        };
        Self {
            url: url.replace("&amp;", "&"),
            label: label.trim().to_string(),
            kind,
        }
    }
}

pub type SharedDetail = Arc<VideoDetail>;

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").expect("valid tag regex"));

pub fn clean_description(raw: &str) -> String {
    let stripped = TAG_RE.replace_all(raw, "");
    stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips the reel marker (for example `[电影解说]`) from a title.
pub fn clean_title(title: &str, marker: &str) -> String {
    if marker.is_empty() {
        return title.trim().to_string();
    }
    title
        .replace(&format!("[{marker}]"), "")
        .replace(marker, "")
        .trim()
        .to_string()
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Text(String),
        Int(i64),
        Float(f64),
    }

    Ok(match Id::deserialize(deserializer)? {
        Id::Text(value) => value,
        Id::Int(value) => value.to_string(),
        Id::Float(value) => value.to_string(),
    })
}

fn optional_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Year {
        Text(String),
        Int(i64),
    }

    Ok(match Option::<Year>::deserialize(deserializer)? {
        Some(Year::Text(value)) => Some(value),
        Some(Year::Int(value)) => Some(value.to_string()),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_source_name_over_source() {
        let raw = r#"{"id": 42, "title": "Clip", "source": "fallback", "source_name": "飞飞资源", "year": 2021}"#;
        let video: VideoRef = serde_json::from_str(raw).unwrap();
        assert_eq!(video.id, "42");
        assert_eq!(video.source, "飞飞资源");
        assert_eq!(video.year.as_deref(), Some("2021"));
    }

    #[test]
    fn falls_back_to_source_field() {
        let raw = r#"{"id": "abc", "title": "Clip", "source": "mirror"}"#;
        let video: VideoRef = serde_json::from_str(raw).unwrap();
        assert_eq!(video.key(), CacheKey::new("abc", "mirror"));
        assert!(video.year.is_none());
    }

    #[test]
    fn empty_episode_list_is_not_usable() {
        let detail: VideoDetail = serde_json::from_str(r#"{"title": "x", "episodes": []}"#).unwrap();
        assert!(!detail.is_usable());

        let blank = VideoDetail {
            episodes: vec![Episode {
                name: "1".into(),
                url: "  ".into(),
            }],
            ..VideoDetail::default()
        };
        assert!(!blank.is_usable());
    }

    #[test]
    fn classifies_media_urls() {
        assert_eq!(
            MediaSource::new("https://cdn.test/a/index.m3u8", "a").kind,
            MediaKind::Hls
        );
        assert_eq!(
            MediaSource::new("https://cdn.test/a.MP4?x=1&amp;y=2", "a").kind,
            MediaKind::Progressive
        );
        assert_eq!(
            MediaSource::new("https://cdn.test/a.mp4?x=1&amp;y=2", "a").url,
            "https://cdn.test/a.mp4?x=1&y=2"
        );
        assert_eq!(
            MediaSource::new("https://player.test/embed/1", "a").kind,
            MediaKind::Other
        );
    }

    #[test]
    fn cleans_markup_from_descriptions() {
        assert_eq!(
            clean_description("<p>Two&nbsp;friends</p>\n<br/> travel"),
            "Two friends travel"
        );
    }

    #[test]
    fn strips_reel_marker_from_titles() {
        assert_eq!(clean_title("[电影解说]星际穿越", "电影解说"), "星际穿越");
        assert_eq!(clean_title("星际穿越 电影解说", "电影解说"), "星际穿越");
        assert_eq!(clean_title(" Plain ", ""), "Plain");
    }
}
