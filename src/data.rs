use std::sync::Arc;

use crate::api::{self, FetchError, SearchQuery};
use crate::model::{CacheKey, VideoDetail, VideoRef};

/// The two backend operations the feed consumes.
pub trait DetailService: Send + Sync {
    fn search(&self, query: &SearchQuery) -> Result<Vec<VideoRef>, FetchError>;
    fn detail(&self, key: &CacheKey) -> Result<VideoDetail, FetchError>;
}

pub struct ApiDetailService {
    client: Arc<api::Client>,
}

impl ApiDetailService {
    pub fn new(client: Arc<api::Client>) -> Self {
        Self { client }
    }
}

impl DetailService for ApiDetailService {
    fn search(&self, query: &SearchQuery) -> Result<Vec<VideoRef>, FetchError> {
        self.client.search(query)
    }

    fn detail(&self, key: &CacheKey) -> Result<VideoDetail, FetchError> {
        self.client.detail(key)
    }
}

/// Picks the first search hit that is not itself a reel: neither its title
/// nor its category carries the reel marker.
pub fn find_full_feature<'a>(results: &'a [VideoRef], marker: &str) -> Option<&'a VideoRef> {
    results.iter().find(|item| {
        marker.is_empty() || (!item.category.contains(marker) && !item.title.contains(marker))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, title: &str, category: &str) -> VideoRef {
        VideoRef {
            id: id.into(),
            source: "ff".into(),
            title: title.into(),
            poster: String::new(),
            category: category.into(),
            year: None,
        }
    }

    #[test]
    fn skips_reels_when_looking_for_the_full_feature() {
        let results = vec![
            item("1", "[电影解说]星际穿越", "电影解说"),
            item("2", "星际穿越", "解说"),
            item("3", "星际穿越", "科幻片"),
        ];
        assert_eq!(find_full_feature(&results, "解说").map(|v| v.id.as_str()), Some("3"));
        assert!(find_full_feature(&results[..2], "解说").is_none());
    }
}
