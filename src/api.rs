use std::time::Duration;

use reqwest::blocking::Client as HttpClient;
use reqwest::header::{ACCEPT, USER_AGENT};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::model::{CacheKey, VideoDetail, VideoRef};

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Failure(String),
    #[error("{0} not found")]
    NotFound(CacheKey),
    #[error("no playable episode")]
    EmptyDetail,
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Failure(err.to_string())
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    pub base_url: String,
    pub user_agent: String,
    pub timeout: Option<Duration>,
    pub http_client: Option<HttpClient>,
}

/// Parameters of one `/api/search` call. Empty fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchQuery {
    pub category: Option<String>,
    pub query: Option<String>,
    pub page: Option<u32>,
}

impl SearchQuery {
    pub fn category(category: impl Into<String>, page: u32) -> Self {
        Self {
            category: Some(category.into()),
            query: None,
            page: Some(page),
        }
    }

    pub fn text(query: impl Into<String>) -> Self {
        Self {
            category: None,
            query: Some(query.into()),
            page: None,
        }
    }
}

pub struct Client {
    http: HttpClient,
    user_agent: String,
    base_url: Url,
}

impl Client {
    pub fn new(config: ClientConfig) -> anyhow::Result<Self> {
        if config.user_agent.trim().is_empty() {
            anyhow::bail!("api client user agent required");
        }
        let raw_base = if config.base_url.trim().is_empty() {
            DEFAULT_API_BASE
        } else {
            config.base_url.trim()
        };
        let base_url = Url::parse(raw_base)
            .map_err(|err| anyhow::anyhow!("invalid api base url {raw_base:?}: {err}"))?;

        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder()
                .timeout(config.timeout.unwrap_or(Duration::from_secs(10)))
                .build()?,
        };

        Ok(Client {
            http,
            user_agent: config.user_agent,
            base_url,
        })
    }

    pub fn search(&self, query: &SearchQuery) -> Result<Vec<VideoRef>, FetchError> {
        let mut url = self.endpoint("api/search")?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(category) = query.category.as_deref().filter(|c| !c.is_empty()) {
                pairs.append_pair("t", category);
            }
            if let Some(text) = query.query.as_deref().filter(|q| !q.is_empty()) {
                pairs.append_pair("q", text);
            }
            if let Some(page) = query.page {
                pairs.append_pair("pg", &page.to_string());
            }
        }
        match self.get_json::<Envelope<Vec<VideoRef>>>(url)? {
            Envelope::Ok(items) => Ok(items),
            Envelope::Err { error } => Err(FetchError::Failure(error)),
            Envelope::Null => Ok(Vec::new()),
        }
    }

    pub fn detail(&self, key: &CacheKey) -> Result<VideoDetail, FetchError> {
        let mut url = self.endpoint("api/detail")?;
        url.query_pairs_mut()
            .append_pair("id", &key.id)
            .append_pair("src", &key.source);
        match self.get_json::<Envelope<VideoDetail>>(url)? {
            Envelope::Ok(detail) => Ok(detail),
            Envelope::Err { error } => Err(FetchError::Failure(error)),
            Envelope::Null => Err(FetchError::NotFound(key.clone())),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|err| FetchError::Failure(format!("build {path} url: {err}")))
    }

    fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchError> {
        tracing::debug!(%url, "api request");
        let response = self
            .http
            .get(url)
            .header(USER_AGENT, &self.user_agent)
            .header(ACCEPT, "application/json")
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|err| err.error)
                .unwrap_or(body);
            return Err(FetchError::Failure(format!("{status}: {}", message.trim())));
        }

        let body = response.text()?;
        decode(&body)
    }
}

fn decode<T: DeserializeOwned>(body: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|err| FetchError::Failure(format!("decode response: {err}")))
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Err { error: String },
    Ok(T),
    Null,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_search_results() {
        let body = r#"[
            {"id": "1", "title": "[电影解说]A", "poster": "p", "category": "电影解说", "source_name": "ff"},
            {"id": 2, "title": "B", "category": "剧情片", "source": "hn"}
        ]"#;
        let Envelope::Ok(items) = decode::<Envelope<Vec<VideoRef>>>(body).unwrap() else {
            panic!("expected items");
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].key(), CacheKey::new("2", "hn"));
    }

    #[test]
    fn decodes_error_objects() {
        let decoded = decode::<Envelope<VideoDetail>>(r#"{"error": "Fetch detail failed"}"#).unwrap();
        assert!(matches!(decoded, Envelope::Err { error } if error == "Fetch detail failed"));
    }

    #[test]
    fn decodes_null_detail() {
        let decoded = decode::<Envelope<VideoDetail>>("null").unwrap();
        assert!(matches!(decoded, Envelope::Null));
    }

    #[test]
    fn decodes_detail_payload() {
        let body = r#"{"title": "A", "category": "解说", "episodes": [{"name": "正片", "url": "https://cdn.test/a.m3u8"}]}"#;
        let Envelope::Ok(detail) = decode::<Envelope<VideoDetail>>(body).unwrap() else {
            panic!("expected detail");
        };
        assert!(detail.is_usable());
    }

    #[test]
    fn builds_endpoints_under_base_path() {
        let client = Client::new(ClientConfig {
            base_url: "http://backend.test/proxy".into(),
            user_agent: "reels-tui/test".into(),
            ..ClientConfig::default()
        })
        .unwrap();
        let url = client.endpoint("api/detail").unwrap();
        assert_eq!(url.as_str(), "http://backend.test/proxy/api/detail");
    }

    #[test]
    fn requires_user_agent() {
        assert!(Client::new(ClientConfig::default()).is_err());
    }
}
