#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use reels_tui::api::{FetchError, SearchQuery};
use reels_tui::config::Config;
use reels_tui::data::DetailService;
use reels_tui::feed::{Feed, FeedOptions};
use reels_tui::model::{CacheKey, Episode, MediaSource, VideoDetail, VideoRef};
use reels_tui::player::{PlayerBackend, PlayerInstance};
use reels_tui::view::LayoutKind;

pub const SOURCE: &str = "src";
pub const WAIT: Duration = Duration::from_secs(5);

pub fn video(id: &str) -> VideoRef {
    VideoRef {
        id: id.to_string(),
        source: SOURCE.to_string(),
        title: format!("[电影解说]{id}"),
        poster: String::new(),
        category: "解说".to_string(),
        year: Some("2024".to_string()),
    }
}

pub fn key(id: &str) -> CacheKey {
    CacheKey::new(id, SOURCE)
}

pub fn media_url(id: &str) -> String {
    format!("https://cdn.test/{id}/index.m3u8")
}

pub enum Reply {
    Fail(String),
    Empty,
}

/// In-memory backend with per-key call counts, scripted failures and
/// gates that hold a detail call until the test releases it.
#[derive(Default)]
pub struct ScriptedService {
    batch: Mutex<Vec<VideoRef>>,
    text_results: Mutex<Vec<VideoRef>>,
    replies: Mutex<HashMap<CacheKey, VecDeque<Reply>>>,
    gates: Mutex<HashMap<CacheKey, Receiver<()>>>,
    calls: Mutex<HashMap<CacheKey, usize>>,
    searches: Mutex<Vec<SearchQuery>>,
}

impl ScriptedService {
    pub fn with_batch(ids: &[&str]) -> Arc<Self> {
        let service = Self::default();
        service.set_batch(ids);
        Arc::new(service)
    }

    pub fn set_batch(&self, ids: &[&str]) {
        *self.batch.lock() = ids.iter().map(|id| video(id)).collect();
    }

    pub fn set_text_results(&self, results: Vec<VideoRef>) {
        *self.text_results.lock() = results;
    }

    pub fn script(&self, id: &str, reply: Reply) {
        self.replies.lock().entry(key(id)).or_default().push_back(reply);
    }

    /// The next detail call for `id` blocks until the returned sender
    /// fires (or is dropped).
    pub fn gate(&self, id: &str) -> Sender<()> {
        let (tx, rx) = bounded(1);
        self.gates.lock().insert(key(id), rx);
        tx
    }

    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().get(&key(id)).copied().unwrap_or(0)
    }

    pub fn searches(&self) -> Vec<SearchQuery> {
        self.searches.lock().clone()
    }
}

impl DetailService for ScriptedService {
    fn search(&self, query: &SearchQuery) -> Result<Vec<VideoRef>, FetchError> {
        self.searches.lock().push(query.clone());
        if query.query.is_some() {
            return Ok(self.text_results.lock().clone());
        }
        Ok(self.batch.lock().clone())
    }

    fn detail(&self, key: &CacheKey) -> Result<VideoDetail, FetchError> {
        *self.calls.lock().entry(key.clone()).or_default() += 1;
        let gate = self.gates.lock().remove(key);
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        // Details mirror the listing the key came from, like the real backend.
        let listed = self
            .batch
            .lock()
            .iter()
            .chain(self.text_results.lock().iter())
            .find(|video| &video.key() == key)
            .cloned();
        let (title, category) = match listed {
            Some(video) => (video.title, video.category),
            None => (format!("[电影解说]{}", key.id), "解说".to_string()),
        };
        let reply = self
            .replies
            .lock()
            .get_mut(key)
            .and_then(|queue| queue.pop_front());
        match reply {
            Some(Reply::Fail(message)) => Err(FetchError::Failure(message)),
            Some(Reply::Empty) => Ok(VideoDetail {
                title: key.id.clone(),
                ..VideoDetail::default()
            }),
            None => Ok(VideoDetail {
                title,
                description: format!("<p>About&nbsp;{}</p>", key.id),
                category,
                poster: String::new(),
                episodes: vec![Episode {
                    name: "正片".to_string(),
                    url: media_url(&key.id),
                }],
            }),
        }
    }
}

#[derive(Debug, Default)]
pub struct Recording {
    pub created: usize,
    pub retargeted: usize,
    pub stopped: usize,
    pub released: usize,
    pub urls: Vec<String>,
}

/// Player backend that records what it was asked to do.
#[derive(Clone, Default)]
pub struct RecordingBackend {
    log: Arc<Mutex<Recording>>,
}

impl RecordingBackend {
    pub fn log(&self) -> Arc<Mutex<Recording>> {
        self.log.clone()
    }
}

struct RecordingInstance {
    log: Arc<Mutex<Recording>>,
}

impl PlayerBackend for RecordingBackend {
    fn create(&mut self, media: &MediaSource) -> anyhow::Result<Box<dyn PlayerInstance>> {
        let mut log = self.log.lock();
        log.created += 1;
        log.urls.push(media.url.clone());
        Ok(Box::new(RecordingInstance {
            log: self.log.clone(),
        }))
    }
}

impl PlayerInstance for RecordingInstance {
    fn retarget(&mut self, media: &MediaSource) -> anyhow::Result<()> {
        let mut log = self.log.lock();
        log.retargeted += 1;
        log.urls.push(media.url.clone());
        Ok(())
    }

    fn stop(&mut self) -> anyhow::Result<()> {
        self.log.lock().stopped += 1;
        Ok(())
    }

    fn release(self: Box<Self>) -> anyhow::Result<()> {
        self.log.lock().released += 1;
        Ok(())
    }
}

/// Defaults for tests: no prefetching, no full-feature lookups, a single
/// batch page.
pub fn quiet_config() -> Config {
    let mut cfg = Config::default();
    cfg.prefetch.batch_head = 0;
    cfg.prefetch.ahead = 0;
    cfg.prefetch.behind = 0;
    cfg.feed.full_feature = false;
    cfg.feed.random_pages = 1;
    cfg
}

pub fn feed(
    service: Arc<ScriptedService>,
    config: Config,
    layout: LayoutKind,
) -> (Feed, Arc<Mutex<Recording>>) {
    let backend = RecordingBackend::default();
    let log = backend.log();
    let feed = Feed::new(FeedOptions {
        service,
        backend: Box::new(backend),
        config,
        layout,
    });
    (feed, log)
}

pub fn wait_until(feed: &mut Feed, mut done: impl FnMut(&Feed) -> bool) -> bool {
    let deadline = Instant::now() + WAIT;
    while Instant::now() < deadline {
        feed.poll();
        if done(&*feed) {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}
