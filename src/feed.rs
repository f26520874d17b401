use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use rand::Rng;
use ratatui::layout::Rect;
use ratatui::Frame;

use crate::api::{FetchError, SearchQuery};
use crate::cache::DetailCache;
use crate::config::{Config, FeedConfig};
use crate::data::{find_full_feature, DetailService};
use crate::fetch::{Completion, DetailLoader, FetchOutcome, Origin, Request};
use crate::model::{clean_title, CacheKey, SharedDetail, VideoRef};
use crate::player::{
    PlaybackError, PlaybackStatus, PlayerBackend, PlayerController, SwitchOutcome,
};
use crate::prefetch::{PrefetchPolicy, Prefetcher};
use crate::route::{Location, RouteResolver};
use crate::view::{self, FeedState, FeedView, LayoutKind};

pub struct FeedOptions {
    pub service: Arc<dyn DetailService>,
    pub backend: Box<dyn PlayerBackend>,
    pub config: Config,
    pub layout: LayoutKind,
}

struct PendingRequest {
    request_id: u64,
    cancel_flag: Arc<AtomicBool>,
}

impl PendingRequest {
    fn cancel(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
    }
}

enum AsyncResponse {
    Batch {
        request_id: u64,
        /// Asked for by the user rather than by mounting the feed.
        refresh: bool,
        result: Result<Vec<VideoRef>, FetchError>,
    },
    FullFeature {
        request_id: u64,
        key: CacheKey,
        result: Result<Option<VideoRef>, FetchError>,
    },
}

/// Owns every piece of feed state and is driven from one thread. Background
/// work reports back over channels drained by [`Feed::poll`]. Navigation
/// always goes through the [`RouteResolver`], whose resolved key decides
/// what plays.
pub struct Feed {
    settings: FeedConfig,
    service: Arc<dyn DetailService>,
    route: RouteResolver,
    route_tx: Sender<Option<CacheKey>>,
    route_rx: Receiver<Option<CacheKey>>,
    cache: DetailCache,
    loader: DetailLoader,
    prefetcher: Prefetcher,
    player: PlayerController,
    view: Box<dyn FeedView>,
    batch: Vec<VideoRef>,
    sidebar: Vec<usize>,
    active: Option<CacheKey>,
    full_feature: Option<(CacheKey, VideoRef)>,
    response_tx: Sender<AsyncResponse>,
    response_rx: Receiver<AsyncResponse>,
    next_request_id: u64,
    pending_batch: Option<PendingRequest>,
    pending_feature: Option<PendingRequest>,
    status_message: String,
    switches: usize,
}

impl Feed {
    pub fn new(options: FeedOptions) -> Self {
        let FeedOptions {
            service,
            backend,
            config,
            layout,
        } = options;

        let cache = match config.cache.max_entries {
            Some(max) => DetailCache::bounded(max),
            None => DetailCache::new(),
        };
        let loader = DetailLoader::new(service.clone(), cache.clone(), config.fetch.workers);
        let prefetcher = Prefetcher::new(
            cache.clone(),
            PrefetchPolicy {
                batch_head: config.prefetch.batch_head,
                ahead: config.prefetch.ahead,
                behind: config.prefetch.behind,
            },
        );
        let (route_tx, route_rx) = unbounded();
        let (response_tx, response_rx) = unbounded();

        Self {
            settings: config.feed,
            service,
            route: RouteResolver::new(Location::root()),
            route_tx,
            route_rx,
            cache,
            loader,
            prefetcher,
            player: PlayerController::new(backend),
            view: view::for_layout(layout, config.scroll.settle, config.scroll.step_rows),
            batch: Vec::new(),
            sidebar: Vec::new(),
            active: None,
            full_feature: None,
            response_tx,
            response_rx,
            next_request_id: 1,
            pending_batch: None,
            pending_feature: None,
            status_message: String::new(),
            switches: 0,
        }
    }

    /// Starts the feed at `location` and loads the first recommendation
    /// batch. An unresolvable location adopts the batch's first entry.
    pub fn mount(&mut self, location: Location) {
        tracing::info!(%location, layout = ?self.view.kind(), "mounting feed");
        self.route = RouteResolver::new(location);
        let tx = self.route_tx.clone();
        self.route.on_change(move |key| {
            let _ = tx.send(key.cloned());
        });
        self.request_batch(false);
        self.route.mount();
        self.drain_route();
    }

    /// Unmounts: stops background work, tears the player down and drops
    /// everything cached.
    pub fn release(&mut self) {
        if let Some(pending) = self.pending_batch.take() {
            pending.cancel();
        }
        if let Some(pending) = self.pending_feature.take() {
            pending.cancel();
        }
        self.loader.cancel_queued(|_| false);
        self.player.release();
        self.cache.clear();
        self.batch.clear();
        self.sidebar.clear();
        self.active = None;
        self.full_feature = None;
        self.view.set_len(0);
        tracing::info!("feed released");
    }

    pub fn select(&mut self, index: usize) -> bool {
        let Some(video) = self.batch.get(index) else {
            return false;
        };
        let location = Location::for_video(video);
        self.route.push(location);
        self.drain_route();
        true
    }

    pub fn back(&mut self) -> bool {
        let moved = self.route.back();
        self.drain_route();
        moved
    }

    pub fn forward(&mut self) -> bool {
        let moved = self.route.forward();
        self.drain_route();
        moved
    }

    /// Loads a fresh random batch ("换一批").
    pub fn refresh_batch(&mut self) {
        self.request_batch(true);
    }

    pub fn retry(&mut self) -> bool {
        let Some(key) = self.player.retry() else {
            return false;
        };
        self.status_message = format!("Retrying {key}...");
        if let Request::Cached(detail) = self.loader.request(&key, Origin::Foreground) {
            self.resolve(&key, Ok(detail));
        }
        true
    }

    pub fn play_full_feature(&mut self) -> bool {
        let Some((_, video)) = self.full_feature.clone() else {
            return false;
        };
        tracing::info!(key = %video.key(), "switching to full feature");
        self.route.push(Location::for_video(&video));
        self.drain_route();
        true
    }

    /// Opens the current stream in the system browser.
    pub fn open_external(&mut self) -> Result<bool> {
        let Some(media) = self.player.media() else {
            return Ok(false);
        };
        let url = media.url.clone();
        webbrowser::open(&url).with_context(|| format!("open {url}"))?;
        self.status_message = format!("Opened {url}");
        Ok(true)
    }

    pub fn scroll(&mut self, steps: i32, now: Instant) {
        self.view.scroll(steps, now, &self.sidebar);
    }

    /// Switches to the entry under the view's cursor, if it has one.
    pub fn confirm(&mut self) -> bool {
        match self.view.confirm(&self.sidebar) {
            Some(index) => self.select(index),
            None => false,
        }
    }

    pub fn click(&mut self, column: u16, row: u16) -> bool {
        match self.view.click(column, row, &self.sidebar) {
            Some(index) => self.select(index),
            None => false,
        }
    }

    /// Drives time-based view behaviour. Returns whether a switch happened.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.view.settle(now) {
            Some(index) => self.select(index),
            None => false,
        }
    }

    pub fn resize(&mut self, area: Rect) {
        self.view.resize(area);
    }

    /// Applies every finished background result. Returns whether anything
    /// changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(outcome) = self.loader.outcomes().try_recv() {
            self.apply_outcome(outcome);
            changed = true;
        }
        while let Ok(response) = self.response_rx.try_recv() {
            self.handle_async_response(response);
            changed = true;
        }
        changed
    }

    /// Blocks until no fetch, batch or lookup is outstanding, or `timeout`
    /// passes. Returns whether the feed went idle.
    pub fn wait_idle(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let outcomes = self.loader.outcomes().clone();
        let responses = self.response_rx.clone();
        loop {
            self.poll();
            if self.is_idle() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            select! {
                recv(outcomes) -> message => {
                    if let Ok(outcome) = message {
                        self.apply_outcome(outcome);
                    }
                }
                recv(responses) -> message => {
                    if let Ok(response) = message {
                        self.handle_async_response(response);
                    }
                }
                default(deadline - now) => {}
            }
        }
    }

    pub fn is_idle(&self) -> bool {
        self.loader.in_flight_len() == 0
            && self.pending_batch.is_none()
            && self.pending_feature.is_none()
            && self.route_rx.is_empty()
    }

    pub fn render(&self, frame: &mut Frame, area: Rect) {
        let state = FeedState {
            batch: &self.batch,
            active: self.active.as_ref(),
            active_index: self.active.as_ref().and_then(|key| self.index_of(key)),
            sidebar: &self.sidebar,
            player: &self.player,
            location: self.route.current(),
            status: &self.status_message,
            full_feature: self.full_feature.as_ref().map(|(_, video)| video),
            title_marker: &self.settings.title_marker,
            loading_batch: self.pending_batch.is_some(),
        };
        self.view.render(frame, area, &state);
    }

    pub fn layout(&self) -> LayoutKind {
        self.view.kind()
    }

    pub fn location(&self) -> &Location {
        self.route.current()
    }

    pub fn route(&self) -> &RouteResolver {
        &self.route
    }

    pub fn batch(&self) -> &[VideoRef] {
        &self.batch
    }

    /// Batch indices shown as recommendations: the batch minus the active
    /// item, capped at `feed.sidebar_size`.
    pub fn sidebar(&self) -> &[usize] {
        &self.sidebar
    }

    pub fn active(&self) -> Option<&CacheKey> {
        self.active.as_ref()
    }

    pub fn player(&self) -> &PlayerController {
        &self.player
    }

    pub fn cache(&self) -> &DetailCache {
        &self.cache
    }

    pub fn full_feature(&self) -> Option<&VideoRef> {
        self.full_feature.as_ref().map(|(_, video)| video)
    }

    pub fn status_message(&self) -> &str {
        &self.status_message
    }

    pub fn set_status(&mut self, message: impl Into<String>) {
        self.status_message = message.into();
    }

    /// Number of times the player was asked to change target.
    pub fn switches(&self) -> usize {
        self.switches
    }

    pub fn is_loading(&self) -> bool {
        self.pending_batch.is_some() || self.player.status().is_pending()
    }

    fn drain_route(&mut self) {
        while let Ok(key) = self.route_rx.try_recv() {
            match key {
                Some(key) => self.activate(key),
                None => self.adopt_first(),
            }
        }
    }

    fn adopt_first(&mut self) {
        self.active = None;
        self.refresh_sidebar();
        if let Some(first) = self.batch.first() {
            tracing::debug!(key = %first.key(), "no video in location, starting with first entry");
            let location = Location::for_video(first);
            self.route.replace(location);
        } else if self.pending_batch.is_none() {
            // Re-requesting here would spin on a search that keeps coming
            // back empty; another batch is the user's call.
            self.status_message = "No reels loaded. Press n for a new batch.".to_string();
        }
    }

    fn activate(&mut self, key: CacheKey) {
        if self
            .full_feature
            .as_ref()
            .is_some_and(|(for_key, _)| for_key != &key)
        {
            self.full_feature = None;
        }
        self.active = Some(key.clone());
        let index = self.index_of(&key);
        self.view.switch_to(index);
        self.refresh_sidebar();

        if let SwitchOutcome::Pending = self.player.switch_to(key.clone()) {
            self.switches += 1;
            if let Some(pending) = self.pending_feature.take() {
                pending.cancel();
            }
            self.status_message = format!("Loading {key}...");
            if let Request::Cached(detail) = self.loader.request(&key, Origin::Foreground) {
                self.resolve(&key, Ok(detail));
            }
        }

        if let Some(index) = index {
            let keys = self.prefetcher.neighbours(&self.batch, index);
            self.prefetcher.schedule(&mut self.loader, &keys);
        }
    }

    fn apply_outcome(&mut self, outcome: FetchOutcome) {
        let Some(completion) = self.loader.complete(outcome) else {
            return;
        };
        let Completion {
            key,
            foreground,
            result,
        } = completion;
        if foreground {
            self.resolve(&key, result.map_err(PlaybackError::from));
        } else if let Err(err) = result {
            tracing::debug!(%key, error = %err, "prefetch failed");
        }
    }

    fn resolve(&mut self, key: &CacheKey, result: Result<SharedDetail, PlaybackError>) {
        match self.player.resolve(key, result) {
            Ok(PlaybackStatus::Playing) => {
                self.fill_entry(key);
                let title = self
                    .player
                    .detail()
                    .map(|detail| clean_title(&detail.title, &self.settings.title_marker))
                    .unwrap_or_default();
                self.status_message = format!("Playing {title}");
                self.request_full_feature(key);
            }
            Ok(PlaybackStatus::Errored) => {
                let reason = self
                    .player
                    .error()
                    .map(ToString::to_string)
                    .unwrap_or_default();
                self.status_message = format!("Playback failed: {reason}. Press r to retry.");
            }
            Ok(_) => {}
            Err(stale) => {
                tracing::trace!(key = %stale.key, "stale detail ignored");
            }
        }
    }

    fn request_batch(&mut self, refresh: bool) {
        if let Some(pending) = self.pending_batch.take() {
            pending.cancel();
        }
        let pages = self.settings.random_pages.max(1);
        let page = rand::thread_rng().gen_range(1..=pages);
        let request_id = self.next_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_batch = Some(PendingRequest {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });
        self.status_message = "Loading recommendations...".to_string();

        let query = SearchQuery::category(self.settings.category.clone(), page);
        let service = self.service.clone();
        let tx = self.response_tx.clone();
        tracing::debug!(page, request_id, refresh, "requesting batch");
        thread::spawn(move || {
            let result = service.search(&query);
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::Batch {
                request_id,
                refresh,
                result,
            });
        });
    }

    fn fill_entry(&mut self, key: &CacheKey) {
        let Some(detail) = self.player.detail().cloned() else {
            return;
        };
        let Some(entry) = self.index_of(key).and_then(|index| self.batch.get_mut(index)) else {
            return;
        };
        if entry.title.is_empty() {
            *entry = VideoRef::for_key(key, Some(&*detail));
        }
    }

    fn request_full_feature(&mut self, key: &CacheKey) {
        if !self.settings.full_feature {
            return;
        }
        if self
            .full_feature
            .as_ref()
            .is_some_and(|(for_key, _)| for_key == key)
        {
            return;
        }
        let Some(detail) = self.player.detail() else {
            return;
        };
        // Only reels have a full feature; a full feature must not look up itself.
        let marker = &self.settings.reel_marker;
        if marker.is_empty() || !(detail.category.contains(marker) || detail.title.contains(marker))
        {
            return;
        }
        let title = clean_title(&detail.title, &self.settings.title_marker);
        if title.is_empty() {
            return;
        }
        if let Some(pending) = self.pending_feature.take() {
            pending.cancel();
        }
        let request_id = self.next_request_id();
        let cancel_flag = Arc::new(AtomicBool::new(false));
        self.pending_feature = Some(PendingRequest {
            request_id,
            cancel_flag: cancel_flag.clone(),
        });

        let service = self.service.clone();
        let tx = self.response_tx.clone();
        let marker = self.settings.reel_marker.clone();
        let key = key.clone();
        thread::spawn(move || {
            let result = service
                .search(&SearchQuery::text(title))
                .map(|results| find_full_feature(&results, &marker).cloned());
            if cancel_flag.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(AsyncResponse::FullFeature {
                request_id,
                key,
                result,
            });
        });
    }

    fn handle_async_response(&mut self, message: AsyncResponse) {
        match message {
            AsyncResponse::Batch {
                request_id,
                refresh,
                result,
            } => {
                let Some(pending) = &self.pending_batch else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) || pending.request_id != request_id
                {
                    return;
                }
                self.pending_batch = None;
                match result {
                    Ok(items) => self.apply_batch(items, refresh),
                    Err(err) => {
                        tracing::warn!(error = %err, "batch request failed");
                        self.status_message = format!("Failed to load recommendations: {err}");
                    }
                }
            }
            AsyncResponse::FullFeature {
                request_id,
                key,
                result,
            } => {
                let Some(pending) = &self.pending_feature else {
                    return;
                };
                if pending.cancel_flag.load(Ordering::SeqCst) || pending.request_id != request_id
                {
                    return;
                }
                self.pending_feature = None;
                if self.active.as_ref() != Some(&key) {
                    return;
                }
                match result {
                    Ok(Some(video)) if video.key() != key => {
                        tracing::debug!(%key, feature = %video.key(), "full feature found");
                        self.full_feature = Some((key, video));
                    }
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(%key, error = %err, "full feature lookup failed");
                    }
                }
            }
        }
    }

    fn apply_batch(&mut self, mut items: Vec<VideoRef>, refresh: bool) {
        // A deep-linked reel leads the one-item-per-screen feed, with the
        // recommendations after it.
        if let Some(key) = self.active.clone() {
            let mobile = self.view.kind() == LayoutKind::Mobile;
            if mobile && !refresh && !items.iter().any(|video| video.key() == key) {
                let entry = VideoRef::for_key(&key, self.cache.get(&key).as_deref());
                items.insert(0, entry);
            }
        }
        items.truncate(self.settings.batch_size);
        tracing::info!(count = items.len(), "batch loaded");
        self.batch = items;
        self.prefetcher.cancel_stale(&mut self.loader, &self.batch);
        self.view.set_len(self.batch.len());
        self.status_message = format!("Loaded {} reels", self.batch.len());

        let head = self.prefetcher.batch_head(&self.batch);
        self.prefetcher.schedule(&mut self.loader, &head);

        match self.active.clone() {
            Some(key) => {
                let index = self.index_of(&key);
                self.view.switch_to(index);
                self.refresh_sidebar();
                match index {
                    Some(index) => {
                        let keys = self.prefetcher.neighbours(&self.batch, index);
                        self.prefetcher.schedule(&mut self.loader, &keys);
                    }
                    // The one-item-per-screen feed must show what plays.
                    None if refresh && self.view.kind() == LayoutKind::Mobile => {
                        self.select(0);
                    }
                    None => {}
                }
            }
            None => {
                self.adopt_first();
                self.drain_route();
            }
        }
    }

    fn refresh_sidebar(&mut self) {
        let active = self.active.as_ref();
        self.sidebar = self
            .batch
            .iter()
            .enumerate()
            .filter(|(_, video)| active != Some(&video.key()))
            .map(|(index, _)| index)
            .take(self.settings.sidebar_size)
            .collect();
    }

    fn index_of(&self, key: &CacheKey) -> Option<usize> {
        self.batch.iter().position(|video| &video.key() == key)
    }

    fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

impl std::fmt::Debug for Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed")
            .field("route", &self.route)
            .field("active", &self.active)
            .field("batch", &self.batch.len())
            .field("player", &self.player)
            .finish()
    }
}
