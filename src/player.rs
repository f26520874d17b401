use std::fmt;

use anyhow::Result;

use crate::api::FetchError;
use crate::model::{CacheKey, MediaSource, SharedDetail};

/// Creates player instances. Implementations decide what a "player" is
/// (an mpv process in production, a recorder in tests).
pub trait PlayerBackend {
    fn create(&mut self, media: &MediaSource) -> Result<Box<dyn PlayerInstance>>;
}

pub trait PlayerInstance {
    /// False once the instance died underneath us (for example the user
    /// closed the player window).
    fn is_alive(&mut self) -> bool {
        true
    }
    /// Points the live instance at a new source without recreating it.
    fn retarget(&mut self, media: &MediaSource) -> Result<()>;
    /// Stops the current source but keeps the instance for the next item.
    fn stop(&mut self) -> Result<()>;
    fn release(self: Box<Self>) -> Result<()>;
}

/// Where the controller is with its current target. `Loading` has no
/// instance behind it yet, `Switching` keeps the old item on screen until
/// the new detail lands, and `Errored` leaves a stopped instance waiting
/// for a retry or the next switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStatus {
    Idle,
    Loading,
    Playing,
    Switching,
    Errored,
}

impl PlaybackStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PlaybackStatus::Idle => "idle",
            PlaybackStatus::Loading => "loading",
            PlaybackStatus::Playing => "playing",
            PlaybackStatus::Switching => "switching",
            PlaybackStatus::Errored => "error",
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, PlaybackStatus::Loading | PlaybackStatus::Switching)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlaybackError {
    #[error("failed to load video: {0}")]
    Fetch(String),
    #[error("this video has no playable episode")]
    EmptyDetail,
    #[error("player error: {0}")]
    Player(String),
}

impl From<FetchError> for PlaybackError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::EmptyDetail => PlaybackError::EmptyDetail,
            other => PlaybackError::Fetch(other.to_string()),
        }
    }
}

/// A completion for a key that is no longer the target.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stale response for {key}")]
pub struct StaleResponse {
    pub key: CacheKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchOutcome {
    /// The target is already playing; nothing changed.
    Unchanged,
    /// The controller is waiting for the detail of the new target.
    Pending,
}

/// Owns the single player instance: created on the first usable detail,
/// retargeted in place afterwards. Completions are checked against the
/// current target when they arrive, so a slow response for an abandoned
/// key never overwrites a newer switch.
pub struct PlayerController {
    backend: Box<dyn PlayerBackend>,
    instance: Option<Box<dyn PlayerInstance>>,
    status: PlaybackStatus,
    target: Option<CacheKey>,
    detail: Option<SharedDetail>,
    media: Option<MediaSource>,
    error: Option<PlaybackError>,
}

impl PlayerController {
    pub fn new(backend: Box<dyn PlayerBackend>) -> Self {
        Self {
            backend,
            instance: None,
            status: PlaybackStatus::Idle,
            target: None,
            detail: None,
            media: None,
            error: None,
        }
    }

    pub fn status(&self) -> PlaybackStatus {
        self.status
    }

    pub fn target(&self) -> Option<&CacheKey> {
        self.target.as_ref()
    }

    pub fn detail(&self) -> Option<&SharedDetail> {
        self.detail.as_ref()
    }

    pub fn media(&self) -> Option<&MediaSource> {
        self.media.as_ref()
    }

    pub fn error(&self) -> Option<&PlaybackError> {
        self.error.as_ref()
    }

    pub fn has_instance(&self) -> bool {
        self.instance.is_some()
    }

    /// Makes `key` the target. The caller follows up with [`resolve`]
    /// once the detail is known, immediately for cache hits.
    ///
    /// [`resolve`]: PlayerController::resolve
    pub fn switch_to(&mut self, key: CacheKey) -> SwitchOutcome {
        if self.target.as_ref() == Some(&key) && self.status == PlaybackStatus::Playing {
            return SwitchOutcome::Unchanged;
        }
        self.status = match self.status {
            PlaybackStatus::Playing | PlaybackStatus::Switching => PlaybackStatus::Switching,
            PlaybackStatus::Idle | PlaybackStatus::Loading | PlaybackStatus::Errored => {
                PlaybackStatus::Loading
            }
        };
        tracing::debug!(%key, status = self.status.label(), "switching target");
        self.target = Some(key);
        self.error = None;
        SwitchOutcome::Pending
    }

    /// Re-arms the current target after an error. Returns the key to fetch.
    pub fn retry(&mut self) -> Option<CacheKey> {
        if self.status != PlaybackStatus::Errored {
            return None;
        }
        let key = self.target.clone()?;
        self.status = PlaybackStatus::Loading;
        self.error = None;
        tracing::debug!(%key, "retrying");
        Some(key)
    }

    /// Applies the detail (or failure) fetched for `key`.
    pub fn resolve(
        &mut self,
        key: &CacheKey,
        result: Result<SharedDetail, PlaybackError>,
    ) -> Result<PlaybackStatus, StaleResponse> {
        if self.target.as_ref() != Some(key) || !self.status.is_pending() {
            tracing::debug!(%key, "discarding stale response");
            return Err(StaleResponse { key: key.clone() });
        }

        let outcome = result.and_then(|detail| {
            let media = detail.media().ok_or(PlaybackError::EmptyDetail)?;
            self.play(&media)?;
            Ok((detail, media))
        });

        match outcome {
            Ok((detail, media)) => {
                tracing::info!(%key, url = %media.url, "playing");
                self.detail = Some(detail);
                self.media = Some(media);
                self.status = PlaybackStatus::Playing;
            }
            Err(err) => {
                tracing::warn!(%key, error = %err, "playback failed");
                self.halt();
                self.media = None;
                self.detail = None;
                self.error = Some(err);
                self.status = PlaybackStatus::Errored;
            }
        }
        Ok(self.status)
    }

    fn play(&mut self, media: &MediaSource) -> Result<(), PlaybackError> {
        if let Some(mut instance) = self.instance.take() {
            if instance.is_alive() {
                let result = instance.retarget(media);
                self.instance = Some(instance);
                return result.map_err(|err| PlaybackError::Player(format!("{err:#}")));
            }
            tracing::info!("player instance exited, starting a new one");
            if let Err(err) = instance.release() {
                let message = format!("{err:#}");
                tracing::debug!(error = %message, "releasing dead player failed");
            }
        }
        let instance = self
            .backend
            .create(media)
            .map_err(|err| PlaybackError::Player(format!("{err:#}")))?;
        self.instance = Some(instance);
        Ok(())
    }

    // The errored key must not be shadowed by the previous item still looping.
    fn halt(&mut self) {
        let Some(instance) = self.instance.as_mut() else {
            return;
        };
        if !instance.is_alive() {
            return;
        }
        if let Err(err) = instance.stop() {
            let message = format!("{err:#}");
            tracing::debug!(error = %message, "stopping player failed");
        }
    }

    /// Tears the instance down and returns to `Idle`.
    pub fn release(&mut self) {
        if let Some(instance) = self.instance.take() {
            if let Err(err) = instance.release() {
                let message = format!("{err:#}");
                tracing::warn!(error = %message, "player release failed");
            }
        }
        self.status = PlaybackStatus::Idle;
        self.target = None;
        self.detail = None;
        self.media = None;
        self.error = None;
    }
}

impl Drop for PlayerController {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for PlayerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlayerController")
            .field("status", &self.status)
            .field("target", &self.target)
            .field("has_instance", &self.instance.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::sync::Arc;

    use anyhow::anyhow;

    use super::*;
    use crate::model::{Episode, VideoDetail};

    #[derive(Default)]
    struct Log {
        created: Vec<String>,
        retargeted: Vec<String>,
        stopped: usize,
        released: usize,
    }

    struct Recorder {
        log: Rc<RefCell<Log>>,
        fail_create: bool,
    }

    struct Instance {
        log: Rc<RefCell<Log>>,
    }

    impl PlayerBackend for Recorder {
        fn create(&mut self, media: &MediaSource) -> Result<Box<dyn PlayerInstance>> {
            if self.fail_create {
                return Err(anyhow!("mpv missing"));
            }
            self.log.borrow_mut().created.push(media.url.clone());
            Ok(Box::new(Instance {
                log: self.log.clone(),
            }))
        }
    }

    impl PlayerInstance for Instance {
        fn retarget(&mut self, media: &MediaSource) -> Result<()> {
            self.log.borrow_mut().retargeted.push(media.url.clone());
            Ok(())
        }

        fn stop(&mut self) -> Result<()> {
            self.log.borrow_mut().stopped += 1;
            Ok(())
        }

        fn release(self: Box<Self>) -> Result<()> {
            self.log.borrow_mut().released += 1;
            Ok(())
        }
    }

    fn controller() -> (PlayerController, Rc<RefCell<Log>>) {
        let log = Rc::new(RefCell::new(Log::default()));
        let backend = Recorder {
            log: log.clone(),
            fail_create: false,
        };
        (PlayerController::new(Box::new(backend)), log)
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new(id, "s")
    }

    fn detail(id: &str) -> SharedDetail {
        Arc::new(VideoDetail {
            title: id.into(),
            episodes: vec![Episode {
                name: "1".into(),
                url: format!("https://cdn.test/{id}.m3u8"),
            }],
            ..VideoDetail::default()
        })
    }

    #[test]
    fn first_switch_creates_then_retargets() {
        let (mut player, log) = controller();
        player.switch_to(key("a"));
        assert_eq!(player.status(), PlaybackStatus::Loading);
        assert_eq!(
            player.resolve(&key("a"), Ok(detail("a"))),
            Ok(PlaybackStatus::Playing)
        );

        player.switch_to(key("b"));
        assert_eq!(player.status(), PlaybackStatus::Switching);
        player.resolve(&key("b"), Ok(detail("b"))).unwrap();

        let log = log.borrow();
        assert_eq!(log.created, vec!["https://cdn.test/a.m3u8"]);
        assert_eq!(log.retargeted, vec!["https://cdn.test/b.m3u8"]);
    }

    #[test]
    fn late_response_for_abandoned_key_is_stale() {
        let (mut player, log) = controller();
        player.switch_to(key("a"));
        player.switch_to(key("b"));
        player.resolve(&key("b"), Ok(detail("b"))).unwrap();
        assert_eq!(
            player.resolve(&key("a"), Ok(detail("a"))),
            Err(StaleResponse { key: key("a") })
        );
        assert_eq!(player.target(), Some(&key("b")));
        assert_eq!(log.borrow().created, vec!["https://cdn.test/b.m3u8"]);
    }

    #[test]
    fn empty_detail_errors_and_retry_rearms() {
        let (mut player, log) = controller();
        player.switch_to(key("a"));
        let empty = Arc::new(VideoDetail::default());
        assert_eq!(
            player.resolve(&key("a"), Ok(empty)),
            Ok(PlaybackStatus::Errored)
        );
        assert_eq!(player.error(), Some(&PlaybackError::EmptyDetail));
        assert!(player.media().is_none());
        assert!(log.borrow().created.is_empty());

        assert_eq!(player.retry(), Some(key("a")));
        assert_eq!(player.status(), PlaybackStatus::Loading);
        assert_eq!(player.retry(), None);
    }

    #[test]
    fn failed_switch_stops_the_previous_item() {
        let (mut player, log) = controller();
        player.switch_to(key("a"));
        player.resolve(&key("a"), Ok(detail("a"))).unwrap();
        assert_eq!(log.borrow().stopped, 0);

        player.switch_to(key("b"));
        let empty = Arc::new(VideoDetail::default());
        assert_eq!(
            player.resolve(&key("b"), Ok(empty)),
            Ok(PlaybackStatus::Errored)
        );
        assert!(player.has_instance());
        let log = log.borrow();
        assert_eq!(log.stopped, 1);
        assert!(log.retargeted.is_empty());
        assert_eq!(log.released, 0);
    }

    #[test]
    fn switching_to_the_playing_item_is_a_no_op() {
        let (mut player, _log) = controller();
        player.switch_to(key("a"));
        player.resolve(&key("a"), Ok(detail("a"))).unwrap();
        assert_eq!(player.switch_to(key("a")), SwitchOutcome::Unchanged);
        assert_eq!(player.status(), PlaybackStatus::Playing);
    }

    #[test]
    fn backend_failure_surfaces_as_error() {
        let log = Rc::new(RefCell::new(Log::default()));
        let mut player = PlayerController::new(Box::new(Recorder {
            log,
            fail_create: true,
        }));
        player.switch_to(key("a"));
        player.resolve(&key("a"), Ok(detail("a"))).unwrap();
        assert!(matches!(player.error(), Some(PlaybackError::Player(_))));
        assert!(!player.has_instance());
    }

    #[test]
    fn release_tears_down_the_instance_once() {
        let (mut player, log) = controller();
        player.switch_to(key("a"));
        player.resolve(&key("a"), Ok(detail("a"))).unwrap();
        player.release();
        assert_eq!(player.status(), PlaybackStatus::Idle);
        drop(player);
        assert_eq!(log.borrow().released, 1);
    }
}
