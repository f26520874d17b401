use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, NON_ALPHANUMERIC};
use url::Url;

use crate::model::{CacheKey, VideoRef};

const LOCATION_BASE: &str = "http://reels.local";
const REELS_PREFIX: &str = "/reels";

/// A path plus query, the part of a URL the resolver cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location(String);

impl Location {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn root() -> Self {
        Self(REELS_PREFIX.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical slug location for a feed entry.
    pub fn for_video(video: &VideoRef) -> Self {
        Self::for_key(&video.title, &video.key())
    }

    pub fn for_key(title: &str, key: &CacheKey) -> Self {
        let slug_text = if title.trim().is_empty() {
            key.id.clone()
        } else {
            format!("{}-{}", title.trim(), key.id)
        };
        let slug = utf8_percent_encode(&slug_text, NON_ALPHANUMERIC);
        let source = utf8_percent_encode(&key.source, NON_ALPHANUMERIC);
        Self(format!("{REELS_PREFIX}/{slug}?src={source}"))
    }

    /// Extracts `(id, source)`; anything malformed is unresolved.
    pub fn resolve(&self) -> Option<CacheKey> {
        let base = Url::parse(LOCATION_BASE).ok()?;
        let url = base.join(self.0.trim()).ok()?;

        let mut id = None;
        let mut source = None;
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "id" => id = Some(value.into_owned()),
                "src" => source = Some(value.into_owned()),
                "source" if source.is_none() => source = Some(value.into_owned()),
                _ => {}
            }
        }

        let path = url.path().trim_end_matches('/');
        let id = if path == REELS_PREFIX {
            id?
        } else {
            let slug = path.strip_prefix(REELS_PREFIX)?.strip_prefix('/')?;
            if slug.contains('/') {
                return None;
            }
            let decoded = percent_decode_str(slug).decode_utf8().ok()?;
            decoded.rsplit('-').next()?.to_string()
        };

        let id = id.trim();
        let source = source?;
        let source = source.trim();
        if id.is_empty() || source.is_empty() {
            return None;
        }
        Some(CacheKey::new(id, source))
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Listener = Box<dyn FnMut(Option<&CacheKey>)>;

/// History stack with change notification. Its resolved [`CacheKey`] is
/// what plays; switching items moves through history and reloads nothing.
pub struct RouteResolver {
    entries: Vec<Location>,
    cursor: usize,
    last_emitted: Option<Option<CacheKey>>,
    listeners: Vec<Listener>,
}

impl RouteResolver {
    pub fn new(initial: Location) -> Self {
        Self {
            entries: vec![initial],
            cursor: 0,
            last_emitted: None,
            listeners: Vec::new(),
        }
    }

    pub fn current(&self) -> &Location {
        &self.entries[self.cursor]
    }

    pub fn resolve(&self) -> Option<CacheKey> {
        self.current().resolve()
    }

    pub fn on_change(&mut self, listener: impl FnMut(Option<&CacheKey>) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    /// Emits the initial location to listeners.
    pub fn mount(&mut self) {
        self.notify();
    }

    pub fn push(&mut self, location: Location) {
        if self.current() == &location {
            return;
        }
        self.entries.truncate(self.cursor + 1);
        self.entries.push(location);
        self.cursor = self.entries.len() - 1;
        self.notify();
    }

    pub fn replace(&mut self, location: Location) {
        self.entries[self.cursor] = location;
        self.notify();
    }

    pub fn back(&mut self) -> bool {
        if self.cursor == 0 {
            return false;
        }
        self.cursor -= 1;
        self.notify();
        true
    }

    pub fn forward(&mut self) -> bool {
        if self.cursor + 1 >= self.entries.len() {
            return false;
        }
        self.cursor += 1;
        self.notify();
        true
    }

    pub fn history_len(&self) -> usize {
        self.entries.len()
    }

    fn notify(&mut self) {
        let key = self.resolve();
        if self.last_emitted.as_ref() == Some(&key) {
            return;
        }
        for listener in &mut self.listeners {
            listener(key.as_ref());
        }
        self.last_emitted = Some(key);
    }
}

impl fmt::Debug for RouteResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteResolver")
            .field("entries", &self.entries)
            .field("cursor", &self.cursor)
            .finish()
    }
}
