use std::time::{Duration, Instant};

pub const DEFAULT_SETTLE: Duration = Duration::from_millis(150);

/// Debounced scroll position for the one-item-per-screen layout.
///
/// Raw offsets are recorded as they arrive; an index is only reported once
/// no event has been seen for the settle window, and only if it differs
/// from the last reported one. A fast swipe across several items therefore
/// yields at most one switch, to wherever the gesture stopped.
#[derive(Debug, Clone)]
pub struct ScrollTracker {
    settle: Duration,
    viewport_height: f64,
    offset: f64,
    last_event: Option<Instant>,
    settled_index: Option<usize>,
    len: usize,
}

impl ScrollTracker {
    pub fn new(settle: Duration, viewport_height: f64) -> Self {
        Self {
            settle,
            viewport_height: viewport_height.max(1.0),
            offset: 0.0,
            last_event: None,
            settled_index: None,
            len: 0,
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn viewport_height(&self) -> f64 {
        self.viewport_height
    }

    pub fn settled_index(&self) -> Option<usize> {
        self.settled_index
    }

    pub fn is_settling(&self) -> bool {
        self.last_event.is_some()
    }

    /// Number of feed items; offsets are clamped to the last one.
    pub fn set_len(&mut self, len: usize) {
        self.len = len;
        self.offset = self.offset.min(self.max_offset());
    }

    /// Keeps the current item in view when the viewport is resized.
    pub fn set_viewport_height(&mut self, height: f64) {
        let height = height.max(1.0);
        if (height - self.viewport_height).abs() < f64::EPSILON {
            return;
        }
        let index = self.current_index();
        self.viewport_height = height;
        self.offset = index as f64 * height;
    }

    pub fn on_scroll(&mut self, offset: f64, now: Instant) {
        self.offset = offset.clamp(0.0, self.max_offset());
        self.last_event = Some(now);
    }

    pub fn scroll_by(&mut self, delta: f64, now: Instant) {
        self.on_scroll(self.offset + delta, now);
    }

    /// Reports the index the feed should switch to once scrolling settled.
    pub fn settle(&mut self, now: Instant) -> Option<usize> {
        let last = self.last_event?;
        if now.saturating_duration_since(last) < self.settle {
            return None;
        }
        self.last_event = None;
        let index = self.current_index();
        self.offset = index as f64 * self.viewport_height;
        if self.settled_index == Some(index) {
            return None;
        }
        self.settled_index = Some(index);
        Some(index)
    }

    /// Aligns with an item activated some other way, without reporting it.
    pub fn sync(&mut self, index: usize) {
        self.settled_index = Some(index);
        self.last_event = None;
        self.offset = index as f64 * self.viewport_height;
    }

    pub fn current_index(&self) -> usize {
        let index = (self.offset / self.viewport_height).round();
        let index = if index.is_finite() && index > 0.0 {
            index as usize
        } else {
            0
        };
        index.min(self.len.saturating_sub(1))
    }

    fn max_offset(&self) -> f64 {
        self.len.saturating_sub(1) as f64 * self.viewport_height
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker(len: usize) -> ScrollTracker {
        let mut tracker = ScrollTracker::new(DEFAULT_SETTLE, 10.0);
        tracker.set_len(len);
        tracker
    }

    #[test]
    fn burst_settles_once_on_final_offset() {
        let mut tracker = tracker(5);
        let start = Instant::now();
        let mut settled = Vec::new();
        for (step, offset) in [3.0, 8.0, 14.0, 19.0, 24.0, 29.0].into_iter().enumerate() {
            let now = start + Duration::from_millis(20 * step as u64);
            tracker.on_scroll(offset, now);
            settled.extend(tracker.settle(now));
        }
        let pause = start + Duration::from_millis(100) + DEFAULT_SETTLE;
        settled.extend(tracker.settle(pause));
        settled.extend(tracker.settle(pause + Duration::from_secs(1)));
        assert_eq!(settled, vec![3]);
    }

    #[test]
    fn nothing_settles_inside_the_window() {
        let mut tracker = tracker(5);
        let start = Instant::now();
        tracker.on_scroll(10.0, start);
        assert_eq!(tracker.settle(start + DEFAULT_SETTLE / 2), None);
        assert!(tracker.is_settling());
        assert_eq!(tracker.settle(start + DEFAULT_SETTLE), Some(1));
    }

    #[test]
    fn returning_to_the_same_item_does_not_switch() {
        let mut tracker = tracker(5);
        let start = Instant::now();
        tracker.sync(2);
        tracker.on_scroll(24.0, start);
        assert_eq!(tracker.settle(start + DEFAULT_SETTLE), None);
        assert_eq!(tracker.offset(), 20.0);
    }

    #[test]
    fn offsets_clamp_to_the_feed() {
        let mut tracker = tracker(3);
        let start = Instant::now();
        tracker.on_scroll(500.0, start);
        assert_eq!(tracker.settle(start + DEFAULT_SETTLE), Some(2));
        tracker.scroll_by(-500.0, start);
        assert_eq!(tracker.current_index(), 0);
    }

    #[test]
    fn resize_keeps_the_current_item() {
        let mut tracker = tracker(4);
        tracker.sync(2);
        tracker.set_viewport_height(30.0);
        assert_eq!(tracker.current_index(), 2);
        assert_eq!(tracker.offset(), 60.0);
    }
}
