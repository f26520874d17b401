use std::cell::Cell;
use std::time::{Duration, Instant};

use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span, Text};
use ratatui::widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap};
use ratatui::Frame;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::model::{clean_title, CacheKey, MediaKind, VideoRef};
use crate::player::{PlaybackStatus, PlayerController};
use crate::route::Location;
use crate::scroll::ScrollTracker;

const ACCENT: Color = Color::Rgb(225, 29, 72);
const SIDEBAR_WIDTH: u16 = 42;

/// Narrow terminals get [`MobileView`] (one item per screen, switching once
/// scrolling settles), wide ones [`DesktopView`] (player beside a sidebar,
/// switching on confirmation). Picked once when the feed mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    Mobile,
    Desktop,
}

impl LayoutKind {
    pub fn for_width(width: u16, mobile_max_width: u16) -> Self {
        if width <= mobile_max_width {
            LayoutKind::Mobile
        } else {
            LayoutKind::Desktop
        }
    }
}

/// Read-only snapshot of the feed handed to a view for drawing.
pub struct FeedState<'a> {
    pub batch: &'a [VideoRef],
    pub active: Option<&'a CacheKey>,
    pub active_index: Option<usize>,
    pub sidebar: &'a [usize],
    pub player: &'a PlayerController,
    pub location: &'a Location,
    pub status: &'a str,
    pub full_feature: Option<&'a VideoRef>,
    pub title_marker: &'a str,
    pub loading_batch: bool,
}

pub trait FeedView {
    fn kind(&self) -> LayoutKind;

    /// Number of items in the current batch.
    fn set_len(&mut self, len: usize);

    fn resize(&mut self, _area: Rect) {}

    /// Brings the item the feed switched to into view.
    fn switch_to(&mut self, index: Option<usize>);

    /// One scroll step, positive is down. `choices` are the batch indices
    /// the view may land on.
    fn scroll(&mut self, steps: i32, now: Instant, choices: &[usize]);

    /// Index to switch to once scrolling settled.
    fn settle(&mut self, _now: Instant) -> Option<usize> {
        None
    }

    /// Index to switch to on explicit confirmation (Enter or click).
    fn confirm(&self, choices: &[usize]) -> Option<usize>;

    fn click(&mut self, _column: u16, _row: u16, _choices: &[usize]) -> Option<usize> {
        None
    }

    fn render(&self, frame: &mut Frame, area: Rect, state: &FeedState<'_>);
}

pub fn for_layout(kind: LayoutKind, settle: Duration, step_rows: u16) -> Box<dyn FeedView> {
    match kind {
        LayoutKind::Mobile => Box::new(MobileView::new(settle, step_rows)),
        LayoutKind::Desktop => Box::new(DesktopView::new()),
    }
}

pub struct MobileView {
    tracker: ScrollTracker,
    step_rows: u16,
}

impl MobileView {
    pub fn new(settle: Duration, step_rows: u16) -> Self {
        Self {
            tracker: ScrollTracker::new(settle, 20.0),
            step_rows: step_rows.max(1),
        }
    }

    pub fn tracker(&self) -> &ScrollTracker {
        &self.tracker
    }
}

impl FeedView for MobileView {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Mobile
    }

    fn set_len(&mut self, len: usize) {
        self.tracker.set_len(len);
    }

    fn resize(&mut self, area: Rect) {
        self.tracker.set_viewport_height(f64::from(area.height.max(1)));
    }

    fn switch_to(&mut self, index: Option<usize>) {
        if let Some(index) = index {
            self.tracker.sync(index);
        }
    }

    fn scroll(&mut self, steps: i32, now: Instant, _choices: &[usize]) {
        self.tracker
            .scroll_by(f64::from(steps) * f64::from(self.step_rows), now);
    }

    fn settle(&mut self, now: Instant) -> Option<usize> {
        self.tracker.settle(now)
    }

    fn confirm(&self, _choices: &[usize]) -> Option<usize> {
        None
    }

    fn render(&self, frame: &mut Frame, area: Rect, state: &FeedState<'_>) {
        let index = self.tracker.current_index();
        let viewing = state.batch.get(index);
        let is_active = viewing.map(VideoRef::key).as_ref() == state.active;

        let mut lines: Vec<Line<'static>> = Vec::new();
        if state.batch.is_empty() {
            let message = if state.loading_batch {
                "Loading reels..."
            } else {
                "No reels loaded. Press n for a new batch."
            };
            lines.push(Line::from(Span::styled(message, Style::default().fg(ACCENT))));
        } else if let Some(video) = viewing {
            lines.push(Line::from(Span::styled(
                format!("{}/{}", index + 1, state.batch.len()),
                Style::default().fg(Color::DarkGray),
            )));
            lines.push(Line::from(Span::styled(
                clean_title(&video.title, state.title_marker),
                Style::default().add_modifier(Modifier::BOLD),
            )));
            lines.push(Line::from(meta_line(&video.category, video.year.as_deref(), &video.source)));
            lines.push(Line::default());
            if is_active {
                lines.extend(player_lines(state));
            } else {
                lines.push(Line::from(Span::styled(
                    "Release to play this reel",
                    Style::default().fg(ACCENT),
                )));
            }
        }

        let width = area.width.saturating_sub(2).max(1) as usize;
        if is_active {
            if let Some(detail) = state.player.detail() {
                let description = detail.plain_description();
                if !description.is_empty() {
                    lines.push(Line::default());
                    for line in textwrap::wrap(&description, width).into_iter().take(6) {
                        lines.push(Line::from(line.into_owned()));
                    }
                }
            }
            if let Some(feature) = state.full_feature {
                lines.push(Line::default());
                lines.push(Line::from(Span::styled(
                    format!("F: full feature · {}", truncate(&feature.title, width)),
                    Style::default().fg(ACCENT),
                )));
            }
        }

        if let Some(next) = state.batch.get(index + 1) {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                format!("next: {}", truncate(&clean_title(&next.title, state.title_marker), width)),
                Style::default().fg(Color::DarkGray),
            )));
        }

        let block = Block::default()
            .borders(Borders::ALL)
            .title(Span::styled(" Reels ", Style::default().fg(ACCENT)));
        let paragraph = Paragraph::new(Text::from(lines))
            .block(block)
            .wrap(Wrap { trim: true });
        frame.render_widget(paragraph, area);
    }
}

pub struct DesktopView {
    cursor: Option<usize>,
    sidebar_area: Cell<Rect>,
}

impl DesktopView {
    pub fn new() -> Self {
        Self {
            cursor: None,
            sidebar_area: Cell::new(Rect::default()),
        }
    }

    fn cursor_position(&self, choices: &[usize]) -> Option<usize> {
        if choices.is_empty() {
            return None;
        }
        Some(
            self.cursor
                .and_then(|cursor| choices.iter().position(|idx| *idx == cursor))
                .unwrap_or(0),
        )
    }
}

impl Default for DesktopView {
    fn default() -> Self {
        Self::new()
    }
}

impl FeedView for DesktopView {
    fn kind(&self) -> LayoutKind {
        LayoutKind::Desktop
    }

    fn set_len(&mut self, _len: usize) {
        self.cursor = None;
    }

    fn switch_to(&mut self, _index: Option<usize>) {
        self.cursor = None;
    }

    fn scroll(&mut self, steps: i32, _now: Instant, choices: &[usize]) {
        let Some(position) = self.cursor_position(choices) else {
            return;
        };
        let last = choices.len() as i64 - 1;
        let next = (position as i64 + i64::from(steps)).clamp(0, last) as usize;
        self.cursor = Some(choices[next]);
    }

    fn confirm(&self, choices: &[usize]) -> Option<usize> {
        self.cursor_position(choices).map(|position| choices[position])
    }

    fn click(&mut self, column: u16, row: u16, choices: &[usize]) -> Option<usize> {
        let area = self.sidebar_area.get();
        let inner_top = area.y.saturating_add(1);
        if column < area.x
            || column >= area.x.saturating_add(area.width)
            || row < inner_top
            || row >= area.y.saturating_add(area.height.saturating_sub(1))
        {
            return None;
        }
        // Each entry takes two rows: title and meta.
        let position = usize::from((row - inner_top) / 2);
        let index = *choices.get(position)?;
        self.cursor = Some(index);
        Some(index)
    }

    fn render(&self, frame: &mut Frame, area: Rect, state: &FeedState<'_>) {
        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Min(30), Constraint::Length(SIDEBAR_WIDTH)])
            .split(area);
        self.sidebar_area.set(columns[1]);

        let mut lines: Vec<Line<'static>> = Vec::new();
        let width = columns[0].width.saturating_sub(2).max(1) as usize;
        match state.player.detail() {
            Some(detail) => {
                lines.push(Line::from(Span::styled(
                    clean_title(&detail.title, state.title_marker),
                    Style::default().add_modifier(Modifier::BOLD),
                )));
                let source = state.active.map(|key| key.source.as_str()).unwrap_or_default();
                lines.push(Line::from(meta_line(&detail.category, None, source)));
            }
            None => {
                if let Some(video) = state.active_index.and_then(|i| state.batch.get(i)) {
                    lines.push(Line::from(Span::styled(
                        clean_title(&video.title, state.title_marker),
                        Style::default().add_modifier(Modifier::BOLD),
                    )));
                } else if state.loading_batch {
                    lines.push(Line::from(Span::styled(
                        "Loading reels...",
                        Style::default().fg(ACCENT),
                    )));
                }
            }
        }
        lines.push(Line::default());
        lines.extend(player_lines(state));

        if let Some(feature) = state.full_feature {
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                format!("F: play full feature · {}", truncate(&feature.title, width)),
                Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
            )));
        }
        if let Some(detail) = state.player.detail() {
            let description = detail.plain_description();
            lines.push(Line::default());
            lines.push(Line::from(Span::styled(
                "Details",
                Style::default().fg(Color::DarkGray),
            )));
            lines.push(Line::from(if description.is_empty() {
                "No description available.".to_string()
            } else {
                description
            }));
        }

        let player = Paragraph::new(Text::from(lines))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(Span::styled(" Now playing ", Style::default().fg(ACCENT))),
            )
            .wrap(Wrap { trim: true });
        frame.render_widget(player, columns[0]);

        let entry_width = columns[1].width.saturating_sub(4).max(1) as usize;
        let items: Vec<ListItem> = state
            .sidebar
            .iter()
            .filter_map(|index| state.batch.get(*index))
            .map(|video| {
                let title = truncate(&clean_title(&video.title, state.title_marker), entry_width);
                let meta = format!(
                    "{} · {}",
                    video.year.as_deref().unwrap_or("----"),
                    video.source
                );
                ListItem::new(Text::from(vec![
                    Line::from(title),
                    Line::from(Span::styled(
                        truncate(&meta, entry_width),
                        Style::default().fg(Color::DarkGray),
                    )),
                ]))
            })
            .collect();
        let list = List::new(items)
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .title(" Recommended · n: new batch "),
            )
            .highlight_style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD))
            .highlight_symbol("▶ ");
        let mut list_state = ListState::default().with_selected(self.cursor_position(state.sidebar));
        frame.render_stateful_widget(list, columns[1], &mut list_state);
    }
}

fn meta_line(category: &str, year: Option<&str>, source: &str) -> Vec<Span<'static>> {
    let mut spans = Vec::new();
    if !category.is_empty() {
        spans.push(Span::styled(
            category.to_string(),
            Style::default().fg(ACCENT),
        ));
    }
    for part in [year.unwrap_or_default(), source] {
        if part.is_empty() {
            continue;
        }
        if !spans.is_empty() {
            spans.push(Span::raw(" · "));
        }
        spans.push(Span::styled(
            part.to_string(),
            Style::default().fg(Color::DarkGray),
        ));
    }
    spans
}

fn player_lines(state: &FeedState<'_>) -> Vec<Line<'static>> {
    let player = state.player;
    let mut lines = Vec::new();
    let (label, style) = match player.status() {
        PlaybackStatus::Idle => ("Idle", Style::default().fg(Color::DarkGray)),
        PlaybackStatus::Loading => ("Loading...", Style::default().fg(Color::Yellow)),
        PlaybackStatus::Switching => ("Switching...", Style::default().fg(Color::Yellow)),
        PlaybackStatus::Playing => ("Playing", Style::default().fg(Color::Green)),
        PlaybackStatus::Errored => ("Playback failed", Style::default().fg(Color::Red)),
    };
    lines.push(Line::from(Span::styled(
        label,
        style.add_modifier(Modifier::BOLD),
    )));
    if let Some(err) = player.error() {
        lines.push(Line::from(Span::styled(
            err.to_string(),
            Style::default().fg(Color::Red),
        )));
        lines.push(Line::from(Span::styled(
            "[r] retry",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        )));
    }
    if let Some(media) = player.media() {
        let kind = match media.kind {
            MediaKind::Hls => "HLS",
            MediaKind::Progressive => "MP4",
            MediaKind::Other => "stream",
        };
        lines.push(Line::from(Span::styled(
            format!("{kind} · {}", media.url),
            Style::default().fg(Color::DarkGray),
        )));
    }
    lines
}

/// Cuts `text` to `width` terminal columns, marking the cut with `…`.
pub fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = ch.width().unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        out.push(ch);
        used += w;
    }
    out.push('…');
    out
}
