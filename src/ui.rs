use std::io::{self, Stdout};
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{
    self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, MouseButton,
    MouseEvent, MouseEventKind,
};
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use crossterm::ExecutableCommand;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::Paragraph;
use ratatui::{Frame, Terminal};

use crate::feed::Feed;
use crate::view::LayoutKind;

const SPINNER_FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const COLOR_STATUS_BG: Color = Color::Rgb(40, 40, 48);
const COLOR_FOOTER: Color = Color::DarkGray;
const TICK_RATE: Duration = Duration::from_millis(120);

/// Braille spinner advanced once per UI tick while something loads.
#[derive(Default)]
struct Spinner(usize);

impl Spinner {
    fn frame(&self) -> &'static str {
        SPINNER_FRAMES[self.0 % SPINNER_FRAMES.len()]
    }

    fn step(&mut self) {
        self.0 = self.0.wrapping_add(1);
    }
}

pub struct App {
    feed: Feed,
    spinner: Spinner,
    needs_redraw: bool,
}

impl App {
    pub fn new(feed: Feed) -> Self {
        Self {
            feed,
            spinner: Spinner::default(),
            needs_redraw: true,
        }
    }

    /// Takes over the terminal until the user quits. The feed is
    /// released (player closed) before the terminal is restored.
    pub fn run(&mut self) -> Result<()> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        stdout.execute(EnterAlternateScreen)?;
        stdout.execute(EnableMouseCapture)?;
        let mut terminal = Terminal::new(CrosstermBackend::new(stdout))?;
        terminal.clear()?;

        let outcome = self.event_loop(&mut terminal);
        self.feed.release();

        disable_raw_mode()?;
        let backend = terminal.backend_mut();
        backend.execute(DisableMouseCapture)?;
        backend.execute(LeaveAlternateScreen)?;
        terminal.show_cursor()?;
        outcome
    }

    fn event_loop(&mut self, terminal: &mut Terminal<CrosstermBackend<Stdout>>) -> Result<()> {
        let mut next_tick = Instant::now() + TICK_RATE;
        loop {
            self.needs_redraw |= self.feed.poll();
            if self.needs_redraw {
                terminal.draw(|frame| self.draw(frame))?;
                self.needs_redraw = false;
            }

            let wait = next_tick.saturating_duration_since(Instant::now());
            if event::poll(wait)? && self.handle_event(event::read()?) {
                return Ok(());
            }

            let now = Instant::now();
            if now >= next_tick {
                next_tick = now + TICK_RATE;
                self.needs_redraw |= self.feed.tick(now);
                if self.feed.is_loading() {
                    self.spinner.step();
                    self.needs_redraw = true;
                }
            }
        }
    }

    /// Returns true when the user asked to quit.
    fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Key(key) if key.kind == KeyEventKind::Press => {
                self.needs_redraw = true;
                match self.handle_key(key.code) {
                    Ok(quit) => quit,
                    Err(err) => {
                        self.feed.set_status(format!("Error: {err:#}"));
                        false
                    }
                }
            }
            Event::Mouse(mouse) => {
                self.needs_redraw |= self.handle_mouse(mouse);
                false
            }
            Event::Resize(_, _) => {
                self.needs_redraw = true;
                false
            }
            _ => false,
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> Result<bool> {
        let now = Instant::now();
        match code {
            KeyCode::Char('q') | KeyCode::Esc => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.feed.scroll(1, now),
            KeyCode::Char('k') | KeyCode::Up => self.feed.scroll(-1, now),
            KeyCode::Enter => {
                self.feed.confirm();
            }
            KeyCode::Char('r') => {
                self.feed.retry();
            }
            KeyCode::Char('n') => self.feed.refresh_batch(),
            KeyCode::Char('b') | KeyCode::Backspace | KeyCode::Left => {
                self.feed.back();
            }
            KeyCode::Char('f') | KeyCode::Right => {
                self.feed.forward();
            }
            KeyCode::Char('F') => {
                self.feed.play_full_feature();
            }
            KeyCode::Char('o') => {
                self.feed.open_external()?;
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_mouse(&mut self, event: MouseEvent) -> bool {
        let now = Instant::now();
        match event.kind {
            MouseEventKind::ScrollDown => {
                self.feed.scroll(1, now);
                true
            }
            MouseEventKind::ScrollUp => {
                self.feed.scroll(-1, now);
                true
            }
            MouseEventKind::Down(MouseButton::Left) => self.feed.click(event.column, event.row),
            _ => false,
        }
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let [status_area, body, footer] = rows(frame.size());

        let status_text = if self.feed.is_loading() {
            format!("{} {}", self.spinner.frame(), self.feed.status_message())
        } else {
            self.feed.status_message().to_string()
        };
        let status_line = Paragraph::new(Line::from(vec![
            Span::styled(
                format!(" {} ", self.feed.location()),
                Style::default().fg(Color::Gray),
            ),
            Span::styled(
                format!("[{}] ", self.feed.player().status().label()),
                Style::default().add_modifier(Modifier::BOLD),
            ),
            Span::raw(status_text),
        ]))
        .style(Style::default().bg(COLOR_STATUS_BG));
        frame.render_widget(status_line, status_area);

        self.feed.resize(body);
        self.feed.render(frame, body);

        let hints = match self.feed.layout() {
            LayoutKind::Mobile => {
                "j/k swipe · r retry · n new batch · b/f back/forward · F full feature · o open · q quit"
            }
            LayoutKind::Desktop => {
                "j/k move · Enter play · r retry · n new batch · b/f back/forward · F full feature · o open · q quit"
            }
        };
        frame.render_widget(
            Paragraph::new(hints).style(Style::default().fg(COLOR_FOOTER)),
            footer,
        );
    }
}

fn rows(area: Rect) -> [Rect; 3] {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Min(0),
            Constraint::Length(1),
        ])
        .split(area);
    [chunks[0], chunks[1], chunks[2]]
}
