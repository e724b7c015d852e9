use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use log::debug;
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph},
    Frame,
};
use std::{
    io,
    time::{Duration, Instant},
};
use textwrap::wrap;
use tui_input::{backend::crossterm::EventHandler, Input};
use unicode_segmentation::UnicodeSegmentation;

use flashchat::feed::{FeedError, FeedState, SendOutcome};
use flashchat::render::{self, BrandColor, Row, Side};

// Export types needed by main module
pub use ratatui::backend::CrosstermBackend;
pub use ratatui::Terminal;

pub const APP_TITLE: &str = "⚡️FlashChat";

/// Delay between two letters of the animated welcome title
const TITLE_LETTER_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Login,
    Register,
}

impl AuthMode {
    fn title(self) -> &'static str {
        match self {
            AuthMode::Login => "Log In",
            AuthMode::Register => "Register",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Email,
    Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Screen {
    Welcome,
    Auth(AuthMode),
    Chat,
}

/// Requests from the screens that need the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UiAction {
    Quit,
    SubmitAuth {
        mode: AuthMode,
        email: String,
        password: String,
    },
    Send(String),
    Logout,
}

struct Status {
    text: String,
    is_error: bool,
}

pub struct ChatUI {
    screen: Screen,
    welcome_started: Instant,
    email: Input,
    password: Input,
    focus: Field,
    auth_pending: bool,
    input: Input,
    /// Text of the message waiting for the store to accept it
    sending: Option<String>,
    viewer: Option<String>,
    status: Option<Status>,
    saved_email: Option<String>,
    saved_password: Option<String>,
}

/// The prefix of `title` visible `elapsed` after the welcome screen opened;
/// one more letter (grapheme) appears every `TITLE_LETTER_DELAY`
pub fn title_progress(title: &str, elapsed: Duration) -> &str {
    let letters = (elapsed.as_millis() / TITLE_LETTER_DELAY.as_millis()) as usize + 1;
    match title.grapheme_indices(true).nth(letters) {
        Some((idx, _)) => &title[..idx],
        None => title,
    }
}

/// Lay out one message bubble in a list `width` columns wide. Each returned
/// line is the bubble text (padded to the bubble width) and its indent.
pub fn layout_bubble(body: &str, side: Side, width: usize) -> Vec<(usize, String)> {
    let max_text = (width * 3 / 4).max(10).saturating_sub(2);
    let lines: Vec<String> = wrap(body, max_text)
        .into_iter()
        .map(|l| l.into_owned())
        .collect();
    let bubble_text = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    lines
        .into_iter()
        .map(|line| {
            let padded = format!(" {:<w$} ", line, w = bubble_text);
            let indent = match side {
                Side::Left => 0,
                Side::Right => width.saturating_sub(padded.chars().count()),
            };
            (indent, padded)
        })
        .collect()
}

fn brand(color: BrandColor) -> Color {
    let (r, g, b) = color.rgb();
    Color::Rgb(r, g, b)
}

fn row_item(row: &Row<'_>, width: usize) -> ListItem<'static> {
    let style = Style::default()
        .fg(brand(row.style.text))
        .bg(brand(row.style.bubble));

    let mut lines: Vec<Line<'static>> = layout_bubble(row.body, row.style.side, width)
        .into_iter()
        .map(|(indent, text)| {
            Line::from(vec![
                Span::raw(" ".repeat(indent)),
                Span::styled(text, style),
            ])
        })
        .collect();
    // Spacer between bubbles
    lines.push(Line::from(""));
    ListItem::new(Text::from(lines))
}

impl ChatUI {
    pub fn new() -> Self {
        ChatUI {
            screen: Screen::Welcome,
            welcome_started: Instant::now(),
            email: Input::default(),
            password: Input::default(),
            focus: Field::Email,
            auth_pending: false,
            input: Input::default(),
            sending: None,
            viewer: None,
            status: None,
            saved_email: None,
            saved_password: None,
        }
    }

    /// Credentials used to prefill the log in form
    pub fn remember_credentials(&mut self, email: &str, password: Option<String>) {
        self.saved_email = Some(email.to_string());
        self.saved_password = password;
    }

    pub fn show_welcome(&mut self) {
        self.screen = Screen::Welcome;
        self.welcome_started = Instant::now();
        self.viewer = None;
        self.input = Input::default();
        self.sending = None;
        self.auth_pending = false;
    }

    pub fn show_auth(&mut self, mode: AuthMode) {
        self.screen = Screen::Auth(mode);
        self.focus = Field::Email;
        self.auth_pending = false;
        match (mode, &self.saved_email) {
            (AuthMode::Login, Some(email)) => {
                self.email = Input::new(email.clone());
                self.password = Input::new(self.saved_password.clone().unwrap_or_default());
                self.focus = Field::Password;
            }
            _ => {
                self.email = Input::default();
                self.password = Input::default();
            }
        }
    }

    pub fn show_chat(&mut self, viewer: &str) {
        self.screen = Screen::Chat;
        self.viewer = Some(viewer.to_string());
        self.input = Input::default();
        self.sending = None;
        self.email = Input::default();
        self.password = Input::default();
        self.auth_pending = false;
        self.status = None;
    }

    pub fn auth_finished(&mut self) {
        self.auth_pending = false;
    }

    pub fn viewer(&self) -> Option<&str> {
        self.viewer.as_deref()
    }

    /// Apply the result of sending `body`. The input is cleared only if it
    /// still holds exactly the text that was sent.
    pub fn send_finished(&mut self, body: &str, result: &Result<SendOutcome, FeedError>) {
        if self.sending.as_deref() == Some(body) {
            self.sending = None;
        }
        match result {
            Ok(SendOutcome::Sent) => {
                if self.input.value() == body {
                    self.input = Input::default();
                }
            }
            Ok(SendOutcome::NoIdentity) | Ok(SendOutcome::EmptyBody) => {}
            Err(e) => self.set_error(format!("Message not sent: {}", e)),
        }
    }

    pub fn set_status(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            is_error: false,
        });
    }

    pub fn set_error(&mut self, text: impl Into<String>) {
        self.status = Some(Status {
            text: text.into(),
            is_error: true,
        });
    }

    pub fn handle_input(&mut self) -> Result<Option<UiAction>> {
        if !event::poll(Duration::from_millis(10))? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == KeyEventKind::Press => Ok(self.handle_key(key)),
            _ => Ok(None),
        }
    }

    /// Route one key press to the active screen
    pub fn handle_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        match self.screen {
            Screen::Welcome => match key.code {
                KeyCode::Esc => Some(UiAction::Quit),
                KeyCode::Char('r') | KeyCode::Char('R') => {
                    self.show_auth(AuthMode::Register);
                    None
                }
                KeyCode::Char('l') | KeyCode::Char('L') => {
                    self.show_auth(AuthMode::Login);
                    None
                }
                _ => None,
            },
            Screen::Auth(mode) => self.handle_auth_key(mode, key),
            Screen::Chat => self.handle_chat_key(key),
        }
    }

    fn handle_auth_key(&mut self, mode: AuthMode, key: KeyEvent) -> Option<UiAction> {
        match key.code {
            KeyCode::Esc => {
                self.show_welcome();
                None
            }
            KeyCode::Tab | KeyCode::BackTab | KeyCode::Up | KeyCode::Down => {
                self.focus = match self.focus {
                    Field::Email => Field::Password,
                    Field::Password => Field::Email,
                };
                None
            }
            KeyCode::Enter => {
                if self.auth_pending {
                    return None;
                }
                self.auth_pending = true;
                self.set_status(match mode {
                    AuthMode::Login => "Signing in...",
                    AuthMode::Register => "Creating account...",
                });
                Some(UiAction::SubmitAuth {
                    mode,
                    email: self.email.value().to_string(),
                    password: self.password.value().to_string(),
                })
            }
            _ => {
                let field = match self.focus {
                    Field::Email => &mut self.email,
                    Field::Password => &mut self.password,
                };
                field.handle_event(&Event::Key(key));
                None
            }
        }
    }

    fn handle_chat_key(&mut self, key: KeyEvent) -> Option<UiAction> {
        match key.code {
            KeyCode::Esc => Some(UiAction::Quit),
            KeyCode::Char('l') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                Some(UiAction::Logout)
            }
            KeyCode::Enter => {
                let body = self.input.value();
                if body.is_empty() || self.sending.as_deref() == Some(body) {
                    return None;
                }
                // The field is cleared once the store accepts the message
                debug!("UI: sending message of {} bytes", body.len());
                let body = body.to_string();
                self.sending = Some(body.clone());
                Some(UiAction::Send(body))
            }
            _ => {
                self.input.handle_event(&Event::Key(key));
                None
            }
        }
    }

    pub fn draw<B: Backend>(&self, frame: &mut Frame<B>, feed: Option<&FeedState>) {
        let size = frame.size();

        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Title bar
                Constraint::Min(5),    // Screen body
                Constraint::Length(1), // Status and help line
            ])
            .split(size);

        let title = match self.screen {
            Screen::Welcome => title_progress(APP_TITLE, self.welcome_started.elapsed()),
            _ => APP_TITLE,
        };
        let title_bar = Paragraph::new(Span::styled(
            title,
            Style::default()
                .fg(brand(BrandColor::LightPurple))
                .add_modifier(Modifier::BOLD),
        ))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
        frame.render_widget(title_bar, chunks[0]);

        match self.screen {
            Screen::Welcome => draw_welcome(frame, chunks[1]),
            Screen::Auth(mode) => self.draw_auth(frame, mode, chunks[1]),
            Screen::Chat => self.draw_chat(frame, feed, chunks[1]),
        }

        let help = match self.screen {
            Screen::Welcome => "r register | l log in | ESC quit",
            Screen::Auth(_) => "TAB switch field | ENTER submit | ESC back",
            Screen::Chat => "ENTER send | Ctrl+L log out | ESC quit",
        };
        let mut spans = vec![Span::styled(help, Style::default().fg(Color::Gray))];
        if let Some(status) = &self.status {
            let style = if status.is_error {
                Style::default().fg(Color::Red)
            } else {
                Style::default().fg(Color::Green)
            };
            spans.push(Span::raw("  "));
            spans.push(Span::styled(status.text.as_str(), style));
        }
        frame.render_widget(Paragraph::new(Line::from(spans)), chunks[2]);
    }

    fn draw_auth<B: Backend>(&self, f: &mut Frame<B>, mode: AuthMode, area: Rect) {
        let form_width = 50.min(area.width);
        let form_area = Rect::new(
            area.x + (area.width - form_width) / 2,
            area.y,
            form_width,
            8.min(area.height),
        );

        let block = Block::default()
            .title(mode.title())
            .borders(Borders::ALL)
            .border_style(Style::default().fg(brand(BrandColor::Purple)));
        let inner = block.inner(form_area);
        f.render_widget(block, form_area);

        let rows = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Length(3)])
            .split(inner);

        let field_block = |title: &'static str, focused: bool| {
            Block::default()
                .title(title)
                .borders(Borders::ALL)
                .border_style(if focused {
                    Style::default().fg(Color::Yellow)
                } else {
                    Style::default()
                })
        };

        let masked = "*".repeat(self.password.value().chars().count());
        f.render_widget(
            Paragraph::new(self.email.value()).block(field_block("Email", self.focus == Field::Email)),
            rows[0],
        );
        f.render_widget(
            Paragraph::new(masked).block(field_block("Password", self.focus == Field::Password)),
            rows[1],
        );

        let (area, cursor) = match self.focus {
            Field::Email => (rows[0], self.email.cursor()),
            Field::Password => (rows[1], self.password.cursor()),
        };
        f.set_cursor(area.x + cursor as u16 + 1, area.y + 1);
    }

    fn draw_chat<B: Backend>(&self, f: &mut Frame<B>, feed: Option<&FeedState>, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(3),    // Messages
                Constraint::Length(3), // Input box
            ])
            .split(area);

        let width = chunks[0].width.saturating_sub(2) as usize; // Account for borders
        let (items, scroll_to): (Vec<ListItem>, Option<usize>) = match feed {
            Some(feed) => (
                render::rows(feed.messages(), self.viewer())
                    .iter()
                    .map(|row| row_item(row, width))
                    .collect(),
                feed.scroll_target(),
            ),
            None => (Vec::new(), None),
        };

        // Selecting the newest row keeps it in view; the highlight is invisible
        let mut list_state = ListState::default();
        list_state.select(scroll_to);

        let title = match self.viewer() {
            Some(viewer) => format!("Messages ({})", viewer),
            None => "Messages".to_string(),
        };
        let messages = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default());
        f.render_stateful_widget(messages, chunks[0], &mut list_state);

        let input = Paragraph::new(self.input.value())
            .block(Block::default().title("Write a message...").borders(Borders::ALL));
        f.render_widget(input, chunks[1]);
        f.set_cursor(chunks[1].x + self.input.cursor() as u16 + 1, chunks[1].y + 1);
    }
}

fn draw_welcome<B: Backend>(f: &mut Frame<B>, area: Rect) {
    let text = vec![
        Line::from(""),
        Line::from(Span::styled(
            "[r] Register",
            Style::default().fg(brand(BrandColor::LightPurple)),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "[l] Log In",
            Style::default().fg(brand(BrandColor::Purple)),
        )),
    ];
    f.render_widget(Paragraph::new(text).alignment(Alignment::Center), area);
}

pub fn setup_terminal() -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let terminal = Terminal::new(backend)?;
    Ok(terminal)
}

pub fn restore_terminal(mut terminal: Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}
