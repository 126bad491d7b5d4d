use std::{io, time::Duration};

use color_eyre::Result;
use crossterm::{
    event::{self, DisableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use cryptoshield_core::{CredentialEntry, ShieldError};
use cryptoshield_session::Session;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, BorderType, Borders, List, ListItem, ListState, Paragraph},
    Terminal,
};

/// Why the view closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Quit,
    Revoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Refilter,
    Quit,
}

/// Filter text, visible rows and selection.
#[derive(Debug, Default)]
struct ViewState {
    filter: String,
    entries: Vec<CredentialEntry>,
    selected: usize,
    reveal: bool,
}

impl ViewState {
    fn on_key(&mut self, code: KeyCode) -> Action {
        match code {
            KeyCode::Esc => Action::Quit,
            KeyCode::Up => {
                self.selected = self.selected.saturating_sub(1);
                Action::None
            }
            KeyCode::Down => {
                if self.selected + 1 < self.entries.len() {
                    self.selected += 1;
                }
                Action::None
            }
            KeyCode::Tab => {
                self.reveal = !self.reveal;
                Action::None
            }
            KeyCode::Backspace => {
                if self.filter.pop().is_some() {
                    Action::Refilter
                } else {
                    Action::None
                }
            }
            KeyCode::Char(c) => {
                self.filter.push(c);
                Action::Refilter
            }
            _ => Action::None,
        }
    }

    fn set_entries(&mut self, entries: Vec<CredentialEntry>) {
        self.entries = entries;
        self.selected = self.selected.min(self.entries.len().saturating_sub(1));
    }

    fn secret_line(&self) -> String {
        match self.entries.get(self.selected) {
            Some(entry) if self.reveal => entry.secret.clone(),
            Some(_) => "********".to_string(),
            None => String::new(),
        }
    }
}

/// Credential browser for an open session. Returns as soon as the session
/// is revoked; nothing typed after that reaches the store.
pub fn launch(session: &Session) -> Result<Exit> {
    let guard = TerminalGuard::enter()?;
    let mut terminal = guard.terminal()?;
    let mut state = ViewState::default();
    match session.store().load() {
        Ok(entries) => state.set_entries(entries),
        Err(ShieldError::SessionRevoked) => return Ok(Exit::Revoked),
        Err(err) => return Err(err.into()),
    }
    let root = session.root().display().to_string();
    let started = session.started_at().format("%H:%M:%S").to_string();

    loop {
        if session.is_revoked() {
            return Ok(Exit::Revoked);
        }

        terminal.draw(|frame| {
            let chunks = Layout::default()
                .direction(Direction::Vertical)
                .margin(1)
                .constraints([
                    Constraint::Length(3),
                    Constraint::Length(3),
                    Constraint::Min(1),
                    Constraint::Length(3),
                ])
                .split(frame.area());

            let header = Paragraph::new(Line::from(vec![
                Span::styled(
                    "CryptoShield",
                    Style::default()
                        .fg(Color::Cyan)
                        .add_modifier(Modifier::BOLD),
                ),
                Span::raw(format!("  drive {root}  since {started}")),
            ]))
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_type(BorderType::Rounded)
                    .title(Span::styled(
                        "Session",
                        Style::default()
                            .fg(Color::Green)
                            .add_modifier(Modifier::BOLD),
                    )),
            );
            frame.render_widget(header, chunks[0]);

            let filter = Paragraph::new(state.filter.as_str())
                .block(Block::default().borders(Borders::ALL).title("Search"));
            frame.render_widget(filter, chunks[1]);

            let items: Vec<ListItem> = state
                .entries
                .iter()
                .map(|e| {
                    ListItem::new(Line::from(vec![
                        Span::styled(&e.website, Style::default().add_modifier(Modifier::BOLD)),
                        Span::raw("  "),
                        Span::styled(&e.username, Style::default().fg(Color::Yellow)),
                    ]))
                })
                .collect();
            let list = List::new(items)
                .block(
                    Block::default()
                        .borders(Borders::ALL)
                        .title(format!("Credentials ({})", state.entries.len())),
                )
                .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
            let mut list_state = ListState::default();
            if !state.entries.is_empty() {
                list_state.select(Some(state.selected));
            }
            frame.render_stateful_widget(list, chunks[2], &mut list_state);

            let footer = Paragraph::new(Line::from(vec![
                Span::raw("secret: "),
                Span::styled(state.secret_line(), Style::default().fg(Color::Magenta)),
                Span::raw("   "),
                Span::styled("Tab", Style::default().fg(Color::Cyan)),
                Span::raw(" reveal  "),
                Span::styled("Esc", Style::default().fg(Color::Cyan)),
                Span::raw(" quit"),
            ]))
            .block(Block::default().borders(Borders::ALL).title("Controls"));
            frame.render_widget(footer, chunks[3]);
        })?;

        if event::poll(Duration::from_millis(150))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match state.on_key(key.code) {
                    Action::Quit => return Ok(Exit::Quit),
                    Action::Refilter => match session.store().search(&state.filter) {
                        Ok(entries) => state.set_entries(entries),
                        Err(ShieldError::SessionRevoked) => return Ok(Exit::Revoked),
                        Err(err) => return Err(err.into()),
                    },
                    Action::None => {}
                }
            }
        }
    }
}

struct TerminalGuard;

impl TerminalGuard {
    fn enter() -> Result<Self> {
        enable_raw_mode()?;
        execute!(io::stdout(), EnterAlternateScreen)?;
        Ok(Self)
    }

    fn terminal(&self) -> Result<Terminal<CrosstermBackend<io::Stdout>>> {
        let backend = CrosstermBackend::new(io::stdout());
        Ok(Terminal::new(backend)?)
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if let Err(err) = disable_raw_mode() {
            eprintln!("failed to disable raw mode: {err}");
        }
        if let Err(err) = execute!(io::stdout(), LeaveAlternateScreen, DisableMouseCapture) {
            eprintln!("failed to restore terminal: {err}");
        }
    }
}
