//! crossterm/ratatui front end for the review loop.

use crate::{
    model::ChatRecord,
    review::{KeySource, Renderer, ReviewKey},
};
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Layout},
    style::{Color, Modifier, Style},
    text::Line,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
};
use std::io::{self, Stdout};

const TITLE: &str = "Telegram Cleaner";
const HELP: &str = "j/k move  d remove  s keep forever  q quit";

pub struct Tui {
    terminal: ratatui::Terminal<CrosstermBackend<Stdout>>,
    table: TableState,
    restored: bool,
}

impl Tui {
    pub fn enter() -> io::Result<Self> {
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        if let Err(e) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(e);
        }
        let terminal = ratatui::Terminal::new(CrosstermBackend::new(stdout))?;
        Ok(Self {
            terminal,
            table: TableState::default(),
            restored: false,
        })
    }

    pub fn restore(&mut self) -> io::Result<()> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        disable_raw_mode()?;
        execute!(self.terminal.backend_mut(), LeaveAlternateScreen)?;
        self.terminal.show_cursor()
    }
}

impl Drop for Tui {
    fn drop(&mut self) {
        let _ = self.restore();
    }
}

fn map_key(code: KeyCode, modifiers: KeyModifiers) -> Option<ReviewKey> {
    match code {
        KeyCode::Char('c') if modifiers.contains(KeyModifiers::CONTROL) => Some(ReviewKey::Quit),
        KeyCode::Up | KeyCode::Char('k') => Some(ReviewKey::Up),
        KeyCode::Down | KeyCode::Char('j') => Some(ReviewKey::Down),
        KeyCode::Delete | KeyCode::Char('d') => Some(ReviewKey::Delete),
        KeyCode::Char('s') => Some(ReviewKey::Skip),
        KeyCode::Esc | KeyCode::Char('q') => Some(ReviewKey::Quit),
        _ => None,
    }
}

/// Blocking reader of review keys from the crossterm event stream.
pub struct TerminalKeys;

impl KeySource for TerminalKeys {
    fn next_key(&mut self) -> io::Result<ReviewKey> {
        loop {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                if let Some(k) = map_key(key.code, key.modifiers) {
                    return Ok(k);
                }
            }
        }
    }
}

impl Renderer for Tui {
    fn render(&mut self, records: &[ChatRecord], cursor: usize, status: &str) -> io::Result<()> {
        self.table.select((!records.is_empty()).then_some(cursor));
        let table_state = &mut self.table;

        self.terminal.draw(|f| {
            let [header, body, footer] = Layout::vertical([
                Constraint::Length(1),
                Constraint::Min(3),
                Constraint::Length(1),
            ])
            .areas(f.area());

            f.render_widget(
                Paragraph::new(Line::from(format!("{TITLE} - {} chats", records.len())))
                    .style(Style::default().add_modifier(Modifier::BOLD)),
                header,
            );

            let rows = records.iter().enumerate().map(|(i, r)| {
                let row = Row::new(vec![
                    Cell::from(r.label()),
                    Cell::from(r.chat_kind.label()),
                    Cell::from(r.last_activity_day()),
                ]);
                if i % 2 == 1 {
                    row.style(Style::default().bg(Color::Rgb(30, 30, 30)))
                } else {
                    row
                }
            });
            let table = Table::new(
                rows,
                [
                    Constraint::Percentage(60),
                    Constraint::Length(12),
                    Constraint::Length(12),
                ],
            )
            .header(
                Row::new(vec!["Name", "Type", "Last Message"])
                    .style(Style::default().add_modifier(Modifier::BOLD)),
            )
            .block(Block::default().borders(Borders::ALL))
            .row_highlight_style(Style::default().add_modifier(Modifier::REVERSED))
            .highlight_symbol("> ");
            f.render_stateful_widget(table, body, table_state);

            let foot = if status.is_empty() {
                HELP.to_string()
            } else {
                format!("{status}  |  {HELP}")
            };
            f.render_widget(Paragraph::new(foot), footer);
        })?;
        Ok(())
    }
}
