//! Live dashboard for `witr ps --watch`, built on ratatui.
//!
//! Consumes only the public batch API: discover, fan out, drain the
//! stream, render. State is rebuilt from scratch on every refresh.

use std::io;
use std::time::{Duration, Instant};

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyModifiers};
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Cell, Paragraph, Row, Table};
use ratatui::Terminal;

use crate::batch::{self, shorten_path, truncate, ProcessSummary, DEFAULT_CONCURRENCY};
use crate::cli::SortKey;
use crate::output::table::sort_rows;

const REFRESH_INTERVAL: Duration = Duration::from_secs(2);
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

struct WatchState {
    pattern: String,
    sort: SortKey,
    rows: Vec<ProcessSummary>,
    errors: usize,
    paused: bool,
    scroll: usize,
}

pub fn run(pattern: &str, sort: Option<SortKey>) -> Result<()> {
    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    crossterm::execute!(
        stdout,
        crossterm::terminal::EnterAlternateScreen,
        crossterm::cursor::Hide
    )?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, pattern, sort.unwrap_or(SortKey::Cpu));

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen,
        crossterm::cursor::Show
    )?;

    result
}

fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    pattern: &str,
    sort: SortKey,
) -> Result<()> {
    let mut state = WatchState {
        pattern: pattern.to_string(),
        sort,
        rows: Vec::new(),
        errors: 0,
        paused: false,
        scroll: 0,
    };

    let mut last_refresh = Instant::now()
        .checked_sub(REFRESH_INTERVAL)
        .unwrap_or_else(Instant::now);

    loop {
        if !state.paused && last_refresh.elapsed() >= REFRESH_INTERVAL {
            refresh(&mut state);
            last_refresh = Instant::now();
        }

        terminal.draw(|frame| draw(frame, &mut state))?;

        if event::poll(POLL_TIMEOUT)? {
            if let Event::Key(key) = event::read()? {
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => break,
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => break,
                    KeyCode::Char('p') | KeyCode::Char(' ') => state.paused = !state.paused,
                    KeyCode::Char('s') => {
                        state.sort = next_sort(state.sort);
                        sort_rows(&mut state.rows, state.sort);
                    }
                    KeyCode::Up | KeyCode::Char('k') => {
                        state.scroll = state.scroll.saturating_sub(1);
                    }
                    KeyCode::Down | KeyCode::Char('j') => {
                        state.scroll =
                            (state.scroll + 1).min(state.rows.len().saturating_sub(1));
                    }
                    KeyCode::Home => state.scroll = 0,
                    _ => {}
                }
            }
        }
    }

    Ok(())
}

fn refresh(state: &mut WatchState) {
    let pids = match batch::discover_pids(&state.pattern) {
        Ok(pids) => pids,
        Err(_) => return,
    };

    let mut rows = Vec::new();
    let mut errors = 0;
    for summary in batch::analyze_async(pids, DEFAULT_CONCURRENCY) {
        if summary.error.is_some() {
            errors += 1;
        } else {
            rows.push(summary);
        }
    }
    sort_rows(&mut rows, state.sort);

    state.rows = rows;
    state.errors = errors;
    if state.scroll >= state.rows.len() {
        state.scroll = state.rows.len().saturating_sub(1);
    }
}

fn next_sort(sort: SortKey) -> SortKey {
    match sort {
        SortKey::Cpu => SortKey::Mem,
        SortKey::Mem => SortKey::Age,
        SortKey::Age => SortKey::Pid,
        SortKey::Pid => SortKey::Cpu,
    }
}

fn sort_label(sort: SortKey) -> &'static str {
    match sort {
        SortKey::Cpu => "cpu",
        SortKey::Mem => "mem",
        SortKey::Age => "age",
        SortKey::Pid => "pid",
    }
}

fn draw(frame: &mut ratatui::Frame, state: &mut WatchState) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Fill(1),
            Constraint::Length(1),
        ])
        .split(frame.area());

    // ── Header ──
    let status = if state.paused { " [paused]" } else { "" };
    let header = Line::from(vec![Span::styled(
        format!(
            "witr ps {} - {} processes, sorted by {}{}",
            state.pattern,
            state.rows.len(),
            sort_label(state.sort),
            status
        ),
        Style::default().fg(Color::Cyan),
    )]);
    frame.render_widget(Paragraph::new(header), chunks[0]);

    // ── Table ──
    let visible = chunks[1].height as usize;
    let header_row = Row::new(
        ["PID", "CPU", "MEM", "AGE", "SOURCE", "SCRIPT", "WORKDIR", "REPO"]
            .iter()
            .map(|h| {
                Cell::from(*h)
                    .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
            }),
    );

    let rows: Vec<Row> = state
        .rows
        .iter()
        .skip(state.scroll)
        .take(visible.saturating_sub(1))
        .map(|r| {
            let cpu_style = if r.cpu_percent > 50.0 {
                Style::default().fg(Color::Red)
            } else if r.cpu_percent > 20.0 {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default()
            };

            Row::new(vec![
                Cell::from(r.pid.to_string()),
                Cell::from(format!("{:.0}%", r.cpu_percent)).style(cpu_style),
                Cell::from(format!("{}M", r.memory_mb)),
                Cell::from(r.age.clone()),
                Cell::from(r.source.clone()),
                Cell::from(truncate(&r.script, 20)),
                Cell::from(shorten_path(&r.workdir)),
                Cell::from(r.git_repo.clone()),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(8),
        Constraint::Length(6),
        Constraint::Length(7),
        Constraint::Length(8),
        Constraint::Length(12),
        Constraint::Length(20),
        Constraint::Fill(1),
        Constraint::Length(16),
    ];
    frame.render_widget(Table::new(rows, widths).header(header_row), chunks[1]);

    // ── Footer ──
    let errors = if state.errors > 0 {
        format!("  ({} errors)", state.errors)
    } else {
        String::new()
    };
    let footer = Line::from(vec![Span::styled(
        format!("q:Quit  p/space:Pause  s:Sort  j/k:Scroll{errors}"),
        Style::default().fg(Color::DarkGray),
    )]);
    frame.render_widget(Paragraph::new(footer), chunks[2]);
}
