use anyhow::Result;
use chrono::Local;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
};
use std::io::stdout;

use crate::controller::{Notice, NoticeLevel, SyncPhase, ViewController};
use crate::models::{FilterSpec, Scorecard, SortKey, SortSpec, Stage, SCORE_FACTORS};
use crate::store::RecordStore;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Normal,
    Search,
}

struct AppState<'a> {
    view: ViewController<'a>,
    store: &'a dyn RecordStore,
    mode: Mode,
    scroll_offset: u16,
    scorecard: Option<Scorecard>,
    scored_id: Option<i64>,
    notice: Option<Notice>,
}

impl<'a> AppState<'a> {
    fn new(store: &'a dyn RecordStore, view: ViewController<'a>) -> Self {
        Self {
            view,
            store,
            mode: Mode::Normal,
            scroll_offset: 0,
            scorecard: None,
            scored_id: None,
            notice: None,
        }
    }

    /// Keeps the newest notice for the status line.
    fn collect_notices(&mut self) {
        if let Some(last) = self.view.drain_notices().pop() {
            self.notice = Some(last);
        }
    }

    fn load_scorecard(&mut self) {
        let focused = self.view.focused_record().map(|r| r.id);
        if focused == self.scored_id {
            return;
        }
        self.scored_id = focused;
        self.scroll_offset = 0;
        self.scorecard = focused.and_then(|id| self.store.list_scores(id).ok());
    }

    fn set_stage(&mut self, stage: Stage) {
        let Some(record) = self.view.focused_record() else { return };
        if record.stage == stage {
            return;
        }
        let mut updated = record.clone();
        updated.stage = stage;
        updated.last_update = Some(Local::now().date_naive());
        self.view.update(updated);
    }

    fn delete_focused(&mut self) {
        if let Some(id) = self.view.focused_record().map(|r| r.id) {
            self.view.delete(id);
        }
    }

    // None, then each column ascending in turn, then back to None.
    fn cycle_sort(&mut self) {
        self.view.edit_spec(|spec| {
            spec.sort = match spec.sort {
                None => Some(SortSpec {
                    key: SortKey::ALL[0],
                    direction: Default::default(),
                }),
                Some(sort) if sort.key == SortKey::ALL[SortKey::ALL.len() - 1] => None,
                Some(sort) => Some(SortSpec {
                    key: sort.key.next(),
                    direction: sort.direction,
                }),
            }
        });
    }

    fn flip_sort(&mut self) {
        self.view.edit_spec(|spec| {
            if let Some(sort) = spec.sort.as_mut() {
                sort.direction = sort.direction.flipped();
            }
        });
    }

    fn scroll_down(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_add(3);
    }

    fn scroll_up(&mut self) {
        self.scroll_offset = self.scroll_offset.saturating_sub(3);
    }
}

/// Interactive browser over `view`, which should already carry the
/// initial filter spec.
pub fn run_browse<'a>(store: &'a dyn RecordStore, view: ViewController<'a>) -> Result<()> {
    let mut state = AppState::new(store, view);
    state.view.mount();
    if state.view.records().is_empty() {
        match state.view.drain_notices().pop() {
            Some(notice) if notice.level == NoticeLevel::Error => println!("{}", notice.message),
            _ => println!("No applications found."),
        }
        return Ok(());
    }
    state.view.focus_next();
    state.collect_notices();
    state.load_scorecard();

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let result = run_loop(&mut terminal, &mut state);

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    result
}

fn run_loop(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, state: &mut AppState) -> Result<()> {
    let mut list_state = ListState::default();

    loop {
        list_state.select(state.view.focused());
        terminal.draw(|frame| draw(frame, state, &mut list_state))?;

        let Event::Key(key) = event::read()? else { continue };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        match state.mode {
            Mode::Search => match key.code {
                KeyCode::Enter | KeyCode::Esc => state.mode = Mode::Normal,
                KeyCode::Backspace => state.view.edit_spec(|s| {
                    s.search_query.pop();
                }),
                KeyCode::Char(c) => state.view.edit_spec(|s| s.search_query.push(c)),
                _ => {}
            },
            Mode::Normal => match key.code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Down | KeyCode::Char('j') => state.view.focus_next(),
                KeyCode::Up | KeyCode::Char('k') => state.view.focus_prev(),
                KeyCode::Char('J') | KeyCode::PageDown => state.scroll_down(),
                KeyCode::Char('K') | KeyCode::PageUp => state.scroll_up(),
                KeyCode::Char('/') => state.mode = Mode::Search,
                KeyCode::Char('h') => state.view.edit_spec(|s| s.hide_negative_outcomes = !s.hide_negative_outcomes),
                KeyCode::Char('s') => state.cycle_sort(),
                KeyCode::Char('S') => state.flip_sort(),
                KeyCode::Char('0') => state.view.edit_spec(|s| s.selected_stages.clear()),
                KeyCode::Char(c @ '1'..='9') => {
                    let idx = (c as u8 - b'1') as usize;
                    state.view.edit_spec(|s| s.toggle_stage(Stage::ALL[idx]));
                }
                KeyCode::Char('a') => state.set_stage(Stage::Applied),
                KeyCode::Char('i') => state.set_stage(Stage::Interview1),
                KeyCode::Char('o') => state.set_stage(Stage::Offer),
                KeyCode::Char('x') => state.set_stage(Stage::Rejected),
                KeyCode::Char('g') => state.set_stage(Stage::Ghosted),
                KeyCode::Char('d') => state.delete_focused(),
                KeyCode::Char('r') => {
                    state.view.refetch();
                }
                _ => {}
            },
        }
        state.collect_notices();
        state.load_scorecard();
    }
    Ok(())
}

fn stage_style(stage: Stage) -> Style {
    match stage {
        Stage::Offer | Stage::OfferAccepted => Style::default().fg(Color::Green),
        s if s.is_negative() => Style::default().fg(Color::Red),
        s if s.is_interviewing() => Style::default().fg(Color::Cyan),
        _ => Style::default(),
    }
}

fn stage_icon(stage: Stage) -> &'static str {
    match stage {
        Stage::Applied => " ",
        Stage::Offer | Stage::OfferAccepted => "$",
        s if s.is_negative() => "x",
        _ => "*",
    }
}

fn filter_summary(spec: &FilterSpec) -> String {
    if spec.is_empty() {
        return "no filters".to_string();
    }
    let mut parts = Vec::new();
    if !spec.search_query.is_empty() {
        parts.push(format!("search \"{}\"", spec.search_query));
    }
    for filter in &spec.filters {
        parts.push(format!("{}={}", filter.field, filter.label));
    }
    if !spec.selected_stages.is_empty() {
        let names: Vec<&str> = spec.selected_stages.iter().map(|s| s.as_str()).collect();
        parts.push(format!("stages [{}]", names.join(", ")));
    }
    if spec.hide_negative_outcomes {
        parts.push("hiding negative outcomes".to_string());
    }
    if !spec.date_range.is_unbounded() {
        let fmt = |d: Option<chrono::NaiveDate>| d.map(|d| d.to_string()).unwrap_or_else(|| "..".to_string());
        parts.push(format!("applied {} to {}", fmt(spec.date_range.start), fmt(spec.date_range.end)));
    }
    if let Some(sort) = spec.sort {
        parts.push(format!("sort {} {}", sort.key.as_str(), sort.direction.as_str()));
    }
    parts.join(" | ")
}

fn draw(frame: &mut Frame, state: &AppState, list_state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(0), Constraint::Length(1), Constraint::Length(1)])
        .split(frame.area());

    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(rows[0]);

    // Left panel: visible applications
    let visible = state.view.visible();
    let items: Vec<ListItem> = visible
        .iter()
        .map(|record| {
            let title = if record.job_title.chars().count() > 30 {
                format!("{}...", record.job_title.chars().take(27).collect::<String>())
            } else {
                record.job_title.clone()
            };
            ListItem::new(Line::from(vec![
                Span::styled(stage_icon(record.stage), stage_style(record.stage)),
                Span::raw(format!(" #{:<4} {} | {}", record.id, record.employer, title)),
            ]))
        })
        .collect();

    // Idle after loading means the last store call failed.
    let sync = match state.view.phase() {
        SyncPhase::Idle => " [not synced]",
        _ => "",
    };
    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title(format!(
            " Applications ({}/{}){} ",
            visible.len(),
            state.view.records().len(),
            sync
        )))
        .highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD))
        .highlight_symbol("> ");

    frame.render_stateful_widget(list, chunks[0], list_state);

    // Right panel: detail
    let detail_widget = Paragraph::new(build_detail(state))
        .block(Block::default().borders(Borders::ALL).title(" Detail "))
        .wrap(Wrap { trim: false })
        .scroll((state.scroll_offset, 0));
    frame.render_widget(detail_widget, chunks[1]);

    // Status line: search prompt, newest notice, or the active filters
    let status = match (&state.mode, &state.notice) {
        (Mode::Search, _) => Paragraph::new(format!(" /{}", state.view.spec().search_query))
            .style(Style::default().fg(Color::Yellow)),
        (Mode::Normal, Some(notice)) => {
            let color = match notice.level {
                NoticeLevel::Success => Color::Green,
                NoticeLevel::Info => Color::Blue,
                NoticeLevel::Error => Color::Red,
            };
            Paragraph::new(format!(" {}  [{}]", notice.message, filter_summary(state.view.spec())))
                .style(Style::default().fg(color))
        }
        (Mode::Normal, None) => Paragraph::new(format!(" [{}]", filter_summary(state.view.spec()))),
    };
    frame.render_widget(status, rows[1]);

    let help = Paragraph::new(
        " j/k:move /:search h:hide neg s/S:sort 1-9/0:stages a/i/o/x/g:set stage d:delete r:reload q:quit",
    )
    .style(Style::default().fg(Color::DarkGray));
    frame.render_widget(help, rows[2]);
}

fn build_detail<'a>(state: &'a AppState) -> Text<'a> {
    let Some(record) = state.view.focused_record() else {
        return Text::raw("No application selected");
    };
    let today = Local::now().date_naive();

    let mut lines: Vec<Line> = Vec::new();

    // Header
    lines.push(Line::from(Span::styled(
        record.job_title.clone(),
        Style::default().add_modifier(Modifier::BOLD),
    )));
    lines.push(Line::from(format!("at {} ({})", record.employer, record.city_town)));
    lines.push(Line::from(Span::styled(
        format!("Stage: {}", record.stage),
        stage_style(record.stage),
    )));

    if !record.general_role.is_empty() || !record.job_level.is_empty() {
        lines.push(Line::from(format!("Role: {} / {}", record.general_role, record.job_level)));
    }
    if let Some(sector) = &record.sector {
        lines.push(Line::from(format!("Sector: {}", sector)));
    }

    let counts = record.day_counts(today);
    let days = |d: Option<i64>| d.map(|d| format!("{}d", d)).unwrap_or_else(|| "-".to_string());
    if let Some(applied) = record.applied_on {
        lines.push(Line::from(format!("Applied: {} ({} ago)", applied, days(counts.da_now))));
    }
    if let Some(updated) = record.last_update {
        lines.push(Line::from(format!(
            "Last update: {} ({} ago, {} after applying)",
            updated,
            days(counts.lu_now),
            days(counts.da_lu)
        )));
    }
    if let Some(date) = record.interview_date {
        let time = record
            .interview_time
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_else(|| "time TBD".to_string());
        lines.push(Line::from(Span::styled(
            format!("Interview: {} at {}", date, time),
            Style::default().fg(Color::Yellow),
        )));
    }
    for (label, link) in [("Website", &record.company_website), ("Posting", &record.role_link)] {
        if let Some(link) = link {
            lines.push(Line::from(format!("{}: {}", label, link)));
        }
    }

    lines.push(Line::from(""));

    // Scorecard
    if let Some(card) = state.scorecard.as_ref().filter(|c| !c.scores.is_empty()) {
        lines.push(Line::from(Span::styled(
            format!(
                "SCORECARD {}/{} ({:.0}%)",
                card.total(),
                Scorecard::max_total(),
                card.percentage()
            ),
            Style::default().add_modifier(Modifier::BOLD),
        )));
        for factor in &SCORE_FACTORS {
            if let Some(value) = card.scores.get(factor.id) {
                lines.push(Line::from(format!("  {:<18} {:>2}/{}", factor.name, value, factor.max)));
            }
        }
        lines.push(Line::from(""));
    }

    // Notes and description
    for (label, text) in [("NOTES", &record.notes), ("DESCRIPTION", &record.job_description)] {
        let Some(text) = text.as_deref().filter(|t| !t.trim().is_empty()) else { continue };
        lines.push(Line::from(Span::styled(label, Style::default().add_modifier(Modifier::BOLD))));
        for line in textwrap::fill(text, 70).lines() {
            lines.push(Line::from(format!("  {}", line)));
        }
        lines.push(Line::from(""));
    }

    Text::from(lines)
}
