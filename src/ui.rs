use crate::models::{AppState, EntryStatus, InputMode, LinkEntry, MetadataState, NoticeKind};
use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Margin, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Padding, Paragraph, Wrap},
    Frame,
};

/// Colors for one theme.
struct Palette {
    bg: Color,
    input_bg: Color,
    accent: Color,
    text: Color,
    dim: Color,
    placeholder: Color,
    yellow: Color,
    green: Color,
    red: Color,
    selection: Color,
}

const DARK: Palette = Palette {
    bg: Color::Rgb(0, 0, 0),
    input_bg: Color::Rgb(28, 28, 32),
    accent: Color::Rgb(100, 140, 200),
    text: Color::Rgb(200, 200, 200),
    dim: Color::Rgb(100, 100, 100),
    placeholder: Color::Rgb(70, 70, 70),
    yellow: Color::Rgb(220, 180, 100),
    green: Color::Rgb(130, 190, 130),
    red: Color::Rgb(200, 100, 100),
    selection: Color::Rgb(35, 35, 45),
};

const LIGHT: Palette = Palette {
    bg: Color::Rgb(248, 248, 250),
    input_bg: Color::Rgb(232, 232, 238),
    accent: Color::Rgb(33, 150, 243),
    text: Color::Rgb(30, 30, 34),
    dim: Color::Rgb(120, 120, 128),
    placeholder: Color::Rgb(160, 160, 168),
    yellow: Color::Rgb(180, 120, 20),
    green: Color::Rgb(40, 140, 70),
    red: Color::Rgb(200, 50, 50),
    selection: Color::Rgb(220, 228, 245),
};

fn palette(state: &AppState) -> &'static Palette {
    if state.config.dark_mode {
        &DARK
    } else {
        &LIGHT
    }
}

pub fn render(frame: &mut Frame, state: &AppState) {
    let area = frame.area();
    let p = palette(state);

    frame.render_widget(Clear, area);
    frame.render_widget(Block::default().style(Style::default().bg(p.bg)), area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // Header
            Constraint::Min(5),    // Links
            Constraint::Length(3), // Input box
            Constraint::Length(1), // Toolbar
            Constraint::Length(1), // Shortcuts
        ])
        .split(area);

    render_header(frame, chunks[0], state, p);
    if state.has_entries() {
        render_link_list(frame, chunks[1], state, p);
    } else {
        render_empty_hint(frame, chunks[1], p);
    }
    render_input_box(frame, chunks[2].inner(Margin::new(2, 0)), state, p);
    render_toolbar(frame, chunks[3], state, p);
    render_shortcuts(frame, chunks[4], state, p);

    if state.show_about {
        render_about(frame, area, p);
    } else if let Some(notice) = state.notices.front() {
        let color = match notice.kind {
            NoticeKind::Info => p.accent,
            NoticeKind::Warning => p.yellow,
        };
        render_popup(frame, area, p, &notice.title, &notice.message, color);
    }
}

fn render_header(frame: &mut Frame, area: Rect, state: &AppState, p: &Palette) {
    let mut spans = vec![Span::styled(
        "  ytdx",
        Style::default().fg(p.accent).add_modifier(Modifier::BOLD),
    )];
    if state.has_entries() {
        spans.push(Span::styled(
            format!(
                "   {} links · {} active · {} done · {} failed",
                state.entries.len(),
                state.active_count(),
                state.completed_count(),
                state.failed_count()
            ),
            Style::default().fg(p.dim),
        ));
    }
    let theme = if state.config.dark_mode { "dark" } else { "light" };
    let header = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Min(0), Constraint::Length(10)])
        .split(area);
    frame.render_widget(Paragraph::new(Line::from(spans)), header[0]);
    frame.render_widget(
        Paragraph::new(Span::styled(theme, Style::default().fg(p.dim))).alignment(Alignment::Right),
        header[1],
    );
}

fn render_empty_hint(frame: &mut Frame, area: Rect, p: &Palette) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Percentage(45), Constraint::Length(1), Constraint::Min(0)])
        .split(area);
    let hint = Paragraph::new(Span::styled(
        "paste a YouTube, TikTok, Instagram or any video link below",
        Style::default().fg(p.dim),
    ))
    .alignment(Alignment::Center);
    frame.render_widget(hint, chunks[1]);
}

fn render_input_box(frame: &mut Frame, area: Rect, state: &AppState, p: &Palette) {
    let (label, value, placeholder) = match &state.mode {
        InputMode::Url => ("", state.input_buffer.as_str(), "paste a url..."),
        InputMode::Folder(buffer) => ("save to: ", buffer.as_str(), "type a folder path..."),
    };

    let (text, color) = if value.is_empty() {
        (format!(" {label}{placeholder}"), p.placeholder)
    } else {
        (format!(" {label}{value}_"), p.accent)
    };

    let input = Paragraph::new(text)
        .style(Style::default().fg(color).bg(p.input_bg))
        .block(
            Block::default()
                .style(Style::default().bg(p.input_bg))
                .padding(Padding::vertical(1)),
        );
    frame.render_widget(input, area);
}

fn render_link_list(frame: &mut Frame, area: Rect, state: &AppState, p: &Palette) {
    let list_area = area.inner(Margin::new(2, 1));

    let items: Vec<ListItem> = state
        .entries
        .iter()
        .enumerate()
        .flat_map(|(idx, entry)| {
            let row_style = if idx == state.selected_index {
                Style::default().bg(p.selection)
            } else {
                Style::default()
            };

            let mut items = vec![ListItem::new(entry_line(entry, p)).style(row_style)];
            if entry.status == EntryStatus::Downloading {
                items.push(ListItem::new(progress_line(entry, p)).style(row_style));
            }
            items
        })
        .collect();

    frame.render_widget(List::new(items), list_area);
}

fn status_glyph(status: &EntryStatus, p: &Palette) -> (&'static str, Color) {
    match status {
        EntryStatus::Idle => ("○", p.dim),
        EntryStatus::Queued => ("◌", p.yellow),
        EntryStatus::Downloading => ("●", p.accent),
        EntryStatus::Complete => ("✓", p.green),
        EntryStatus::Failed => ("✗", p.red),
        EntryStatus::Cancelled => ("-", p.dim),
    }
}

fn entry_line(entry: &LinkEntry, p: &Palette) -> Line<'static> {
    let (symbol, color) = status_glyph(&entry.status, p);
    let mark = if entry.marked { "▌" } else { " " };

    let title = truncate(&entry.display_title(), 60);
    let title_style = match entry.metadata {
        MetadataState::Pending => Style::default().fg(p.dim).add_modifier(Modifier::ITALIC),
        _ => Style::default().fg(p.text),
    };

    let mut spans = vec![
        Span::styled(mark, Style::default().fg(p.accent)),
        Span::styled(format!("{symbol} "), Style::default().fg(color)),
        Span::styled(
            format!("{:<12}", entry.status.label()),
            Style::default().fg(color).add_modifier(Modifier::DIM),
        ),
        Span::styled(title, title_style),
    ];

    match entry.metadata {
        MetadataState::Pending => spans.push(Span::styled(
            "  fetching info…",
            Style::default().fg(p.placeholder),
        )),
        _ => {
            if let Some(thumb) = &entry.thumbnail {
                spans.push(Span::styled(
                    format!("  [thumb {} KB]", thumb.len().div_ceil(1024)),
                    Style::default().fg(p.dim),
                ));
            }
        }
    }

    match entry.status {
        EntryStatus::Complete => {
            if let Some(path) = &entry.output_path {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| path.display().to_string());
                spans.push(Span::styled(
                    format!("  {}", truncate(&name, 30)),
                    Style::default().fg(p.dim).add_modifier(Modifier::DIM),
                ));
            }
        }
        EntryStatus::Failed => {
            if let Some(error) = &entry.error {
                spans.push(Span::styled(
                    format!("  {}", truncate(error, 50)),
                    Style::default().fg(p.red),
                ));
            }
        }
        _ => {}
    }

    Line::from(spans)
}

fn progress_line(entry: &LinkEntry, p: &Palette) -> Line<'static> {
    let bar_width = 30;
    let filled = ((entry.progress / 100.0) * bar_width as f64).clamp(0.0, bar_width as f64) as usize;
    let empty = bar_width - filled;

    let mut spans = vec![
        Span::raw("    "),
        Span::styled("█".repeat(filled), Style::default().fg(p.accent)),
        Span::styled("░".repeat(empty), Style::default().fg(p.input_bg)),
        Span::styled(
            format!(" {:5.1}%", entry.progress),
            Style::default().fg(p.text).add_modifier(Modifier::BOLD),
        ),
    ];
    if let Some(speed) = &entry.speed {
        spans.push(Span::styled(format!("  {speed}"), Style::default().fg(p.dim)));
    }
    if let Some(eta) = &entry.eta {
        spans.push(Span::styled(
            format!("  eta {eta}"),
            Style::default().fg(p.dim).add_modifier(Modifier::DIM),
        ));
    }
    Line::from(spans)
}

fn render_toolbar(frame: &mut Frame, area: Rect, state: &AppState, p: &Palette) {
    let folder = state.config.last_folder.display().to_string();
    let line = Line::from(vec![
        Span::styled("  format ", Style::default().fg(p.dim)),
        Span::styled(
            state.config.format_preset.label(),
            Style::default().fg(p.accent),
        ),
        Span::styled("   save to ", Style::default().fg(p.dim)),
        Span::styled(truncate_start(&folder, 50), Style::default().fg(p.text)),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn render_shortcuts(frame: &mut Frame, area: Rect, state: &AppState, p: &Palette) {
    let shortcuts: &[(&str, &str)] = if matches!(state.mode, InputMode::Folder(_)) {
        &[("enter", "confirm"), ("esc", "cancel")]
    } else if !state.input_buffer.is_empty() {
        &[("enter", "add"), ("ctrl+v", "paste"), ("esc", "clear")]
    } else if state.has_entries() {
        &[
            ("enter", "add"),
            ("s", "save all"),
            ("d", "remove"),
            ("space", "mark"),
            ("r", "retry"),
            ("x", "stop"),
            ("p", "format"),
            ("f", "folder"),
            ("o", "open"),
            ("t", "theme"),
            ("?", "about"),
            ("q", "quit"),
        ]
    } else {
        &[
            ("enter", "add"),
            ("ctrl+v", "paste"),
            ("p", "format"),
            ("f", "folder"),
            ("t", "theme"),
            ("?", "about"),
            ("q", "quit"),
        ]
    };
    let widget = Paragraph::new(shortcuts_line(shortcuts, p)).alignment(Alignment::Center);
    frame.render_widget(widget, area);
}

fn shortcuts_line(shortcuts: &[(&str, &str)], p: &Palette) -> Line<'static> {
    let mut spans: Vec<Span> = Vec::new();
    for (i, (key, desc)) in shortcuts.iter().enumerate() {
        if i > 0 {
            spans.push(Span::styled(" · ", Style::default().fg(p.dim)));
        }
        spans.push(Span::styled(key.to_string(), Style::default().fg(p.accent)));
        spans.push(Span::styled(format!(" {desc}"), Style::default().fg(p.dim)));
    }
    Line::from(spans)
}

fn render_popup(frame: &mut Frame, area: Rect, p: &Palette, title: &str, message: &str, color: Color) {
    let popup = centered(area, 56, 7);
    frame.render_widget(Clear, popup);
    let body = Paragraph::new(vec![
        Line::from(Span::styled(message.to_string(), Style::default().fg(p.text))),
        Line::from(""),
        Line::from(Span::styled("enter to close", Style::default().fg(p.dim))),
    ])
    .alignment(Alignment::Center)
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(color))
            .title(Span::styled(
                format!(" {title} "),
                Style::default().fg(color).add_modifier(Modifier::BOLD),
            ))
            .style(Style::default().bg(p.input_bg))
            .padding(Padding::horizontal(1)),
    );
    frame.render_widget(body, popup);
}

fn render_about(frame: &mut Frame, area: Rect, p: &Palette) {
    let popup = centered(area, 60, 12);
    frame.render_widget(Clear, popup);
    let lines = vec![
        Line::from(Span::styled(
            format!("ytdx v{}", env!("CARGO_PKG_VERSION")),
            Style::default().fg(p.accent).add_modifier(Modifier::BOLD),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "Queue video links, pick a format, save them all.",
            Style::default().fg(p.text),
        )),
        Line::from(Span::styled(
            "Downloads are done by yt-dlp; merging by ffmpeg.",
            Style::default().fg(p.text),
        )),
        Line::from(""),
        Line::from(Span::styled(
            "No ads. No trackers. Free and open source.",
            Style::default().fg(p.dim),
        )),
        Line::from(""),
        Line::from(Span::styled("enter to close", Style::default().fg(p.dim))),
    ];
    let body = Paragraph::new(lines).alignment(Alignment::Center).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(p.accent))
            .title(" about ")
            .style(Style::default().bg(p.input_bg))
            .padding(Padding::vertical(1)),
    );
    frame.render_widget(body, popup);
}

fn centered(container: Rect, max_width: u16, height: u16) -> Rect {
    let width = max_width.min(container.width.saturating_sub(4));
    let height = height.min(container.height);
    let x = container.x + container.width.saturating_sub(width) / 2;
    let y = container.y + container.height.saturating_sub(height) / 2;
    Rect::new(x, y, width, height)
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let head: String = text.chars().take(max.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

/// Keeps the tail of long paths, where the distinguishing part usually is.
fn truncate_start(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count > max {
        let tail: String = text.chars().skip(count - max.saturating_sub(3)).collect();
        format!("...{tail}")
    } else {
        text.to_string()
    }
}
