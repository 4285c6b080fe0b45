use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap},
    Frame,
};
use unicode_width::UnicodeWidthStr;

use typeflow::history::HistoryStore;
use typeflow::AlertKind;

use crate::{App, AppState, Toast};

const HORIZONTAL_MARGIN: u16 = 2;
const VERTICAL_MARGIN: u16 = 1;
const TOAST_HEIGHT: u16 = 3;

pub fn draw(app: &App, f: &mut Frame) {
    match app.state {
        AppState::Typing => draw_typing(app, f),
        AppState::Summary => draw_summary(app, f),
        AppState::History => draw_history(app, f),
    }
}

fn draw_typing(app: &App, f: &mut Frame) {
    let area = f.area();
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let dim_style = Style::default().add_modifier(Modifier::DIM);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Min(3),    // revealed text
            Constraint::Length(1), // rates
            Constraint::Length(1), // legend
        ])
        .split(area);

    let title = match (
        app.session.path().and_then(|p| p.file_name()),
        app.session.encoding(),
    ) {
        (Some(name), Some(encoding)) => {
            format!(" {} ({}) ", name.to_string_lossy(), encoding)
        }
        (Some(name), None) => format!(" {} ", name.to_string_lossy()),
        _ => String::new(),
    };
    let block = Block::default().borders(Borders::ALL).title(title);
    let inner = block.inner(chunks[0]);

    let revealed = app.session.revealed();
    let scroll = scroll_offset(revealed, inner.width, inner.height);
    let mut lines: Vec<Line> = revealed
        .split('\n')
        .map(|line| Line::from(Span::styled(line, bold_style)))
        .collect();
    if let Some(last) = lines.last_mut() {
        last.push_span(Span::styled("_", dim_style.add_modifier(Modifier::SLOW_BLINK)));
    }
    let text = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((scroll, 0));
    f.render_widget(text, chunks[0]);

    let rates = app.session.monitor().snapshot();
    let status = if app.session.has_started() {
        format!(
            "speed {:.1}/min  average {:.1}/min  keys {}",
            rates.instantaneous, rates.average, rates.total
        )
    } else {
        "start typing, any key reveals the next character".to_owned()
    };
    f.render_widget(
        Paragraph::new(Span::styled(status, bold_style)).alignment(Alignment::Left),
        chunks[1],
    );

    f.render_widget(
        Paragraph::new(Span::styled("(esc) stop  (ctrl+c) quit", dim_style))
            .alignment(Alignment::Right),
        chunks[2],
    );

    if let Some(toast) = &app.toast {
        draw_toast(toast, area, f);
    }
}

fn draw_toast(toast: &Toast, area: Rect, f: &mut Frame) {
    let (title, color) = match toast.alert.kind {
        AlertKind::TooFast => (" too fast ", Color::Red),
        AlertKind::TooSlow => (" too slow ", Color::Yellow),
    };

    let width = (toast.alert.message.width() as u16 + 4).min(area.width);
    let height = TOAST_HEIGHT.min(area.height);
    let rect = Rect::new(area.x + area.width - width, area.y, width, height);

    let paragraph = Paragraph::new(toast.alert.message.as_str())
        .style(Style::default().fg(color))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(color).add_modifier(Modifier::BOLD))
                .title(title),
        );

    f.render_widget(Clear, rect);
    f.render_widget(paragraph, rect);
}

fn draw_summary(app: &App, f: &mut Frame) {
    let area = f.area();
    let bold_style = Style::default().add_modifier(Modifier::BOLD);
    let dim_style = Style::default().add_modifier(Modifier::DIM);
    let stats = app.session.stats();

    let lines = vec![
        Line::from(Span::styled(
            "session complete",
            bold_style.fg(Color::Green),
        )),
        Line::from(""),
        Line::from(format!("{} wpm", stats.wpm)),
        Line::from(format!("{} chars/s", stats.cps)),
        Line::from(format!(
            "{} characters, {} keys in {}s",
            stats.chars, stats.keys, stats.time_s
        )),
        Line::from(format!("{} sessions recorded", app.history.count())),
    ];

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Min(lines.len() as u16),
            Constraint::Length(1), // status
            Constraint::Length(1), // legend
        ])
        .split(area);

    f.render_widget(
        Paragraph::new(lines).alignment(Alignment::Center),
        chunks[0],
    );

    if let Some(status) = &app.status {
        f.render_widget(
            Paragraph::new(Span::styled(status.as_str(), Style::default().fg(Color::Red)))
                .alignment(Alignment::Center),
            chunks[1],
        );
    }

    f.render_widget(
        Paragraph::new(Span::styled("(r)etry / (h)istory / (q)uit", dim_style))
            .alignment(Alignment::Center),
        chunks[2],
    );
}

fn draw_history(app: &App, f: &mut Frame) {
    let area = f.area();
    let header_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);

    let header = Row::new(
        ["date", "speed/min", "wpm", "chars", "keys", "time"]
            .into_iter()
            .map(|h| Cell::from(h).style(header_style)),
    );
    let rows = app.recent.iter().map(|r| {
        Row::new(vec![
            Cell::from(r.timestamp.clone()),
            Cell::from(format!("{:.2}", r.speed)),
            Cell::from(format!("{:.2}", r.wpm_estimated)),
            Cell::from(r.typed_chars.to_string()),
            Cell::from(r.total_keystrokes.to_string()),
            Cell::from(format!("{:.2}s", r.duration)),
        ])
    });
    let widths = [
        Constraint::Length(19),
        Constraint::Length(10),
        Constraint::Length(8),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(9),
    ];

    let title = if app.recent.is_empty() {
        " history (empty) ".to_owned()
    } else {
        format!(" last {} sessions ", app.recent.len())
    };
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title));
    f.render_widget(table, chunks[0]);

    let legend = if app.confirm_clear {
        Span::styled(
            "clear all history? (y)es / (n)o",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )
    } else {
        Span::styled(
            "(b)ack / (c)lear / (q)uit",
            Style::default().add_modifier(Modifier::DIM),
        )
    };
    f.render_widget(
        Paragraph::new(legend).alignment(Alignment::Center),
        chunks[1],
    );
}

/// Rows to scroll so the end of `text` stays visible in a box of the given
/// size. Counts display width, so wide characters take two columns.
fn scroll_offset(text: &str, width: u16, height: u16) -> u16 {
    if width == 0 {
        return 0;
    }
    let width = width as usize;
    // the trailing cursor takes one column
    let rows: usize = format!("{text}_")
        .split('\n')
        .map(|line| line.width().div_ceil(width).max(1))
        .sum();
    rows.saturating_sub(height as usize).min(u16::MAX as usize) as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_does_not_scroll() {
        assert_eq!(scroll_offset("hello", 20, 3), 0);
        assert_eq!(scroll_offset("", 20, 3), 0);
    }

    #[test]
    fn long_text_scrolls_to_the_end() {
        // 4 rows of 10 columns, 2 visible
        let text = "a".repeat(39);
        assert_eq!(scroll_offset(&text, 10, 2), 2);
    }

    #[test]
    fn newlines_and_wide_chars_count() {
        assert_eq!(scroll_offset("a\nb\nc\nd", 10, 2), 2);
        // 5 wide chars plus cursor is 11 columns
        assert_eq!(scroll_offset("中文中文中", 10, 1), 1);
    }
}
