//! UI rendering and layout utilities

use crate::constants::meter::MAX_DISPLAY_DB;
use crate::stats::AlertState;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph},
};

/// Snapshot of everything the meter screen shows
#[derive(Clone, Debug)]
pub struct UiState {
    pub device_name: String,
    pub reading: f64,
    pub display_db: f64,
    pub threshold_db: f64,
    pub alert: AlertState,
    pub min_db: Option<f64>,
    pub max_db: Option<f64>,
    pub average_db: Option<f64>,
    pub status: String,
}

/// Position of a level on the displayed 0..=120 dB scale
pub fn level_ratio(db: f64) -> f64 {
    (db / MAX_DISPLAY_DB).clamp(0.0, 1.0)
}

fn zone_color(i: usize, width: usize) -> Color {
    if i < width / 3 {
        Color::Green
    } else if i < 2 * width / 3 {
        Color::Yellow
    } else {
        Color::Red
    }
}

/// Create a gradient bar showing the level
pub fn create_gradient_bar(width: usize, ratio: f64) -> Line<'static> {
    let filled = (ratio * width as f64) as usize;
    let partial_fill = (ratio * width as f64) - filled as f64;

    let spans = (0..width)
        .map(|i| {
            let ch = if i < filled {
                '█'
            } else if i == filled && partial_fill > 0.0 {
                match (partial_fill * 8.0) as usize {
                    0 | 1 => '░',
                    2 | 3 => '▒',
                    4 | 5 => '▓',
                    _ => '█',
                }
            } else {
                '░'
            };
            Span::styled(ch.to_string(), Style::default().fg(zone_color(i, width)))
        })
        .collect::<Vec<_>>();

    Line::from(spans)
}

/// Create scale labels with a threshold marker
pub fn create_db_labels(width: usize, threshold_db: f64) -> Line<'static> {
    if width == 0 {
        return Line::default();
    }

    let mut cells = vec![' '; width];
    let mut place = |pos: usize, label: &str| {
        let start = pos.min(width.saturating_sub(label.len()));
        for (offset, ch) in label.chars().enumerate() {
            if let Some(cell) = cells.get_mut(start + offset) {
                *cell = ch;
            }
        }
    };
    let step = MAX_DISPLAY_DB / 3.0;
    place(0, "0");
    place(width / 3, &format!("{:.0}", step));
    place(2 * width / 3, &format!("{:.0}", 2.0 * step));
    place(width - 1, &format!("{:.0}", MAX_DISPLAY_DB));

    let threshold_pos = (level_ratio(threshold_db) * (width - 1) as f64).round() as usize;

    let spans = cells
        .into_iter()
        .enumerate()
        .map(|(i, ch)| {
            if i == threshold_pos {
                Span::styled("▲".to_string(), Style::default().fg(Color::White))
            } else {
                Span::styled(ch.to_string(), Style::default().fg(zone_color(i, width)))
            }
        })
        .collect::<Vec<_>>();

    Line::from(spans)
}

fn format_db(value: Option<f64>) -> String {
    value.map_or_else(|| "--".to_string(), |v| format!("{:.1}", v))
}

/// Render the complete UI
pub fn render_ui(f: &mut Frame, state: &UiState) {
    let size = f.size();

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(4),
        ])
        .split(size);

    let device_block = Block::default().title("Device").borders(Borders::ALL);
    let device_text = Paragraph::new(state.device_name.as_str()).block(device_block);
    f.render_widget(device_text, chunks[0]);

    let status_block = Block::default().title("Status").borders(Borders::ALL);
    let status_text = Paragraph::new(state.status.as_str()).block(status_block);
    f.render_widget(status_text, chunks[1]);

    let stats_text = format!(
        "Threshold: {:.0} dB   Min: {}   Max: {}   Avg: {}",
        state.threshold_db,
        format_db(state.min_db),
        format_db(state.max_db),
        format_db(state.average_db)
    );
    let stats = Paragraph::new(stats_text)
        .block(Block::default().title("Statistics").borders(Borders::ALL));
    f.render_widget(stats, chunks[2]);

    let bar_width =
        (chunks[3].width as usize).saturating_sub(crate::constants::ui::BAR_BORDER_WIDTH);
    let bar_line = create_gradient_bar(bar_width, level_ratio(state.display_db));
    let label_line = create_db_labels(bar_width, state.threshold_db);

    let (title, title_style) = match state.alert {
        AlertState::Alert => (
            format!("ALERT {:.1} dB", state.reading),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        ),
        AlertState::Normal => (format!("Level: {:.1} dB", state.reading), Style::default()),
    };
    let gauge = Paragraph::new(vec![bar_line, label_line]).block(
        Block::default()
            .title(Span::styled(title, title_style))
            .borders(Borders::ALL),
    );
    f.render_widget(gauge, chunks[3]);
}
