use ratatui::{
    buffer::Buffer,
    layout::Rect,
    style::{Color, Modifier, Style},
    widgets::Widget,
};

use crate::model::{format_percent, Transfer, TransferId};

pub const ROW_STRIDE: u16 = 4;
pub const NAME_WIDTH: usize = 72;
const NOTICE_COLUMN: u16 = 2;
const NOTICE_ROW: u16 = 1;

pub const HEADER_TITLES: &str =
    "  Done      Have  ETA                 Up        Down  Ratio  Status       Name";

/// Logical style of a drawn segment; mapped to colors by [`Paint::style`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Paint {
    Plain,
    Header,
    SelectedHeader,
    SelectedRow,
    BarFilled,
    BarEmpty,
}

impl Paint {
    pub fn style(self) -> Style {
        match self {
            Paint::Plain => Style::default(),
            Paint::Header => Style::default().add_modifier(Modifier::BOLD),
            Paint::SelectedHeader => Style::default().fg(Color::White).bg(Color::Green),
            Paint::SelectedRow => Style::default().fg(Color::Black).bg(Color::Green),
            Paint::BarFilled => Style::default().fg(Color::Blue).bg(Color::White),
            Paint::BarEmpty => Style::default().fg(Color::White).bg(Color::Blue),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub x: u16,
    pub text: String,
    pub paint: Paint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRow {
    pub y: u16,
    pub segments: Vec<Segment>,
}

impl DrawRow {
    fn single(y: u16, x: u16, text: String, paint: Paint) -> Self {
        Self {
            y,
            segments: vec![Segment { x, text, paint }],
        }
    }
}

/// Lays out every transfer as header, status and progress rows.
pub fn project(transfers: &[Transfer], selected: Option<&TransferId>, width: u16) -> Vec<DrawRow> {
    let mut rows = Vec::with_capacity(transfers.len() * 3);
    for (index, transfer) in transfers.iter().enumerate() {
        let top = (index as u16).saturating_mul(ROW_STRIDE);
        let is_selected = selected == Some(&transfer.id);

        rows.push(if is_selected {
            DrawRow::single(top, 0, pad_to(HEADER_TITLES, width), Paint::SelectedHeader)
        } else {
            DrawRow::single(top, 0, HEADER_TITLES.to_string(), Paint::Header)
        });

        let status = status_line(transfer);
        rows.push(if is_selected {
            DrawRow::single(top.saturating_add(1), 0, pad_to(&status, width), Paint::SelectedRow)
        } else {
            DrawRow::single(top.saturating_add(1), 0, status, Paint::Plain)
        });

        rows.push(progress_row(top.saturating_add(2), width, transfer.percent_done()));
    }
    rows
}

pub fn project_notice(message: &str) -> Vec<DrawRow> {
    vec![DrawRow::single(
        NOTICE_ROW,
        NOTICE_COLUMN,
        message.to_string(),
        Paint::Plain,
    )]
}

pub fn status_line(transfer: &Transfer) -> String {
    let percent = format_percent(transfer.percent_done());
    let have = transfer.have().unwrap_or("N/A");
    let eta = transfer.eta_label();
    let up = transfer.upload_speed().unwrap_or("N/A");
    let down = transfer.download_speed().unwrap_or("N/A");
    let ratio = transfer.ratio().unwrap_or("N/A");
    let state = transfer
        .state()
        .map(|state| state.label().to_string())
        .unwrap_or_else(|| "N/A".to_string());
    let name: String = transfer.name.chars().take(NAME_WIDTH).collect();
    format!(
        "{percent:>6} {have:>9}  {eta:<10} {up:>11} {down:>11} {ratio:>6}  {state:<11}  {name:<30}"
    )
}

/// Filled cells are `floor(width * percent / 100)`, clamped to the width.
pub fn fill_length(width: u16, percent: Option<f64>) -> u16 {
    match percent {
        Some(percent) if percent > 0.0 => {
            let fill = (f64::from(width) * percent / 100.0).floor();
            fill.min(f64::from(width)) as u16
        }
        _ => 0,
    }
}

fn progress_row(y: u16, width: u16, percent: Option<f64>) -> DrawRow {
    let fill = fill_length(width, percent);
    let mut segments = Vec::with_capacity(2);
    if fill > 0 {
        segments.push(Segment {
            x: 0,
            text: " ".repeat(usize::from(fill)),
            paint: Paint::BarFilled,
        });
    }
    if fill < width {
        segments.push(Segment {
            x: fill,
            text: " ".repeat(usize::from(width - fill)),
            paint: Paint::BarEmpty,
        });
    }
    DrawRow { y, segments }
}

/// Shifts rows up so the selected block's last row fits in `height`.
pub fn scroll_to(rows: Vec<DrawRow>, selected_index: Option<usize>, height: u16) -> Vec<DrawRow> {
    let Some(index) = selected_index else {
        return rows;
    };
    let block_bottom = (index as u64 + 1) * u64::from(ROW_STRIDE) - 1;
    let offset = block_bottom.saturating_sub(u64::from(height.saturating_sub(1)));
    let offset = u16::try_from(offset).unwrap_or(u16::MAX);
    if offset == 0 {
        return rows;
    }
    rows.into_iter()
        .filter(|row| row.y >= offset)
        .map(|row| DrawRow {
            y: row.y - offset,
            ..row
        })
        .collect()
}

fn pad_to(text: &str, width: u16) -> String {
    let width = usize::from(width);
    let mut padded: String = text.chars().take(width).collect();
    let missing = width.saturating_sub(padded.chars().count());
    padded.extend(std::iter::repeat(' ').take(missing));
    padded
}

/// Applies draw instructions to a buffer, clipping anything outside `area`.
pub struct DrawList<'a> {
    rows: &'a [DrawRow],
}

impl<'a> DrawList<'a> {
    pub fn new(rows: &'a [DrawRow]) -> Self {
        Self { rows }
    }
}

impl Widget for DrawList<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        for row in self.rows {
            if row.y >= area.height {
                continue;
            }
            let y = area.y + row.y;
            for segment in &row.segments {
                if segment.x >= area.width {
                    continue;
                }
                let x = area.x + segment.x;
                let room = usize::from(area.width - segment.x);
                buf.set_stringn(x, y, &segment.text, room, segment.paint.style());
            }
        }
    }
}
