use std::borrow::Cow;

use super::state::AppState;
use crate::coordinator::state::Phase;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Wrap},
    Frame,
};

const SPINNER_FRAMES: &[char] = &['⠋', '⠙', '⠹', '⠸', '⠼', '⠴', '⠦', '⠧', '⠇', '⠏'];

pub fn draw(f: &mut Frame, state: &AppState, spinner_frame: u8) {
    let authors_height = if state.list_mode() { 3 } else { 0 };
    let approval_height = if state.approval.is_some() { 6 } else { 0 };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(4),
            Constraint::Length(authors_height),
            Constraint::Length(approval_height),
            Constraint::Min(5),
            Constraint::Length(1),
        ])
        .split(f.area());

    draw_header(f, state, chunks[0], spinner_frame);
    if state.list_mode() {
        draw_authors(f, state, chunks[1]);
    }
    if state.approval.is_some() {
        draw_approval(f, state, chunks[2]);
    }
    draw_logs(f, state, chunks[3]);
    draw_footer(f, chunks[4]);
}

fn phase_span(phase: Phase, spinner_frame: u8) -> Span<'static> {
    match phase {
        Phase::Running => {
            let ch = SPINNER_FRAMES[(spinner_frame as usize) % SPINNER_FRAMES.len()];
            Span::styled(format!(" {} RUN", ch), Style::default().fg(Color::Cyan))
        }
        Phase::Paused => Span::styled(" PAUSED", Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)),
        Phase::Stopping => Span::styled(" STOPPING", Style::default().fg(Color::Yellow)),
        Phase::Idle => Span::styled(" IDLE", Style::default().fg(Color::DarkGray)),
    }
}

fn draw_header(f: &mut Frame, state: &AppState, area: Rect, spinner_frame: u8) {
    let s = &state.status;
    let label = Style::default().fg(Color::DarkGray);

    let counts = Line::from(vec![
        phase_span(s.phase, spinner_frame),
        Span::styled(" | Comments: ", label),
        Span::styled(
            format!("{}/{}", s.comment_count, s.max_posts),
            Style::default().fg(Color::Green),
        ),
        Span::styled(" | Today: ", label),
        Span::raw(state.today_count.to_string()),
        Span::styled(" | All time: ", label),
        Span::raw(state.all_time_count.to_string()),
        Span::styled(" | Skipped: ", label),
        Span::raw(s.skipped.to_string()),
        Span::styled(" | Failed: ", label),
        Span::styled(
            s.failed.to_string(),
            Style::default().fg(if s.failed > 0 { Color::Red } else { Color::Reset }),
        ),
        Span::styled(" | Up ", label),
        Span::raw(state.uptime()),
    ]);

    let width = area.width.saturating_sub(4) as usize;
    let status = Line::from(vec![
        Span::raw(" "),
        Span::raw(truncate_with_ellipsis(&s.status, width).into_owned()),
    ]);

    let block = Block::default().title(" feedpilot ").borders(Borders::ALL);
    let para = Paragraph::new(vec![counts, status]).block(block);
    f.render_widget(para, area);
}

fn draw_authors(f: &mut Frame, state: &AppState, area: Rect) {
    let s = &state.status;
    let line = Line::from(vec![
        Span::styled(" Pending ", Style::default().fg(Color::DarkGray)),
        Span::raw(s.authors_pending.to_string()),
        Span::styled("  Found ", Style::default().fg(Color::DarkGray)),
        Span::styled(s.authors_found.to_string(), Style::default().fg(Color::Cyan)),
        Span::styled("  Commented ", Style::default().fg(Color::DarkGray)),
        Span::styled(s.authors_commented.to_string(), Style::default().fg(Color::Green)),
        Span::styled("  Missing ", Style::default().fg(Color::DarkGray)),
        Span::styled(s.authors_missing.to_string(), Style::default().fg(Color::Yellow)),
    ]);
    let block = Block::default().title(" Target list ").borders(Borders::ALL);
    f.render_widget(Paragraph::new(line).block(block), area);
}

fn draw_approval(f: &mut Frame, state: &AppState, area: Rect) {
    let Some(req) = &state.approval else {
        return;
    };
    let width = area.width.saturating_sub(12) as usize;
    let lines = vec![
        Line::from(vec![
            Span::styled(" Author  ", Style::default().fg(Color::DarkGray)),
            Span::raw(req.author.clone()),
        ]),
        Line::from(vec![
            Span::styled(" Post    ", Style::default().fg(Color::DarkGray)),
            Span::raw(truncate_with_ellipsis(&req.caption, width).into_owned()),
        ]),
        Line::from(vec![
            Span::styled(" Comment ", Style::default().fg(Color::DarkGray)),
            Span::styled(req.comment.clone(), Style::default().fg(Color::Cyan)),
        ]),
    ];
    let block = Block::default()
        .title(" Approve comment? [a]/[d] ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));
    let para = Paragraph::new(lines).block(block).wrap(Wrap { trim: true });
    f.render_widget(para, area);
}

fn draw_logs(f: &mut Frame, state: &AppState, area: Rect) {
    let max_width = area.width.saturating_sub(2) as usize; // borders
    let visible_lines = area.height.saturating_sub(2) as usize;

    let total = state.logs.len();
    let offset = state.log_scroll_offset.min(total.saturating_sub(visible_lines));

    let lines: Vec<Line> = state
        .logs
        .iter()
        .rev()
        .skip(offset)
        .take(visible_lines)
        .map(|l| {
            let color = match l.level.as_str() {
                "ERROR" => Color::Red,
                "WARN" => Color::Yellow,
                "APPROVE" => Color::Cyan,
                _ => Color::DarkGray,
            };
            let prefix = format!(" {} [{}] ", l.time, l.level);
            let msg_max = max_width.saturating_sub(prefix.len());
            let msg = truncate_with_ellipsis(&l.message, msg_max);
            Line::from(vec![
                Span::styled(prefix, Style::default().fg(color)),
                Span::raw(msg.into_owned()),
            ])
        })
        .collect();

    let title = if offset > 0 {
        format!(" Activity [{}/{} lines] ", offset + visible_lines.min(total), total)
    } else {
        " Activity ".to_string()
    };
    let block = Block::default().title(title).borders(Borders::ALL);
    f.render_widget(Paragraph::new(lines).block(block), area);
}

fn draw_footer(f: &mut Frame, area: Rect) {
    let key = Style::default().fg(Color::Yellow);
    let line = Line::from(vec![
        Span::styled("  [s]", key),
        Span::raw("tart  "),
        Span::styled("[x]", key),
        Span::raw(" stop  "),
        Span::styled("[p]", key),
        Span::raw("ause  "),
        Span::styled("[r]", key),
        Span::raw("esume  "),
        Span::styled("[z]", key),
        Span::raw(" reset  "),
        Span::styled("[a]", key),
        Span::raw("pprove  "),
        Span::styled("[d]", key),
        Span::raw("ecline  "),
        Span::styled("[j/k]", key),
        Span::raw(" scroll  "),
        Span::styled("[q]", key),
        Span::raw("uit"),
    ]);
    f.render_widget(Paragraph::new(line), area);
}

fn truncate_with_ellipsis(s: &str, max_width: usize) -> Cow<'_, str> {
    let char_count = s.chars().count();
    if char_count <= max_width {
        Cow::Borrowed(s)
    } else if max_width <= 3 {
        Cow::Owned(".".repeat(max_width))
    } else {
        let end = s
            .char_indices()
            .nth(max_width - 3)
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        Cow::Owned(format!("{}...", &s[..end]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_with_ellipsis() {
        assert_eq!(truncate_with_ellipsis("short", 10), "short");
        assert_eq!(truncate_with_ellipsis("a longer status line", 10), "a longe...");
        assert_eq!(truncate_with_ellipsis("abcdef", 2), "..");
    }
}
