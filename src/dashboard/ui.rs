//! Pure rendering of `DashboardState` into a `ratatui` frame.
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, Paragraph},
    Frame,
};

use crate::health::Classification;

use super::state::{DashboardState, FocusedPane, Mode};

fn classification_color(c: Classification) -> Color {
    match c {
        Classification::Running => Color::Green,
        Classification::Crashed => Color::Red,
        Classification::Unresponsive => Color::Yellow,
        Classification::Stuck => Color::Magenta,
        Classification::Stopped => Color::Gray,
    }
}

fn classification_label(c: Classification) -> &'static str {
    match c {
        Classification::Running => "running",
        Classification::Crashed => "crashed",
        Classification::Unresponsive => "unresponsive",
        Classification::Stuck => "stuck",
        Classification::Stopped => "stopped",
    }
}

/// Renders the full dashboard into `frame`, given the current state.
pub fn draw(frame: &mut Frame, state: &DashboardState) {
    let root = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(3),
        ])
        .split(frame.area());

    draw_header(frame, state, root[0]);

    let body = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(40), Constraint::Percentage(60)])
        .split(root[1]);

    draw_tasks(frame, state, body[0]);
    draw_agents(frame, state, body[1]);

    draw_footer(frame, state, root[2]);

    match state.active_mode() {
        Mode::DetailModal => draw_detail_modal(frame, state),
        Mode::ConfirmModal => draw_confirm_modal(frame, state),
        Mode::SearchMode => draw_search_bar(frame, state),
        Mode::CreateTaskModal => draw_create_task_modal(frame, state),
        Mode::Normal => {}
    }
}

fn draw_header(frame: &mut Frame, state: &DashboardState, area: Rect) {
    let connection = if state.push_connected { "live" } else { "polling" };
    let refreshed = state
        .last_refresh
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "never".to_string());
    let mut spans = vec![
        Span::styled("fleetctl", Style::default().add_modifier(Modifier::BOLD)),
        Span::raw(format!("  [{connection}]  last refresh {refreshed}")),
    ];
    if let Some(banner) = &state.reload_banner {
        spans.push(Span::styled(
            format!("  {banner}"),
            Style::default().fg(Color::Cyan),
        ));
    }
    let paragraph = Paragraph::new(Line::from(spans)).block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn draw_tasks(frame: &mut Frame, state: &DashboardState, area: Rect) {
    let items: Vec<ListItem> = state
        .tasks
        .iter()
        .enumerate()
        .map(|(i, task)| {
            let style = if i == state.selected_task && state.focus == FocusedPane::Tasks {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            ListItem::new(format!("{:?}  {}", task.status, task.title)).style(style)
        })
        .collect();
    let title = if state.focus == FocusedPane::Tasks {
        "Tasks [focused]"
    } else {
        "Tasks"
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(list, area);
}

fn draw_agents(frame: &mut Frame, state: &DashboardState, area: Rect) {
    let items: Vec<ListItem> = state
        .agents
        .iter()
        .enumerate()
        .map(|(i, agent)| {
            let style = if i == state.selected_agent && state.focus == FocusedPane::Agents {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            let color = classification_color(agent.classification);
            let label = classification_label(agent.classification);
            let task = agent.current_task_id.as_deref().unwrap_or("-");
            ListItem::new(Line::from(vec![
                Span::styled(format!("{:>2}. ", i + 1), Style::default()),
                Span::styled(format!("{:<16}", agent.name), Style::default()),
                Span::styled(format!("{label:<13}"), Style::default().fg(color)),
                Span::raw(format!(" task={task} restarts={}", agent.restart_attempts)),
            ]))
            .style(style)
        })
        .collect();
    let title = if state.focus == FocusedPane::Agents {
        "Agents [focused]"
    } else {
        "Agents"
    };
    let list = List::new(items).block(Block::default().borders(Borders::ALL).title(title));
    frame.render_widget(list, area);
}

fn draw_footer(frame: &mut Frame, state: &DashboardState, area: Rect) {
    let text = if let Some(toast) = &state.toast {
        let color = if toast.ok { Color::Green } else { Color::Red };
        Line::from(Span::styled(toast.text.clone(), Style::default().fg(color)))
    } else {
        Line::from("↑/↓ select  tab focus  v detail  k kill  / search  q quit")
    };
    let paragraph = Paragraph::new(text).block(Block::default().borders(Borders::ALL));
    frame.render_widget(paragraph, area);
}

fn centered_rect(percent_x: u16, percent_y: u16, area: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(area);
    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

fn draw_detail_modal(frame: &mut Frame, state: &DashboardState) {
    let area = centered_rect(60, 60, frame.area());
    frame.render_widget(Clear, area);
    let body = match state.selected_agent() {
        Some(agent) => {
            let mut lines = vec![
                Line::from(format!("name: {}", agent.name)),
                Line::from(format!("status: {}", classification_label(agent.classification))),
                Line::from(format!(
                    "last seen: {}",
                    agent
                        .last_seen
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| "-".into())
                )),
                Line::from(format!(
                    "current task: {}",
                    agent.current_task_id.as_deref().unwrap_or("-")
                )),
                Line::from(format!("restart attempts: {}", agent.restart_attempts)),
                Line::from(format!("failed permanently: {}", agent.failed_permanent)),
                Line::from("phase history:"),
            ];
            lines.extend(agent.phase_history.iter().map(|p| Line::from(format!("  - {p}"))));
            lines
        }
        None => vec![Line::from("no agent selected")],
    };
    let paragraph = Paragraph::new(body).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Agent detail (Esc to close)"),
    );
    frame.render_widget(paragraph, area);
}

fn draw_confirm_modal(frame: &mut Frame, state: &DashboardState) {
    let area = centered_rect(40, 20, frame.area());
    frame.render_widget(Clear, area);
    let name = state.selected_agent().map(|a| a.name.as_str()).unwrap_or("?");
    let paragraph = Paragraph::new(format!("kill '{name}'? y/n")).block(
        Block::default().borders(Borders::ALL).title("Confirm"),
    );
    frame.render_widget(paragraph, area);
}

fn draw_search_bar(frame: &mut Frame, state: &DashboardState) {
    let area = Rect {
        x: frame.area().x,
        y: frame.area().height.saturating_sub(4),
        width: frame.area().width,
        height: 3,
    };
    frame.render_widget(Clear, area);
    let paragraph = Paragraph::new(format!("/{}", state.search_query))
        .block(Block::default().borders(Borders::ALL).title("Search (Esc/Enter to exit)"));
    frame.render_widget(paragraph, area);
}

fn draw_create_task_modal(frame: &mut Frame, state: &DashboardState) {
    let area = centered_rect(50, 20, frame.area());
    frame.render_widget(Clear, area);
    let paragraph = Paragraph::new(format!("title: {}", state.search_query)).block(
        Block::default()
            .borders(Borders::ALL)
            .title("New task (Enter to create, Esc to cancel)"),
    );
    frame.render_widget(paragraph, area);
}
