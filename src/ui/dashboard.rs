use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{
        Axis, Bar, BarChart, BarGroup, Block, Borders, Chart, Dataset, GraphType, Paragraph, Row,
        Table, Widget, Wrap,
    },
};

use crate::dashboard::{ComparisonSummary, Dashboard, DashboardView};
use crate::puzzle_config::Variant;
use crate::ui::charting::{bar_len, density_bounds, format_label};

fn variant_color(variant: Variant) -> Color {
    match variant {
        Variant::A => Color::Cyan,
        Variant::B => Color::Magenta,
    }
}

pub fn render_dashboard(dashboard: &Dashboard, area: Rect, buf: &mut Buffer) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let italic = Style::default().add_modifier(Modifier::ITALIC);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(1)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(5),
            Constraint::Min(8),
            Constraint::Min(8),
            Constraint::Length(1),
        ])
        .split(area);

    let status = match (dashboard.last_updated_label(), dashboard.is_refreshing()) {
        (_, true) => "Refreshing...".to_string(),
        (Some(label), false) => label,
        (None, false) => String::new(),
    };
    Paragraph::new(Line::from(vec![
        Span::styled("A/B Experiment Dashboard   ", bold),
        Span::styled(status, Style::default().fg(Color::Gray)),
    ]))
    .render(chunks[0], buf);

    match (dashboard.error(), dashboard.view()) {
        (Some(error), _) => render_error(error, chunks[1], buf),
        (None, Some(view)) => render_comparison(&view.comparison, chunks[1], buf),
        (None, None) => Paragraph::new("Loading dashboard data...")
            .style(italic)
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Comparison"))
            .render(chunks[1], buf),
    }

    if let Some(view) = dashboard.view() {
        let middle = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(35), Constraint::Percentage(65)])
            .split(chunks[2]);
        render_avg_times(view, middle[0], buf);
        render_funnel(view, middle[1], buf);

        let bottom = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(chunks[3]);
        render_density(view, bottom[0], buf);
        render_completions(view, bottom[1], buf);
    }

    Paragraph::new(Span::styled("(tab) back to puzzle / (q)uit", italic)).render(chunks[4], buf);
}

fn render_error(error: &str, area: Rect, buf: &mut Buffer) {
    Paragraph::new(vec![
        Line::from(Span::styled(
            "Failed to load dashboard data",
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        Line::from(error.to_string()),
    ])
    .wrap(Wrap { trim: true })
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Red))
            .title("Error"),
    )
    .render(area, buf);
}

fn render_comparison(summary: &ComparisonSummary, area: Rect, buf: &mut Buffer) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let lines = vec![
        Line::from(vec![
            Span::styled("Variant A ", bold.fg(variant_color(Variant::A))),
            Span::raw(format!("{:.2}s avg ({} completions)", summary.a_avg, summary.a_count)),
            Span::raw("    "),
            Span::styled("Variant B ", bold.fg(variant_color(Variant::B))),
            Span::raw(format!("{:.2}s avg ({} completions)", summary.b_avg, summary.b_count)),
        ]),
        Line::from(vec![
            Span::raw("Difference: "),
            Span::styled(summary.diff_label.clone(), bold),
        ]),
        Line::from(Span::styled(summary.status, Style::default().fg(Color::Yellow))),
    ];
    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL).title("Comparison"))
        .render(area, buf);
}

fn render_avg_times(view: &DashboardView, area: Rect, buf: &mut Buffer) {
    let bars: Vec<Bar> = view
        .avg_times
        .iter()
        .map(|&(variant, secs)| {
            Bar::default()
                .value((secs * 100.0).round().max(0.0) as u64)
                .text_value(format!("{secs:.1}s"))
                .label(Line::from(format!("Variant {variant}")))
                .style(Style::default().fg(variant_color(variant)))
        })
        .collect();

    BarChart::default()
        .block(Block::default().borders(Borders::ALL).title("Avg completion time"))
        .data(BarGroup::default().bars(&bars))
        .bar_width(9)
        .bar_gap(2)
        .render(area, buf);
}

fn render_funnel(view: &DashboardView, area: Rect, buf: &mut Buffer) {
    let block = Block::default().borders(Borders::ALL).title("Conversion funnel");
    let inner = block.inner(area);
    block.render(area, buf);

    let label_width = view
        .funnel
        .values()
        .flatten()
        .map(|(stage, _)| stage.chars().count())
        .max()
        .unwrap_or(0);
    let max_count = view
        .funnel
        .values()
        .flatten()
        .map(|&(_, count)| count)
        .max()
        .unwrap_or(0);
    let bar_room = inner
        .width
        .saturating_sub(label_width as u16 + 10)
        .max(1);

    let mut lines = Vec::new();
    for (variant, stages) in &view.funnel {
        let color = variant_color(*variant);
        lines.push(Line::from(Span::styled(
            format!("Variant {variant}"),
            Style::default().fg(color).add_modifier(Modifier::BOLD),
        )));
        for (stage, count) in stages {
            let len = bar_len(*count, max_count, bar_room) as usize;
            lines.push(Line::from(vec![
                Span::raw(format!(" {stage:<label_width$} ")),
                Span::styled("█".repeat(len), Style::default().fg(color)),
                Span::raw(format!(" {count}")),
            ]));
        }
    }
    if lines.is_empty() {
        lines.push(Line::from("No funnel data"));
    }
    Paragraph::new(lines).render(inner, buf);
}

fn render_density(view: &DashboardView, area: Rect, buf: &mut Buffer) {
    let bold = Style::default().add_modifier(Modifier::BOLD);
    let (x_bounds, peak) = density_bounds(view.density.values().map(Vec::as_slice));

    let datasets: Vec<Dataset> = view
        .density
        .iter()
        .filter(|(_, curve)| !curve.is_empty())
        .map(|(variant, curve)| {
            Dataset::default()
                .name(format!("Variant {variant}"))
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(variant_color(*variant)))
                .data(curve)
        })
        .collect();

    Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title("Completion time density"))
        .x_axis(
            Axis::default()
                .title("seconds")
                .bounds(x_bounds)
                .labels(vec![
                    Span::styled(format_label(x_bounds[0]), bold),
                    Span::styled(format_label(x_bounds[1]), bold),
                ]),
        )
        .y_axis(
            Axis::default()
                .bounds([0.0, peak])
                .labels(vec![Span::styled("0", bold), Span::styled(format!("{peak:.3}"), bold)]),
        )
        .render(area, buf);
}

fn render_completions(view: &DashboardView, area: Rect, buf: &mut Buffer) {
    let table = &view.table;
    let columns = table.columns.len().max(1) as u32;
    let widths = vec![Constraint::Ratio(1, columns); table.columns.len()];

    let header = Row::new(table.columns.clone())
        .style(Style::default().add_modifier(Modifier::BOLD | Modifier::UNDERLINED));
    let rows = table.rows.iter().map(|r| Row::new(r.clone()));

    Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Recent completions"))
        .render(area, buf);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dashboard::{Comparison, DashboardSnapshot, FunnelStage, TimeDistribution, VariantStats};
    use chrono::Local;
    use serde_json::json;

    fn snapshot() -> DashboardSnapshot {
        DashboardSnapshot {
            stats: vec![
                VariantStats {
                    variant: Variant::A,
                    avg_completion_time: 14.2,
                    completions: 10,
                },
                VariantStats {
                    variant: Variant::B,
                    avg_completion_time: 19.8,
                    completions: 8,
                },
            ],
            comparison: Comparison {
                variant_a_avg: 14.2,
                variant_a_completions: 10,
                variant_b_avg: 19.8,
                variant_b_completions: 8,
                percentage_difference: 39.4,
            },
            funnel: vec![FunnelStage {
                variant: Variant::B,
                stage: "Started".into(),
                stage_order: 1,
                event_count: 12,
            }],
            recent_completions: vec![json!({"username": "Calm Otter", "completion_time": 9.5})
                .as_object()
                .unwrap()
                .clone()],
            distribution: TimeDistribution {
                variant_a_times: vec![10.0, 12.0, 15.0, 18.0],
                variant_b_times: vec![20.0, 21.0],
            },
        }
    }

    fn rendered(dashboard: &Dashboard) -> String {
        let area = Rect::new(0, 0, 120, 40);
        let mut buffer = Buffer::empty(area);
        render_dashboard(dashboard, area, &mut buffer);
        buffer.content().iter().map(|c| c.symbol()).collect()
    }

    #[test]
    fn renders_loading_before_first_cycle() {
        let text = rendered(&Dashboard::new());
        assert!(text.contains("Loading dashboard data"));
    }

    #[test]
    fn renders_all_sections() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(Ok(snapshot()), Local::now());
        let text = rendered(&dashboard);

        assert!(text.contains("Variant B seems to be harder"));
        assert!(text.contains("+39.4%"));
        assert!(text.contains("Conversion funnel"));
        assert!(text.contains("USERNAME"));
        assert!(text.contains("Calm Otter"));
        assert!(text.contains("Last updated:"));
    }

    #[test]
    fn error_panel_replaces_comparison_but_keeps_charts() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(Ok(snapshot()), Local::now());
        dashboard.apply(Err("connection refused".into()), Local::now());
        let text = rendered(&dashboard);

        assert!(text.contains("Failed to load dashboard data"));
        assert!(text.contains("connection refused"));
        assert!(!text.contains("seems to be harder"));
        assert!(text.contains("Calm Otter"));
    }

    #[test]
    fn small_area_does_not_panic() {
        let mut dashboard = Dashboard::new();
        dashboard.apply(Ok(snapshot()), Local::now());
        let area = Rect::new(0, 0, 40, 12);
        let mut buffer = Buffer::empty(area);
        render_dashboard(&dashboard, area, &mut buffer);
    }
}
