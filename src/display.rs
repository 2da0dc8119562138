//! Terminal UI display using ratatui.

use crate::api::{HashResponse, HostDetails, ProcBrief};
use crate::sampler::{ChartPoint, DerivedMetrics};
use crate::view::{DiskRow, MemorySplit};
use num_format::{Locale, ToFormattedString};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Sparkline, Table},
    Frame,
};

/// Get the last N elements from a slice to fit the graph width
/// The sparkline uses 1 char per data point, so we use area.width - 2 (for borders)
fn slice_for_width<'a>(data: &'a [u64], area: Rect) -> &'a [u64] {
    let graph_width = area.width.saturating_sub(2) as usize;
    if data.len() <= graph_width {
        data
    } else {
        &data[data.len() - graph_width..]
    }
}

/// Chart values scaled for a sparkline (which only takes integers)
fn sparkline_data(points: &[ChartPoint], scale: f64) -> Vec<u64> {
    points
        .iter()
        .map(|p| (p.value / scale).max(0.0).round() as u64)
        .collect()
}

/// Format bytes to human readable string (1024-based, one decimal)
pub fn format_bytes(bytes: f64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = if bytes.is_finite() { bytes.max(0.0) } else { 0.0 };
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

/// Format bytes per second
pub fn format_rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec))
}

pub fn format_percent(value: f64) -> String {
    format!("{:.1}%", value)
}

/// Format an uptime as "2d 3h 4m"; seconds stand in for a zero minute count
pub fn format_uptime(secs: u64) -> String {
    let days = secs / 86_400;
    let hours = (secs % 86_400) / 3_600;
    let mins = (secs % 3_600) / 60;

    let mut parts = Vec::new();
    if days > 0 {
        parts.push(format!("{}d", days));
    }
    if hours > 0 {
        parts.push(format!("{}h", hours));
    }
    if mins > 0 {
        parts.push(format!("{}m", mins));
    } else {
        parts.push(format!("{}s", secs % 60));
    }
    parts.join(" ")
}

/// Truncate a string to max chars, adding ".." if truncated
pub fn truncate_str(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 2 {
        s.chars().take(max_len).collect()
    } else {
        let head: String = s.chars().take(max_len - 2).collect();
        format!("{}..", head)
    }
}

/// Get color based on percentage value
fn percentage_color(value: f64, warn_threshold: f64, crit_threshold: f64) -> Color {
    if value >= crit_threshold {
        Color::Red
    } else if value >= warn_threshold {
        Color::Yellow
    } else {
        Color::Green
    }
}

/// Helper to render a labeled progress bar with readable text
fn render_progress_bar(
    label: &str,
    value: &str,
    percent: f64,
    width: usize,
    warn: f64,
    crit: f64,
) -> Line<'static> {
    let bar_width = width.saturating_sub(label.len() + value.len() + 5);
    let pct = percent.clamp(0.0, 100.0);
    let filled = ((pct / 100.0) * bar_width as f64) as usize;
    let empty = bar_width.saturating_sub(filled);
    let color = percentage_color(pct, warn, crit);

    Line::from(vec![
        Span::raw(label.to_string()),
        Span::raw(" ["),
        Span::styled("█".repeat(filled), Style::default().fg(color)),
        Span::styled("░".repeat(empty), Style::default().fg(Color::DarkGray)),
        Span::raw("] "),
        Span::styled(value.to_string(), Style::default().fg(color).add_modifier(Modifier::BOLD)),
    ])
}

fn panel(title: &str, color: Color) -> Block<'static> {
    Block::default()
        .title(format!(" {} ", title))
        .borders(Borders::ALL)
        .border_style(Style::default().fg(color))
}

/// Render CPU average, per-core bars and the CPU window
pub fn render_cpu(f: &mut Frame, area: Rect, derived: Option<&DerivedMetrics>, per_core: &[f64]) {
    let block = panel("CPU", Color::Cyan);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(derived) = derived else {
        f.render_widget(Paragraph::new("Waiting for data..."), inner);
        return;
    };

    let cores_per_row = 4;
    let core_rows = per_core.len().div_ceil(cores_per_row);
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(core_rows.max(1) as u16),
            Constraint::Min(3),
        ])
        .split(inner);

    let avg_line = render_progress_bar(
        "Avg",
        &format_percent(derived.cpu_average),
        derived.cpu_average,
        chunks[0].width as usize,
        70.0,
        90.0,
    );
    f.render_widget(Paragraph::new(avg_line), chunks[0]);

    let mut core_lines: Vec<Line> = Vec::new();
    for (row, cores) in per_core.chunks(cores_per_row).enumerate() {
        let mut spans: Vec<Span> = Vec::new();
        for (i, pct) in cores.iter().enumerate() {
            let core_id = row * cores_per_row + i;
            let pct = pct.clamp(0.0, 100.0);
            let color = percentage_color(pct, 70.0, 90.0);
            let mini_filled = ((pct / 100.0) * 4.0).round() as usize;
            spans.push(Span::styled(
                format!("CPU{:<2}", core_id),
                Style::default().fg(Color::DarkGray),
            ));
            spans.push(Span::styled("█".repeat(mini_filled), Style::default().fg(color)));
            spans.push(Span::styled(
                "░".repeat(4 - mini_filled),
                Style::default().fg(Color::DarkGray),
            ));
            spans.push(Span::styled(format!("{:>6} ", format_percent(pct)), Style::default().fg(color)));
        }
        core_lines.push(Line::from(spans));
    }
    f.render_widget(Paragraph::new(core_lines), chunks[1]);

    if !derived.cpu_window.is_empty() {
        let history = sparkline_data(&derived.cpu_window, 1.0);
        let data = slice_for_width(&history, chunks[2]);
        let since = derived
            .cpu_window
            .first()
            .map(|p| p.label.as_str())
            .unwrap_or("");
        let sparkline = Sparkline::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray))
                    .title(format!(" Avg CPU % since {} ", since)),
            )
            .data(data)
            .max(100)
            .style(Style::default().fg(Color::Cyan));
        f.render_widget(sparkline, chunks[2]);
    }
}

/// Render memory and swap usage
pub fn render_memory(f: &mut Frame, area: Rect, split: Option<&MemorySplit>) {
    let block = panel("Memory", Color::Magenta);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(mem) = split else {
        f.render_widget(Paragraph::new("No memory data"), inner);
        return;
    };

    let width = inner.width as usize;
    let mut lines = vec![
        render_progress_bar("RAM ", &format_percent(mem.used_percent), mem.used_percent, width, 80.0, 95.0),
        Line::from(vec![
            Span::raw("Used: "),
            Span::styled(format_bytes(mem.used as f64), Style::default().fg(Color::Magenta)),
            Span::raw("  Free: "),
            Span::styled(format_bytes(mem.free as f64), Style::default().fg(Color::Green)),
            Span::raw("  Total: "),
            Span::raw(format_bytes(mem.total as f64)),
        ]),
    ];

    match mem.swap {
        Some((used, total)) if total > 0 => {
            let pct = used as f64 / total as f64 * 100.0;
            lines.push(render_progress_bar(
                "Swap",
                &format!("{} / {}", format_bytes(used as f64), format_bytes(total as f64)),
                pct,
                width,
                50.0,
                80.0,
            ));
        }
        _ => lines.push(Line::from(Span::styled("Swap: —", Style::default().fg(Color::DarkGray)))),
    }

    f.render_widget(Paragraph::new(lines), inner);
}

/// Render aggregate network rates, RX/TX sparklines and per-interface table
pub fn render_network(f: &mut Frame, area: Rect, derived: Option<&DerivedMetrics>) {
    let block = panel("Network", Color::Blue);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let Some(derived) = derived else {
        f.render_widget(Paragraph::new("Waiting for data..."), inner);
        return;
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(8),
            Constraint::Min(3),
        ])
        .split(inner);

    let rates = Line::from(vec![
        Span::raw("↓ "),
        Span::styled(format_rate(derived.aggregate_receive_rate), Style::default().fg(Color::Cyan)),
        Span::raw("  ↑ "),
        Span::styled(format_rate(derived.aggregate_transmit_rate), Style::default().fg(Color::Green)),
    ]);
    f.render_widget(Paragraph::new(rates), chunks[0]);

    let graph_chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Ratio(1, 2), Constraint::Ratio(1, 2)])
        .split(chunks[1]);

    // KB/s keeps sparkline bars meaningful at low rates
    let series = [
        (&derived.receive_window, "RX ▼", Color::Cyan, graph_chunks[0]),
        (&derived.transmit_window, "TX ▲", Color::Green, graph_chunks[1]),
    ];
    for (points, name, color, chunk) in series {
        if points.is_empty() {
            continue;
        }
        let history = sparkline_data(points, 1024.0);
        let data = slice_for_width(&history, chunk);
        let max = data.iter().max().copied().unwrap_or(1).max(1);
        let sparkline = Sparkline::default()
            .block(
                Block::default()
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(Color::DarkGray))
                    .title(format!(" {} max:{} ", name, format_rate(max as f64 * 1024.0))),
            )
            .data(data)
            .max(max)
            .style(Style::default().fg(color));
        f.render_widget(sparkline, chunk);
    }

    let header = Row::new(vec!["Interface", "↓ RX", "↑ TX", "Total RX", "Total TX"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let rows = derived.per_interface_rates.iter().map(|iface| {
        Row::new(vec![
            Cell::from(truncate_str(&iface.name, 12)),
            Cell::from(format_rate(iface.receive_rate)).style(Style::default().fg(Color::Cyan)),
            Cell::from(format_rate(iface.transmit_rate)).style(Style::default().fg(Color::Green)),
            Cell::from(format_bytes(iface.bytes_received_total as f64)),
            Cell::from(format_bytes(iface.bytes_sent_total as f64)),
        ])
    });
    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(12),
            Constraint::Length(10),
            Constraint::Length(10),
        ],
    )
    .header(header);
    f.render_widget(table, chunks[2]);
}

/// Render the filtered disk table
pub fn render_disks(f: &mut Frame, area: Rect, rows: &[DiskRow], filter: &str) {
    let title = if filter.is_empty() {
        "Disks".to_string()
    } else {
        format!("Disks [filter: {}]", filter)
    };
    let block = panel(&title, Color::Yellow);
    let inner = block.inner(area);
    f.render_widget(block, area);

    if rows.is_empty() {
        f.render_widget(
            Paragraph::new(Span::styled("No matching partitions", Style::default().fg(Color::DarkGray))),
            inner,
        );
        return;
    }

    let usage_width = inner.width.saturating_sub(50) as usize;
    let header = Row::new(vec!["Mount", "Type", "Size", "Usage"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let table_rows = rows.iter().map(|row| {
        Row::new(vec![
            Cell::from(truncate_str(&row.mountpoint, 16)),
            Cell::from(if row.fstype.is_empty() { "—".to_string() } else { truncate_str(&row.fstype, 8) }),
            Cell::from(format!("{} / {}", format_bytes(row.used as f64), format_bytes(row.total as f64))),
            Cell::from(render_progress_bar("", &format_percent(row.percent), row.percent, usage_width, 80.0, 95.0)),
        ])
    });
    let table = Table::new(
        table_rows,
        [
            Constraint::Length(16),
            Constraint::Length(8),
            Constraint::Length(20),
            Constraint::Min(10),
        ],
    )
    .header(header);
    f.render_widget(table, inner);
}

/// Render host information and session counters
pub fn render_host(f: &mut Frame, area: Rect, host: Option<&HostDetails>, samples: u64, regressions: u64) {
    let block = panel("Host", Color::Gray);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let dash = |s: &str| if s.is_empty() { "—".to_string() } else { s.to_string() };
    let mut lines = match host {
        Some(h) => {
            let platform = if h.platform.is_empty() { &h.os } else { &h.platform };
            vec![
                Line::from(format!("Host: {}", dash(&h.hostname))),
                Line::from(format!("OS: {}", dash(format!("{} {}", platform, h.platform_version).trim()))),
                Line::from(format!("Kernel: {}", dash(&h.kernel_version))),
                Line::from(format!("Uptime: {}", format_uptime(h.uptime))),
            ]
        }
        None => vec![Line::from(Span::styled("No host data", Style::default().fg(Color::DarkGray)))],
    };
    lines.push(Line::from(Span::styled(
        format!(
            "Samples: {}  Counter resets: {}",
            samples.to_formatted_string(&Locale::en),
            regressions
        ),
        Style::default().fg(Color::DarkGray),
    )));
    f.render_widget(Paragraph::new(lines), inner);
}

/// Label/value pairs shown in the hash panel, dashes for missing values
fn hash_fields(hash: &HashResponse) -> [(&'static str, String); 3] {
    let dash = |s: &str| if s.is_empty() { "—".to_string() } else { s.to_string() };
    let updated = hash
        .updated_at
        .map(|t| t.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "—".to_string());
    [
        ("Hash", dash(&hash.randhash)),
        ("Bytes", dash(&hash.hashbytes_hex)),
        ("Updated", updated),
    ]
}

/// Render the on-demand random digest
pub fn render_hash(f: &mut Frame, area: Rect, hash: Option<&HashResponse>, error: Option<&str>) {
    let block = panel("Hash", Color::Magenta);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let width = inner.width.saturating_sub(9) as usize;
    let mut lines: Vec<Line> = match hash {
        Some(h) => hash_fields(h)
            .into_iter()
            .map(|(label, value)| {
                Line::from(vec![
                    Span::styled(format!("{:<8} ", label), Style::default().fg(Color::DarkGray)),
                    Span::raw(truncate_str(&value, width)),
                ])
            })
            .collect(),
        None => vec![Line::from(Span::styled("Press h to fetch", Style::default().fg(Color::DarkGray)))],
    };
    if let Some(warning) = hash.and_then(|h| h.warning.as_deref()) {
        lines.push(Line::from(Span::styled(
            format!("Warning: {}", warning),
            Style::default().fg(Color::Yellow),
        )));
    }
    if let Some(err) = error {
        lines.push(Line::from(Span::styled(
            format!("Error: {}", err),
            Style::default().fg(Color::Red),
        )));
    }
    f.render_widget(Paragraph::new(lines), inner);
}

/// Render the filtered top-N process table
pub fn render_processes(f: &mut Frame, area: Rect, rows: &[&ProcBrief], total: u64, filter: &str, top_n: usize) {
    let mut title = format!(
        "Processes (top {} of {})",
        top_n,
        total.to_formatted_string(&Locale::en)
    );
    if !filter.is_empty() {
        title.push_str(&format!(" [filter: {}]", filter));
    }
    let block = panel(&title, Color::Green);
    let inner = block.inner(area);
    f.render_widget(block, area);

    let header = Row::new(vec!["PID", "Name", "CPU %", "RAM %", "User", "Status"])
        .style(Style::default().add_modifier(Modifier::BOLD));
    let table_rows = rows.iter().map(|p| {
        let cpu_style = Style::default().fg(percentage_color(p.cpu_percent, 50.0, 90.0));
        Row::new(vec![
            Cell::from(p.pid.to_string()),
            Cell::from(if p.name.is_empty() { "—".to_string() } else { truncate_str(&p.name, 20) }),
            Cell::from(format!("{:.1}", p.cpu_percent)).style(cpu_style),
            Cell::from(format!("{:.1}", p.mem_percent)),
            Cell::from(if p.username.is_empty() { "—".to_string() } else { truncate_str(&p.username, 12) }),
            Cell::from(if p.status.is_empty() { "—".to_string() } else { p.status.clone() }),
        ])
    });
    let table = Table::new(
        table_rows,
        [
            Constraint::Length(8),
            Constraint::Length(20),
            Constraint::Length(7),
            Constraint::Length(7),
            Constraint::Length(12),
            Constraint::Min(6),
        ],
    )
    .header(header);
    f.render_widget(table, inner);
}

/// What the help bar should show this frame.
pub struct HelpBar<'a> {
    pub live: bool,
    /// (label, current text) of a filter being edited
    pub editing: Option<(&'a str, &'a str)>,
    pub status: Option<&'a str>,
    pub last_error: Option<&'a str>,
    pub in_flight: usize,
}

/// Render help bar at the bottom
pub fn render_help_bar(f: &mut Frame, area: Rect, bar: &HelpBar) {
    let (text, style) = if let Some((label, text)) = bar.editing {
        (
            format!(" {} filter: {}_  (Enter/Esc to finish) ", label, text),
            Style::default().fg(Color::Black).bg(Color::Yellow),
        )
    } else if let Some(msg) = bar.status {
        (
            format!(" {} ", msg),
            Style::default().fg(Color::White).bg(Color::Blue),
        )
    } else if let Some(err) = bar.last_error {
        (
            format!(" Fetch failed: {} ", err),
            Style::default().fg(Color::White).bg(Color::Red),
        )
    } else {
        let mode = if bar.live { "LIVE" } else { "PAUSED" };
        let pending = if bar.in_flight > 0 {
            format!(" ({} pending)", bar.in_flight)
        } else {
            String::new()
        };
        (
            format!(
                " [{}{}] q: Quit | space: Live | r: Refresh | h: Hash | d: Disk filter | /: Process filter | +/-: Top N ",
                mode, pending
            ),
            Style::default().fg(Color::Black).bg(Color::Gray),
        )
    };

    let paragraph = Paragraph::new(text).style(style);
    f.render_widget(paragraph, area);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_use_binary_units_with_one_decimal() {
        assert_eq!(format_bytes(0.0), "0.0 B");
        assert_eq!(format_bytes(1023.0), "1023.0 B");
        assert_eq!(format_bytes(1536.0), "1.5 KB");
        assert_eq!(format_bytes(5.0 * 1024.0 * 1024.0 * 1024.0), "5.0 GB");
        assert_eq!(format_bytes(2.0 * 1024f64.powi(6)), "2048.0 PB");
        assert_eq!(format_bytes(-5.0), "0.0 B");
        assert_eq!(format_rate(2048.0), "2.0 KB/s");
    }

    #[test]
    fn uptime_formatting() {
        assert_eq!(format_uptime(42), "42s");
        assert_eq!(format_uptime(60), "1m");
        assert_eq!(format_uptime(3_600), "1h 0s");
        assert_eq!(format_uptime(3_725), "1h 2m");
        assert_eq!(format_uptime(90_061), "1d 1h 1m");
        assert_eq!(format_uptime(86_400), "1d 0s");
        assert_eq!(format_uptime(86_405), "1d 5s");
    }

    #[test]
    fn hash_fields_dash_missing_values() {
        let hash = HashResponse {
            randhash: "c0ffee".to_string(),
            ..Default::default()
        };
        let fields = hash_fields(&hash);
        assert_eq!(fields[0], ("Hash", "c0ffee".to_string()));
        assert_eq!(fields[1], ("Bytes", "—".to_string()));
        assert_eq!(fields[2], ("Updated", "—".to_string()));
    }

    #[test]
    fn truncation_is_char_safe() {
        assert_eq!(truncate_str("eth0", 12), "eth0");
        assert_eq!(truncate_str("enp0s31f6-long", 8), "enp0s3..");
        assert_eq!(truncate_str("réseau-interne", 6), "rése..");
        assert_eq!(truncate_str("abc", 2), "ab");
    }

    #[test]
    fn sparkline_scaling_rounds_and_clamps() {
        let points = vec![
            ChartPoint::new("a", 2047.0),
            ChartPoint::new("b", -1.0),
            ChartPoint::new("c", 10_240.0),
        ];
        assert_eq!(sparkline_data(&points, 1024.0), vec![2, 0, 10]);
    }

    #[test]
    fn slice_keeps_most_recent_points() {
        let data: Vec<u64> = (0..10).collect();
        let area = Rect::new(0, 0, 6, 3);
        assert_eq!(slice_for_width(&data, area), &[6, 7, 8, 9]);
    }
}
