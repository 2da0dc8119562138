//! hostdash - a terminal dashboard for a host-metrics HTTP API.
//!
//! Polls `/api/all` on an interval, turns cumulative network counters into
//! rates, and renders CPU, memory, network, disk, host and process panels
//! with optional sample logging and SVG plot export. The provider's random
//! digest (`/api/hash`) is fetched on demand.

mod api;
mod clock;
mod config;
mod display;
mod error;
mod logging;
mod plot;
mod poller;
mod sampler;
#[cfg(test)]
mod testutil;
mod view;

use anyhow::{Context, Result};
use api::{AllResponse, ApiClient, HashResponse};
use clap::Parser;
use clock::SystemClock;
use config::Settings;
use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use display::{format_percent, format_rate, HelpBar};
use error::ApiError;
use logging::{SampleLogger, SampleRecord, SummaryAccumulator, TextLogger};
use poller::{PollOutcome, Poller};
use ratatui::{
    layout::{Constraint, Direction, Layout},
    prelude::CrosstermBackend,
    Frame, Terminal,
};
use sampler::{DerivedMetrics, MetricsSampler, SamplerState};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

const MAX_TOP_N: usize = 100;

/// Terminal dashboard for a host-metrics HTTP API
#[derive(Parser, Debug)]
#[command(name = "hostdash")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Base URL of the metrics API
    #[arg(short, long, default_value = config::DEFAULT_API_URL)]
    url: String,

    /// Polling interval in seconds
    #[arg(short = 'i', long, default_value = "2")]
    interval: f64,

    /// HTTP request timeout in seconds
    #[arg(short, long, default_value = "5")]
    timeout: f64,

    /// Run for specified duration (seconds), then exit with summary
    #[arg(short, long)]
    duration: Option<u64>,

    /// Disable TUI and print samples to stdout
    #[arg(long)]
    no_tui: bool,

    /// Print a summary report at exit
    #[arg(long)]
    summary: bool,

    /// Log derived samples to a JSON Lines file
    #[arg(short, long)]
    log: Option<PathBuf>,

    /// Log derived samples to a human-readable text file
    #[arg(short = 'o', long)]
    text_log: Option<PathBuf>,

    /// Generate plots from a JSON Lines sample log (use with --plot-output)
    #[arg(long)]
    plot: Option<PathBuf>,

    /// Output directory for generated plots
    #[arg(long, default_value = "plots")]
    plot_output: PathBuf,

    /// Number of processes to show
    #[arg(long, default_value_t = config::DEFAULT_TOP_N)]
    top: usize,

    /// Initial disk filter (mountpoint, fstype or device)
    #[arg(long)]
    disk_filter: Option<String>,

    /// Initial process filter (name, user or command line)
    #[arg(long)]
    proc_filter: Option<String>,

    /// Seconds an interface may be missing before its counters are forgotten
    #[arg(long, default_value_t = sampler::DEFAULT_INTERFACE_TTL_SECS as u64)]
    interface_ttl: u64,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Write diagnostics to this file (required to see them in TUI mode)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// Start with live polling turned off
    #[arg(long)]
    paused: bool,
}

/// Install the tracing subscriber. The TUI owns the terminal, so without a
/// log file nothing is installed in TUI mode.
fn init_tracing(level: &str, log_file: Option<&Path>, tui: bool) -> Result<()> {
    let filter = EnvFilter::try_new(level).with_context(|| format!("invalid log level: {}", level))?;

    match log_file {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create diagnostics file: {}", path.display()))?;
            fmt()
                .with_env_filter(filter)
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None if !tui => {
            fmt().with_env_filter(filter).with_writer(io::stderr).init();
        }
        None => {}
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterTarget {
    Disk,
    Process,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyAction {
    Continue,
    Refresh,
    FetchHash,
    Quit,
}

/// Application state
struct App {
    settings: Settings,
    sampler: MetricsSampler,

    latest: Option<AllResponse>,
    derived: Option<DerivedMetrics>,
    last_error: Option<String>,

    hash: Option<HashResponse>,
    hash_error: Option<String>,

    json_logger: Option<SampleLogger>,
    text_logger: Option<TextLogger>,
    accumulator: SummaryAccumulator,

    editing: Option<FilterTarget>,
    status_message: Option<(String, Instant)>,
    tui_mode: bool,
}

impl App {
    fn new(settings: Settings, sampler: MetricsSampler, json_log: Option<&Path>, text_log: Option<&Path>) -> Result<Self> {
        let json_logger = json_log.map(SampleLogger::new).transpose()?;
        let text_logger = text_log.map(TextLogger::new).transpose()?;

        Ok(Self {
            settings,
            sampler,
            latest: None,
            derived: None,
            last_error: None,
            hash: None,
            hash_error: None,
            json_logger,
            text_logger,
            accumulator: SummaryAccumulator::new(),
            editing: None,
            status_message: None,
            tui_mode: false,
        })
    }

    /// Fold one fetch result into the dashboard state.
    fn handle_outcome(&mut self, outcome: PollOutcome) {
        let PollOutcome {
            sequence,
            captured_at,
            result,
        } = outcome;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                self.last_error = Some(e.to_string());
                return;
            }
        };

        let snapshot = response.snapshot(captured_at);
        let Some(derived) = self.sampler.ingest_in_order(sequence, snapshot) else {
            return;
        };
        debug!(
            sequence,
            interfaces = self.sampler.tracked_interfaces(),
            cpu_points = self.sampler.cpu_window().len(),
            network_points = self.sampler.network_window().len(),
            "sample ingested",
        );

        let memory = response.mem.virtual_memory.as_ref().map(|vm| vm.used_percent);
        let record = SampleRecord::new(&derived, memory);
        self.write_logs(&record);
        self.accumulator.add_sample(&record);

        self.last_error = None;
        self.latest = Some(response);
        self.derived = Some(derived);
    }

    /// Keep the last good digest when a refresh fails.
    fn handle_hash(&mut self, result: Result<HashResponse, ApiError>) {
        match result {
            Ok(hash) => {
                self.hash = Some(hash);
                self.hash_error = None;
            }
            Err(e) => self.hash_error = Some(e.to_string()),
        }
    }

    fn write_logs(&mut self, record: &SampleRecord) {
        let mut failures = Vec::new();
        if let Some(ref mut logger) = self.json_logger {
            if let Err(e) = logger.log(record) {
                failures.push(format!("JSON log error: {}", e));
            }
        }
        if let Some(ref mut logger) = self.text_logger {
            if let Err(e) = logger.log(record) {
                failures.push(format!("Text log error: {}", e));
            }
        }
        for msg in failures {
            warn!("{}", msg);
            if self.tui_mode {
                self.set_status(&msg);
            } else {
                eprintln!("{}", msg);
            }
        }
    }

    fn filter_mut(&mut self, target: FilterTarget) -> &mut String {
        match target {
            FilterTarget::Disk => &mut self.settings.disk_filter,
            FilterTarget::Process => &mut self.settings.process_filter,
        }
    }

    fn handle_key(&mut self, code: KeyCode) -> KeyAction {
        if let Some(target) = self.editing {
            match code {
                KeyCode::Enter | KeyCode::Esc => self.editing = None,
                KeyCode::Backspace => {
                    self.filter_mut(target).pop();
                }
                KeyCode::Char(c) => self.filter_mut(target).push(c),
                _ => {}
            }
            return KeyAction::Continue;
        }

        match code {
            KeyCode::Char('q') => return KeyAction::Quit,
            KeyCode::Char(' ') => {
                self.settings.live = !self.settings.live;
                if self.settings.live {
                    self.set_status("Live updates on");
                    return KeyAction::Refresh;
                }
                self.set_status("Live updates paused");
            }
            KeyCode::Char('r') => {
                self.set_status("Refreshing...");
                return KeyAction::Refresh;
            }
            KeyCode::Char('h') => {
                self.set_status("Fetching hash...");
                return KeyAction::FetchHash;
            }
            KeyCode::Char('d') => self.editing = Some(FilterTarget::Disk),
            KeyCode::Char('/') => self.editing = Some(FilterTarget::Process),
            KeyCode::Char('+') | KeyCode::Char('=') => {
                self.settings.top_n = (self.settings.top_n + 1).min(MAX_TOP_N);
            }
            KeyCode::Char('-') => {
                self.settings.top_n = self.settings.top_n.saturating_sub(1).max(1);
            }
            _ => {}
        }
        KeyAction::Continue
    }

    /// Set a temporary status message
    fn set_status(&mut self, msg: &str) {
        self.status_message = Some((msg.to_string(), Instant::now()));
    }

    /// Get current status message if not expired (3 seconds)
    fn get_status(&self) -> Option<&str> {
        self.status_message.as_ref().and_then(|(msg, time)| {
            if time.elapsed().as_secs() < 3 {
                Some(msg.as_str())
            } else {
                None
            }
        })
    }

    fn draw(&self, f: &mut Frame, in_flight: usize) {
        let main_chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(16),
                Constraint::Length(12),
                Constraint::Length(1),
            ])
            .split(f.area());

        let columns = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
            .split(main_chunks[0]);

        let left = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(8),
                Constraint::Length(5),
                Constraint::Length(7),
            ])
            .split(columns[0]);

        let right = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Min(10),
                Constraint::Length(8),
                Constraint::Length(6),
            ])
            .split(columns[1]);

        let latest = self.latest.as_ref();
        let per_core = latest.map(|r| r.cpu.percent.as_slice()).unwrap_or(&[]);
        display::render_cpu(f, left[0], self.derived.as_ref(), per_core);

        let split = latest.and_then(|r| view::memory_split(&r.mem));
        display::render_memory(f, left[1], split.as_ref());

        let host = latest.and_then(|r| r.host.info.as_ref());
        display::render_host(
            f,
            left[2],
            host,
            self.sampler.samples_ingested(),
            self.sampler.regressions_observed(),
        );

        display::render_network(f, right[0], self.derived.as_ref());

        let disks = latest
            .map(|r| view::disk_rows(&r.disk, &self.settings.disk_filter))
            .unwrap_or_default();
        display::render_disks(f, right[1], &disks, &self.settings.disk_filter);

        display::render_hash(f, right[2], self.hash.as_ref(), self.hash_error.as_deref());

        let (procs, total) = match latest {
            Some(r) => (
                view::process_rows(&r.processes, &self.settings.process_filter, self.settings.top_n),
                r.processes.count,
            ),
            None => (Vec::new(), 0),
        };
        display::render_processes(
            f,
            main_chunks[1],
            &procs,
            total,
            &self.settings.process_filter,
            self.settings.top_n,
        );

        let editing = self.editing.map(|target| match target {
            FilterTarget::Disk => ("Disk", self.settings.disk_filter.as_str()),
            FilterTarget::Process => ("Process", self.settings.process_filter.as_str()),
        });
        let status = self.get_status().or(match self.sampler.state() {
            SamplerState::Cold if self.last_error.is_none() => Some("Waiting for first sample..."),
            _ => None,
        });
        let bar = HelpBar {
            live: self.settings.live,
            editing,
            status,
            last_error: self.last_error.as_deref(),
            in_flight,
        };
        display::render_help_bar(f, main_chunks[2], &bar);
    }

    fn print_metrics(&self) {
        if let Some(ref err) = self.last_error {
            println!("\n--- Fetch failed: {} ---", err);
            return;
        }
        let Some(ref derived) = self.derived else {
            return;
        };

        let rates = derived.aggregate();
        println!(
            "\n--- Sample {} ({}) ---",
            self.sampler.samples_ingested(),
            rates.timestamp.with_timezone(&chrono::Local).format("%H:%M:%S")
        );
        println!("CPU: {} avg", format_percent(derived.cpu_average));
        if let Some(split) = self.latest.as_ref().and_then(|r| view::memory_split(&r.mem)) {
            println!(
                "Memory: {} / {} ({})",
                display::format_bytes(split.used as f64),
                display::format_bytes(split.total as f64),
                format_percent(split.used_percent)
            );
        }
        println!(
            "Network: RX {} TX {}",
            format_rate(rates.receive_rate),
            format_rate(rates.transmit_rate)
        );
        for iface in derived.per_interface_rates.iter().take(3) {
            println!(
                "  {:<12} RX {:>14} TX {:>14}",
                iface.name,
                format_rate(iface.receive_rate),
                format_rate(iface.transmit_rate)
            );
        }
    }

    fn print_summary(&self) {
        match self.accumulator.generate_summary(self.sampler.regressions_observed()) {
            Some(summary) => summary.print(),
            None => println!("\nNo samples collected."),
        }
    }
}

fn run_tui(
    mut app: App,
    mut poller: Poller,
    mut outcomes: mpsc::UnboundedReceiver<PollOutcome>,
    duration: Option<Duration>,
) -> Result<App> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    app.tui_mode = true;
    let result = tui_loop(&mut terminal, &mut app, &mut poller, &mut outcomes, duration);

    // Restore terminal even if the loop failed
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result.map(|_| app)
}

fn tui_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut App,
    poller: &mut Poller,
    outcomes: &mut mpsc::UnboundedReceiver<PollOutcome>,
    duration: Option<Duration>,
) -> Result<()> {
    let start_time = Instant::now();
    let mut last_tick = Instant::now();
    let mut pending_hash: Option<oneshot::Receiver<Result<HashResponse, ApiError>>> = None;

    // Initial fetch so the screen fills in even when paused
    poller.dispatch();

    loop {
        if let Some(dur) = duration {
            if start_time.elapsed() >= dur {
                break;
            }
        }

        while let Ok(outcome) = outcomes.try_recv() {
            app.handle_outcome(outcome);
        }
        if let Some(rx) = pending_hash.as_mut() {
            match rx.try_recv() {
                Ok(result) => {
                    app.handle_hash(result);
                    pending_hash = None;
                }
                Err(oneshot::error::TryRecvError::Empty) => {}
                Err(oneshot::error::TryRecvError::Closed) => pending_hash = None,
            }
        }

        terminal.draw(|f| app.draw(f, poller.in_flight()))?;

        let interval = app.settings.interval;
        let timeout = interval
            .saturating_sub(last_tick.elapsed())
            .min(Duration::from_millis(250));
        if event::poll(timeout)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match app.handle_key(key.code) {
                        KeyAction::Quit => break,
                        KeyAction::Refresh => {
                            poller.dispatch();
                        }
                        KeyAction::FetchHash => {
                            if pending_hash.is_none() {
                                pending_hash = Some(poller.dispatch_hash());
                            }
                        }
                        KeyAction::Continue => {}
                    }
                }
            }
        }

        if last_tick.elapsed() >= interval {
            if app.settings.live {
                poller.dispatch();
            }
            last_tick = Instant::now();
        }
    }

    Ok(())
}

async fn run_no_tui(mut app: App, mut poller: Poller, duration: Option<Duration>) -> Result<App> {
    let start_time = Instant::now();

    loop {
        let outcome = poller.poll_now().await;
        app.handle_outcome(outcome);
        app.print_metrics();

        if let Some(dur) = duration {
            if start_time.elapsed() >= dur {
                break;
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(app.settings.interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
        }
    }

    Ok(app)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Plot mode: generate plots from an existing sample log
    if let Some(ref log_path) = args.plot {
        eprintln!("Loading samples from: {}", log_path.display());
        eprintln!("Generating plots in: {}", args.plot_output.display());
        let samples = plot::load_samples(log_path)?;
        let generated = plot::generate_plots(&samples, &args.plot_output)?;

        eprintln!("\nGenerated {} plots from {} samples:", generated.len(), samples.len());
        for path in generated {
            eprintln!("  - {}", path);
        }
        return Ok(());
    }

    init_tracing(&args.log_level, args.log_file.as_deref(), !args.no_tui)?;

    let mut settings = Settings::new(&args.url, args.interval, args.timeout, args.top)?;
    settings.disk_filter = args.disk_filter.clone().unwrap_or_default();
    settings.process_filter = args.proc_filter.clone().unwrap_or_default();
    settings.live = !args.paused;

    info!(
        endpoint = %settings.all_endpoint(),
        interval_secs = settings.interval.as_secs_f64(),
        live = settings.live,
        "starting hostdash",
    );

    let client = ApiClient::new(&settings).context("Failed to build HTTP client")?;
    let (poller, outcomes) = Poller::new(client, Arc::new(SystemClock));
    let ttl = i64::try_from(args.interface_ttl)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .context("--interface-ttl is out of range")?;
    let sampler = MetricsSampler::new().with_interface_ttl(ttl);
    let app = App::new(settings, sampler, args.log.as_deref(), args.text_log.as_deref())?;

    let duration = args.duration.map(Duration::from_secs);
    let summary = args.summary || args.duration.is_some();

    let result = if args.no_tui {
        drop(outcomes);
        run_no_tui(app, poller, duration).await
    } else {
        run_tui(app, poller, outcomes, duration)
    };

    let app = match result {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Err(e);
        }
    };
    if summary {
        app.print_summary();
    }

    if let Some(ref log_path) = args.log {
        let written = app.json_logger.as_ref().map_or(0, |l| l.samples_written());
        eprintln!("{} samples logged to: {}", written, log_path.display());
    }
    if let Some(ref log_path) = args.text_log {
        eprintln!("Text log written to: {}", log_path.display());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn app() -> App {
        App::new(Settings::default(), MetricsSampler::new(), None, None).unwrap()
    }

    fn outcome(sequence: u64, secs: i64, rx: u64) -> PollOutcome {
        let body = json!({
            "cpu": { "percent": [50.0] },
            "mem": { "virtual": { "total": 100, "used": 40, "usedPercent": 40.0 } },
            "net": { "io_counters": [{ "name": "eth0", "bytesRecv": rx, "bytesSent": 0 }] }
        });
        PollOutcome {
            sequence,
            captured_at: Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap() + chrono::Duration::seconds(secs),
            result: Ok(AllResponse::from_value(body)),
        }
    }

    #[test]
    fn outcomes_update_derived_metrics() {
        let mut app = app();
        app.handle_outcome(outcome(1, 0, 1_000));
        app.handle_outcome(outcome(2, 2, 5_000));

        let derived = app.derived.as_ref().unwrap();
        assert_eq!(derived.aggregate_receive_rate, 2_000.0);
        let summary = app.accumulator.generate_summary(0).unwrap();
        assert_eq!(summary.samples_count, 2);
        assert_eq!(summary.memory_max_used_percent, Some(40.0));
    }

    #[test]
    fn stale_outcome_is_ignored() {
        let mut app = app();
        app.handle_outcome(outcome(2, 2, 5_000));
        app.handle_outcome(outcome(1, 0, 1_000));

        assert_eq!(app.sampler.samples_ingested(), 1);
        assert_eq!(app.derived.as_ref().unwrap().cpu_window.len(), 1);
    }

    #[test]
    fn failed_fetch_keeps_last_sample_and_records_error() {
        let mut app = app();
        app.handle_outcome(outcome(1, 0, 1_000));
        app.handle_outcome(PollOutcome {
            sequence: 2,
            captured_at: Utc::now(),
            result: Err(ApiError::Status {
                status: 503,
                body: "down".to_string(),
            }),
        });

        assert!(app.derived.is_some());
        assert!(app.last_error.as_deref().unwrap().contains("503"));
        assert_eq!(app.sampler.samples_ingested(), 1);
    }

    #[test]
    fn filter_editing_captures_keys() {
        let mut app = app();
        assert_eq!(app.handle_key(KeyCode::Char('/')), KeyAction::Continue);
        for c in "ngx".chars() {
            app.handle_key(KeyCode::Char(c));
        }
        app.handle_key(KeyCode::Backspace);
        // 'q' is text while editing
        assert_eq!(app.handle_key(KeyCode::Char('q')), KeyAction::Continue);
        app.handle_key(KeyCode::Enter);

        assert_eq!(app.settings.process_filter, "ngq");
        assert_eq!(app.editing, None);
        assert_eq!(app.handle_key(KeyCode::Char('q')), KeyAction::Quit);
    }

    #[test]
    fn live_toggle_refresh_and_top_n() {
        let mut app = app();
        assert!(app.settings.live);
        assert_eq!(app.handle_key(KeyCode::Char(' ')), KeyAction::Continue);
        assert!(!app.settings.live);
        assert_eq!(app.get_status(), Some("Live updates paused"));
        assert_eq!(app.handle_key(KeyCode::Char('r')), KeyAction::Refresh);

        // Resuming fetches right away instead of waiting out the interval
        assert_eq!(app.handle_key(KeyCode::Char(' ')), KeyAction::Refresh);
        assert!(app.settings.live);
        assert_eq!(app.get_status(), Some("Live updates on"));

        app.settings.top_n = 1;
        app.handle_key(KeyCode::Char('-'));
        assert_eq!(app.settings.top_n, 1);
        app.handle_key(KeyCode::Char('+'));
        assert_eq!(app.settings.top_n, 2);
    }

    #[test]
    fn hash_key_requests_digest_and_failures_keep_the_last_one() {
        let mut app = app();
        assert_eq!(app.handle_key(KeyCode::Char('h')), KeyAction::FetchHash);

        app.handle_hash(Ok(HashResponse {
            randhash: "beef".to_string(),
            ..Default::default()
        }));
        assert_eq!(app.hash.as_ref().unwrap().randhash, "beef");
        assert_eq!(app.hash_error, None);

        app.handle_hash(Err(ApiError::Status {
            status: 500,
            body: "sampler not initialized".to_string(),
        }));
        assert_eq!(app.hash.as_ref().unwrap().randhash, "beef");
        assert!(app.hash_error.as_deref().unwrap().contains("500"));

        // 'h' is filter text while editing
        app.handle_key(KeyCode::Char('d'));
        assert_eq!(app.handle_key(KeyCode::Char('h')), KeyAction::Continue);
        assert_eq!(app.settings.disk_filter, "h");
    }
}
