use anyhow::{Context, Result};
use clap::Parser;
use reel::{config::ReelConfig, job::{load_all_jobs, Job, JobStatus}};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    widgets::{Block, Borders, Gauge, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use std::io::stdout;
use std::path::PathBuf;
use std::time::Duration;
use sysinfo::System;
use humansize::{format_size, DECIMAL};

struct App {
    jobs: Vec<Job>,
    system: System,
    table_state: TableState,
    should_quit: bool,
    job_state_dir: PathBuf,
}

impl App {
    fn new(job_state_dir: PathBuf) -> Self {
        Self {
            jobs: Vec::new(),
            system: System::new(),
            table_state: TableState::default(),
            should_quit: false,
            job_state_dir,
        }
    }

    fn refresh(&mut self) {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        // An unreadable state dir shows as an empty table
        self.jobs = load_all_jobs(&self.job_state_dir).unwrap_or_default();
        // Newest first
        self.jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        match self.table_state.selected() {
            Some(i) if i >= self.jobs.len() => {
                self.table_state.select(self.jobs.len().checked_sub(1));
            }
            _ => {}
        }
    }

    fn count_by_status(&self, status: JobStatus) -> usize {
        self.jobs.iter().filter(|j| j.status == status).count()
    }

    fn active_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.status.is_active()).count()
    }

    fn select_next(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        let next = match self.table_state.selected() {
            Some(i) => (i + 1).min(self.jobs.len() - 1),
            None => 0,
        };
        self.table_state.select(Some(next));
    }

    fn select_previous(&mut self) {
        if self.jobs.is_empty() {
            return;
        }
        let prev = self.table_state.selected().map_or(0, |i| i.saturating_sub(1));
        self.table_state.select(Some(prev));
    }
}

/// Topic reel job monitor
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let cfg = ReelConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    crossterm::terminal::enable_raw_mode()?;
    let mut stdout = stdout();
    crossterm::execute!(stdout, crossterm::terminal::EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(cfg.job_state_dir.clone());
    let result = run(&mut terminal, &mut app);

    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(
        terminal.backend_mut(),
        crossterm::terminal::LeaveAlternateScreen
    )?;

    result
}

fn run(terminal: &mut Terminal<CrosstermBackend<std::io::Stdout>>, app: &mut App) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind};

    loop {
        app.refresh();
        terminal.draw(|f| ui(f, app))?;

        if event::poll(Duration::from_millis(500))? {
            if let Event::Key(key) = event::read()? {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                    KeyCode::Char('r') => app.refresh(),
                    KeyCode::Down | KeyCode::Char('j') => app.select_next(),
                    KeyCode::Up | KeyCode::Char('k') => app.select_previous(),
                    _ => {}
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let size = f.size();

    if size.height < 10 || size.width < 80 {
        let error_msg = Paragraph::new("Terminal too small! Please resize to at least 80x10.")
            .block(Block::default().borders(Borders::ALL).title("Error"))
            .style(Style::default().fg(Color::Red));
        f.render_widget(error_msg, size);
        return;
    }

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // CPU/Memory
            Constraint::Min(3),    // job table
            Constraint::Length(3), // status bar
        ])
        .split(size);

    render_top_bar(f, app, chunks[0]);
    render_job_table(f, app, chunks[1]);
    render_status_bar(f, app, chunks[2]);
}

/// Clamp to a gauge percentage, treating NaN as zero
fn clamp_percent(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 100.0)
    } else {
        0.0
    }
}

fn render_top_bar(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);

    let cpu_usage = clamp_percent(app.system.global_cpu_usage() as f64);

    let total_memory = app.system.total_memory();
    let memory_percent = if total_memory == 0 {
        0.0
    } else {
        clamp_percent(app.system.used_memory() as f64 / total_memory as f64 * 100.0)
    };

    let cpu_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("CPU"))
        .gauge_style(Style::default().fg(Color::Cyan))
        .percent(cpu_usage as u16)
        .label(format!("{:.1}%", cpu_usage));
    f.render_widget(cpu_gauge, chunks[0]);

    let memory_gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Memory"))
        .gauge_style(Style::default().fg(Color::Green))
        .percent(memory_percent as u16)
        .label(format!(
            "{:.1}% ({} / {})",
            memory_percent,
            format_size(app.system.used_memory(), DECIMAL),
            format_size(total_memory, DECIMAL)
        ));
    f.render_widget(memory_gauge, chunks[1]);
}

fn status_label(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "PEND",
        JobStatus::Selecting => "SEL",
        JobStatus::Normalizing => "NORM",
        JobStatus::Composing => "COMP",
        JobStatus::Synthesizing => "TTS",
        JobStatus::Muxing => "MUX",
        JobStatus::Complete => "OK",
        JobStatus::Failed => "FAIL",
    }
}

fn status_color(status: JobStatus) -> Color {
    match status {
        JobStatus::Complete => Color::Green,
        JobStatus::Failed => Color::Red,
        JobStatus::Pending => Color::Gray,
        _ => Color::Yellow,
    }
}

fn job_row(job: &Job) -> Row<'static> {
    let elapsed = job
        .elapsed()
        .map(|d| format!("{}s", d.num_seconds()))
        .unwrap_or_else(|| "-".to_string());

    let size = job
        .output_bytes
        .map(|b| format_size(b, DECIMAL))
        .unwrap_or_else(|| "-".to_string());

    let narration = job
        .narration_secs
        .map(|s| format!("{:.1}s", s))
        .unwrap_or_else(|| "-".to_string());

    let output = job
        .output_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("?");

    let detail = match (&job.error_kind, &job.reason) {
        (Some(kind), Some(reason)) => format!("{}: {}", kind, reason),
        (None, Some(reason)) => reason.clone(),
        _ => output.to_string(),
    };

    Row::new(vec![
        status_label(job.status).to_string(),
        job.short_id().to_string(),
        job.topic.as_str().to_string(),
        elapsed,
        narration,
        size,
        truncate_string(&detail, 60),
    ])
    .style(Style::default().fg(status_color(job.status)))
    .height(1)
}

fn render_job_table(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(vec!["ST", "ID", "TOPIC", "TIME", "NARR", "SIZE", "OUTPUT / REASON"])
        .style(Style::default().add_modifier(Modifier::BOLD))
        .height(1);

    let rows: Vec<Row> = if app.jobs.is_empty() {
        vec![Row::new(vec![
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            format!("No jobs in {}", app.job_state_dir.display()),
        ])]
    } else {
        app.jobs.iter().map(job_row).collect()
    };

    let widths = [
        Constraint::Length(5),
        Constraint::Length(9),
        Constraint::Length(12),
        Constraint::Length(6),
        Constraint::Length(6),
        Constraint::Length(9),
        Constraint::Min(20),
    ];

    let title = format!("Jobs ({})", app.jobs.len());
    let table = Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
        .column_spacing(1);

    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn status_text(app: &App) -> String {
    format!(
        "Total: {} | Active: {} | Pending: {} | Complete: {} | Failed: {} | q=quit r=refresh ↑↓=select",
        app.jobs.len(),
        app.active_count(),
        app.count_by_status(JobStatus::Pending),
        app.count_by_status(JobStatus::Complete),
        app.count_by_status(JobStatus::Failed),
    )
}

fn render_status_bar(f: &mut Frame, app: &App, area: Rect) {
    let paragraph = Paragraph::new(status_text(app))
        .block(Block::default().borders(Borders::ALL).title("Status"))
        .wrap(ratatui::widgets::Wrap { trim: true });

    f.render_widget(paragraph, area);
}

fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reel::Topic;

    #[test]
    fn test_truncate_string_counts_chars() {
        assert_eq!(truncate_string("short", 10), "short");
        assert_eq!(truncate_string("abcdefghij", 8), "abcde...");
        assert_eq!(truncate_string("ééééé", 4), "é...");
    }

    #[test]
    fn test_clamp_percent() {
        assert_eq!(clamp_percent(f64::NAN), 0.0);
        assert_eq!(clamp_percent(150.0), 100.0);
        assert_eq!(clamp_percent(-1.0), 0.0);
        assert_eq!(clamp_percent(42.5), 42.5);
    }

    #[test]
    fn test_status_counts() {
        let mut app = App::new(PathBuf::from("/nonexistent"));
        let pending = Job::new(Topic::Queue, PathBuf::from("q.mp4"));
        let mut active = Job::new(Topic::Stack, PathBuf::from("s.mp4"));
        active.advance(JobStatus::Composing).unwrap();
        let mut failed = Job::new(Topic::Trees, PathBuf::from("t.mp4"));
        failed.fail("MuxError", "boom").unwrap();
        app.jobs = vec![pending, active, failed];

        assert_eq!(app.active_count(), 1);
        assert_eq!(app.count_by_status(JobStatus::Failed), 1);
        let text = status_text(&app);
        assert!(text.contains("Total: 3"));
        assert!(text.contains("Active: 1"));
    }

    #[test]
    fn test_selection_stays_in_bounds() {
        let mut app = App::new(PathBuf::from("/nonexistent"));
        app.select_next();
        assert_eq!(app.table_state.selected(), None);

        app.jobs = vec![Job::new(Topic::Arrays, PathBuf::from("a.mp4")); 2];
        app.select_next();
        app.select_next();
        app.select_next();
        assert_eq!(app.table_state.selected(), Some(1));
        app.select_previous();
        app.select_previous();
        assert_eq!(app.table_state.selected(), Some(0));
    }
}
