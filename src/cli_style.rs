//! Terminal rendering for the ingest console.
//!
//! Everything the console prints goes through here: notices, titled panels,
//! ledger tables and the views of candidates, pending entries and watcher
//! state.

use crate::ingestion::{
    BatchReport, FileDecision, IngestRecord, IngestStatistics, IngestStatus, PendingQueueEntry,
    RenamePreview, WatcherStatus,
};
use crate::matching::{MatchCandidate, MatchOutcome};
use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Color as CtColor, Stylize};
use std::io::{self, Write};
use std::path::Path;
use unicode_width::UnicodeWidthStr;

const PANEL_WIDTH: usize = 64;
/// Paths are shortened in the middle beyond this many columns.
const MAX_CELL_WIDTH: usize = 48;

pub fn get_styles() -> Styles {
    fn bold(color: AnsiColor) -> Style {
        Style::new().bold().fg_color(Some(Color::Ansi(color)))
    }
    Styles::styled()
        .usage(bold(AnsiColor::Cyan).underline())
        .header(bold(AnsiColor::Cyan).underline())
        .literal(bold(AnsiColor::Green))
        .valid(bold(AnsiColor::Green))
        .invalid(bold(AnsiColor::Red))
        .error(bold(AnsiColor::Red))
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

// ==================== Tones ====================

/// What a piece of output means, which decides its color and marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tone {
    Good,
    Warn,
    Bad,
    Info,
    Muted,
    Accent,
    Plain,
}

impl Tone {
    pub fn color(self) -> CtColor {
        match self {
            Tone::Good => CtColor::Rgb { r: 0, g: 255, b: 136 },
            Tone::Warn => CtColor::Rgb { r: 255, g: 165, b: 0 },
            Tone::Bad => CtColor::Rgb { r: 255, g: 85, b: 85 },
            Tone::Info => CtColor::Rgb { r: 100, g: 149, b: 237 },
            Tone::Muted => CtColor::Rgb { r: 128, g: 128, b: 128 },
            Tone::Accent => CtColor::Rgb { r: 180, g: 100, b: 255 },
            Tone::Plain => CtColor::Rgb { r: 255, g: 255, b: 255 },
        }
    }

    fn marker(self) -> &'static str {
        match self {
            Tone::Good => "✓",
            Tone::Warn => "⚠",
            Tone::Bad => "✗",
            Tone::Info => "ℹ",
            Tone::Muted => "○",
            Tone::Accent | Tone::Plain => "▶",
        }
    }

    pub fn of_status(status: IngestStatus) -> Tone {
        match status {
            IngestStatus::Success => Tone::Good,
            IngestStatus::Pending => Tone::Warn,
            IngestStatus::Failed => Tone::Bad,
        }
    }

    /// Green at or above the threshold, orange within a quarter of it, red
    /// below that.
    pub fn of_confidence(confidence: f64, threshold: f64) -> Tone {
        if confidence >= threshold {
            Tone::Good
        } else if confidence >= threshold * 0.75 {
            Tone::Warn
        } else {
            Tone::Bad
        }
    }
}

/// One status line, e.g. the result of a command.
pub fn notice(tone: Tone, message: &str) {
    println!(
        " {} {}",
        tone.marker().with(tone.color()).bold(),
        message.with(tone.color())
    );
}

pub fn percent(confidence: f64) -> String {
    format!("{:.0}%", confidence * 100.0)
}

pub fn format_millis(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Shortens `text` to `max` columns by eliding its middle, keeping the file
/// name at the end of a path readable.
pub fn fit(text: &str, max: usize) -> String {
    if text.width() <= max || max < 5 {
        return text.to_string();
    }
    let keep = max - 1;
    let tail_len = keep - keep / 3;
    let head_len = keep - tail_len;
    let chars: Vec<char> = text.chars().collect();
    let head: String = chars.iter().take(head_len).collect();
    let tail: String = chars[chars.len().saturating_sub(tail_len)..].iter().collect();
    format!("{}…{}", head, tail)
}

// ==================== Panels ====================

/// A titled block of aligned key/value fields.
pub struct Panel {
    title: String,
    fields: Vec<(String, String, Tone)>,
}

impl Panel {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    pub fn field(self, key: &str, value: impl ToString) -> Self {
        self.toned(key, value, Tone::Plain)
    }

    pub fn toned(mut self, key: &str, value: impl ToString, tone: Tone) -> Self {
        self.fields.push((key.to_string(), value.to_string(), tone));
        self
    }

    /// Adds the field only when there is a value.
    pub fn maybe<T: ToString>(self, key: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => self.field(key, value),
            None => self,
        }
    }

    fn key_width(&self) -> usize {
        self.fields.iter().map(|(key, _, _)| key.width()).max().unwrap_or(0)
    }

    pub fn print(&self) {
        let frame = Tone::Accent.color();
        let rule = PANEL_WIDTH.saturating_sub(self.title.width() + 3);
        println!();
        println!(
            "{} {} {}",
            "╭─".with(frame),
            self.title.as_str().with(frame).bold(),
            "─".repeat(rule).with(frame)
        );
        let key_width = self.key_width();
        for (key, value, tone) in &self.fields {
            println!(
                "{} {}{}  {}",
                "│".with(frame),
                key.as_str().with(Tone::Muted.color()),
                " ".repeat(key_width - key.width()),
                value.as_str().with(tone.color())
            );
        }
        if self.fields.is_empty() {
            println!(
                "{} {}",
                "│".with(frame),
                "nothing to show".with(Tone::Muted.color()).italic()
            );
        }
        println!("{}", format!("╰{}", "─".repeat(PANEL_WIDTH)).with(frame));
    }
}

// ==================== Tables ====================

/// Column-aligned rows; long cells are shortened with [`fit`].
pub struct Table {
    headers: Vec<String>,
    rows: Vec<(Vec<String>, Tone)>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|h| h.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(&mut self, cells: Vec<String>, tone: Tone) {
        let cells = cells.iter().map(|cell| fit(cell, MAX_CELL_WIDTH)).collect();
        self.rows.push((cells, tone));
    }

    fn widths(&self) -> Vec<usize> {
        let mut widths: Vec<usize> = self.headers.iter().map(|h| h.width()).collect();
        for (cells, _) in &self.rows {
            for (width, cell) in widths.iter_mut().zip(cells) {
                *width = (*width).max(cell.width());
            }
        }
        widths
    }

    fn pad(cell: &str, width: usize) -> String {
        format!("{}{}", cell, " ".repeat(width.saturating_sub(cell.width())))
    }

    pub fn print(&self) {
        let widths = self.widths();
        let header: Vec<String> = self
            .headers
            .iter()
            .zip(&widths)
            .map(|(h, w)| Self::pad(h, *w))
            .collect();
        println!("  {}", header.join("  ").with(Tone::Accent.color()).bold());
        let rule: Vec<String> = widths.iter().map(|w| "─".repeat(*w)).collect();
        println!("  {}", rule.join("  ").with(Tone::Muted.color()));
        for (cells, tone) in &self.rows {
            let line: Vec<String> = cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| Self::pad(cell, *w))
                .collect();
            println!("  {}", line.join("  ").with(tone.color()));
        }
    }
}

// ==================== Ingest views ====================

/// Ledger rows, newest first as given.
pub fn print_records(records: &[IngestRecord]) {
    if records.is_empty() {
        notice(Tone::Muted, "No records");
        return;
    }
    let mut table = Table::new(&["#", "When", "Status", "TMDb", "Source", "Destination"]);
    for record in records {
        table.row(
            vec![
                record.id.to_string(),
                format_millis(record.created_at),
                record.status.to_string(),
                record.external_id.map(|id| id.to_string()).unwrap_or_else(|| "-".into()),
                record.source_path.clone(),
                record.destination_path.clone(),
            ],
            Tone::of_status(record.status),
        );
    }
    table.print();
}

pub fn print_record(record: &IngestRecord) {
    Panel::new(format!("Record {}", record.id))
        .field("Created", format_millis(record.created_at))
        .toned("Status", record.status, Tone::of_status(record.status))
        .field("Source", &record.source_path)
        .field("Destination", &record.destination_path)
        .maybe("TMDb ID", record.external_id)
        .maybe("Kind", record.media_kind.map(|kind| kind.as_str()))
        .maybe("Confidence", record.confidence.map(percent))
        .maybe("Error", record.error_message.as_deref())
        .print();
}

fn candidate_panel(title: &str, candidate: &MatchCandidate, threshold: f64) -> Panel {
    let year = candidate
        .metadata
        .year()
        .map(|y| format!(" ({})", y))
        .unwrap_or_default();
    let episode = match (candidate.tokens.season, candidate.tokens.episode) {
        (Some(season), Some(episode)) => Some(format!("S{:02}E{:02}", season, episode)),
        _ => None,
    };
    Panel::new(title)
        .toned(
            "Match",
            format!("{}{}", candidate.metadata.title, year),
            Tone::Accent,
        )
        .field("Kind", candidate.kind().as_str())
        .field("TMDb ID", candidate.external_id)
        .toned(
            "Confidence",
            percent(candidate.confidence),
            Tone::of_confidence(candidate.confidence, threshold),
        )
        .maybe("Episode", episode)
        .field("Destination", candidate.destination.display())
}

fn print_outcome(filename: &str, outcome: &MatchOutcome, threshold: f64) {
    match outcome {
        MatchOutcome::Matched(candidate) => candidate_panel(filename, candidate, threshold).print(),
        MatchOutcome::Unmatched(reason) => {
            notice(Tone::Warn, &format!("{}: no match ({})", filename, reason))
        }
    }
}

pub fn print_preview(preview: &RenamePreview, threshold: f64) {
    print_outcome(&preview.filename, &preview.outcome, threshold);
    if let Some(warning) = &preview.warning {
        notice(Tone::Warn, warning);
    }
}

/// The review queue, oldest first as given.
pub fn print_pending(entries: &[PendingQueueEntry], threshold: f64) {
    if entries.is_empty() {
        notice(Tone::Muted, "Nothing waiting for review");
        return;
    }
    for entry in entries {
        let source = entry.source.display().to_string();
        let panel = match &entry.candidate {
            Some(candidate) => candidate_panel(&source, candidate, threshold),
            None => Panel::new(source).toned("Match", "none, approve with --dest", Tone::Bad),
        };
        panel
            .toned("Waiting", &entry.reason, Tone::Warn)
            .field("Seen", format_millis(entry.first_seen))
            .print();
    }
}

/// One line per file handled by `scan`.
pub fn print_decision(path: &Path, decision: &FileDecision) {
    let path = path.display().to_string();
    match decision {
        FileDecision::AutoIngested(record) => notice(
            Tone::Good,
            &format!("{} -> {}", fit(&path, MAX_CELL_WIDTH), record.destination_path),
        ),
        FileDecision::Queued(reason) => notice(
            Tone::Warn,
            &format!("{} queued: {}", fit(&path, MAX_CELL_WIDTH), reason),
        ),
        FileDecision::Failed { record_id, error } => {
            let record = record_id
                .map(|id| format!(" (record {})", id))
                .unwrap_or_default();
            notice(
                Tone::Bad,
                &format!("{}{}: {}", fit(&path, MAX_CELL_WIDTH), record, error),
            )
        }
    }
}

pub fn print_watcher_status(status: &WatcherStatus) {
    let (state, tone) = if status.running {
        ("running", Tone::Good)
    } else {
        ("stopped", Tone::Muted)
    };
    let auto = if status.settings.auto_ingest { "on" } else { "off" };
    Panel::new("Watcher")
        .toned("State", state, tone)
        .field("Auto-ingest", auto)
        .field("Threshold", percent(status.settings.confidence_threshold))
        .field("Stability", format!("{}s", status.settings.stability_seconds))
        .toned("Pending", status.pending, Tone::Warn)
        .field(
            "Processed",
            format!(
                "{} ({} ingested, {} queued, {} failed)",
                status.processed, status.auto_ingested, status.queued, status.failed
            ),
        )
        .print();
}

pub fn print_ledger_stats(stats: &IngestStatistics) {
    Panel::new("Ledger")
        .toned("Total", stats.total, Tone::Accent)
        .toned("Success", stats.success, Tone::Good)
        .toned("Failed", stats.failed, Tone::Bad)
        .toned("Pending", stats.pending, Tone::Warn)
        .field("Movies", stats.movies)
        .field("TV", stats.tv)
        .print();
}

pub fn print_batch_report(report: &BatchReport) {
    let mut table = Table::new(&["File", "Match", "Confidence", "Note"]);
    for item in &report.results {
        match &item.outcome {
            MatchOutcome::Matched(candidate) => {
                let tone = Tone::of_confidence(candidate.confidence, report.confidence_threshold);
                let note = if item.low_confidence { "verify" } else { "" };
                table.row(
                    vec![
                        item.filename.clone(),
                        candidate.metadata.title.clone(),
                        percent(candidate.confidence),
                        note.to_string(),
                    ],
                    tone,
                );
            }
            MatchOutcome::Unmatched(reason) => table.row(
                vec![item.filename.clone(), "-".into(), "-".into(), reason.to_string()],
                Tone::Bad,
            ),
        }
    }
    if !report.results.is_empty() {
        table.print();
    }
    notice(
        Tone::Info,
        &format!(
            "{} total, {} matched, {} unmatched, {} below {}",
            report.total,
            report.matched,
            report.failed,
            report.low_confidence,
            percent(report.confidence_threshold)
        ),
    );
}

// ==================== Session ====================

fn print_banner() {
    let banner = r#"
    ██╗███╗   ██╗ ██████╗ ███████╗███████╗████████╗
    ██║████╗  ██║██╔════╝ ██╔════╝██╔════╝╚══██╔══╝
    ██║██╔██╗ ██║██║  ███╗█████╗  ███████╗   ██║
    ██║██║╚██╗██║██║   ██║██╔══╝  ╚════██║   ██║
    ██║██║ ╚████║╚██████╔╝███████╗███████║   ██║
    ╚═╝╚═╝  ╚═══╝ ╚═════╝ ╚══════╝╚══════╝   ╚═╝"#;
    for line in banner.lines() {
        println!("{}", line.with(Tone::Accent.color()).bold());
    }
}

pub fn print_welcome(ingest_dir: &str, media_root: &str, db_dir: &str) {
    print_banner();
    Panel::new("Media ingest console")
        .field("Ingest", ingest_dir)
        .field("Library", media_root)
        .field("Databases", db_dir)
        .field(
            "Version",
            format!("{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH")),
        )
        .toned("Help", "type 'help' for commands", Tone::Muted)
        .print();
    println!();
}

pub fn get_prompt() -> String {
    format!("{} ", "ingest ❯".with(Tone::Accent.color()).bold())
}

pub struct CommandHelp {
    pub name: &'static str,
    pub args: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandGroup {
    Watcher,
    Review,
    Library,
    Metadata,
    MediaServer,
    System,
}

impl CommandGroup {
    const ALL: [CommandGroup; 6] = [
        CommandGroup::Watcher,
        CommandGroup::Review,
        CommandGroup::Library,
        CommandGroup::Metadata,
        CommandGroup::MediaServer,
        CommandGroup::System,
    ];

    pub fn of(command: &str) -> CommandGroup {
        match command {
            "status" | "start" | "stop" | "configure" | "scan" => CommandGroup::Watcher,
            "pending" | "approve" | "reject" => CommandGroup::Review,
            "list-files" | "ingest" | "history" | "record" | "check-duplicate" | "stats" => {
                CommandGroup::Library
            }
            "preview" | "identify" | "search" | "parse" | "cache-stats" | "cache-clear" => {
                CommandGroup::Metadata
            }
            "libraries" | "rescan" | "recent" | "find" | "server-info" => CommandGroup::MediaServer,
            _ => CommandGroup::System,
        }
    }

    fn title(self) -> &'static str {
        match self {
            CommandGroup::Watcher => "Watcher",
            CommandGroup::Review => "Review queue",
            CommandGroup::Library => "Files and ledger",
            CommandGroup::Metadata => "Metadata",
            CommandGroup::MediaServer => "Media server",
            CommandGroup::System => "System",
        }
    }
}

pub fn print_help(commands: &[CommandHelp]) {
    let name_width = commands.iter().map(|c| c.name.width()).max().unwrap_or(0);
    for group in CommandGroup::ALL {
        let members: Vec<_> = commands
            .iter()
            .filter(|c| CommandGroup::of(c.name) == group)
            .collect();
        if members.is_empty() {
            continue;
        }
        println!();
        println!("  {}", group.title().with(Tone::Accent.color()).bold());
        for cmd in members {
            println!(
                "    {}{}  {}  {}",
                cmd.name.with(Tone::Good.color()).bold(),
                " ".repeat(name_width - cmd.name.width()),
                cmd.description,
                cmd.args.with(Tone::Muted.color())
            );
        }
    }
    println!();
}

pub fn print_goodbye() {
    println!();
    notice(Tone::Info, "Bye. Unreviewed files stay in the ingest folder.");
}

pub fn flush() {
    if let Err(err) = io::stdout().flush() {
        eprintln!("stdout flush failed: {}", err);
    }
}
