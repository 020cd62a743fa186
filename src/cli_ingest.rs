use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use media_ingest::cli_style::{self, get_styles, notice, CommandHelp, Panel, Table, Tone};
use media_ingest::config::{AppConfig, CliConfig, FileConfig};
use media_ingest::ingestion::{
    DuplicateCriteria, IngestOrchestrator, IngestStatus, RecordQuery, SettingsUpdate,
    TransferMode, DEFAULT_RECENT_LIMIT,
};
use media_ingest::media_server::CatalogClient;
use media_ingest::metadata::MediaKind;
use media_ingest::build_orchestrator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rustyline::{
    completion::Completer, highlight::Highlighter, history::FileHistory, validate::Validator,
    CompletionType, Config, Editor, Helper,
};

fn parse_path(s: &str) -> Result<PathBuf> {
    let original_path = PathBuf::from(s);
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

fn parse_kind(s: &str) -> Result<MediaKind, String> {
    MediaKind::parse(s).ok_or_else(|| format!("unknown media kind '{}' (movie or tv)", s))
}

fn parse_status(s: &str) -> Result<IngestStatus, String> {
    IngestStatus::parse(s).ok_or_else(|| format!("unknown status '{}' (pending, success, failed)", s))
}

#[derive(Parser, Debug)]
#[command(styles=get_styles())]
struct CliArgs {
    /// Path to a TOML config file. Values in the file override CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    #[clap(long, value_parser = parse_path)]
    pub media_root: Option<PathBuf>,

    #[clap(long, value_parser = parse_path)]
    pub ingest_dir: Option<PathBuf>,

    #[clap(long, env = "TMDB_API_KEY", hide_env_values = true)]
    pub tmdb_api_key: Option<String>,

    #[clap(long)]
    pub plex_url: Option<String>,

    #[clap(long, env = "PLEX_TOKEN", hide_env_values = true)]
    pub plex_token: Option<String>,

    /// Start the watcher as soon as the console opens. Fails if another
    /// process (such as ingest-server) already watches this database directory.
    #[clap(long)]
    pub watch: bool,
}

#[derive(Parser)]
#[command(styles=get_styles(),name = "")]
struct InnerCli {
    #[command(subcommand)]
    command: InnerCommand,
}

#[derive(Subcommand)]
enum InnerCommand {
    /// Shows watcher state, settings and counters.
    Status,

    /// Starts watching the ingest directory.
    Start,

    /// Stops the watcher, waiting for in-flight files.
    Stop,

    /// Changes watcher settings. Applies to files detected afterwards.
    Configure {
        #[clap(long)]
        auto_ingest: Option<bool>,
        #[clap(long)]
        threshold: Option<f64>,
        #[clap(long)]
        stability_seconds: Option<u64>,
    },

    /// Runs a single detection pass and processes stable files now.
    Scan,

    /// Lists files waiting for review.
    Pending,

    /// Ingests a pending file with its match or an explicit destination.
    Approve {
        source: PathBuf,
        #[clap(long)]
        dest: Option<PathBuf>,
    },

    /// Drops a pending file from the queue.
    Reject {
        source: PathBuf,
        /// Also write a failed record to the ledger.
        #[clap(long)]
        record: bool,
    },

    /// Lists media files in the ingest directory.
    ListFiles,

    /// Ingests one file right away, matching it when no destination is given.
    Ingest {
        source: PathBuf,
        #[clap(long)]
        dest: Option<PathBuf>,
        /// Copy instead of move.
        #[clap(long)]
        copy: bool,
    },

    /// Queries the ingest ledger, newest first.
    History {
        #[clap(long, value_parser = parse_status)]
        status: Option<IngestStatus>,
        #[clap(long)]
        external_id: Option<u64>,
        #[clap(long, value_parser = parse_kind)]
        kind: Option<MediaKind>,
        #[clap(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// Shows a single ledger record.
    Record { id: i64 },

    /// Checks whether an external ID or source path was already ingested.
    CheckDuplicate {
        #[clap(long)]
        external_id: Option<u64>,
        #[clap(long)]
        source: Option<String>,
        #[clap(long)]
        include_failed: bool,
    },

    /// Shows ledger statistics.
    Stats,

    /// Shows how a filename would be matched and where it would go.
    Preview { filename: String },

    /// Identifies several filenames at once.
    Identify {
        filenames: Vec<String>,
        #[clap(long)]
        threshold: Option<f64>,
    },

    /// Searches metadata by title.
    Search {
        title: String,
        #[clap(long)]
        year: Option<i32>,
        #[clap(long, value_parser = parse_kind, default_value = "movie")]
        kind: MediaKind,
    },

    /// Shows the tokens extracted from a filename.
    Parse { filename: String },

    /// Shows metadata cache entry counts.
    CacheStats,

    /// Removes every cached metadata response.
    CacheClear,

    /// Lists media server library sections.
    Libraries,

    /// Asks the media server to rescan a section.
    Rescan { section_id: String },

    /// Lists recently added items of a section.
    Recent {
        section_id: String,
        #[clap(long, default_value_t = DEFAULT_RECENT_LIMIT)]
        limit: usize,
    },

    /// Searches a library section on the media server.
    Find { section_id: String, query: String },

    /// Shows media server identity.
    ServerInfo,

    /// Shows this help.
    Help,

    /// Close this program.
    Exit,
}

enum CommandExecutionResult {
    Ok,
    Exit,
    Error(String),
}

struct Console {
    runtime: Runtime,
    orchestrator: Arc<IngestOrchestrator>,
}

impl Console {
    fn catalog(&self) -> Result<Arc<dyn CatalogClient>, String> {
        self.orchestrator
            .catalog()
            .cloned()
            .ok_or_else(|| "No media server configured (--plex-url)".to_string())
    }
}

fn help_entries() -> Vec<CommandHelp> {
    vec![
        CommandHelp { name: "status", args: "", description: "Watcher state and counters" },
        CommandHelp { name: "start", args: "", description: "Start the watcher" },
        CommandHelp { name: "stop", args: "", description: "Stop the watcher" },
        CommandHelp { name: "configure", args: "[--auto-ingest B] [--threshold F] [--stability-seconds N]", description: "Change watcher settings" },
        CommandHelp { name: "scan", args: "", description: "Process stable files now" },
        CommandHelp { name: "pending", args: "", description: "Files awaiting review" },
        CommandHelp { name: "approve", args: "<source> [--dest P]", description: "Ingest a pending file" },
        CommandHelp { name: "reject", args: "<source> [--record]", description: "Drop a pending file" },
        CommandHelp { name: "list-files", args: "", description: "Media files in the ingest folder" },
        CommandHelp { name: "ingest", args: "<source> [--dest P] [--copy]", description: "Ingest a file manually" },
        CommandHelp { name: "history", args: "[--status S] [--external-id N] [--kind K] [--limit N]", description: "Ledger records" },
        CommandHelp { name: "record", args: "<id>", description: "One ledger record" },
        CommandHelp { name: "check-duplicate", args: "[--external-id N] [--source P] [--include-failed]", description: "Was it ingested before?" },
        CommandHelp { name: "stats", args: "", description: "Ledger statistics" },
        CommandHelp { name: "preview", args: "<filename>", description: "Show match and destination" },
        CommandHelp { name: "identify", args: "<filename>... [--threshold F]", description: "Batch identification" },
        CommandHelp { name: "search", args: "<title> [--year Y] [--kind K]", description: "Metadata search" },
        CommandHelp { name: "parse", args: "<filename>", description: "Extracted filename tokens" },
        CommandHelp { name: "cache-stats", args: "", description: "Metadata cache counts" },
        CommandHelp { name: "cache-clear", args: "", description: "Empty the metadata cache" },
        CommandHelp { name: "libraries", args: "", description: "Media server sections" },
        CommandHelp { name: "rescan", args: "<section>", description: "Rescan a section" },
        CommandHelp { name: "recent", args: "<section> [--limit N]", description: "Recently added items" },
        CommandHelp { name: "find", args: "<section> <query>", description: "Search a section" },
        CommandHelp { name: "server-info", args: "", description: "Media server identity" },
        CommandHelp { name: "help", args: "", description: "Show this help" },
        CommandHelp { name: "exit", args: "", description: "Close the console" },
    ]
}

fn year_suffix(year: Option<i32>) -> String {
    year.map(|y| format!(" ({})", y)).unwrap_or_default()
}

fn execute_command(line: String, console: &Console) -> CommandExecutionResult {
    if line.is_empty() {
        return CommandExecutionResult::Ok;
    }

    let args =
        shlex::split(&line).unwrap_or_else(|| line.split_whitespace().map(String::from).collect());

    let cli = InnerCli::try_parse_from(std::iter::once(" ").chain(args.iter().map(String::as_str)));

    let cli = match cli {
        Ok(cli) => cli,
        Err(e) => {
            if e.print().is_err() {
                println!("{}", e);
            }
            return CommandExecutionResult::Ok;
        }
    };

    let orchestrator = &console.orchestrator;
    let rt = &console.runtime;
    let threshold = orchestrator.settings().confidence_threshold;

    match cli.command {
        InnerCommand::Status => {
            cli_style::print_watcher_status(&rt.block_on(orchestrator.status()));
        }
        InnerCommand::Start => {
            if let Err(err) = rt.block_on(orchestrator.start()) {
                return CommandExecutionResult::Error(err.to_string());
            }
            notice(Tone::Good, "Watcher started");
        }
        InnerCommand::Stop => {
            if let Err(err) = rt.block_on(orchestrator.stop()) {
                return CommandExecutionResult::Error(err.to_string());
            }
            notice(Tone::Good, "Watcher stopped");
        }
        InnerCommand::Configure {
            auto_ingest,
            threshold,
            stability_seconds,
        } => {
            let update = SettingsUpdate {
                auto_ingest,
                confidence_threshold: threshold,
                stability_seconds,
            };
            match orchestrator.configure(update) {
                Ok(settings) => notice(
                    Tone::Good,
                    &format!(
                        "auto_ingest={}, threshold={}, stability={}s",
                        settings.auto_ingest,
                        cli_style::percent(settings.confidence_threshold),
                        settings.stability_seconds
                    ),
                ),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Scan => {
            let decisions = match rt.block_on(orchestrator.scan_once()) {
                Ok(decisions) => decisions,
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            };
            if decisions.is_empty() {
                notice(Tone::Muted, "No stable files (new files need a second scan)");
            }
            for (path, decision) in &decisions {
                cli_style::print_decision(path, decision);
            }
        }
        InnerCommand::Pending => cli_style::print_pending(&orchestrator.pending(), threshold),
        InnerCommand::Approve { source, dest } => {
            match rt.block_on(orchestrator.approve(&source, dest)) {
                Ok(record) => cli_style::print_record(&record),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Reject { source, record } => {
            match rt.block_on(orchestrator.reject(&source, record)) {
                Ok(Some(record)) => notice(
                    Tone::Good,
                    &format!("Rejected, failure recorded as {}", record.id),
                ),
                Ok(None) => notice(Tone::Good, "Rejected"),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::ListFiles => match orchestrator.list_ingest_files() {
            Ok(files) if files.is_empty() => notice(Tone::Muted, "Ingest folder is empty"),
            Ok(files) => {
                let mut table = Table::new(&["File"]);
                for file in files {
                    table.row(vec![file.display().to_string()], Tone::Plain);
                }
                table.print();
            }
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::Ingest { source, dest, copy } => {
            let mode = if copy {
                TransferMode::Copy
            } else {
                TransferMode::Move
            };
            match rt.block_on(orchestrator.ingest_file(&source, dest, mode)) {
                Ok(record) => cli_style::print_record(&record),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::History {
            status,
            external_id,
            kind,
            limit,
        } => {
            let query = RecordQuery {
                status,
                external_id,
                media_kind: kind,
                limit: Some(limit),
                ..Default::default()
            };
            match orchestrator.history(&query) {
                Ok(records) => cli_style::print_records(&records),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Record { id } => match orchestrator.record(id) {
            Ok(Some(record)) => cli_style::print_record(&record),
            Ok(None) => return CommandExecutionResult::Error(format!("Record {} not found", id)),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::CheckDuplicate {
            external_id,
            source,
            include_failed,
        } => {
            if external_id.is_none() && source.is_none() {
                return CommandExecutionResult::Error(
                    "Give --external-id and/or --source".to_string(),
                );
            }
            let criteria = DuplicateCriteria {
                external_id,
                source_path: source,
                include_failed,
            };
            match orchestrator.check_duplicate(&criteria) {
                Ok(true) => notice(Tone::Warn, "Already ingested"),
                Ok(false) => notice(Tone::Good, "Not ingested yet"),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Stats => match orchestrator.statistics() {
            Ok(stats) => cli_style::print_ledger_stats(&stats),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::Preview { filename } => {
            cli_style::print_preview(&rt.block_on(orchestrator.preview(&filename)), threshold);
        }
        InnerCommand::Identify {
            filenames,
            threshold,
        } => match rt.block_on(orchestrator.batch_identify(&filenames, threshold)) {
            Ok(report) => cli_style::print_batch_report(&report),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::Search { title, year, kind } => {
            match rt.block_on(orchestrator.engine().search(&title, year, kind)) {
                Ok(results) if results.is_empty() => notice(Tone::Muted, "No results"),
                Ok(results) => {
                    let mut table = Table::new(&["TMDb", "Title"]);
                    for result in results {
                        table.row(
                            vec![
                                result.id.to_string(),
                                format!("{}{}", result.title, year_suffix(result.year())),
                            ],
                            Tone::Plain,
                        );
                    }
                    table.print();
                }
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Parse { filename } => match orchestrator.engine().parse(&filename) {
            Ok(tokens) => Panel::new(filename.as_str())
                .toned("Title", &tokens.title, Tone::Accent)
                .field("Kind", tokens.kind.as_str())
                .maybe("Year", tokens.year)
                .maybe("Season", tokens.season)
                .maybe("Episode", tokens.episode)
                .print(),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::CacheStats => match orchestrator.engine().cache().stats() {
            Ok(stats) => Panel::new("Metadata cache")
                .toned("Searches", stats.total, Tone::Accent)
                .field("Movie", stats.movie)
                .field("TV", stats.tv)
                .print(),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::CacheClear => match orchestrator.engine().cache().clear() {
            Ok(removed) => notice(Tone::Good, &format!("Removed {} cached search(es)", removed)),
            Err(err) => return CommandExecutionResult::Error(err.to_string()),
        },
        InnerCommand::Libraries => {
            let catalog = match console.catalog() {
                Ok(catalog) => catalog,
                Err(err) => return CommandExecutionResult::Error(err),
            };
            match rt.block_on(catalog.list_sections()) {
                Ok(sections) => {
                    let mut table = Table::new(&["ID", "Title", "Type", "Locations"]);
                    for s in sections {
                        table.row(
                            vec![s.id, s.title, s.kind, s.locations.join(", ")],
                            Tone::Plain,
                        );
                    }
                    table.print();
                }
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Rescan { section_id } => {
            let catalog = match console.catalog() {
                Ok(catalog) => catalog,
                Err(err) => return CommandExecutionResult::Error(err),
            };
            if let Err(err) = rt.block_on(catalog.scan_section(&section_id)) {
                return CommandExecutionResult::Error(err.to_string());
            }
            notice(Tone::Good, &format!("Rescan of section {} requested", section_id));
        }
        InnerCommand::Recent { section_id, limit } => {
            let catalog = match console.catalog() {
                Ok(catalog) => catalog,
                Err(err) => return CommandExecutionResult::Error(err),
            };
            match rt.block_on(catalog.recent_items(&section_id, limit)) {
                Ok(items) if items.is_empty() => notice(Tone::Muted, "Nothing added recently"),
                Ok(items) => {
                    let mut table = Table::new(&["Added", "Title"]);
                    for item in items {
                        table.row(
                            vec![
                                item.added_at
                                    .map(|secs| cli_style::format_millis(secs * 1000))
                                    .unwrap_or_else(|| "-".to_string()),
                                format!("{}{}", item.title, year_suffix(item.year)),
                            ],
                            Tone::Plain,
                        );
                    }
                    table.print();
                }
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Find { section_id, query } => {
            let catalog = match console.catalog() {
                Ok(catalog) => catalog,
                Err(err) => return CommandExecutionResult::Error(err),
            };
            match rt.block_on(catalog.search_section(&section_id, &query)) {
                Ok(items) if items.is_empty() => notice(Tone::Muted, "No items found"),
                Ok(items) => {
                    let mut table = Table::new(&["ID", "Title"]);
                    for item in items {
                        table.row(
                            vec![item.id, format!("{}{}", item.title, year_suffix(item.year))],
                            Tone::Plain,
                        );
                    }
                    table.print();
                }
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::ServerInfo => {
            let catalog = match console.catalog() {
                Ok(catalog) => catalog,
                Err(err) => return CommandExecutionResult::Error(err),
            };
            match rt.block_on(catalog.server_info()) {
                Ok(info) => Panel::new(info.name)
                    .field("Version", info.version)
                    .field("Platform", info.platform)
                    .field("Machine ID", info.machine_id)
                    .print(),
                Err(err) => return CommandExecutionResult::Error(err.to_string()),
            }
        }
        InnerCommand::Help => cli_style::print_help(&help_entries()),
        InnerCommand::Exit => return CommandExecutionResult::Exit,
    }
    CommandExecutionResult::Ok
}

#[derive(rustyline_derive::Hinter)]
struct MyHelper {
    commands_names: Vec<String>,
}

impl MyHelper {
    pub fn new() -> Self {
        let commands_names: Vec<String> = InnerCli::command()
            .get_subcommands()
            .map(|sc| sc.get_name().to_string())
            .collect();

        MyHelper { commands_names }
    }
}

impl Completer for MyHelper {
    type Candidate = String;

    fn complete(
        &self,
        line: &str,
        _pos: usize,
        _ctx: &rustyline::Context<'_>,
    ) -> rustyline::Result<(usize, Vec<String>)> {
        if line.contains(' ') {
            return Ok((0, Vec::with_capacity(0)));
        }
        let matches = self
            .commands_names
            .iter()
            .filter(|c| c.starts_with(line))
            .map(|c| c.to_string())
            .collect::<Vec<_>>();

        Ok((0, matches))
    }
}

impl Highlighter for MyHelper {}
impl Validator for MyHelper {}
impl Helper for MyHelper {}

fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::WARN.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        media_root: cli_args.media_root.clone(),
        ingest_dir: cli_args.ingest_dir.clone(),
        tmdb_api_key: cli_args.tmdb_api_key.clone(),
        plex_url: cli_args.plex_url.clone(),
        plex_token: cli_args.plex_token.clone(),
        no_watcher: !cli_args.watch,
        ..Default::default()
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    let runtime = Runtime::new().context("Failed to start async runtime")?;
    let orchestrator = {
        let _guard = runtime.enter();
        Arc::new(build_orchestrator(&config)?)
    };
    let mut watcher_error = None;
    if config.watcher.auto_start {
        if let Err(err) = runtime.block_on(orchestrator.start()) {
            watcher_error = Some(err);
        }
    }
    let console = Console {
        runtime,
        orchestrator,
    };

    cli_style::print_welcome(
        &config.ingest_dir.display().to_string(),
        &config.media_root.display().to_string(),
        &config.db_dir.display().to_string(),
    );

    if let Some(err) = watcher_error {
        notice(Tone::Warn, &format!("Watcher not started: {}", err));
        notice(Tone::Info, "Review commands still work on files found by 'scan'.");
    }

    let rl_config = Config::builder()
        .completion_type(CompletionType::List)
        .build();

    let mut rl = Editor::<MyHelper, FileHistory>::with_config(rl_config)?;

    let helper = MyHelper::new();
    rl.set_helper(Some(helper));

    let prompt = cli_style::get_prompt();
    loop {
        let readline = rl.readline(&prompt);

        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                match execute_command(line.trim().to_string(), &console) {
                    CommandExecutionResult::Ok => {}
                    CommandExecutionResult::Exit => {
                        break;
                    }
                    CommandExecutionResult::Error(err) => {
                        notice(Tone::Bad, &err);
                        continue;
                    }
                }
            }
            Err(rustyline::error::ReadlineError::Interrupted) => {
                println!("CTRL-C");
                break;
            }
            Err(rustyline::error::ReadlineError::Eof) => {
                println!("CTRL-D: exiting.");
                break;
            }
            Err(e) => {
                println!("Error: {:?}", e);
                break;
            }
        }
        cli_style::flush();
    }

    if console.runtime.block_on(console.orchestrator.is_running()) {
        if let Err(err) = console.runtime.block_on(console.orchestrator.stop()) {
            notice(Tone::Bad, &format!("Stopping the watcher failed: {}", err));
        }
    }
    cli_style::print_goodbye();
    Ok(())
}
