mod admin;
mod cleanup;
mod collector;
mod config;
mod model;
mod remote;
mod retry;
mod review;
mod store;
mod tui;

use admin::AdminOperator;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cleanup::{CleanupEngine, CleanupReport, DEFAULT_CLEAR_LIMIT};
use collector::{collect_into, list_all_dialogs, CollectOptions, DEFAULT_INACTIVE_MONTHS};
use config::{apply_env, load_config, validate_config, Config, DEFAULT_CONFIG_FILE};
use model::{AdminOutcome, ChatRef, CleanupOutcome, OutcomeStatus, Tally};
use remote::ChatService;
use retry::with_throttle;
use review::ReviewSession;
use std::{cell::RefCell, path::PathBuf, process::ExitCode};
use store::{save_records, CandidateStore, FileKeepList};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Exit code when every chat of a batch command failed.
const EXIT_ALL_FAILED: u8 = 2;
const EXIT_INTERRUPTED: u8 = 130;
const PREVIEW_CHARS: usize = 50;

#[derive(Parser, Debug)]
#[command(
    name = "tg-cleaner",
    version,
    about = "Manage your Telegram chats: find inactive ones, review them, delete your messages"
)]
struct Cli {
    /// YAML config file (default: tg-cleaner.yaml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store all DMs and chats to a JSON file with names and last contact dates
    Store {
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Collect chats whose last message is older than the given number of months
    Collect {
        #[arg(short, long)]
        output: Option<PathBuf>,
        #[arg(short, long, default_value_t = DEFAULT_INACTIVE_MONTHS)]
        months: u32,
        /// Maximum number of chats to collect
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Review collected chats interactively (j/k move, d remove, s keep forever, q quit)
    View { file: Option<PathBuf> },
    /// Delete your messages from every chat in the candidate file
    Clean {
        file: Option<PathBuf>,
        /// Show what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Clear your own most recent messages from one chat
    Clear {
        /// Username, t.me link, phone number or chat id
        #[arg(allow_negative_numbers = true)]
        chat: ChatRef,
        #[arg(short, long, default_value_t = DEFAULT_CLEAR_LIMIT)]
        limit: usize,
        #[arg(long)]
        dry_run: bool,
    },
    /// Add a user to chats and make them admin
    AddAdmin {
        #[arg(allow_negative_numbers = true)]
        user: ChatRef,
        #[arg(required = true, allow_negative_numbers = true)]
        chats: Vec<ChatRef>,
        #[arg(long)]
        dry_run: bool,
    },
}

impl Command {
    fn is_interactive(&self) -> bool {
        matches!(self, Command::View { .. })
    }
}

fn load_settings(cli: &Cli) -> Result<Config> {
    let _ = dotenvy::dotenv();
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let mut cfg = load_config(&path, cli.config.is_some())?;
    apply_env(&mut cfg, |k| std::env::var(k).ok())?;
    validate_config(&cfg)?;
    Ok(cfg)
}

fn init_tracing(cfg: &Config, interactive: bool) {
    let level = if interactive {
        "warn".to_string()
    } else {
        cfg.log_level.clone().unwrap_or_else(|| "info".into())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[cfg(feature = "mtproto")]
async fn connect(cfg: &Config) -> Result<Box<dyn ChatService>> {
    let creds = cfg.credentials()?;
    let svc = remote::mtproto::MtprotoService::connect(&creds).await?;
    Ok(Box::new(svc))
}

#[cfg(not(feature = "mtproto"))]
async fn connect(cfg: &Config) -> Result<Box<dyn ChatService>> {
    cfg.credentials()?;
    Err(anyhow::anyhow!(
        "this build has no Telegram client; rebuild with `--features mtproto`"
    ))
}

fn exit_for(tally: Tally) -> ExitCode {
    if tally.all_failed() {
        ExitCode::from(EXIT_ALL_FAILED)
    } else {
        ExitCode::SUCCESS
    }
}

fn preview(text: &str) -> String {
    if text.is_empty() {
        return "[media]".into();
    }
    text.chars().take(PREVIEW_CHARS).collect()
}

fn print_cleanup_line(pos: usize, total: usize, o: &CleanupOutcome) {
    println!("[{}/{}] {}: {} - {}", pos, total, o.label, o.status, o.detail);
}

fn print_admin_line(o: &AdminOutcome) {
    println!("  {}: {} - {}", o.chat, o.status, o.detail);
}

async fn cmd_store(cfg: &Config, output: Option<PathBuf>) -> Result<ExitCode> {
    let path = output.unwrap_or_else(|| cfg.dialogs_path());
    let svc = connect(cfg).await?;
    println!("Fetching dialogs...");
    let all = list_all_dialogs(&*svc, cfg.retry_policy()).await?;
    save_records(&path, &all)?;
    println!("Stored {} dialogs to {}", all.len(), path.display());
    Ok(ExitCode::SUCCESS)
}

async fn cmd_collect(
    cfg: &Config,
    output: Option<PathBuf>,
    months: u32,
    limit: Option<usize>,
) -> Result<ExitCode> {
    let store = CandidateStore::new(output.unwrap_or_else(|| cfg.candidates_path()));
    let keep = FileKeepList::load(cfg.keep_path())?;
    let svc = connect(cfg).await?;

    println!("Fetching dialogs (looking for chats inactive for {months}+ months)...");
    let report = collect_into(
        &*svc,
        &keep,
        &store,
        CollectOptions::new(months, limit),
        cfg.retry_policy(),
    )
    .await?;
    println!(
        "Found {} inactive chats (out of {} scanned, {} on keep-list)",
        report.list.len(),
        report.scanned,
        report.kept
    );
    println!("Saved to {}", store.path().display());
    Ok(ExitCode::SUCCESS)
}

fn cmd_view(cfg: &Config, file: Option<PathBuf>) -> Result<ExitCode> {
    let store = CandidateStore::new(file.unwrap_or_else(|| cfg.candidates_path()));
    let list = store.load()?;
    if list.is_empty() {
        println!("No chats found in {}.", store.path().display());
        return Ok(ExitCode::SUCCESS);
    }
    let mut keep = FileKeepList::load(cfg.keep_path())?;

    let mut term = tui::Tui::enter().context("enter terminal UI")?;
    let mut session = ReviewSession::new(list, &store, &mut keep);
    let run = session.run(&mut tui::TerminalKeys, &mut term);
    let restored = term.restore();
    let summary = run?;
    restored.context("restore terminal")?;

    println!(
        "Removed {} chats, kept {} forever ({}); {} left in {}",
        summary.removed,
        summary.kept,
        keep.path().display(),
        summary.remaining,
        store.path().display()
    );
    Ok(ExitCode::SUCCESS)
}

async fn cmd_clean(cfg: &Config, file: Option<PathBuf>, dry_run: bool) -> Result<ExitCode> {
    let store = CandidateStore::new(file.unwrap_or_else(|| cfg.candidates_path()));
    let list = store.load()?;
    if list.is_empty() {
        println!("No chats found in the file.");
        return Ok(ExitCode::SUCCESS);
    }
    let svc = connect(cfg).await?;

    println!("Processing {} chats...", list.len());
    if dry_run {
        println!("DRY RUN - No messages will be deleted\n");
    }
    let engine = CleanupEngine::new(&*svc, cfg.retry_policy(), dry_run)
        .with_page_size(cfg.history_page_size());
    let total = list.len();
    let finished = RefCell::new(Vec::with_capacity(total));
    let report = tokio::select! {
        r = engine.clean_list(&store, &list, |i, o| {
            print_cleanup_line(i + 1, total, o);
            finished.borrow_mut().push(o.clone());
        }) => r?,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; {} reflects every chat finished so far", store.path().display());
            let partial = CleanupReport {
                outcomes: finished.take(),
                dry_run,
            };
            print!("{}", cleanup_summary(&partial));
            println!("  Interrupted after {}/{} chats", partial.outcomes.len(), total);
            return Ok(ExitCode::from(EXIT_INTERRUPTED));
        }
    };

    print!("{}", cleanup_summary(&report));
    Ok(exit_for(report.tally()))
}

fn cleanup_summary(report: &CleanupReport) -> String {
    let mut out = format!("\n{}\nSummary:\n", "=".repeat(40));
    out.push_str(&format!("  Chats: {}\n", report.tally()));
    out.push_str(&format!("  Messages found: {}\n", report.found()));
    if report.dry_run {
        out.push_str(&format!("  Messages to delete: {}\n", report.found()));
    } else {
        out.push_str(&format!("  Messages deleted: {}\n", report.deleted()));
    }
    out
}

async fn cmd_clear(cfg: &Config, chat: ChatRef, limit: usize, dry_run: bool) -> Result<ExitCode> {
    let svc = connect(cfg).await?;
    let policy = cfg.retry_policy();

    println!("Resolving chat: {chat}");
    let record = with_throttle(policy, "resolve chat", || svc.resolve_chat(&chat))
        .await
        .with_context(|| format!("could not find chat '{chat}'"))?;
    println!("Chat: {} ({})", record.label(), record.chat_kind);
    println!("Limit: {limit} messages");
    if dry_run {
        println!("DRY RUN - No messages will be deleted");
    }

    let engine = CleanupEngine::new(&*svc, policy, dry_run).with_page_size(cfg.history_page_size());
    println!("Scanning messages...");
    let messages = engine
        .scan_own_messages(record.chat_id, Some(limit))
        .await
        .context("scan messages")?;
    for m in &messages {
        println!("  [{}] ID:{} - {}", m.date.to_rfc3339(), m.id, preview(&m.text));
    }
    if messages.is_empty() {
        println!("No messages found to delete");
        return Ok(ExitCode::SUCCESS);
    }
    println!("\nFound {} messages", messages.len());

    let outcome = engine.delete_scanned(&record, &messages).await;
    print_cleanup_line(1, 1, &outcome);
    if engine.is_dry_run() {
        println!("Dry run complete. Use without --dry-run to delete.");
    } else {
        println!("\nDeleted {}/{} messages", outcome.deleted, outcome.found);
    }
    Ok(exit_for(Tally::from_statuses([outcome.status])))
}

async fn cmd_add_admin(
    cfg: &Config,
    user: ChatRef,
    chats: Vec<ChatRef>,
    dry_run: bool,
) -> Result<ExitCode> {
    let svc = connect(cfg).await?;
    println!("Resolving user: {user}");
    if dry_run {
        println!("DRY RUN - No changes will be made");
    }
    let op = AdminOperator::new(&*svc, cfg.retry_policy(), dry_run);
    let report = op.promote_everywhere(&user, &chats, print_admin_line).await?;

    let tally = report.tally();
    println!(
        "\nTarget user: {} ({}). {}",
        report.user.label(),
        report.user.chat_id,
        tally
    );
    let manual: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|o| o.status == OutcomeStatus::Skipped && o.detail.contains("manually"))
        .map(|o| o.chat.as_str())
        .collect();
    if !manual.is_empty() {
        println!("Promote manually in: {}", manual.join(", "));
    }
    Ok(exit_for(tally))
}

async fn run(cli: Cli, cfg: Config) -> Result<ExitCode> {
    match cli.command {
        Command::Store { output } => cmd_store(&cfg, output).await,
        Command::Collect {
            output,
            months,
            limit,
        } => cmd_collect(&cfg, output, months, limit).await,
        Command::View { file } => cmd_view(&cfg, file),
        Command::Clean { file, dry_run } => cmd_clean(&cfg, file, dry_run).await,
        Command::Clear {
            chat,
            limit,
            dry_run,
        } => cmd_clear(&cfg, chat, limit, dry_run).await,
        Command::AddAdmin {
            user,
            chats,
            dry_run,
        } => cmd_add_admin(&cfg, user, chats, dry_run).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match load_settings(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&cfg, cli.command.is_interactive());
    info!("tg-cleaner {}", env!("CARGO_PKG_VERSION"));

    match run(cli, cfg).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
