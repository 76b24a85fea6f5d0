use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result, bail};
use catbatch_core::cancel::CancellationToken;
use catbatch_core::client::{Credentials, MediaWikiClient, MediaWikiClientConfig};
use catbatch_core::config::{CatbatchConfig, STATE_DIR_NAME, default_config_path, load_config};
use catbatch_core::diff::render_content_diff;
use catbatch_core::error::GatewayError;
use catbatch_core::executor::{BatchExecutor, BatchObserver};
use catbatch_core::failure_log::FailureLog;
use catbatch_core::gateway::WikiGateway;
use catbatch_core::model::{BatchRequest, BatchResult, CircularPolicy, FileRecord, PreviewItem};
use catbatch_core::normalize::category_title;
use catbatch_core::planner::ChangePlanner;
use catbatch_core::search::{SearchCoordinator, SearchOutcome};
use catbatch_core::wikitext::{apply_category_changes, extract_categories};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "catbatch",
    version,
    about = "Batch add/remove categories on Wikimedia Commons files"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, global = true, value_name = "LEVEL", default_value = "warn")]
    log_level: String,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// List files in a category whose title matches a pattern
    Search(SearchArgs),
    /// Show the category changes a batch would make, without editing
    Preview(PreviewArgs),
    /// Search, preview and (with --yes) apply category changes
    Run(RunArgs),
    /// Show the wikitext change for a single file
    Diff(DiffArgs),
    /// Show or clear the local failure log
    Failures(FailuresArgs),
}

#[derive(Debug, Args)]
struct SearchArgs {
    category: String,
    pattern: String,
}

#[derive(Debug, Args)]
struct ChangeArgs {
    #[arg(long = "add", value_name = "CATEGORY", help = "Category to add (repeatable)")]
    add: Vec<String>,
    #[arg(
        long = "remove",
        value_name = "CATEGORY",
        help = "Category to remove (repeatable)"
    )]
    remove: Vec<String>,
}

#[derive(Debug, Args)]
struct PreviewArgs {
    category: String,
    pattern: String,
    #[command(flatten)]
    changes: ChangeArgs,
    #[arg(long, help = "Drop the searched category from --add instead of refusing")]
    allow_circular: bool,
}

#[derive(Debug, Args)]
struct RunArgs {
    category: String,
    pattern: String,
    #[command(flatten)]
    changes: ChangeArgs,
    #[arg(long = "only", value_name = "TITLE", help = "Restrict the batch to these files")]
    only: Vec<String>,
    #[arg(long, help = "Drop the searched category from --add instead of refusing")]
    allow_circular: bool,
    #[arg(long, help = "Apply the edits (otherwise stop after the preview)")]
    yes: bool,
}

#[derive(Debug, Args)]
struct DiffArgs {
    title: String,
    #[command(flatten)]
    changes: ChangeArgs,
}

#[derive(Debug, Args)]
struct FailuresArgs {
    #[arg(long, help = "Delete the failure log")]
    clear: bool,
}

struct Runtime {
    config: CatbatchConfig,
    state_dir: PathBuf,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    setup_logging(&cli.log_level);

    let cancel = CancellationToken::new();
    install_interrupt_handler(&cancel);

    match cli.command {
        Some(Commands::Search(args)) => run_search(&load_runtime(cli.config)?, args, &cancel),
        Some(Commands::Preview(args)) => run_preview(&load_runtime(cli.config)?, args, &cancel),
        Some(Commands::Run(args)) => run_batch(&load_runtime(cli.config)?, args, &cancel),
        Some(Commands::Diff(args)) => run_diff(&load_runtime(cli.config)?, args),
        Some(Commands::Failures(args)) => run_failures(&load_runtime(cli.config)?, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn setup_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn install_interrupt_handler(cancel: &CancellationToken) {
    let cancel = cancel.clone();
    if let Err(error) = ctrlc::set_handler(move || {
        eprintln!("interrupt received; stopping after the current file");
        cancel.cancel();
    }) {
        warn!("could not install Ctrl-C handler: {error}");
    }
}

fn load_runtime(config_override: Option<PathBuf>) -> Result<Runtime> {
    dotenvy::dotenv().ok();

    let cwd = env::current_dir().context("failed to resolve current directory")?;
    let config_path = config_override.unwrap_or_else(|| default_config_path(&cwd));
    let config = load_config(&config_path)?;
    Ok(Runtime {
        config,
        state_dir: cwd.join(STATE_DIR_NAME),
    })
}

fn build_client(runtime: &Runtime) -> Result<MediaWikiClient> {
    let client = MediaWikiClient::new(MediaWikiClientConfig::from_config(&runtime.config))?
        .with_credentials(Credentials::from_env());
    info!(api_url = %client.api_url(), "wiki client ready");
    Ok(client)
}

fn search_files(
    runtime: &Runtime,
    client: &mut MediaWikiClient,
    category: &str,
    pattern: &str,
    cancel: &CancellationToken,
) -> Result<SearchOutcome> {
    let mut coordinator = SearchCoordinator::new(client, runtime.config.search_options());
    let outcome = coordinator.search_files(category, pattern, cancel)?;
    Ok(outcome)
}

fn run_search(runtime: &Runtime, args: SearchArgs, cancel: &CancellationToken) -> Result<ExitCode> {
    let mut client = build_client(runtime)?;
    let outcome = search_files(runtime, &mut client, &args.category, &args.pattern, cancel)?;

    println!("search");
    println!("category: {}", category_title(&args.category));
    println!("pattern: {}", args.pattern);
    print_search_outcome(&outcome);
    println!("requests: {}", client.request_count());
    Ok(ExitCode::SUCCESS)
}

fn run_preview(
    runtime: &Runtime,
    args: PreviewArgs,
    cancel: &CancellationToken,
) -> Result<ExitCode> {
    let mut client = build_client(runtime)?;
    let outcome = search_files(runtime, &mut client, &args.category, &args.pattern, cancel)?;

    println!("preview");
    println!("category: {}", category_title(&args.category));
    println!("pattern: {}", args.pattern);
    println!("files.count: {}", outcome.files.len());
    if outcome.files.is_empty() {
        println!("files: <none>");
        return Ok(ExitCode::SUCCESS);
    }

    let request = BatchRequest::new(outcome.files, &args.changes.add, &args.changes.remove)
        .validate(Some(args.category.as_str()), circular_policy(args.allow_circular))?;
    let items = ChangePlanner::new().preview_request(&request)?;
    print_request(&request);
    print_preview_items(&items);
    Ok(ExitCode::SUCCESS)
}

fn run_batch(runtime: &Runtime, args: RunArgs, cancel: &CancellationToken) -> Result<ExitCode> {
    let mut client = build_client(runtime)?;
    let mut outcome = search_files(runtime, &mut client, &args.category, &args.pattern, cancel)?;
    if outcome.cancelled {
        println!("search: cancelled");
        return Ok(ExitCode::FAILURE);
    }

    println!("run");
    println!("category: {}", category_title(&args.category));
    println!("pattern: {}", args.pattern);
    println!("files.count: {}", outcome.files.len());
    if outcome.truncated {
        println!("files.truncated: yes");
    }
    if !args.only.is_empty() {
        select_only(&mut outcome.files, &args.only);
    }

    let request = BatchRequest::new(outcome.files, &args.changes.add, &args.changes.remove)
        .selected_only()
        .validate(Some(args.category.as_str()), circular_policy(args.allow_circular))?;
    let items = ChangePlanner::new().preview_request(&request)?;
    print_request(&request);
    let will_change = items.iter().filter(|item| item.will_change).count();
    println!("files.selected: {}", request.files.len());
    println!("files.will_change: {will_change}");

    if !args.yes {
        println!("dry_run: yes (pass --yes to apply)");
        return Ok(ExitCode::SUCCESS);
    }

    let failure_log = FailureLog::in_state_dir(&runtime.state_dir);
    let failure_log_path = failure_log.path().to_path_buf();
    let mut executor = BatchExecutor::new(&mut client, runtime.config.rate_limiter())
        .with_failure_log(failure_log);
    let mut printer = ProgressPrinter;
    let result = executor.run(&request, &mut printer, cancel)?;
    let state = executor.state();

    print_batch_result(&result);
    println!("state: {state:?}");
    if result.failed > 0 {
        println!("failure_log: {}", failure_log_path.display());
        return Ok(ExitCode::FAILURE);
    }
    if result.cancelled {
        return Ok(ExitCode::from(130));
    }
    Ok(ExitCode::SUCCESS)
}

fn run_diff(runtime: &Runtime, args: DiffArgs) -> Result<ExitCode> {
    let title = args.title.trim();
    if title.is_empty() {
        bail!("diff requires a non-empty file title");
    }

    let mut client = build_client(runtime)?;
    let content = client.get_page_content(title)?;
    let file = FileRecord::new(title, extract_categories(&content));
    let request = BatchRequest::new(vec![file], &args.changes.add, &args.changes.remove)
        .validate(None, CircularPolicy::Reject)?;
    ChangePlanner::new().preview_request(&request)?;

    let updated = apply_category_changes(
        &content,
        &request.categories_to_add,
        &request.categories_to_remove,
    );
    let diff = render_content_diff(title, &content, &updated);

    println!("diff");
    println!("title: {title}");
    println!("summary: {}", request.edit_summary);
    println!("additions: {}", diff.additions);
    println!("removals: {}", diff.removals);
    if diff.is_empty() {
        println!("changes: <none>");
    } else {
        print!("{}", diff.unified);
    }
    Ok(ExitCode::SUCCESS)
}

fn run_failures(runtime: &Runtime, args: FailuresArgs) -> Result<ExitCode> {
    let log = FailureLog::in_state_dir(&runtime.state_dir);

    println!("failures");
    println!("path: {}", log.path().display());
    if args.clear {
        println!("cleared: {}", format_flag(log.clear()?));
        return Ok(ExitCode::SUCCESS);
    }

    let records = log.load()?;
    println!("failures.count: {}", records.len());
    if records.is_empty() {
        println!("failures: <none>");
    }
    for record in records {
        println!("failure: {}", record.file_title);
        println!("failure.recorded_at_unix: {}", record.recorded_at_unix);
        println!("failure.message: {}", record.message);
        if !record.added.is_empty() {
            println!("failure.added: {}", record.added.join(", "));
        }
        if !record.removed.is_empty() {
            println!("failure.removed: {}", record.removed.join(", "));
        }
    }
    Ok(ExitCode::SUCCESS)
}

struct ProgressPrinter;

impl BatchObserver for ProgressPrinter {
    fn on_progress(&mut self, percent: u8, result: &BatchResult) {
        println!(
            "progress: {percent}% ({}/{})",
            result.processed, result.total
        );
    }

    fn on_file_complete(&mut self, file: &FileRecord, changed: bool) {
        let status = if changed { "updated" } else { "unchanged" };
        println!("file: {} ({status})", file.title);
    }

    fn on_error(&mut self, file: &FileRecord, error: &GatewayError) {
        println!("file: {} (failed: {error})", file.title);
    }
}

fn select_only(files: &mut [FileRecord], only: &[String]) {
    let wanted = only
        .iter()
        .map(|title| title.trim().replace('_', " "))
        .collect::<Vec<_>>();
    for file in files.iter_mut() {
        file.selected = wanted.iter().any(|title| *title == file.title);
    }
}

fn circular_policy(allow_circular: bool) -> CircularPolicy {
    if allow_circular {
        CircularPolicy::Filter
    } else {
        CircularPolicy::Reject
    }
}

fn print_search_outcome(outcome: &SearchOutcome) {
    println!("files.count: {}", outcome.files.len());
    println!("files.truncated: {}", format_flag(outcome.truncated));
    println!("cancelled: {}", format_flag(outcome.cancelled));
    if outcome.files.is_empty() {
        println!("files: <none>");
    }
    for file in &outcome.files {
        println!("file: {} ({} bytes)", file.title, file.size_bytes);
        if file.current_categories.is_empty() {
            println!("file.categories: <none>");
        } else {
            println!("file.categories: {}", file.current_categories.join(", "));
        }
    }
}

fn print_request(request: &BatchRequest) {
    println!("add: {}", format_list(&request.categories_to_add));
    println!("remove: {}", format_list(&request.categories_to_remove));
    println!("summary: {}", request.edit_summary);
}

fn print_preview_items(items: &[PreviewItem]) {
    for item in items {
        println!("preview: {}", item.file_title);
        println!("preview.current: {}", format_list(&item.current_categories));
        println!("preview.new: {}", format_list(&item.new_categories));
        println!("preview.will_change: {}", format_flag(item.will_change));
    }
}

fn print_batch_result(result: &BatchResult) {
    println!("total: {}", result.total);
    println!("processed: {}", result.processed);
    println!("successful: {}", result.successful);
    println!("skipped: {}", result.skipped);
    println!("failed: {}", result.failed);
    println!("cancelled: {}", format_flag(result.cancelled));
    for error in &result.errors {
        println!("error: {}: {}", error.file_title, error.message);
    }
}

fn format_list(values: &[String]) -> String {
    if values.is_empty() {
        "<none>".to_string()
    } else {
        values.join(", ")
    }
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
