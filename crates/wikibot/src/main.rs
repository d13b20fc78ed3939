use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wikibot_core::batch::MAX_BATCH_SIZE;
use wikibot_core::config::{BotConfig, DEFAULT_CONFIG_FILENAME, load_config};
use wikibot_core::moved_redirects::{DEFAULT_WINDOW_HOURS, MovedRedirectsTask};
use wikibot_core::nav_format::NavFormatTask;
use wikibot_core::runner::{RunReport, RunnerOptions, TaskRunner};
use wikibot_core::session::Session;
use wikibot_core::throttle::{ThreadPacer, ThrottledSession};
use wikibot_core::transport::MediaWikiClient;
use wikibot_core::unused_files::{DEFAULT_MIN_AGE_DAYS, UnusedFilesTask};

const DEFAULT_LOG_FILTER: &str = "wikibot=info,wikibot_core=info";

#[derive(Debug, Parser)]
#[command(
    name = "wikibot",
    version,
    about = "Scheduled maintenance bots for MediaWiki sites"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "NAME", help = "Site section to run against")]
    site: Option<String>,
    #[arg(long, global = true, help = "Read and diff every page without submitting edits")]
    dry_run: bool,
    #[arg(long, global = true, value_name = "N")]
    batch_size: Option<usize>,
    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    log_json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Tidy navbox template layout.
    NavFormat,
    /// Mark unused files in catch-all categories for deletion.
    UnusedFiles(UnusedFilesArgs),
    /// Mark redirects left behind by recent file moves for deletion.
    MovedRedirects(MovedRedirectsArgs),
}

#[derive(Debug, Args)]
struct UnusedFilesArgs {
    #[arg(long, default_value_t = DEFAULT_MIN_AGE_DAYS, help = "Minimum days in the category")]
    days: u32,
    #[arg(long = "category", value_name = "NAME", help = "Replace the default category list")]
    categories: Vec<String>,
}

#[derive(Debug, Args)]
struct MovedRedirectsArgs {
    #[arg(long, default_value_t = DEFAULT_WINDOW_HOURS, help = "Move log look-back window")]
    hours: u32,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILENAME));
    load_env(&config_path);
    let config = load_config(&config_path)?;

    let report = run_task(&cli, &config)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.success {
        bail!(
            "{} finished with {} error(s)",
            report.task,
            report.errors.len()
        );
    }
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_env(config_path: &Path) {
    dotenvy::dotenv().ok();
    if let Some(parent) = config_path.parent() {
        let site_env = parent.join(".env");
        if site_env.exists() {
            let _ = dotenvy::from_path_override(&site_env);
        }
    }
}

fn run_task(cli: &Cli, config: &BotConfig) -> Result<RunReport> {
    let site = config.resolve_site(cli.site.as_deref())?;
    let throttle = config.throttle_config()?;
    let options = RunnerOptions {
        batch_size: cli
            .batch_size
            .unwrap_or_else(|| config.batch_size())
            .clamp(1, MAX_BATCH_SIZE),
        dry_run: cli.dry_run,
    };
    info!(
        site = %site.name,
        api_url = %site.api_url,
        dry_run = options.dry_run,
        batch_size = options.batch_size,
        "starting run"
    );

    let client = MediaWikiClient::new(config.client_config(&site))?;
    let session = Session::new(client, site.credentials.clone());
    let mut throttled = ThrottledSession::open(session, throttle, ThreadPacer)
        .with_context(|| format!("failed to log in to {}", site.api_url))?;

    let now = Utc::now();
    let report = {
        let mut runner = TaskRunner::new(&mut throttled, options);
        match &cli.command {
            Commands::NavFormat => runner.run_fixup(&NavFormatTask),
            Commands::UnusedFiles(args) => runner.run_marking(
                &UnusedFilesTask::new(now)
                    .with_min_age_days(args.days)
                    .with_categories(args.categories.clone()),
            ),
            Commands::MovedRedirects(args) => {
                runner.run_marking(&MovedRedirectsTask::new(now).with_window_hours(args.hours))
            }
        }
    };
    throttled.close();
    Ok(report)
}
