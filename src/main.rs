use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use podkeep::{
    ApiState, Config, CycleNotifier, CycleSummary, CycleWorker, EpisodeStore, HttpFeedSource,
    NoopReporter, ProgressEvent, ProgressReporter, ReqwestClient, SharedProgressReporter,
    SqliteStore, Syncer, TriggerOutcome, WebhookNotifier,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static WASTEBASKET: Emoji<'_, '_> = Emoji("🗑️  ", "[-] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");

/// Environment variable overriding the configured log filter
const LOG_ENV: &str = "PODKEEP_LOG";

/// Keep a bounded window of podcast episodes downloaded and tagged
#[derive(Parser, Debug)]
#[command(name = "podkeep")]
#[command(about = "Keep a bounded, age-limited window of podcast episodes downloaded and tagged")]
#[command(version)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "podkeep.toml")]
    config: PathBuf,

    /// Quiet mode - suppress progress output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one sync cycle in the foreground
    Sync,

    /// Run cycles in the background at a fixed interval until Ctrl-C
    Daemon {
        /// Time between cycles, e.g. "30m" or "6h"
        #[arg(short, long, default_value = "1h", value_parser = humantime::parse_duration)]
        interval: Duration,
    },

    /// Show episode counts per podcast
    Status,
}

/// Progress reporter using indicatif for terminal output
struct IndicatifReporter {
    multi: MultiProgress,
    current: Mutex<Option<ProgressBar>>,
    main_bar: ProgressBar,
}

impl IndicatifReporter {
    fn new() -> Self {
        let multi = MultiProgress::new();

        let main_style = ProgressStyle::default_bar()
            .template("{spinner:.green} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let main_bar = multi.add(ProgressBar::new_spinner());
        main_bar.set_style(main_style);
        main_bar.enable_steady_tick(Duration::from_millis(100));

        Self {
            multi,
            current: Mutex::new(None),
            main_bar,
        }
    }

    fn start_bar(&self) -> ProgressBar {
        let style = ProgressStyle::default_bar()
            .template(&format!(
                "  {DOWNLOAD}[{{bar:30.cyan/blue}}] {{bytes}}/{{total_bytes}} {{wide_msg}}"
            ))
            .map(|style| style.progress_chars("█▓░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());

        let bar = self.multi.add(ProgressBar::new(0));
        bar.set_style(style);
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = current.replace(bar.clone()) {
            previous.finish_and_clear();
        }
        bar
    }

    fn current_bar(&self) -> Option<ProgressBar> {
        self.current
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn take_bar(&self) -> Option<ProgressBar> {
        self.current.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn line(&self, message: String) {
        // Printing above the bars only fails when the terminal is gone
        let _ = self.multi.println(message);
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::FetchingFeed { podcast, url } => {
                self.main_bar.set_message(format!(
                    "{SEARCH}{} {}",
                    podcast.bold(),
                    url.cyan()
                ));
            }

            ProgressEvent::FeedParsed {
                podcast,
                total_entries,
                added,
            } => {
                self.main_bar.set_message(format!(
                    "{HEADPHONES}{} • {} entries, {} new",
                    podcast.bold().green(),
                    total_entries.to_string().cyan(),
                    added.to_string().yellow()
                ));
            }

            ProgressEvent::DownloadStarting {
                episode_title,
                episode_index,
                total_to_download,
                content_length,
            } => {
                let bar = self.start_bar();
                bar.set_length(content_length.unwrap_or(0));
                bar.set_position(0);
                bar.set_message(format!(
                    "[{}/{}] {}",
                    (episode_index + 1).to_string().cyan(),
                    total_to_download.to_string().cyan(),
                    truncate_title(&episode_title, 40)
                ));
            }

            ProgressEvent::DownloadProgress {
                bytes_downloaded,
                total_bytes,
                ..
            } => {
                if let Some(bar) = self.current_bar() {
                    if let Some(total) = total_bytes {
                        bar.set_length(total);
                    }
                    bar.set_position(bytes_downloaded);
                }
            }

            ProgressEvent::DownloadCompleted {
                episode_title,
                bytes_downloaded,
            } => {
                if let Some(bar) = self.take_bar() {
                    bar.set_position(bytes_downloaded);
                    bar.finish_and_clear();
                }
                self.line(format!(
                    "  {SUCCESS}{}",
                    truncate_title(&episode_title, 60).green()
                ));
            }

            ProgressEvent::DownloadFailed {
                episode_title,
                error,
            } => {
                if let Some(bar) = self.take_bar() {
                    bar.finish_and_clear();
                }
                self.line(format!(
                    "  {FAILURE}{} - {}",
                    truncate_title(&episode_title, 30).red(),
                    error.red()
                ));
            }

            ProgressEvent::EpisodeExpired { episode_title } => {
                self.line(format!(
                    "  {WASTEBASKET}{}",
                    truncate_title(&episode_title, 60).dimmed()
                ));
            }

            ProgressEvent::PodcastFailed { podcast, error } => {
                self.line(format!("{FAILURE}{} - {}", podcast.red().bold(), error.red()));
            }

            ProgressEvent::CycleCompleted { .. } => {
                self.main_bar.finish_and_clear();
            }
        }
    }
}

fn truncate_title(title: &str, max_len: usize) -> String {
    if title.chars().count() <= max_len {
        title.to_string()
    } else {
        let kept: String = title.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn print_summary(summary: &CycleSummary) {
    let failed = summary.failed_downloads + summary.failed_podcasts;
    println!(
        "\n{PARTY}{} {} added, {} downloaded, {} removed, {} failed",
        "Sync complete:".bold().green(),
        summary.added.to_string().yellow(),
        summary.downloaded.to_string().green().bold(),
        summary.removed.to_string().cyan(),
        if failed > 0 {
            failed.to_string().red().bold()
        } else {
            failed.to_string().green()
        }
    );
}

fn init_logging(default_directive: &str) {
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn build_notifier(config: &Config) -> Result<Option<Arc<dyn CycleNotifier>>> {
    let Some(url) = &config.notify_webhook else {
        return Ok(None);
    };
    let client = reqwest::Client::builder()
        .timeout(config.request_timeout())
        .build()
        .context("Failed to build webhook client")?;
    Ok(Some(Arc::new(WebhookNotifier::new(client, url.clone()))))
}

fn build_syncer(
    config: &Config,
    store: Arc<SqliteStore>,
    reporter: SharedProgressReporter,
) -> Result<Syncer<ReqwestClient>> {
    let client = ReqwestClient::with_timeout(config.request_timeout())
        .context("Failed to build HTTP client")?;
    let feeds = Arc::new(HttpFeedSource::new(client.clone()));
    Ok(Syncer::new(store, feeds, client, config.base_dir()).with_reporter(reporter))
}

async fn run_sync(config: &Config, store: Arc<SqliteStore>, quiet: bool) -> Result<()> {
    let reporter: SharedProgressReporter = if quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };
    let syncer = build_syncer(config, store, reporter)?;
    let notifier = build_notifier(config)?;

    let summary = syncer.run_cycle().await;
    if let Some(notifier) = notifier {
        notifier.notify(&summary).await;
    }

    if !quiet {
        print_summary(&summary);
    }

    let failed = summary.failed_downloads + summary.failed_podcasts;
    if failed > 0 && summary.downloaded == 0 {
        std::process::exit(1);
    }

    Ok(())
}

async fn run_daemon(config: &Config, store: Arc<SqliteStore>, interval: Duration) -> Result<()> {
    let syncer = build_syncer(config, store.clone(), NoopReporter::shared())?;
    let (worker, trigger) = CycleWorker::new(Arc::new(syncer));
    let worker = match build_notifier(config)? {
        Some(notifier) => worker.with_notifier(notifier),
        None => worker,
    };
    let handle = worker.spawn();

    let (stop_api, api_stopped) = tokio::sync::oneshot::channel::<()>();
    let api = match config.listen {
        Some(addr) => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to listen on {addr}"))?;
            let state = ApiState::new(store.clone(), trigger.clone());
            Some(tokio::spawn(podkeep::api::serve(listener, state, async move {
                let _ = api_stopped.await;
            })))
        }
        None => None,
    };

    info!(interval = %humantime::format_duration(interval), "Daemon started");

    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => match trigger.request() {
                TriggerOutcome::Queued => info!("Cycle queued"),
                TriggerOutcome::Busy => info!("Previous cycle still running, skipping this tick"),
                TriggerOutcome::Stopped => break,
            },
            result = &mut shutdown => {
                result.context("Failed to listen for Ctrl-C")?;
                info!("Shutting down after the running cycle");
                break;
            }
        }
    }

    let _ = stop_api.send(());
    if let Some(api) = api {
        api.await
            .context("HTTP interface panicked")?
            .context("HTTP interface failed")?;
    }

    drop(trigger);
    handle.await.context("Cycle worker panicked")?;
    Ok(())
}

fn run_status(store: &SqliteStore) -> Result<()> {
    let podcasts = store.list_podcasts().context("Failed to list podcasts")?;
    if podcasts.is_empty() {
        println!("{}", "No podcasts configured".yellow());
        return Ok(());
    }

    for podcast in &podcasts {
        let counts = store
            .status_counts(&podcast.name)
            .with_context(|| format!("Failed to count episodes of {}", podcast.name))?;
        println!(
            "{HEADPHONES}{} {}",
            podcast.name.bold().green(),
            format!("(keep {} for {})", podcast.max_episodes, podcast.max_age).dimmed()
        );
        println!(
            "    {} pending, {} downloaded, {} removed",
            counts.pending.to_string().yellow(),
            counts.downloaded.to_string().green().bold(),
            counts.removed.to_string().dimmed()
        );
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;
    init_logging(&config.log_level);

    let database = config.database_path();
    let store = Arc::new(
        SqliteStore::open(&database)
            .with_context(|| format!("Failed to open database {}", database.display()))?,
    );
    config
        .register_podcasts(store.as_ref())
        .context("Failed to register configured podcasts")?;

    match args.command {
        Command::Sync => {
            if !args.quiet {
                println!(
                    "\n{}{} {}\n",
                    MICROPHONE,
                    "podkeep".bold().magenta(),
                    "- Podcast Retention".dimmed()
                );
            }
            run_sync(&config, store, args.quiet).await
        }
        Command::Daemon { interval } => run_daemon(&config, store, interval).await,
        Command::Status => run_status(&store),
    }
}
