//! CLI parser and subcommand dispatch.
//!
//! Each subcommand maps onto one service call. Browser-backed operations
//! (download, status, results) open a WebDriver session up front and tear it
//! down unconditionally when the batch finishes.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::warn;

use crate::browser::{BrowserDriver, WebDriverSession};
use crate::captcha::{CaptchaOrchestrator, HumanChannel};
use crate::config::Settings;
use crate::llm::VisionClient;
use crate::models::{DownloadMode, Tender, Website};
use crate::repository::Store;
use crate::services::sync::ClearScope;
use crate::services::{ArchiveService, DownloadService, StatusService, SyncService};

#[derive(Parser)]
#[command(name = "tender")]
#[command(about = "Government e-procurement tender synchronization and document acquisition")]
#[command(version)]
pub struct Cli {
    /// Config file path (defaults to ./tenderacquire.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database and seed the default portal
    Init,

    /// Manage tracked portals
    Website {
        #[command(subcommand)]
        command: WebsiteCommands,
    },

    /// Manage organizations under a portal
    Orgs {
        #[command(subcommand)]
        command: OrgCommands,
    },

    /// Fetch and reconcile tenders for a portal's selected organizations
    Fetch {
        /// Website name
        website: String,
    },

    /// List persisted tenders for a portal
    Tenders {
        /// Website name
        website: String,
        /// Show archived tenders instead of active ones
        #[arg(short, long)]
        archived: bool,
    },

    /// Download tender documents through the browser
    Download {
        /// Website name
        website: String,
        /// Force full or update mode (default: per-tender auto)
        #[arg(short, long, value_enum)]
        mode: Option<ModeArg>,
        /// Restrict to specific tender IDs (repeatable)
        #[arg(short, long = "tender")]
        tenders: Vec<String>,
    },

    /// Poll the processing stage of tenders through the status form
    Status {
        /// Website name
        website: String,
        /// Poll archived tenders instead of active ones
        #[arg(short, long)]
        archived: bool,
    },

    /// Poll stages and harvest result documents for opened/concluded bids
    Results {
        /// Website name
        website: String,
    },

    /// Archive terminal and past-deadline tenders
    Archive {
        /// Bypass the 12-hour gate
        #[arg(short, long)]
        force: bool,
    },

    /// Clear saved data for a portal (the portal itself is kept)
    Clear {
        /// Website name
        website: String,
        /// What to clear
        #[arg(short, long, value_enum)]
        scope: ScopeArg,
    },

    /// Persisted key/value settings
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum WebsiteCommands {
    /// Add or update a portal
    Add {
        name: String,
        listing_url: String,
        status_url: String,
    },
    /// List tracked portals
    List,
}

#[derive(Subcommand)]
enum OrgCommands {
    /// Crawl the organization list from the portal
    Fetch { website: String },
    /// List saved organizations
    List { website: String },
    /// Mark organizations for tender crawling (repeatable names)
    Select { website: String, names: Vec<String> },
    /// Unmark organizations
    Deselect { website: String, names: Vec<String> },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Read a setting
    Get { key: String },
    /// Write a setting
    Set { key: String, value: String },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ModeArg {
    Full,
    Update,
}

impl From<ModeArg> for DownloadMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Full => DownloadMode::Full,
            ModeArg::Update => DownloadMode::Update,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ScopeArg {
    Orgs,
    Active,
    Archived,
}

impl From<ScopeArg> for ClearScope {
    fn from(s: ScopeArg) -> Self {
        match s {
            ScopeArg::Orgs => ClearScope::Organizations,
            ScopeArg::Active => ClearScope::ActiveTenders,
            ScopeArg::Archived => ClearScope::ArchivedTenders,
        }
    }
}

/// Parse arguments and run the selected command.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let store = Store::open(&settings.database_path)?;

    match cli.command {
        Commands::Init => init(&store, &settings),
        Commands::Website { command } => website_command(&store, command),
        Commands::Orgs { command } => orgs_command(&store, &settings, command).await,
        Commands::Fetch { website } => {
            let website = resolve_website(&store, &website)?;
            let sync = SyncService::new(store.clone(), settings.fetch_timeout());
            let report = sync.fetch_tenders(website.id).await?;
            println!(
                "{}: {} new, {} updated, {} archived, {} duplicates removed ({} orgs failed)",
                website.name,
                report.inserted,
                report.updated,
                report.archived_missing,
                report.duplicates_removed,
                report.orgs_failed
            );
            Ok(())
        }
        Commands::Tenders { website, archived } => {
            let website = resolve_website(&store, &website)?;
            let tenders = if archived {
                store.tenders().get_archived(website.id)?
            } else {
                store.tenders().get_active(website.id)?
            };
            for t in &tenders {
                println!(
                    "{}\t{}\t{}\t{}",
                    t.tender_id,
                    t.closing_date,
                    if t.status.is_empty() { "-" } else { &t.status },
                    t.title
                );
            }
            println!("{} tenders", tenders.len());
            Ok(())
        }
        Commands::Download {
            website,
            mode,
            tenders,
        } => download_command(&store, &settings, &website, mode, &tenders).await,
        Commands::Status { website, archived } => {
            status_command(&store, &settings, &website, archived, false).await
        }
        Commands::Results { website } => {
            status_command(&store, &settings, &website, false, true).await
        }
        Commands::Archive { force } => {
            let archive = ArchiveService::new(store.clone());
            let report = archive.run_scheduled(force)?;
            if report.skipped_by_gate {
                println!("skipped: last run was within the archive interval (use --force)");
            } else {
                println!(
                    "archived {} tenders ({} terminal) across {} websites",
                    report.archived, report.terminal, report.websites
                );
            }
            Ok(())
        }
        Commands::Clear { website, scope } => {
            let website = resolve_website(&store, &website)?;
            let sync = SyncService::new(store.clone(), settings.fetch_timeout());
            let removed = sync.clear(website.id, scope.into())?;
            println!("cleared {} rows", removed);
            Ok(())
        }
        Commands::Config { command } => config_command(&store, command),
    }
}

/// Seed portal created by `init`.
const SEED_WEBSITE: (&str, &str, &str) = (
    "eprocure",
    "https://eprocure.gov.in/eprocure/app?page=FrontEndListTendersbyOrganisation&service=page",
    "https://eprocure.gov.in/eprocure/app?page=FrontEndTenderStatus&service=page",
);

fn init(store: &Store, settings: &Settings) -> anyhow::Result<()> {
    std::fs::create_dir_all(&settings.documents_dir)?;
    let (name, listing, status) = SEED_WEBSITE;
    let id = store.websites().upsert(name, listing, status)?;
    println!(
        "initialized {} (seed website '{}' id {})",
        settings.database_path.display(),
        name,
        id
    );
    Ok(())
}

fn website_command(store: &Store, command: WebsiteCommands) -> anyhow::Result<()> {
    match command {
        WebsiteCommands::Add {
            name,
            listing_url,
            status_url,
        } => {
            let id = store.websites().upsert(&name, &listing_url, &status_url)?;
            println!("saved website '{}' (id {})", name, id);
        }
        WebsiteCommands::List => {
            for w in store.websites().get_all()? {
                println!("{}\t{}\t{}", w.id, w.name, w.listing_url);
            }
        }
    }
    Ok(())
}

async fn orgs_command(
    store: &Store,
    settings: &Settings,
    command: OrgCommands,
) -> anyhow::Result<()> {
    match command {
        OrgCommands::Fetch { website } => {
            let website = resolve_website(store, &website)?;
            let sync = SyncService::new(store.clone(), settings.fetch_timeout());
            let count = sync.fetch_organizations(website.id).await?;
            println!("saved {} organizations", count);
        }
        OrgCommands::List { website } => {
            let website = resolve_website(store, &website)?;
            for org in store.organizations().get_all(website.id)? {
                println!(
                    "{} {}\t({} tenders)",
                    if org.is_selected { "*" } else { " " },
                    org.name,
                    org.tender_count
                );
            }
        }
        OrgCommands::Select { website, names } => {
            set_selection(store, &website, &names, true)?;
        }
        OrgCommands::Deselect { website, names } => {
            set_selection(store, &website, &names, false)?;
        }
    }
    Ok(())
}

fn set_selection(
    store: &Store,
    website: &str,
    names: &[String],
    selected: bool,
) -> anyhow::Result<()> {
    let website = resolve_website(store, website)?;
    let orgs = store.organizations();
    for name in names {
        if orgs.set_selected(website.id, name, selected)? {
            println!("{}: {}", if selected { "selected" } else { "deselected" }, name);
        } else {
            println!("unknown organization: {}", name);
        }
    }
    Ok(())
}

async fn download_command(
    store: &Store,
    settings: &Settings,
    website: &str,
    mode: Option<ModeArg>,
    tender_ids: &[String],
) -> anyhow::Result<()> {
    let website = resolve_website(store, website)?;
    let tenders = select_tenders(store, &website, tender_ids, false)?;
    if tenders.is_empty() {
        println!("nothing to download");
        return Ok(());
    }

    let vision = vision_client(settings);
    let mut human = terminal_human_channel();
    let mut captcha = CaptchaOrchestrator::new(vision.as_ref(), Some(&mut human));

    let service = DownloadService::new(
        store.clone(),
        settings.documents_dir.clone(),
        website.listing_url.clone(),
        settings.download_timeout(),
        settings.element_wait(),
    );

    let mut driver = WebDriverSession::connect(&settings.webdriver_url).await?;
    let report = service
        .download_batch(&mut driver, &mut captcha, &tenders, mode.map(Into::into))
        .await;
    if let Err(e) = driver.quit().await {
        warn!("browser teardown failed: {}", e);
    }

    println!(
        "{} tenders done, {} failed; {} files downloaded, {} skipped",
        report.tenders_done, report.tenders_failed, report.files_downloaded, report.files_skipped
    );
    Ok(())
}

async fn status_command(
    store: &Store,
    settings: &Settings,
    website: &str,
    archived: bool,
    results: bool,
) -> anyhow::Result<()> {
    let website = resolve_website(store, website)?;
    let tenders = select_tenders(store, &website, &[], archived)?;
    if tenders.is_empty() {
        println!("no tenders to poll");
        return Ok(());
    }

    let vision = vision_client(settings);
    let mut human = terminal_human_channel();
    let mut captcha = CaptchaOrchestrator::new(vision.as_ref(), Some(&mut human));
    let service = StatusService::new(store.clone(), settings.element_wait());

    let mut driver = WebDriverSession::connect(&settings.webdriver_url).await?;
    let report = if results {
        let downloader = DownloadService::new(
            store.clone(),
            settings.documents_dir.clone(),
            website.listing_url.clone(),
            settings.download_timeout(),
            settings.element_wait(),
        );
        service
            .poll_results_batch(
                &mut driver,
                &mut captcha,
                &downloader,
                &website.status_url,
                &tenders,
            )
            .await
    } else {
        service
            .poll_batch(&mut driver, &mut captcha, &website.status_url, &tenders)
            .await
    };
    if let Err(e) = driver.quit().await {
        warn!("browser teardown failed: {}", e);
    }

    println!(
        "{} polled, {} updated, {} failed",
        report.polled, report.updated, report.failed
    );
    Ok(())
}

fn config_command(store: &Store, command: ConfigCommands) -> anyhow::Result<()> {
    let settings = store.settings();
    match command {
        ConfigCommands::Get { key } => match settings.get(&key)? {
            Some(value) => println!("{}", value),
            None => println!("(unset)"),
        },
        ConfigCommands::Set { key, value } => {
            settings.set(&key, &value)?;
            println!("set {}", key);
        }
    }
    Ok(())
}

fn resolve_website(store: &Store, name: &str) -> anyhow::Result<Website> {
    store
        .websites()
        .get_by_name(name)?
        .ok_or_else(|| anyhow::anyhow!("unknown website: {}", name))
}

/// Pick the tenders a browser batch operates on: explicit IDs when given,
/// otherwise the full active (or archived) set.
fn select_tenders(
    store: &Store,
    website: &Website,
    tender_ids: &[String],
    archived: bool,
) -> anyhow::Result<Vec<Tender>> {
    if tender_ids.is_empty() {
        return Ok(if archived {
            store.tenders().get_archived(website.id)?
        } else {
            store.tenders().get_active(website.id)?
        });
    }
    let repo = store.tenders();
    let mut tenders = Vec::new();
    for id in tender_ids {
        match repo.get_by_tender_id(website.id, id)? {
            Some(t) => tenders.push(t),
            None => println!("unknown tender id: {}", id),
        }
    }
    Ok(tenders)
}

fn vision_client(settings: &Settings) -> Option<VisionClient> {
    match settings.gemini_api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            Some(VisionClient::new(key, settings.gemini_model.clone()))
        }
        _ => {
            warn!("GEMINI_API_KEY not set; captchas will need manual entry");
            None
        }
    }
}

/// Human captcha fallback over the terminal: challenge images are written
/// next to the database and the answer is read from stdin. An empty line
/// cancels.
fn terminal_human_channel() -> HumanChannel {
    let (request_tx, mut request_rx) = mpsc::channel::<Vec<u8>>(1);
    let (answer_tx, answer_rx) = mpsc::channel::<Option<String>>(1);

    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Some(image) = request_rx.recv().await {
            let path = std::env::temp_dir().join("tender_captcha.png");
            if let Err(e) = std::fs::write(&path, &image) {
                warn!("could not write captcha image: {}", e);
                let _ = answer_tx.send(None).await;
                continue;
            }
            println!("captcha image saved to {}", path.display());
            println!("enter the 6 characters (empty line to cancel): ");
            let answer = match lines.next_line().await {
                Ok(Some(line)) if !line.trim().is_empty() => Some(line.trim().to_string()),
                _ => None,
            };
            if answer_tx.send(answer).await.is_err() {
                break;
            }
        }
    });

    HumanChannel {
        request_tx,
        answer_rx,
    }
}
