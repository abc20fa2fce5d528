//! Knolx Uploadr - resumable video uploads for knolx sessions
//!
//! Uploads a recording to a session, follows the portal's progress and
//! prints the embeddable URL of the new video.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use knolx_uploadr::render::{BanLabel, ContentCell, SessionRowModel, UserRowModel};
use knolx_uploadr::search::{SearchPage, SearchRequest};
use knolx_uploadr::upload::{
    CancelOutcome, ResumeOutcome, RunOutcome, SessionEvent, UploadError, VideoMetadata,
};
use knolx_uploadr::{config::Config, metrics, telemetry, PortalClient, UploadController};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

type Controller = UploadController<PortalClient>;

/// Knolx Uploadr - resumable video uploads for knolx sessions
#[derive(Parser, Debug)]
#[command(name = "knolx-uploadr")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log filter, overrides logging.level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Upload a video file to a session and wait for the new video
    Upload {
        session_id: String,
        file: PathBuf,
        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Follow an upload already running, or show a video waiting to be attached
    Resume { session_id: String },
    /// Cancel the upload running for a session
    Cancel { session_id: String },
    /// Update title, description, tags, category and status of a session's video
    Update {
        session_id: String,
        #[command(flatten)]
        metadata: MetadataArgs,
    },
    /// Search sessions
    SearchSessions(SearchArgs),
    /// Search users
    SearchUsers(SearchArgs),
}

#[derive(Args, Debug)]
struct MetadataArgs {
    #[arg(long, default_value = "")]
    title: String,
    #[arg(long, default_value = "")]
    description: String,
    /// Comma-separated tags
    #[arg(long, default_value = "")]
    tags: String,
    #[arg(long, default_value = "")]
    category: String,
    #[arg(long, default_value = "private")]
    status: String,
}

impl From<MetadataArgs> for VideoMetadata {
    fn from(args: MetadataArgs) -> Self {
        VideoMetadata {
            tags: VideoMetadata::parse_tags(&args.tags),
            title: args.title,
            description: args.description,
            status: args.status,
            category: args.category,
        }
    }
}

#[derive(Args, Debug)]
struct SearchArgs {
    /// Keyword matched against email, topic or name
    #[arg(long, default_value = "")]
    keyword: String,
    #[arg(long, default_value = "all")]
    filter: String,
    #[arg(long, default_value_t = 1)]
    page: u32,
    #[arg(long, default_value_t = 10)]
    page_size: u32,
}

impl From<&SearchArgs> for SearchRequest {
    fn from(args: &SearchArgs) -> Self {
        SearchRequest::new(args.keyword.clone(), args.filter.clone())
            .page(args.page)
            .page_size(args.page_size)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(&cli.config)
        .with_context(|| format!("Failed to load configuration from {:?}", cli.config))?;
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    if cli.json_logs {
        config.logging.json = true;
    }

    telemetry::init_subscriber(&config.logging)?;
    info!("Starting Knolx Uploadr v{}", knolx_uploadr::VERSION);
    info!("Loaded configuration from {:?}", cli.config);

    let client = PortalClient::new(&config.portal)?;
    let result = execute(cli.command, client, &config).await;

    if config.metrics.enabled {
        if let Some(path) = &config.metrics.textfile {
            if let Err(e) = metrics::write_textfile(path) {
                warn!(error = %e, path = ?path, "Failed to write metrics textfile");
            }
        }
    }

    result
}

async fn execute(command: Command, client: PortalClient, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Upload {
            session_id,
            file,
            metadata,
        } => {
            let controller = Arc::new(Controller::new(session_id, client, config));
            upload(&controller, file, metadata.into()).await
        }
        Command::Resume { session_id } => {
            let controller = Arc::new(Controller::new(session_id, client, config));
            resume(&controller).await
        }
        Command::Cancel { session_id } => {
            let controller = Controller::new(session_id, client, config);
            cancel(&controller).await
        }
        Command::Update {
            session_id,
            metadata,
        } => {
            let controller = Controller::new(session_id, client, config);
            controller.update_metadata(&metadata.into()).await?;
            println!("Video details updated");
            Ok(())
        }
        Command::SearchSessions(args) => {
            let page = client.search_sessions(&SearchRequest::from(&args)).await?;
            for record in &page.items {
                let row = SessionRowModel::from_record(record);
                println!(
                    "{}\t{}\t{}\t{}\t{:?}\t{:?}\t{}",
                    row.date,
                    row.session,
                    row.topic,
                    row.presenter,
                    row.kind,
                    row.status,
                    describe_content(&row.content)
                );
            }
            print_footer(&page, args.page_size);
            Ok(())
        }
        Command::SearchUsers(args) => {
            let page = client.search_users(&SearchRequest::from(&args)).await?;
            for record in &page.items {
                let row = UserRowModel::from_record(record, page.caller_is_privileged);
                let ban = match &row.ban {
                    BanLabel::Banned { until } => format!("Banned until {}", until),
                    BanLabel::Allowed => "Allowed".to_string(),
                };
                println!(
                    "{}\t{}\t{}\t{}\t{}\tedit:{:?}\tdelete:{:?}",
                    row.email,
                    if row.active { "Active" } else { "Suspended" },
                    row.role,
                    ban,
                    if row.core_member { "Core" } else { "-" },
                    row.edit,
                    row.delete
                );
            }
            print_footer(&page, args.page_size);
            Ok(())
        }
    }
}

async fn upload(
    controller: &Arc<Controller>,
    file: PathBuf,
    metadata: VideoMetadata,
) -> anyhow::Result<()> {
    match controller.resume().await {
        ResumeOutcome::UploadInProgress => {
            bail!("An upload is already running for this session; use `resume` to follow it")
        }
        ResumeOutcome::PendingReference(reference) => {
            println!("An earlier upload ({}) was never attached", reference);
        }
        ResumeOutcome::Nothing => {}
    }

    let staged = controller.stage(&file).await?;
    info!(file = %staged.file_name, bytes = staged.size_bytes, "File staged");

    let outcome = supervise(controller, controller.run(&metadata)).await?;
    report(controller, outcome);
    Ok(())
}

async fn resume(controller: &Arc<Controller>) -> anyhow::Result<()> {
    match controller.resume().await {
        ResumeOutcome::UploadInProgress => {
            let outcome = supervise(controller, controller.follow()).await?;
            report(controller, outcome);
        }
        ResumeOutcome::PendingReference(_) => {
            if let Some(url) = controller.attach_pending_video() {
                println!("{}", url);
            }
        }
        ResumeOutcome::Nothing => {
            println!("No upload in progress and no video waiting to be attached");
        }
    }
    Ok(())
}

async fn cancel(controller: &Controller) -> anyhow::Result<()> {
    controller.resume().await;
    match controller.cancel().await? {
        CancelOutcome::NothingToCancel => println!("There is no upload in progress to cancel"),
        CancelOutcome::Cancelled { acknowledged: true } => println!("Upload cancelled"),
        CancelOutcome::Cancelled {
            acknowledged: false,
        } => println!("Upload cancelled locally; the portal did not confirm the cancel"),
    }
    Ok(())
}

fn report(controller: &Controller, outcome: RunOutcome) {
    match outcome {
        RunOutcome::Completed { .. } => {
            if let Some(url) = controller.attach_pending_video() {
                println!("{}", url);
            }
        }
        RunOutcome::Cancelled => println!("Upload cancelled"),
    }
}

/// Run `work` with a progress bar and the Ctrl-C guard installed
async fn supervise<F>(controller: &Arc<Controller>, work: F) -> Result<RunOutcome, UploadError>
where
    F: Future<Output = Result<RunOutcome, UploadError>>,
{
    let bar = progress_bar();
    let done = CancellationToken::new();
    let renderer = tokio::spawn(render_events(
        controller.subscribe(),
        bar.clone(),
        done.clone(),
    ));
    let guard = tokio::spawn(guard_interrupts(controller.clone(), bar.clone()));

    let result = work.await;

    guard.abort();
    done.cancel();
    if let Err(e) = renderer.await {
        warn!(error = %e, "Progress renderer failed");
    }
    bar.finish_and_clear();
    result
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_draw_target(ProgressDrawTarget::stderr());
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.blue} [{elapsed_precise}] [{bar:40}] {pos}% {msg}")
    {
        bar.set_style(style.progress_chars("#>-"));
    }
    bar
}

async fn render_events(
    mut events: broadcast::Receiver<SessionEvent>,
    bar: ProgressBar,
    done: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            event = events.recv() => match event {
                Ok(event) => render_event(&bar, event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Progress display fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = done.cancelled() => {
                while let Ok(event) = events.try_recv() {
                    render_event(&bar, event);
                }
                return;
            }
        }
    }
}

fn render_event(bar: &ProgressBar, event: SessionEvent) {
    match event {
        SessionEvent::Progress { percent } => bar.set_position(u64::from(percent)),
        SessionEvent::PhaseChanged { to, .. } => bar.set_message(to.to_string()),
        SessionEvent::Stalled { reason } => bar.println(format!("Progress stalled: {}", reason)),
        SessionEvent::ReferenceReady { .. } => bar.set_message("video ready"),
        SessionEvent::Notice { notice } => bar.println(notice.to_string()),
    }
}

/// First Ctrl-C warns while an upload is in flight, the second cancels it
async fn guard_interrupts(controller: Arc<Controller>, bar: ProgressBar) {
    let mut warned = false;
    while tokio::signal::ctrl_c().await.is_ok() {
        match controller.leave_warning() {
            Some(warning) if !warned => {
                bar.println(format!("{}\nPress Ctrl-C again to cancel the upload.", warning));
                warned = true;
            }
            Some(_) => {
                bar.println("Cancelling upload...");
                if let Err(e) = controller.cancel().await {
                    warn!(error = %e, "Cancel failed");
                }
            }
            None => {
                bar.abandon();
                std::process::exit(130);
            }
        }
    }
}

fn describe_content(content: &ContentCell) -> String {
    match content {
        ContentCell::Available(id) => format!("content:{}", id),
        ContentCell::NotAvailable => "Not Available".to_string(),
        ContentCell::Cancelled => "Cancelled".to_string(),
        ContentCell::Pending => "Pending".to_string(),
    }
}

fn print_footer<T>(page: &SearchPage<T>, page_size: u32) {
    let range = page.range(page_size);
    println!(
        "Showing {} to {} of {} (page {} of {})",
        range.start, range.end, range.total, page.page, page.pages
    );
    let links = page.links();
    if !links.pages.is_empty() {
        let pages: Vec<String> = links
            .pages
            .iter()
            .map(|p| {
                if *p == page.page {
                    format!("[{}]", p)
                } else {
                    p.to_string()
                }
            })
            .collect();
        println!("Pages: {}", pages.join(" "));
    }
}
