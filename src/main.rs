use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio_stream::{wrappers::WatchStream, StreamExt};
use tracing_subscriber::EnvFilter;

use dl_client::channel::StatisticsHandler;
use dl_client::config::{self, Config};
use dl_client::import::BulkImportReport;
use dl_client::models::{
    BatchDownloadRequest, BulkImportResult, CreateTaskRequest, DownloadTask, PaginatedSearchRequest, TaskStatistics,
    VideoInfo,
};
use dl_client::{ApiClient, Session, WsConnector};

// --- Command-Line Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "A client for the video download backend.", long_about = None)]
struct Cli {
    /// Backend root URL; overrides `server_url` from the config file.
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Follow every task live until interrupted with Ctrl-C.
    Watch,
    /// Queue one video page for download.
    Submit {
        page_url: String,
        #[arg(short, long)]
        resolution: Option<String>,
        #[arg(long)]
        title: Option<String>,
    },
    /// Queue every video URL in a file, one per line. Use `-` to read stdin.
    Import {
        file: String,
        #[arg(short, long)]
        resolution: Option<String>,
    },
    /// Cancel a task.
    Cancel { id: String },
    /// Pause a task.
    Pause { id: String },
    /// Resume a paused task.
    Resume { id: String },
    /// Retry a failed task.
    Retry { id: String },
    /// Delete a task.
    Delete { id: String },
    /// Show backend-wide download statistics.
    Stats,
    /// Show title and available resolutions of a video page.
    Info { url: String },
    /// List the videos found on a search or browse page.
    Search {
        url: String,
        #[arg(long)]
        start_page: Option<u32>,
        #[arg(long)]
        end_page: Option<u32>,
        /// Queue every listed video in one batch.
        #[arg(long)]
        download: bool,
        #[arg(short, long)]
        resolution: Option<String>,
    },
    /// Inspect or change the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration.
    Show,
    /// Persist a new backend URL.
    SetServer { url: String },
}

// --- Main Application Logic ---
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let mut config = config::load_config().await?;
    if let Some(server) = cli.server {
        config.server_url = server;
    }

    let api = Arc::new(
        ApiClient::new(&config.server_url)
            .with_context(|| format!("Invalid server URL '{}'", config.server_url))?,
    );

    match cli.command {
        Commands::Watch => watch(&config, api).await?,
        Commands::Submit {
            page_url,
            resolution,
            title,
        } => {
            let session = Session::new(api, config.import_rules());
            let mut request =
                CreateTaskRequest::new(page_url, resolution.unwrap_or_else(|| config.default_resolution.clone()));
            request.title = title;
            let task = session.create(&request).await?;
            println!("Queued {} ({})", task.title, task.id);
        }
        Commands::Import { file, resolution } => {
            let session = Session::new(api, config.import_rules());
            let resolution = resolution.unwrap_or_else(|| config.default_resolution.clone());
            let report = if file == "-" {
                let mut text = String::new();
                tokio::io::stdin().read_to_string(&mut text).await?;
                session.import_text(&text, &resolution).await
            } else {
                session
                    .import_file(&file, &resolution)
                    .await
                    .with_context(|| format!("Could not read {}", file))?
            };
            print_import_report(&report);
        }
        Commands::Cancel { id } => print_task(&Session::new(api, config.import_rules()).cancel(&id).await?),
        Commands::Pause { id } => print_task(&Session::new(api, config.import_rules()).pause(&id).await?),
        Commands::Resume { id } => print_task(&Session::new(api, config.import_rules()).resume(&id).await?),
        Commands::Retry { id } => print_task(&Session::new(api, config.import_rules()).retry(&id).await?),
        Commands::Delete { id } => {
            Session::new(api, config.import_rules()).delete(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Stats => print_statistics(&api.statistics().await?),
        Commands::Info { url } => print_video(&api.video_info(&url).await?),
        Commands::Search {
            url,
            start_page,
            end_page,
            download,
            resolution,
        } => {
            let videos = match (start_page, end_page) {
                (None, None) => api.search(&url).await?.videos,
                (start, end) => {
                    let start_page = start.unwrap_or(1);
                    let request = PaginatedSearchRequest {
                        search_url: url,
                        start_page,
                        end_page: end.unwrap_or(start_page),
                    };
                    let result = api.search_paginated(&request).await?;
                    println!("{} videos across {} pages", result.total_videos, result.total_pages);
                    result.videos
                }
            };
            for video in &videos {
                print_video(video);
            }

            if download && !videos.is_empty() {
                let resolution = resolution.unwrap_or_else(|| config.default_resolution.clone());
                let request = BatchDownloadRequest {
                    videos: videos
                        .iter()
                        .map(|video| CreateTaskRequest::for_video(video, resolution.as_str()))
                        .collect(),
                };
                print_batch_result(&api.batch_download(&request).await?);
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => print!("{}", toml::to_string_pretty(&config)?),
            ConfigAction::SetServer { url } => {
                ApiClient::new(&url).with_context(|| format!("Invalid server URL '{}'", url))?;
                config.server_url = url;
                config::save_config(&config).await?;
                println!("Server set to {}", config.server_url);
            }
        },
    }

    Ok(())
}

/// Runs the synchronized session and reprints the ordered list on every store change.
async fn watch(config: &Config, api: Arc<ApiClient>) -> anyhow::Result<()> {
    let mut connector = WsConnector::new(api.websocket_url()?);
    if let Some(every) = config.heartbeat() {
        connector = connector.with_heartbeat(every);
    }
    let connector = Arc::new(connector);
    let on_statistics: StatisticsHandler = Box::new(|stats: TaskStatistics| {
        tracing::debug!(
            "{} tasks, {} downloading, {:.2} MB/s average",
            stats.total_tasks,
            stats.downloading,
            stats.average_speed_mbps
        );
    });

    let mut session = Session::new(api, config.import_rules());
    session.start_poller(config.poll_interval());
    session.start_channel(
        connector,
        config.reconnect_delay(),
        config.idle_timeout(),
        Some(on_statistics),
    );
    tracing::info!("Watching {} (Ctrl-C to stop)", config.server_url);

    let mut updates = WatchStream::new(session.store().subscribe());
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            next = updates.next() => match next {
                Some(_) => {
                    println!("---");
                    for task in session.ordered_tasks() {
                        print_task(&task);
                    }
                }
                None => break,
            },
        }
    }

    session.shutdown().await;
    Ok(())
}

// --- Output Helpers ---

fn print_task(task: &DownloadTask) {
    println!(
        "{:<11} {:>5.1}% {:>7.2} MB/s  {}  [{}]",
        task.status.as_str(),
        task.progress,
        task.speed,
        task.title,
        task.id
    );
    if let Some(error) = &task.error_message {
        println!("            error: {}", error);
    }
}

fn print_import_report(report: &BulkImportReport) {
    println!("{} succeeded, {} failed", report.success_count, report.failed_count);
    for url in &report.failed_urls {
        println!("  failed: {}", url);
    }
    if let Some(error) = &report.submission_error {
        eprintln!("Submission error: {}", error);
    }
}

fn print_batch_result(result: &BulkImportResult) {
    println!("{} queued, {} failed", result.success_count, result.failed_count);
    for url in &result.failed_urls {
        println!("  failed: {}", url);
    }
}

fn print_statistics(stats: &TaskStatistics) {
    println!(
        "total {}  completed {}  failed {}  downloading {}  pending {}",
        stats.total_tasks, stats.completed, stats.failed, stats.downloading, stats.pending
    );
    println!(
        "{} / {} bytes, {:.2} MB/s average",
        stats.downloaded_size_bytes, stats.total_size_bytes, stats.average_speed_mbps
    );
}

fn print_video(video: &VideoInfo) {
    let mut resolutions: Vec<&str> = video.resolutions.keys().map(String::as_str).collect();
    resolutions.sort();
    println!("{}  {}  [{}]", video.title, video.url, resolutions.join(", "));
}
