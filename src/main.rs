use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use tokio::sync::broadcast::error::RecvError;

use tvkaista_offline::cache::{RefreshPolicy, ResourceCache};
use tvkaista_offline::config::AppConfig;
use tvkaista_offline::downloader::{DownloadEvent, DownloadManager, HttpTransfer, Transfer};
use tvkaista_offline::{DownloadFormat, Programme};

#[derive(Parser)]
#[command(name = "tvkaista", version, about = "Offline cache and recording downloads for the TV guide")]
struct Cli {
    /// Read settings from this file instead of the platform config directory
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List saved downloads
    Jobs,
    /// Download a recording and wait for it to finish
    Download {
        /// Resolved recording URL
        #[arg(long)]
        url: String,
        #[arg(long)]
        title: String,
        #[arg(long)]
        channel: String,
        /// Programme start, e.g. 2026-10-16T20:30:00
        #[arg(long)]
        start: NaiveDateTime,
        #[arg(long, default_value_t = 0)]
        programme_id: i64,
        #[arg(long, default_value_t = 0)]
        channel_id: i64,
        /// Format index: 0 = 300 kbps MP4, 1 = 1 Mbps Flash, 2 = 2 Mbps MP4, 3 = 8 Mbps TS
        #[arg(long)]
        format: Option<u8>,
    },
    /// Remove a finished, aborted or failed download from the list
    Remove { row: usize },
    /// Show the cached listing for a channel and day
    Cache { channel_id: i64, date: NaiveDate },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    };
    let config = match loaded {
        Ok(config) => {
            info!("Configuration loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            AppConfig::default()
        }
    };

    match cli.command {
        Command::Jobs => list_jobs(&config).await,
        Command::Download {
            url,
            title,
            channel,
            start,
            programme_id,
            channel_id,
            format,
        } => {
            let format = match format {
                Some(index) => DownloadFormat::try_from(index)?,
                None => config.downloads.default_format,
            };
            let programme = Programme {
                id: programme_id,
                channel_id,
                title,
                description: String::new(),
                start_time: start,
                end_time: start,
                flags: 0,
            };
            download(&config, &programme, format, &channel, &url).await
        }
        Command::Remove { row } => remove(&config, row).await,
        Command::Cache { channel_id, date } => show_cache(&config, channel_id, date),
    }
}

fn build_manager(config: &AppConfig) -> anyhow::Result<DownloadManager> {
    let connections = config.downloads.max_concurrent_downloads;
    let transfer: Arc<dyn Transfer> = match &config.proxy {
        Some(proxy_url) => {
            info!("Using proxy: {}", proxy_url);
            Arc::new(HttpTransfer::with_proxy(connections, proxy_url)?)
        }
        None => Arc::new(HttpTransfer::new(connections)?),
    };
    Ok(DownloadManager::new(&config.downloads, transfer))
}

async fn list_jobs(config: &AppConfig) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    manager.load().await?;

    let jobs = manager.jobs().await;
    if jobs.is_empty() {
        println!("No downloads");
        return Ok(());
    }

    for (row, job) in jobs.iter().enumerate() {
        println!(
            "{:>3}  {:<8}  {}  [{}]  {}",
            row,
            format!("{:?}", job.status),
            job.programme.display_name(),
            job.format,
            job.destination.display()
        );
        if let Some(error) = &job.error {
            println!("     {}", error);
        }
    }
    Ok(())
}

async fn download(
    config: &AppConfig,
    programme: &Programme,
    format: DownloadFormat,
    channel: &str,
    url: &str,
) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    manager.load().await?;
    let mut events = manager.subscribe();

    let row = manager.download(programme, format, channel, url).await?;
    let job = manager.job(row).await.context("download disappeared from the list")?;

    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg} {bytes}/{total_bytes} ({bytes_per_sec})")?,
    );
    bar.set_message(job.programme.display_name());

    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) if event.job_id() == job.id => break Some(event),
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break None,
            },
            _ = ticker.tick() => {
                if let Some(progress) = manager.progress(row).await {
                    if let Some(total) = progress.bytes_total {
                        bar.set_length(total);
                    }
                    bar.set_position(progress.bytes_transferred);
                }
            }
            _ = &mut ctrl_c => {
                bar.set_message("aborting");
                manager.abort_all_downloads().await;
                break None;
            }
        }
    };

    bar.finish_and_clear();
    manager.save().await?;

    match outcome {
        Some(DownloadEvent::Finished { destination, .. }) => {
            println!("Saved {}", destination.display());
            Ok(())
        }
        Some(DownloadEvent::Failed { error, .. }) => bail!("download failed: {}", error),
        Some(DownloadEvent::Aborted { .. }) | None => bail!("download aborted"),
    }
}

async fn remove(config: &AppConfig, row: usize) -> anyhow::Result<()> {
    let manager = build_manager(config)?;
    manager.load().await?;
    let job = manager.remove_download(row).await?;
    println!("Removed {}", job.programme.display_name());
    Ok(())
}

fn show_cache(config: &AppConfig, channel_id: i64, date: NaiveDate) -> anyhow::Result<()> {
    let mut cache = ResourceCache::new(&config.cache.root);
    let policy = RefreshPolicy::new(config.cache.forced_refresh_min_age_minutes);

    match cache.load_programmes(channel_id, date) {
        Some(listing) => {
            println!(
                "{} programme(s), updated {} ({} min ago){}",
                listing.programmes.len(),
                listing.updated_at,
                listing.age_minutes(),
                if listing.is_expired() { ", expired" } else { "" }
            );
            println!(
                "A forced refresh would {}",
                if policy.should_fetch_programmes(Some(&listing), true) {
                    "fetch from the network"
                } else {
                    "be served from cache"
                }
            );
            for programme in &listing.programmes {
                println!("  {}  {}", programme.start_time.format("%H:%M"), programme.title);
            }
        }
        None => match cache.last_error() {
            Some(error) => println!("Not cached: {}", error),
            None => println!("Not cached"),
        },
    }
    Ok(())
}
