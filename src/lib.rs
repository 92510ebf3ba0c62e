//! Offline layer of a TV-guide recording client: a disk cache for channel
//! lists, programme listings and posters, and a download manager that turns
//! recording URLs into files and remembers them across restarts.

pub mod api;
pub mod cache;
pub mod config;
pub mod downloader;
pub mod errors;
pub mod guide;
pub mod security;
pub mod utils;

pub use api::{Channel, DownloadFormat, Programme};
pub use cache::{ProgrammeListing, RefreshPolicy, ResourceCache};
pub use config::AppConfig;
pub use downloader::{DownloadEvent, DownloadJob, DownloadManager, DownloadStatus, JobId, Transfer};
pub use errors::{AppError, Result};
pub use guide::{Guide, GuideSource, ProgrammeFeed};
