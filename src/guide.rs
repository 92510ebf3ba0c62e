//! Cache-first access to the guide service.
//!
//! [`Guide`] answers channel, programme and poster requests from the
//! [`ResourceCache`] when the [`RefreshPolicy`] allows it and otherwise asks
//! the [`GuideSource`], writing what it gets back into the cache. It also
//! resolves stream URLs and hands recordings to the [`DownloadManager`].

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};

use crate::api::{Channel, DownloadFormat, Programme};
use crate::cache::{RefreshPolicy, RefreshThrottle, ResourceCache};
use crate::downloader::DownloadManager;
use crate::errors::{AppError, Result};

/// One day of programmes as delivered by the service.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgrammeFeed {
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub programmes: Vec<Programme>,
}

/// The remote guide service, as seen by the offline layer.
#[async_trait::async_trait]
pub trait GuideSource: Send + Sync {
    async fn fetch_channels(&self) -> Result<Vec<Channel>>;
    async fn fetch_programmes(&self, channel_id: i64, date: NaiveDate) -> Result<ProgrammeFeed>;
    async fn fetch_poster(&self, programme: &Programme) -> Result<Vec<u8>>;
    /// A signed URL the recording can be streamed or downloaded from.
    async fn resolve_stream(&self, programme: &Programme, format: DownloadFormat) -> Result<String>;
}

pub struct Guide<S> {
    source: S,
    cache: ResourceCache,
    policy: RefreshPolicy,
    throttle: RefreshThrottle,
}

impl<S: GuideSource> Guide<S> {
    pub fn new(source: S, cache: ResourceCache, policy: RefreshPolicy) -> Self {
        Self {
            source,
            cache,
            policy,
            throttle: RefreshThrottle::default(),
        }
    }

    pub fn with_throttle(mut self, throttle: RefreshThrottle) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn channels(&mut self, refresh: bool) -> Result<Vec<Channel>> {
        let cached = self.cache.load_channels();

        if !self.policy.should_fetch_channels(cached.is_some(), refresh) {
            if let Some(channels) = cached {
                debug!("Serving {} channel(s) from cache", channels.len());
                return Ok(channels);
            }
        }

        let channels = self.source.fetch_channels().await?;
        if !self.cache.save_channels(&channels) {
            warn!("Channel list not cached: {}", self.cache.last_error().unwrap_or("unknown error"));
        }
        info!("Fetched {} channel(s)", channels.len());
        Ok(channels)
    }

    pub async fn programmes(&mut self, channel_id: i64, date: NaiveDate, refresh: bool) -> Result<Vec<Programme>> {
        if channel_id < 0 {
            return Err(AppError::Validation(format!("Invalid channel id: {}", channel_id)));
        }

        let cached = self.cache.load_programmes(channel_id, date);

        if !self.policy.should_fetch_programmes(cached.as_ref(), refresh) {
            if let Some(listing) = cached {
                debug!(
                    "Serving channel {} on {} from cache ({} min old)",
                    channel_id,
                    date,
                    listing.age_minutes()
                );
                return Ok(listing.programmes);
            }
        }

        let feed = self.source.fetch_programmes(channel_id, date).await?;
        if !self.cache.save_programmes(channel_id, date, feed.updated_at, feed.expires_at, &feed.programmes) {
            warn!(
                "Programmes for channel {} on {} not cached: {}",
                channel_id,
                date,
                self.cache.last_error().unwrap_or("unknown error")
            );
        }
        info!("Fetched {} programme(s) for channel {} on {}", feed.programmes.len(), channel_id, date);
        Ok(feed.programmes)
    }

    /// A user-triggered refresh. Returns `Ok(None)` when it follows the
    /// previous accepted refresh too closely.
    pub async fn refresh_programmes(&mut self, channel_id: i64, date: NaiveDate) -> Result<Option<Vec<Programme>>> {
        if !self.throttle.try_acquire() {
            debug!("Ignoring refresh request for channel {}: too soon", channel_id);
            return Ok(None);
        }
        self.programmes(channel_id, date, true).await.map(Some)
    }

    /// Poster bytes, or `None` for programmes flagged as having no poster.
    pub async fn poster(&mut self, programme: &Programme) -> Result<Option<Vec<u8>>> {
        if programme.id < 0 || !programme.has_poster() {
            return Ok(None);
        }

        if let Some(poster) = self.cache.load_poster(programme) {
            return Ok(Some(poster));
        }

        let poster = self.source.fetch_poster(programme).await?;
        if poster.is_empty() {
            return Ok(None);
        }
        if !self.cache.save_poster(programme, &poster) {
            warn!("Poster {} not cached: {}", programme.id, self.cache.last_error().unwrap_or("unknown error"));
        }
        Ok(Some(poster))
    }

    /// Resolves the recording URL and submits a download. Returns the job's row.
    pub async fn enqueue_download(
        &self,
        downloads: &DownloadManager,
        programme: &Programme,
        format: DownloadFormat,
        channel_name: &str,
    ) -> Result<usize> {
        if !programme.is_recordable() {
            return Err(AppError::Validation(format!(
                "Programme {} is not available for recording",
                programme.id
            )));
        }

        let url = self.source.resolve_stream(programme, format).await?;
        downloads.download(programme, format, channel_name, &url).await
    }
}
