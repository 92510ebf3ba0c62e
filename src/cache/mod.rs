//! Disk-backed cache for guide resources.
//!
//! Every resource maps to a file path derived only from its key, so there is
//! no index to keep in sync: a key is cached exactly when its file exists and
//! parses. Nothing here returns an error to the caller. Misses, unreadable
//! files and failed writes all come back as `None`/`false`, and the reason is
//! kept in [`ResourceCache::last_error`] for diagnostics.

pub mod freshness;

use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::api::{Channel, Programme};
use crate::errors::{AppError, Result};
use crate::utils::write_atomic;

pub use freshness::{RefreshPolicy, RefreshThrottle};

const CHANNELS_FILE: &str = "channels.json";
const PROGRAMMES_DIR: &str = "programmes";
const POSTERS_DIR: &str = "posters";

/// A cached day of programmes for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgrammeListing {
    /// When the server generated this data.
    pub updated_at: DateTime<Utc>,
    /// Validity horizon declared by the server.
    pub expires_at: Option<DateTime<Utc>>,
    pub programmes: Vec<Programme>,
}

impl ProgrammeListing {
    /// Whole minutes since `updated_at`; clock skew never yields a negative age.
    pub fn age_minutes(&self) -> i64 {
        self.age_minutes_at(Utc::now())
    }

    pub fn age_minutes_at(&self, now: DateTime<Utc>) -> i64 {
        (now - self.updated_at).num_minutes().max(0)
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|expires| Utc::now() > expires)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ChannelsFile {
    channels: Vec<Channel>,
}

pub struct ResourceCache {
    root: PathBuf,
    last_error: Option<String>,
}

impl ResourceCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            last_error: None,
        }
    }

    /// Points the cache at a new directory. It is created on the first write.
    pub fn set_root(&mut self, root: impl Into<PathBuf>) {
        self.root = root.into();
        self.last_error = None;
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Message of the most recent failed operation.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn load_channels(&mut self) -> Option<Vec<Channel>> {
        let path = self.channels_path();
        let file: ChannelsFile = self.read_json(&path)?;
        Some(file.channels)
    }

    pub fn save_channels(&mut self, channels: &[Channel]) -> bool {
        let file = ChannelsFile {
            channels: channels.to_vec(),
        };
        let result = serde_json::to_vec_pretty(&file)
            .map_err(AppError::from)
            .and_then(|data| write_atomic(&self.channels_path(), &data));
        self.record("save channels", result)
    }

    pub fn load_programmes(&mut self, channel_id: i64, date: NaiveDate) -> Option<ProgrammeListing> {
        if channel_id < 0 {
            return None;
        }
        let path = self.programmes_path(channel_id, date);
        self.read_json(&path)
    }

    pub fn save_programmes(
        &mut self,
        channel_id: i64,
        date: NaiveDate,
        updated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        programmes: &[Programme],
    ) -> bool {
        let result = self.write_programmes(channel_id, date, updated_at, expires_at, programmes);
        self.record("save programmes", result)
    }

    fn write_programmes(
        &self,
        channel_id: i64,
        date: NaiveDate,
        updated_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
        programmes: &[Programme],
    ) -> Result<()> {
        if channel_id < 0 {
            return Err(AppError::Validation(format!("Invalid channel id: {}", channel_id)));
        }
        if let Some(expires) = expires_at {
            if expires < updated_at {
                return Err(AppError::Validation(format!(
                    "Listing expires ({}) before it was updated ({})",
                    expires, updated_at
                )));
            }
        }

        let listing = ProgrammeListing {
            updated_at,
            expires_at,
            programmes: programmes.to_vec(),
        };
        let data = serde_json::to_vec_pretty(&listing)?;
        write_atomic(&self.programmes_path(channel_id, date), &data)
    }

    /// Poster bytes for `programme`, or `None` when not cached.
    pub fn load_poster(&mut self, programme: &Programme) -> Option<Vec<u8>> {
        if programme.id < 0 {
            return None;
        }
        let path = self.poster_path(programme.id);
        match std::fs::read(&path) {
            Ok(data) if !data.is_empty() => Some(data),
            Ok(_) => {
                self.fail(format!("Empty poster file {:?}", path));
                None
            }
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => {
                self.fail(format!("Failed to read {:?}: {}", path, e));
                None
            }
        }
    }

    pub fn save_poster(&mut self, programme: &Programme, data: &[u8]) -> bool {
        let result = if programme.id < 0 {
            Err(AppError::Validation(format!("Invalid programme id: {}", programme.id)))
        } else if data.is_empty() {
            Err(AppError::Validation("Poster data is empty".to_string()))
        } else {
            write_atomic(&self.poster_path(programme.id), data)
        };
        self.record("save poster", result)
    }

    fn channels_path(&self) -> PathBuf {
        self.root.join(CHANNELS_FILE)
    }

    fn programmes_path(&self, channel_id: i64, date: NaiveDate) -> PathBuf {
        self.root
            .join(PROGRAMMES_DIR)
            .join(channel_id.to_string())
            .join(format!("{}.json", date.format("%Y-%m-%d")))
    }

    fn poster_path(&self, programme_id: i64) -> PathBuf {
        self.root.join(POSTERS_DIR).join(format!("{}.jpg", programme_id))
    }

    fn read_json<T: serde::de::DeserializeOwned>(&mut self, path: &Path) -> Option<T> {
        let data = match std::fs::read(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("Cache miss: {:?}", path);
                return None;
            }
            Err(e) => {
                self.fail(format!("Failed to read {:?}: {}", path, e));
                return None;
            }
        };

        match serde_json::from_slice(&data) {
            Ok(value) => Some(value),
            Err(e) => {
                self.fail(format!("Corrupt cache file {:?}: {}", path, e));
                None
            }
        }
    }

    fn record(&mut self, operation: &str, result: Result<()>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.fail(format!("Failed to {}: {}", operation, e));
                false
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!("{}", message);
        self.last_error = Some(message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn programme(id: i64, channel_id: i64, title: &str) -> Programme {
        let start = NaiveDate::from_ymd_opt(2026, 10, 16)
            .unwrap()
            .and_hms_opt(21, 0, 0)
            .unwrap();
        Programme {
            id,
            channel_id,
            title: title.to_string(),
            description: format!("{} description", title),
            start_time: start,
            end_time: start + Duration::minutes(45),
            flags: 0,
        }
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 16).unwrap()
    }

    #[test]
    fn programmes_round_trip_with_zero_age() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path());
        let programmes = vec![programme(10, 3, "Uutiset"), programme(11, 3, "Sää")];
        let updated = Utc::now();
        let expires = updated + Duration::hours(6);

        assert!(cache.save_programmes(3, date(), updated, Some(expires), &programmes));

        let listing = cache.load_programmes(3, date()).unwrap();
        assert_eq!(listing.programmes, programmes);
        assert_eq!(listing.updated_at, updated);
        assert_eq!(listing.expires_at, Some(expires));
        assert!(listing.age_minutes() <= 1);
        assert!(!listing.is_expired());
    }

    #[test]
    fn unwritten_keys_miss_without_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path().join("not-yet-created"));

        assert!(cache.load_channels().is_none());
        assert!(cache.load_programmes(1, date()).is_none());
        assert!(cache.load_poster(&programme(5, 1, "Elokuva")).is_none());
        assert!(cache.last_error().is_none());
    }

    #[test]
    fn corrupt_channel_file_is_a_miss_with_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CHANNELS_FILE), b"{\"channels\": [").unwrap();
        let mut cache = ResourceCache::new(dir.path());

        assert!(cache.load_channels().is_none());
        assert!(cache.last_error().unwrap().contains("Corrupt"));
    }

    #[test]
    fn channels_are_overwritten_wholesale() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path());
        let first = vec![
            Channel { id: 1, name: "TV1".to_string(), icon_url: None },
            Channel { id: 2, name: "TV2".to_string(), icon_url: None },
        ];
        let second = vec![Channel {
            id: 3,
            name: "Teema".to_string(),
            icon_url: Some("http://example.com/teema.png".to_string()),
        }];

        assert!(cache.save_channels(&first));
        assert!(cache.save_channels(&second));
        assert_eq!(cache.load_channels().unwrap(), second);
    }

    #[test]
    fn listing_that_expires_before_update_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path());
        let updated = Utc::now();

        assert!(!cache.save_programmes(1, date(), updated, Some(updated - Duration::minutes(1)), &[]));
        assert!(cache.last_error().is_some());
        assert!(cache.load_programmes(1, date()).is_none());
    }

    #[test]
    fn negative_ids_never_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path());

        assert!(!cache.save_programmes(-1, date(), Utc::now(), None, &[]));
        assert!(cache.load_programmes(-1, date()).is_none());
        assert!(!cache.save_poster(&programme(-1, 1, "x"), b"jpeg"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[test]
    fn posters_round_trip_and_reject_empty_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(dir.path());
        let programme = programme(42, 1, "Dokumentti");

        assert!(!cache.save_poster(&programme, &[]));
        assert!(cache.save_poster(&programme, &[0xFF, 0xD8, 0xFF]));
        assert_eq!(cache.load_poster(&programme).unwrap(), vec![0xFF, 0xD8, 0xFF]);
        assert!(dir.path().join("posters").join("42.jpg").exists());
    }

    #[test]
    fn set_root_switches_storage_directory() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        let mut cache = ResourceCache::new(first.path());
        let channels = vec![Channel { id: 1, name: "TV1".to_string(), icon_url: None }];
        assert!(cache.save_channels(&channels));

        cache.set_root(second.path());
        assert_eq!(cache.root(), second.path());
        assert!(cache.load_channels().is_none());
    }

    #[test]
    fn age_is_measured_from_update_time() {
        let now = Utc::now();
        let listing = ProgrammeListing {
            updated_at: now - Duration::minutes(40),
            expires_at: None,
            programmes: Vec::new(),
        };
        assert_eq!(listing.age_minutes_at(now), 40);

        let future = ProgrammeListing {
            updated_at: now + Duration::minutes(5),
            expires_at: None,
            programmes: Vec::new(),
        };
        assert_eq!(future.age_minutes_at(now), 0);
    }
}
