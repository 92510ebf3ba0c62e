use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use dirs;
use crate::api::DownloadFormat;
use crate::errors::{AppError, Result};

const APP_DIR: &str = "tvkaista";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub cache: CacheConfig,
    pub downloads: DownloadConfig,
    pub proxy: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CacheConfig {
    pub root: PathBuf,
    /// A forced refresh is served from cache while the listing is younger than this.
    pub forced_refresh_min_age_minutes: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DownloadConfig {
    pub directory: PathBuf,
    pub filename_template: String,
    pub max_concurrent_downloads: usize,
    pub default_format: DownloadFormat,
    pub jobs_file: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            downloads: DownloadConfig::default(),
            proxy: None,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("./cache"))
                .join(APP_DIR),
            forced_refresh_min_age_minutes: 30,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            directory: dirs::video_dir()
                .or_else(dirs::home_dir)
                .unwrap_or_else(|| PathBuf::from("./downloads")),
            filename_template: "%D_%A.%e".to_string(),
            max_concurrent_downloads: 3,
            default_format: DownloadFormat::default(),
            jobs_file: data_dir.join("downloads.json"),
        }
    }
}

impl DownloadConfig {
    /// Config rooted in `dir`: downloads land there and the job list sits beside them.
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            directory: dir.to_path_buf(),
            jobs_file: dir.join("downloads.json"),
            ..Self::default()
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_path = Self::get_config_path()?;
        Self::load_from(&config_path)
    }

    /// Layers built-in defaults, the JSON file at `path` (if any) and
    /// `TVKAISTA_*` environment variables, in that order.
    pub fn load_from(path: &Path) -> Result<Self> {
        let defaults = config::Config::try_from(&AppConfig::default())?;

        let settings = config::Config::builder()
            .add_source(defaults)
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("TVKAISTA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: AppConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::get_config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(config_dir) = path.parent() {
            std::fs::create_dir_all(config_dir)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.downloads.max_concurrent_downloads == 0 {
            return Err(AppError::Validation(
                "max_concurrent_downloads must be at least 1".to_string(),
            ));
        }
        if self.downloads.filename_template.trim().is_empty() {
            return Err(AppError::Validation(
                "filename_template cannot be empty".to_string(),
            ));
        }
        if self.cache.forced_refresh_min_age_minutes < 0 {
            return Err(AppError::Validation(
                "forced_refresh_min_age_minutes cannot be negative".to_string(),
            ));
        }
        Ok(())
    }

    fn get_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| AppError::Config(config::ConfigError::Message("Could not find config directory".to_string())))?;

        Ok(config_dir.join(APP_DIR).join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::load_from(&dir.path().join("config.json")).unwrap();

        assert_eq!(config.downloads.filename_template, "%D_%A.%e");
        assert_eq!(config.downloads.max_concurrent_downloads, 3);
        assert_eq!(config.downloads.default_format, DownloadFormat::Ts8Mbps);
        assert_eq!(config.cache.forced_refresh_min_age_minutes, 30);
    }

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let mut config = AppConfig::default();
        config.downloads.directory = dir.path().join("videos");
        config.downloads.max_concurrent_downloads = 1;
        config.downloads.default_format = DownloadFormat::Mp4_2Mbps;
        config.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.downloads.directory, dir.path().join("videos"));
        assert_eq!(loaded.downloads.max_concurrent_downloads, 1);
        assert_eq!(loaded.downloads.default_format, DownloadFormat::Mp4_2Mbps);
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = AppConfig::default();
        config.downloads.max_concurrent_downloads = 0;
        assert!(matches!(config.validate(), Err(AppError::Validation(_))));
    }
}
