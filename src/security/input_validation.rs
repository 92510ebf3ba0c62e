use crate::api::Programme;
use crate::errors::{AppError, Result};
use url::Url;
use std::path::{Component, Path};

/// Checks download submissions before a job is created.
pub struct InputValidator;

impl InputValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_url(&self, url: &str) -> Result<()> {
        if url.trim().is_empty() {
            return Err(AppError::Validation("URL cannot be empty".to_string()));
        }

        let parsed_url = Url::parse(url)
            .map_err(|e| AppError::Validation(format!("Invalid URL: {}", e)))?;

        if !matches!(parsed_url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "Unsupported URL scheme: {}",
                parsed_url.scheme()
            )));
        }

        if parsed_url.host_str().is_none() {
            return Err(AppError::Validation("URL must have a host".to_string()));
        }

        Ok(())
    }

    pub fn validate_programme(&self, programme: &Programme) -> Result<()> {
        if programme.id < 0 {
            return Err(AppError::Validation(format!("Invalid programme id: {}", programme.id)));
        }

        if programme.channel_id < 0 {
            return Err(AppError::Validation(format!(
                "Invalid channel id: {}",
                programme.channel_id
            )));
        }

        if programme.title.trim().is_empty() {
            return Err(AppError::Validation("Programme title cannot be empty".to_string()));
        }

        Ok(())
    }

    pub fn validate_submission(&self, programme: &Programme, channel_name: &str, url: &str) -> Result<()> {
        self.validate_programme(programme)?;

        if channel_name.trim().is_empty() {
            return Err(AppError::Validation("Channel name cannot be empty".to_string()));
        }

        self.validate_url(url)
    }

    /// A rendered file name must stay inside the download directory.
    pub fn validate_relative_name(&self, name: &str) -> Result<()> {
        if name.trim().is_empty() {
            return Err(AppError::Validation("File name cannot be empty".to_string()));
        }

        if name.contains('\0') {
            return Err(AppError::Validation("Null bytes not allowed in file name".to_string()));
        }

        let path = Path::new(name);
        if path.components().any(|component| {
            !matches!(component, Component::Normal(_) | Component::CurDir)
        }) {
            return Err(AppError::Validation(format!(
                "File name must stay inside the download directory: {}",
                name
            )));
        }

        Ok(())
    }
}

impl Default for InputValidator {
    fn default() -> Self {
        Self::new()
    }
}
