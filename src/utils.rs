use std::io::Write;
use std::path::Path;
use crate::errors::{AppError, Result};
use log::{debug, info};

/// Sanitizes a filename by removing invalid characters
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .trim()
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Creates a directory if it doesn't exist
pub async fn ensure_dir_exists(path: &Path) -> Result<()> {
    if !tokio::fs::try_exists(path).await? {
        tokio::fs::create_dir_all(path).await?;
        info!("Created directory: {:?}", path);
    }
    Ok(())
}

/// Writes `data` to a temporary file next to `path` and renames it into place,
/// so readers see either the previous content or the new content.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| AppError::Validation(format!("Path has no parent directory: {:?}", path)))?;
    std::fs::create_dir_all(dir)?;

    let mut file = tempfile::NamedTempFile::new_in(dir)?;
    file.write_all(data)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| AppError::Io(e.error))?;

    debug!("Wrote {} bytes to {:?}", data.len(), path);
    Ok(())
}
