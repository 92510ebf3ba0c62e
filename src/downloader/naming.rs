//! Destination file names built from a user template.
//!
//! Recognized placeholders:
//!
//! | Placeholder | Value                              |
//! |-------------|------------------------------------|
//! | `%A`        | programme title                    |
//! | `%K`        | channel name                       |
//! | `%D`        | start date, `YYYY-MM-DD`           |
//! | `%T`        | start time, `HH-MM`                |
//! | `%e`        | file extension of the format       |
//! | `%%`        | a literal `%`                      |
//!
//! Anything else after `%` is kept as written.

use std::sync::LazyLock;

use regex::{Captures, Regex};

use super::ProgrammeSnapshot;
use crate::api::DownloadFormat;
use crate::utils::sanitize_filename;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"%(.)").expect("placeholder pattern is valid")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameTemplate {
    pattern: String,
}

impl FilenameTemplate {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn render(&self, programme: &ProgrammeSnapshot, format: DownloadFormat) -> String {
        PLACEHOLDER
            .replace_all(&self.pattern, |caps: &Captures| match &caps[1] {
                "A" => sanitize_filename(&programme.title),
                "K" => sanitize_filename(&programme.channel_name),
                "D" => programme.start_time.format("%Y-%m-%d").to_string(),
                "T" => programme.start_time.format("%H-%M").to_string(),
                "e" => format.extension().to_string(),
                "%" => "%".to_string(),
                _ => caps[0].to_string(),
            })
            .into_owned()
    }
}

impl Default for FilenameTemplate {
    fn default() -> Self {
        Self::new("%D_%A.%e")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn snapshot(title: &str) -> ProgrammeSnapshot {
        ProgrammeSnapshot {
            programme_id: 7,
            title: title.to_string(),
            channel_name: "Yle TV1".to_string(),
            start_time: NaiveDate::from_ymd_opt(2026, 10, 16)
                .unwrap()
                .and_hms_opt(20, 30, 0)
                .unwrap(),
        }
    }

    #[test]
    fn default_template_uses_date_title_and_extension() {
        let name = FilenameTemplate::default().render(&snapshot("Uutiset"), DownloadFormat::Ts8Mbps);
        assert_eq!(name, "2026-10-16_Uutiset.ts");
    }

    #[test]
    fn all_placeholders_resolve() {
        let template = FilenameTemplate::new("%K/%D %T - %A (100%%).%e");
        let name = template.render(&snapshot("Elokuva"), DownloadFormat::Flash1Mbps);
        assert_eq!(name, "Yle TV1/2026-10-16 20-30 - Elokuva (100%).flv");
    }

    #[test]
    fn unknown_placeholders_are_left_verbatim() {
        let template = FilenameTemplate::new("%A_%Q_%z.%e");
        let name = template.render(&snapshot("Sää"), DownloadFormat::Mp4_2Mbps);
        assert_eq!(name, "Sää_%Q_%z.mp4");
    }

    #[test]
    fn substituted_values_are_sanitized() {
        let name = FilenameTemplate::new("%A.%e")
            .render(&snapshot("A/B: osa 2?"), DownloadFormat::Mp4_300Kbps);
        assert_eq!(name, "A_B_ osa 2_.mp4");
    }
}
