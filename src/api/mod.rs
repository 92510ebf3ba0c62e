// Records produced by the guide service client. The cache and the download
// manager only read them.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::errors::AppError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: i64,
    pub name: String,
    pub icon_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Programme {
    pub id: i64,
    pub channel_id: i64,
    pub title: String,
    pub description: String,
    pub start_time: NaiveDateTime,
    pub end_time: NaiveDateTime,
    pub flags: u32,
}

impl Programme {
    /// Set on programmes without a poster; such programmes are not recordable either.
    pub const NO_POSTER: u32 = 0x08;

    pub fn has_poster(&self) -> bool {
        self.flags & Self::NO_POSTER == 0
    }

    pub fn is_recordable(&self) -> bool {
        self.has_poster()
    }
}

/// Quality/container selections offered by the service, in service index order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum DownloadFormat {
    Mp4_300Kbps,
    Flash1Mbps,
    Mp4_2Mbps,
    #[default]
    Ts8Mbps,
}

impl DownloadFormat {
    pub const ALL: [DownloadFormat; 4] = [
        DownloadFormat::Mp4_300Kbps,
        DownloadFormat::Flash1Mbps,
        DownloadFormat::Mp4_2Mbps,
        DownloadFormat::Ts8Mbps,
    ];

    pub fn index(&self) -> u8 {
        match self {
            DownloadFormat::Mp4_300Kbps => 0,
            DownloadFormat::Flash1Mbps => 1,
            DownloadFormat::Mp4_2Mbps => 2,
            DownloadFormat::Ts8Mbps => 3,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            DownloadFormat::Mp4_300Kbps | DownloadFormat::Mp4_2Mbps => "mp4",
            DownloadFormat::Flash1Mbps => "flv",
            DownloadFormat::Ts8Mbps => "ts",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DownloadFormat::Mp4_300Kbps => "300 kbps MP4",
            DownloadFormat::Flash1Mbps => "1 Mbps Flash",
            DownloadFormat::Mp4_2Mbps => "2 Mbps MP4",
            DownloadFormat::Ts8Mbps => "8 Mbps TS",
        }
    }
}

impl TryFrom<u8> for DownloadFormat {
    type Error = AppError;

    fn try_from(index: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .get(usize::from(index))
            .copied()
            .ok_or_else(|| AppError::Validation(format!("Unknown download format index: {}", index)))
    }
}

impl fmt::Display for DownloadFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
