//! Streaming resolution caps.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Named cap on the shorter edge of a transcoded stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreamingResolution {
    /// 240p
    Low,
    /// 480p
    Standard,
    /// 720p
    StandardHd,
    /// 1080p
    FullHd,
    /// 2160p
    FourK,
    /// Source resolution, no cap
    #[default]
    Original,
}

impl StreamingResolution {
    /// All labels, smallest first.
    pub const ALL: [StreamingResolution; 6] = [
        StreamingResolution::Low,
        StreamingResolution::Standard,
        StreamingResolution::StandardHd,
        StreamingResolution::FullHd,
        StreamingResolution::FourK,
        StreamingResolution::Original,
    ];

    /// Returns the cap in pixels, or 0 for no cap.
    pub fn max_resolution(self) -> u32 {
        match self {
            StreamingResolution::Low => 240,
            StreamingResolution::Standard => 480,
            StreamingResolution::StandardHd => 720,
            StreamingResolution::FullHd => 1080,
            StreamingResolution::FourK => 2160,
            StreamingResolution::Original => 0,
        }
    }

    /// Returns the label used in configuration and query strings.
    pub fn as_str(self) -> &'static str {
        match self {
            StreamingResolution::Low => "LOW",
            StreamingResolution::Standard => "STANDARD",
            StreamingResolution::StandardHd => "STANDARD_HD",
            StreamingResolution::FullHd => "FULL_HD",
            StreamingResolution::FourK => "FOUR_K",
            StreamingResolution::Original => "ORIGINAL",
        }
    }
}

impl fmt::Display for StreamingResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StreamingResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|resolution| resolution.as_str() == label)
            .ok_or_else(|| format!("Invalid streaming resolution: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_parse_case_insensitively() {
        assert_eq!("full_hd".parse(), Ok(StreamingResolution::FullHd));
        assert_eq!(" LOW ".parse(), Ok(StreamingResolution::Low));
        assert!("1080p".parse::<StreamingResolution>().is_err());
    }

    #[test]
    fn test_caps() {
        assert_eq!(StreamingResolution::Standard.max_resolution(), 480);
        assert_eq!(StreamingResolution::FourK.max_resolution(), 2160);
        assert_eq!(StreamingResolution::default().max_resolution(), 0);
    }

    #[test]
    fn test_serde_uses_labels() {
        let json = serde_json::to_string(&StreamingResolution::StandardHd).unwrap();
        assert_eq!(json, "\"STANDARD_HD\"");
        let parsed: StreamingResolution = serde_json::from_str("\"FOUR_K\"").unwrap();
        assert_eq!(parsed, StreamingResolution::FourK);
    }
}
