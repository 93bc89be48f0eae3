use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use url::Url;

use crate::error::DownloadError;

/// A resolved byte range: `length` bytes starting at `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ByteRange {
    pub offset: u64,
    pub length: u64,
}

impl ByteRange {
    /// Rejects ranges whose end does not fit in a `u64`.
    pub fn new(offset: u64, length: u64) -> Result<Self, DownloadError> {
        if offset.checked_add(length).is_none() {
            return Err(DownloadError::parse(format!(
                "byte range {length}@{offset} overflows"
            )));
        }
        Ok(Self { offset, length })
    }

    /// Offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.offset.saturating_add(self.length)
    }

    /// Value for the HTTP `Range` header.
    pub fn header_value(&self) -> String {
        format!(
            "bytes={}-{}",
            self.offset,
            self.end().saturating_sub(1).max(self.offset)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionMethod {
    /// Whole-segment AES-128 in CBC mode with PKCS#7 padding.
    Aes128,
}

/// Decryption parameters attached to a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyInfo {
    pub method: EncryptionMethod,
    pub uri: Url,
    /// Explicit IV from the key tag.
    pub iv: Option<[u8; 16]>,
}

impl KeyInfo {
    /// The IV for a segment: the explicit one, or the media sequence number
    /// as a big-endian 128-bit integer.
    pub fn iv_for(&self, media_sequence: u64) -> [u8; 16] {
        self.iv
            .unwrap_or_else(|| u128::from(media_sequence).to_be_bytes())
    }
}

/// Media initialization section (`EXT-X-MAP`) shared by subsequent segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSection {
    /// Position of this section among the distinct sections of the playlist.
    pub id: usize,
    pub uri: Url,
    pub byte_range: Option<ByteRange>,
}

/// One unit of download work.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentDescriptor {
    /// Position in the final output. Assembly order is defined by this alone.
    pub index: usize,
    pub url: Url,
    pub byte_range: Option<ByteRange>,
    pub key: Option<KeyInfo>,
    pub init: Option<InitSection>,
    /// Duration hint in seconds.
    pub duration: f64,
    /// Offset of this segment on the playlist timeline, in seconds.
    pub start_time: f64,
    pub media_sequence: u64,
    pub discontinuity: bool,
}

impl SegmentDescriptor {
    /// A whole-file descriptor for direct downloads.
    pub fn direct(index: usize, url: Url) -> Self {
        Self {
            index,
            url,
            byte_range: None,
            key: None,
            init: None,
            duration: 0.0,
            start_time: 0.0,
            media_sequence: index as u64,
            discontinuity: false,
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// The media playlist a job ends up downloading.
#[derive(Debug, Clone)]
pub struct MediaManifest {
    /// URL the media playlist was loaded from, after variant selection.
    pub url: Url,
    pub segments: Vec<SegmentDescriptor>,
    pub end_list: bool,
}

impl MediaManifest {
    pub fn total_duration(&self) -> f64 {
        self.segments.iter().map(|s| s.duration).sum()
    }

    /// Distinct init sections in order of first use.
    pub fn init_sections(&self) -> Vec<InitSection> {
        let mut sections: Vec<InitSection> = Vec::new();
        for init in self.segments.iter().filter_map(|s| s.init.as_ref()) {
            if !sections.iter().any(|known| known.id == init.id) {
                sections.push(init.clone());
            }
        }
        sections
    }
}

/// One rendition listed by a master playlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantInfo {
    pub uri: Url,
    pub bandwidth: u64,
    pub resolution: Option<(u64, u64)>,
    pub is_i_frame: bool,
}

/// How a rendition is picked from a master playlist.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub enum VariantSelectionPolicy {
    #[default]
    HighestBitrate,
    LowestBitrate,
    /// Variant whose bandwidth is closest to the given bits per second.
    ClosestToBitrate(u64),
    MatchingResolution {
        width: u64,
        height: u64,
    },
}

impl FromStr for VariantSelectionPolicy {
    type Err = DownloadError;

    /// Accepts `highest`, `lowest`, `bitrate=N` and `WIDTHxHEIGHT`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim().to_ascii_lowercase();
        match value.as_str() {
            "highest" | "best" => return Ok(Self::HighestBitrate),
            "lowest" | "worst" => return Ok(Self::LowestBitrate),
            _ => {}
        }
        if let Some(bps) = value.strip_prefix("bitrate=") {
            return bps
                .parse()
                .map(Self::ClosestToBitrate)
                .map_err(|_| DownloadError::configuration(format!("invalid bitrate `{bps}`")));
        }
        if let Some((w, h)) = value.split_once('x')
            && let (Ok(width), Ok(height)) = (w.parse(), h.parse())
        {
            return Ok(Self::MatchingResolution { width, height });
        }
        Err(DownloadError::configuration(format!(
            "invalid variant policy `{s}` (expected highest, lowest, bitrate=N or WIDTHxHEIGHT)"
        )))
    }
}

impl TryFrom<String> for VariantSelectionPolicy {
    type Error = DownloadError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl fmt::Display for VariantSelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HighestBitrate => f.write_str("highest"),
            Self::LowestBitrate => f.write_str("lowest"),
            Self::ClosestToBitrate(bps) => write!(f, "bitrate={bps}"),
            Self::MatchingResolution { width, height } => write!(f, "{width}x{height}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iv_defaults_to_media_sequence() {
        let key = KeyInfo {
            method: EncryptionMethod::Aes128,
            uri: Url::parse("https://example.com/key").unwrap(),
            iv: None,
        };
        let iv = key.iv_for(7);
        assert_eq!(iv[..15], [0u8; 15]);
        assert_eq!(iv[15], 7);

        let explicit = KeyInfo {
            iv: Some([1; 16]),
            ..key
        };
        assert_eq!(explicit.iv_for(7), [1; 16]);
    }

    #[test]
    fn test_byte_range_header() {
        let range = ByteRange {
            offset: 100,
            length: 50,
        };
        assert_eq!(range.header_value(), "bytes=100-149");
        assert_eq!(range.end(), 150);
        assert_eq!(ByteRange::new(100, 50).unwrap(), range);
        assert!(ByteRange::new(u64::MAX, 1).is_err());
    }

    #[test]
    fn test_variant_policy_parsing() {
        assert_eq!(
            "highest".parse::<VariantSelectionPolicy>().unwrap(),
            VariantSelectionPolicy::HighestBitrate
        );
        assert_eq!(
            "bitrate=1500000".parse::<VariantSelectionPolicy>().unwrap(),
            VariantSelectionPolicy::ClosestToBitrate(1_500_000)
        );
        assert_eq!(
            "1280X720".parse::<VariantSelectionPolicy>().unwrap(),
            VariantSelectionPolicy::MatchingResolution {
                width: 1280,
                height: 720
            }
        );
        assert!("medium".parse::<VariantSelectionPolicy>().is_err());
    }
}
