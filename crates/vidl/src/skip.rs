//! Time ranges excluded from a download (`0-10,100-110`).

use std::str::FromStr;

use serde::Serialize;
use tracing::debug;

use crate::error::DownloadError;
use crate::manifest::SegmentDescriptor;

/// Tolerance, in seconds, when comparing segment bounds with range bounds.
pub const SKIP_TOLERANCE_SECS: f64 = 0.001;

/// A closed interval on the playlist timeline, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SkipRange {
    pub start: f64,
    pub end: f64,
}

impl SkipRange {
    pub fn new(start: f64, end: f64) -> Result<Self, DownloadError> {
        if !start.is_finite() || !end.is_finite() || start < 0.0 || end < start {
            return Err(DownloadError::configuration(format!(
                "invalid skip range {start}-{end}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `[start, end]` lies entirely inside this range.
    pub fn covers(&self, start: f64, end: f64) -> bool {
        start >= self.start - SKIP_TOLERANCE_SECS && end <= self.end + SKIP_TOLERANCE_SECS
    }
}

impl FromStr for SkipRange {
    type Err = DownloadError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || DownloadError::configuration(format!("invalid skip range `{s}`"));
        let (start, end) = s.trim().split_once('-').ok_or_else(invalid)?;
        let start: f64 = start.trim().parse().map_err(|_| invalid())?;
        let end: f64 = end.trim().parse().map_err(|_| invalid())?;
        SkipRange::new(start, end)
    }
}

/// Parses a comma-separated list and normalizes it.
///
/// Blank input yields no ranges.
pub fn parse_skip_ranges(input: &str) -> Result<Vec<SkipRange>, DownloadError> {
    let ranges = input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(SkipRange::from_str)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(normalize(ranges))
}

/// Sorts ranges and merges those that overlap or touch.
///
/// A segment spanning two adjacent ranges is then covered by their union.
pub fn normalize(mut ranges: Vec<SkipRange>) -> Vec<SkipRange> {
    ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut merged: Vec<SkipRange> = Vec::with_capacity(ranges.len());
    for range in ranges {
        match merged.last_mut() {
            Some(last) if range.start <= last.end + SKIP_TOLERANCE_SECS => {
                last.end = last.end.max(range.end);
            }
            _ => merged.push(range),
        }
    }
    merged
}

/// Drops every segment whose timeline interval lies inside one of `ranges`.
///
/// Returns the kept segments (original order preserved) and the number dropped.
pub fn apply_skip_ranges(
    segments: Vec<SegmentDescriptor>,
    ranges: &[SkipRange],
) -> (Vec<SegmentDescriptor>, usize) {
    if ranges.is_empty() {
        return (segments, 0);
    }
    let before = segments.len();
    let kept: Vec<SegmentDescriptor> = segments
        .into_iter()
        .filter(|seg| {
            let skipped = ranges
                .iter()
                .any(|r| r.covers(seg.start_time, seg.end_time()));
            if skipped {
                debug!(
                    index = seg.index,
                    start = seg.start_time,
                    end = seg.end_time(),
                    "Skipping segment inside skip range"
                );
            }
            !skipped
        })
        .collect();
    let dropped = before - kept.len();
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use url::Url;

    fn segments(durations: &[f64]) -> Vec<SegmentDescriptor> {
        let mut start = 0.0;
        durations
            .iter()
            .enumerate()
            .map(|(index, &duration)| {
                let url = Url::parse(&format!("https://cdn.example.com/{index}.ts")).unwrap();
                let mut seg = SegmentDescriptor::direct(index, url);
                seg.duration = duration;
                seg.start_time = start;
                start += duration;
                seg
            })
            .collect()
    }

    fn kept_indices(segments: &[SegmentDescriptor]) -> Vec<usize> {
        segments.iter().map(|s| s.index).collect()
    }

    #[test]
    fn test_parse_and_normalize() {
        let ranges = parse_skip_ranges(" 100-110, 0-10 ,5-12,,").unwrap();
        assert_eq!(
            ranges,
            vec![
                SkipRange {
                    start: 0.0,
                    end: 12.0
                },
                SkipRange {
                    start: 100.0,
                    end: 110.0
                }
            ]
        );
        assert!(parse_skip_ranges("").unwrap().is_empty());
        assert!(parse_skip_ranges("10").is_err());
        assert!(parse_skip_ranges("10-5").is_err());
        assert!(parse_skip_ranges("a-b").is_err());
    }

    #[test]
    fn test_only_fully_covered_segments_are_dropped() {
        // Timeline: [0,10] [10,20] [20,30] [30,40]
        let segs = segments(&[10.0, 10.0, 10.0, 10.0]);
        let ranges = parse_skip_ranges("20-30").unwrap();
        let (kept, dropped) = apply_skip_ranges(segs.clone(), &ranges);
        assert_eq!(kept_indices(&kept), vec![0, 1, 3]);
        assert_eq!(dropped, 1);

        // Partial overlap keeps the segment.
        let ranges = parse_skip_ranges("15-25").unwrap();
        let (kept, _) = apply_skip_ranges(segs, &ranges);
        assert_eq!(kept_indices(&kept), vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_tolerance_absorbs_float_drift() {
        let segs = segments(&[3.3, 3.3, 3.4]);
        // segment 1 spans [3.3, 6.6] with float drift
        let ranges = parse_skip_ranges("3.3-6.6").unwrap();
        let (kept, _) = apply_skip_ranges(segs, &ranges);
        assert_eq!(kept_indices(&kept), vec![0, 2]);
    }

    #[test]
    fn test_adjacent_ranges_cover_spanning_segment() {
        let segs = segments(&[10.0, 10.0]);
        let ranges = parse_skip_ranges("0-5,5-15").unwrap();
        let (kept, _) = apply_skip_ranges(segs, &ranges);
        assert_eq!(kept_indices(&kept), vec![1]);
    }

    proptest! {
        #[test]
        fn skip_filter_is_idempotent(
            durations in prop::collection::vec(0.5f64..12.0, 0..40),
            raw in prop::collection::vec((0.0f64..300.0, 0.0f64..60.0), 0..6),
        ) {
            let ranges = normalize(
                raw.iter()
                    .map(|&(start, len)| SkipRange { start, end: start + len })
                    .collect(),
            );
            let (once, _) = apply_skip_ranges(segments(&durations), &ranges);
            let (twice, dropped_again) = apply_skip_ranges(once.clone(), &ranges);
            prop_assert_eq!(kept_indices(&once), kept_indices(&twice));
            prop_assert_eq!(dropped_again, 0);
        }

        #[test]
        fn normalized_ranges_are_sorted_and_disjoint(
            raw in prop::collection::vec((0.0f64..300.0, 0.0f64..60.0), 0..10),
        ) {
            let ranges = normalize(
                raw.iter()
                    .map(|&(start, len)| SkipRange { start, end: start + len })
                    .collect(),
            );
            for pair in ranges.windows(2) {
                prop_assert!(pair[0].end + SKIP_TOLERANCE_SECS < pair[1].start);
            }
            prop_assert_eq!(normalize(ranges.clone()), ranges);
        }
    }
}
