use m3u8_rs::{KeyMethod, MasterPlaylist, MediaPlaylist, Playlist, parse_playlist_res};
use tracing::{debug, warn};
use url::Url;

use super::model::{
    ByteRange, EncryptionMethod, InitSection, KeyInfo, MediaManifest, SegmentDescriptor,
    VariantInfo, VariantSelectionPolicy,
};
use crate::error::DownloadError;

/// Result of parsing one playlist document.
#[derive(Debug, Clone)]
pub enum ParsedPlaylist {
    Master(Vec<VariantInfo>),
    Media(MediaManifest),
}

/// Parses playlist bytes fetched from `base`.
///
/// Relative segment, key, map and variant URIs are resolved against `base`.
pub fn parse_playlist(bytes: &[u8], base: &Url) -> Result<ParsedPlaylist, DownloadError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| DownloadError::parse(format!("playlist is not valid UTF-8: {e}")))?;
    let text = text.trim_start_matches('\u{feff}').trim_start();
    if !text.starts_with("#EXTM3U") {
        return Err(DownloadError::parse("missing #EXTM3U header"));
    }

    match parse_playlist_res(text.as_bytes()) {
        Ok(Playlist::MasterPlaylist(pl)) => parse_master(&pl, base).map(ParsedPlaylist::Master),
        Ok(Playlist::MediaPlaylist(pl)) => parse_media(&pl, base).map(ParsedPlaylist::Media),
        Err(e) => Err(DownloadError::parse(format!("failed to parse playlist: {e}"))),
    }
}

fn join(base: &Url, uri: &str, what: &str) -> Result<Url, DownloadError> {
    base.join(uri.trim()).map_err(|e| {
        DownloadError::parse(format!("could not resolve {what} URI `{uri}` against {base}: {e}"))
    })
}

fn parse_master(pl: &MasterPlaylist, base: &Url) -> Result<Vec<VariantInfo>, DownloadError> {
    let variants = pl
        .variants
        .iter()
        .map(|v| {
            Ok(VariantInfo {
                uri: join(base, &v.uri, "variant")?,
                bandwidth: v.bandwidth,
                resolution: v.resolution.map(|r| (r.width, r.height)),
                is_i_frame: v.is_i_frame,
            })
        })
        .collect::<Result<Vec<_>, DownloadError>>()?;

    if variants.iter().all(|v| v.is_i_frame) {
        return Err(DownloadError::parse("master playlist has no playable variants"));
    }
    Ok(variants)
}

/// Parses an `EXT-X-KEY` IV attribute (`0x` + 32 hex digits).
fn parse_iv(iv_hex_str: &str) -> Result<[u8; 16], DownloadError> {
    let iv_str = iv_hex_str
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let mut iv_bytes = [0u8; 16];
    hex::decode_to_slice(iv_str, &mut iv_bytes)
        .map_err(|e| DownloadError::parse(format!("failed to parse IV '{iv_hex_str}': {e}")))?;
    Ok(iv_bytes)
}

fn parse_key(key: &m3u8_rs::Key, base: &Url) -> Result<Option<KeyInfo>, DownloadError> {
    match &key.method {
        KeyMethod::None => Ok(None),
        KeyMethod::AES128 => {
            let uri = key
                .uri
                .as_deref()
                .ok_or_else(|| DownloadError::parse("AES-128 key tag without URI"))?;
            Ok(Some(KeyInfo {
                method: EncryptionMethod::Aes128,
                uri: join(base, uri, "key")?,
                iv: key.iv.as_deref().map(parse_iv).transpose()?,
            }))
        }
        KeyMethod::SampleAES => Err(DownloadError::parse(
            "SAMPLE-AES encryption is not supported",
        )),
        KeyMethod::Other(method) => Err(DownloadError::parse(format!(
            "unsupported encryption method `{method}`"
        ))),
    }
}

fn resolve_range(
    range: &m3u8_rs::ByteRange,
    uri: &Url,
    previous: Option<&(Url, u64)>,
) -> Result<ByteRange, DownloadError> {
    let offset = range.offset.unwrap_or_else(|| match previous {
        Some((prev_uri, end)) if prev_uri == uri => *end,
        _ => 0,
    });
    ByteRange::new(offset, range.length)
}

fn parse_media(pl: &MediaPlaylist, base: &Url) -> Result<MediaManifest, DownloadError> {
    if pl.segments.is_empty() {
        return Err(DownloadError::parse("media playlist contains no segments"));
    }
    if !pl.end_list {
        warn!(url = %base, "Playlist has no EXT-X-ENDLIST; downloading the segments listed now");
    }

    let mut segments = Vec::with_capacity(pl.segments.len());
    let mut current_key: Option<KeyInfo> = None;
    let mut current_init: Option<InitSection> = None;
    let mut next_init_id = 0usize;
    // (uri, end offset) of the last ranged request, for offset continuation.
    let mut last_range: Option<(Url, u64)> = None;
    let mut timeline = 0.0f64;

    for (index, seg) in pl.segments.iter().enumerate() {
        if let Some(key) = &seg.key {
            current_key = parse_key(key, base)?;
        }

        if let Some(map) = &seg.map {
            let uri = join(base, &map.uri, "map")?;
            let byte_range = map
                .byte_range
                .as_ref()
                .map(|r| ByteRange::new(r.offset.unwrap_or(0), r.length))
                .transpose()?;
            let changed = current_init
                .as_ref()
                .is_none_or(|init| init.uri != uri || init.byte_range != byte_range);
            if changed {
                current_init = Some(InitSection {
                    id: next_init_id,
                    uri,
                    byte_range,
                });
                next_init_id += 1;
            }
        }

        let url = join(base, &seg.uri, "segment")?;
        let byte_range = match &seg.byte_range {
            Some(r) => {
                let resolved = resolve_range(r, &url, last_range.as_ref())?;
                last_range = Some((url.clone(), resolved.end()));
                Some(resolved)
            }
            None => None,
        };
        let media_sequence = pl.media_sequence.checked_add(index as u64).ok_or_else(|| {
            DownloadError::parse(format!(
                "media sequence {} overflows at segment {index}",
                pl.media_sequence
            ))
        })?;

        let duration = f64::from(seg.duration.max(0.0));
        segments.push(SegmentDescriptor {
            index,
            url,
            byte_range,
            key: current_key.clone(),
            init: current_init.clone(),
            duration,
            start_time: timeline,
            media_sequence,
            discontinuity: seg.discontinuity,
        });
        timeline += duration;
    }

    debug!(
        segments = segments.len(),
        duration_secs = timeline,
        encrypted = segments.iter().any(|s| s.key.is_some()),
        "Parsed media playlist"
    );

    Ok(MediaManifest {
        url: base.clone(),
        segments,
        end_list: pl.end_list,
    })
}

/// Picks one rendition. I-frame-only variants are never selected.
pub fn select_variant<'a>(
    variants: &'a [VariantInfo],
    policy: &VariantSelectionPolicy,
) -> Result<&'a VariantInfo, DownloadError> {
    let mut playable = variants.iter().filter(|v| !v.is_i_frame);
    let selected = match policy {
        VariantSelectionPolicy::HighestBitrate => playable.max_by_key(|v| v.bandwidth),
        VariantSelectionPolicy::LowestBitrate => playable.min_by_key(|v| v.bandwidth),
        VariantSelectionPolicy::ClosestToBitrate(target) => {
            playable.min_by_key(|v| v.bandwidth.abs_diff(*target))
        }
        VariantSelectionPolicy::MatchingResolution { width, height } => {
            playable.find(|v| v.resolution == Some((*width, *height)))
        }
    };
    selected.ok_or_else(|| DownloadError::parse(format!("no variant matches policy `{policy}`")))
}
