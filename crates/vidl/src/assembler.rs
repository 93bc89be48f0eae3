//! Ordered concatenation of downloaded segments into the output file.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::scheduler::DownloadResult;

#[derive(Debug, Clone)]
pub struct AssemblyOptions {
    pub output: PathBuf,
    /// Missing or failed segments tolerated before assembly is refused.
    pub max_failed_segments: usize,
    /// ffmpeg binary used to stream-copy into the output container.
    pub ffmpeg: Option<PathBuf>,
    /// Container the concatenated segments are in (`ts`, `mp4`, ...), if known.
    pub source_container: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyReport {
    pub output: PathBuf,
    pub bytes: u64,
    pub segments_written: usize,
    pub segments_missing: usize,
    pub remuxed: bool,
}

/// `<output>.part`, next to the output.
pub fn part_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    name.push(".part");
    output.with_file_name(name)
}

fn output_extension(output: &Path) -> Option<String> {
    output
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

/// Writes successful segments in sequence order to the output path.
///
/// `scheduled` is the number of segments that were handed to the scheduler;
/// anything not present as a success counts against the tolerance.
/// `init_sections` maps init section ids to their downloaded files.
pub async fn assemble(
    results: &[DownloadResult],
    scheduled: usize,
    init_sections: &HashMap<usize, PathBuf>,
    options: &AssemblyOptions,
) -> Result<AssemblyReport, DownloadError> {
    let mut ordered: Vec<&DownloadResult> = results.iter().filter(|r| r.is_success()).collect();
    ordered.sort_by_key(|r| r.descriptor.index);

    let missing = scheduled.saturating_sub(ordered.len());
    if missing > options.max_failed_segments {
        return Err(DownloadError::assembly(format!(
            "{missing} of {scheduled} segments missing, tolerance is {}",
            options.max_failed_segments
        )));
    }
    if ordered.is_empty() {
        return Err(DownloadError::assembly("no segments were downloaded"));
    }
    if missing > 0 {
        warn!(
            missing,
            scheduled, "Assembling partial output within failure tolerance"
        );
    }

    for result in &ordered {
        if !tokio::fs::try_exists(&result.path).await? {
            return Err(DownloadError::assembly(format!(
                "cache file for segment {} is missing: {}",
                result.descriptor.index,
                result.path.display()
            )));
        }
    }

    if let Some(parent) = options.output.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent).await?;
    }

    let part = part_path(&options.output);
    let bytes = concatenate(&ordered, init_sections, &part).await?;

    let wants_remux = match (&options.ffmpeg, output_extension(&options.output), &options.source_container) {
        (Some(_), Some(out_ext), Some(src)) => &out_ext != src,
        _ => false,
    };

    let remuxed = if wants_remux {
        let ffmpeg = options.ffmpeg.as_deref().unwrap_or(Path::new("ffmpeg"));
        remux(ffmpeg, &part, &options.output).await?;
        let _ = tokio::fs::remove_file(&part).await;
        true
    } else {
        replace(&part, &options.output).await?;
        false
    };

    let size = tokio::fs::metadata(&options.output)
        .await
        .map(|m| m.len())
        .unwrap_or(bytes);
    info!(
        output = %options.output.display(),
        segments = ordered.len(),
        bytes = size,
        remuxed,
        "Output assembled"
    );

    Ok(AssemblyReport {
        output: options.output.clone(),
        bytes: size,
        segments_written: ordered.len(),
        segments_missing: missing,
        remuxed,
    })
}

async fn concatenate(
    ordered: &[&DownloadResult],
    init_sections: &HashMap<usize, PathBuf>,
    part: &Path,
) -> Result<u64, DownloadError> {
    let mut writer = BufWriter::new(File::create(part).await?);
    let mut written = 0u64;
    let mut current_init: Option<usize> = None;

    for result in ordered {
        if let Some(init) = &result.descriptor.init
            && current_init != Some(init.id)
        {
            let path = init_sections.get(&init.id).ok_or_else(|| {
                DownloadError::assembly(format!("init section {} was not downloaded", init.id))
            })?;
            written += append(&mut writer, path).await?;
            current_init = Some(init.id);
            debug!(init = init.id, before = result.descriptor.index, "Wrote init section");
        }
        written += append(&mut writer, &result.path).await?;
    }

    writer.flush().await?;
    writer.into_inner().sync_all().await?;
    Ok(written)
}

async fn append(writer: &mut BufWriter<File>, path: &Path) -> Result<u64, DownloadError> {
    let mut file = File::open(path).await?;
    Ok(tokio::io::copy(&mut file, writer).await?)
}

async fn replace(from: &Path, to: &Path) -> Result<(), DownloadError> {
    if tokio::fs::try_exists(to).await? {
        tokio::fs::remove_file(to).await?;
    }
    tokio::fs::rename(from, to).await?;
    Ok(())
}

/// Stream-copies `input` into the container implied by `output`'s extension.
async fn remux(ffmpeg: &Path, input: &Path, output: &Path) -> Result<(), DownloadError> {
    let mut staged_name = output
        .file_stem()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("output"));
    staged_name.push(".remux.");
    staged_name.push(output.extension().unwrap_or_default());
    let staged = output.with_file_name(staged_name);

    debug!(ffmpeg = %ffmpeg.display(), input = %input.display(), output = %staged.display(), "Remuxing");
    let status = Command::new(ffmpeg)
        .arg("-y")
        .args(["-hide_banner", "-loglevel", "error"])
        .arg("-i")
        .arg(input)
        .args(["-c", "copy"])
        .arg(&staged)
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|e| {
            DownloadError::assembly(format!("failed to run {}: {e}", ffmpeg.display()))
        })?;

    if !status.success() {
        let _ = tokio::fs::remove_file(&staged).await;
        return Err(DownloadError::assembly(format!(
            "ffmpeg exited with {status}"
        )));
    }
    replace(&staged, output).await
}
