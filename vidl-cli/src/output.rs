use indicatif::HumanBytes;
use vidl_engine::JobResult;

use crate::error::Result;

pub fn render(result: &JobResult, json: bool) -> Result<String> {
    if json {
        return Ok(serde_json::to_string_pretty(result)?);
    }
    Ok(render_text(result))
}

fn render_text(result: &JobResult) -> String {
    let mut out = String::new();
    if let Some(error) = &result.error {
        out.push_str(&format!("Download failed ({:?}): {}\n", error.kind, error.message));
        if result.successful_segments + result.failed_segments > 0 {
            out.push_str(&format!(
                "  segments: {} done, {} failed\n",
                result.successful_segments, result.failed_segments
            ));
        }
        return out;
    }

    let Some(output) = &result.output else {
        return out;
    };
    if result.skipped_existing {
        out.push_str(&format!(
            "{} already exists, skipped (use --force to overwrite)\n",
            output.display()
        ));
        return out;
    }

    out.push_str(&format!(
        "Saved {} ({})\n",
        output.display(),
        HumanBytes(result.total_bytes)
    ));
    if let Some(title) = &result.title {
        out.push_str(&format!("  title: {title}\n"));
    }
    out.push_str(&format!("  segments: {}", result.successful_segments));
    if result.failed_segments > 0 {
        out.push_str(&format!(", {} failed", result.failed_segments));
    }
    if result.skipped_segments > 0 {
        out.push_str(&format!(", {} skipped", result.skipped_segments));
    }
    out.push('\n');
    if result.remuxed {
        out.push_str("  remuxed with ffmpeg\n");
    }
    if let Some(warning) = &result.cleanup_warning {
        out.push_str(&format!("  warning: {warning}\n"));
    }
    out
}
