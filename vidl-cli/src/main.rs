use std::process;
use std::time::Duration;

use clap::Parser;
use indicatif::{HumanBytes, ProgressStyle};
use tracing::{Instrument, Level, Span, error, info, info_span, warn};
use tracing_indicatif::IndicatifLayer;
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};
use vidl::cli::Args;
use vidl::config;
use vidl::error::{AppError, Result};
use vidl::output;
use vidl_engine::{DownloadProgress, Job, JobResult, JobRunner};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const PROGRESS_TICK: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let json = args.json;

    match run(args).await {
        Ok(result) if result.is_success() => {}
        Ok(_) => process::exit(1),
        Err(e) => {
            if json {
                let error_json = serde_json::json!({
                    "status": "error",
                    "message": e.to_string(),
                });
                println!("{error_json}");
            } else {
                eprintln!("Error: {e}");
            }
            process::exit(2);
        }
    }
}

async fn run(args: Args) -> Result<JobResult> {
    init_logging(args.verbose, args.quiet)?;

    let file_config = config::load(args.config.as_deref())?;
    let job = Job::resolve(config::merge(file_config, &args)?)?;
    info!(
        url = %job.source,
        output = %job.output.display(),
        mode = job.mode.as_str(),
        "Starting download"
    );

    let runner = JobRunner::new(job);
    let token = runner.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling download");
            token.cancel();
        }
    });

    let progress_span = info_span!("download");
    progress_span.pb_set_style(&progress_style());
    let ticker = tokio::spawn(track_progress(progress_span.clone(), runner.progress()));

    let result = runner.run().instrument(progress_span.clone()).await;
    ticker.abort();
    drop(progress_span);

    if let Some(failure) = &result.error {
        error!(kind = ?failure.kind, "{}", failure.message);
    }
    let rendered = output::render(&result, args.json)?;
    if args.json {
        println!("{rendered}");
    } else {
        eprint!("{rendered}");
    }
    Ok(result)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} segments {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("=> ")
}

async fn track_progress(span: Span, progress: DownloadProgress) {
    let mut interval = tokio::time::interval(PROGRESS_TICK);
    loop {
        interval.tick().await;
        let snapshot = progress.snapshot();
        span.pb_set_length(snapshot.total as u64);
        span.pb_set_position((snapshot.completed + snapshot.failed) as u64);
        let message = if snapshot.failed > 0 {
            format!("{} ({} failed)", HumanBytes(snapshot.bytes), snapshot.failed)
        } else {
            HumanBytes(snapshot.bytes).to_string()
        };
        span.pb_set_message(&message);
    }
}

fn init_logging(verbose: bool, quiet: bool) -> Result<()> {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    let indicatif_layer = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif_layer.get_stderr_writer()),
        )
        .with(indicatif_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))
}
