//! Batch report: one row per source file with its detected code.
//!
//! Chosen detections win, then the first remaining non-rejected,
//! non-ambiguous detection per filename; failed images emit the literal
//! code `failed`. Rows sort by filename.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, ValueEnum};

use shelfscan_model::{DetectionRecord, ImageStatus};
use shelfscan_worker::WorkerContext;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ReportFormat {
    Csv,
    Markdown,
}

#[derive(Args, Debug)]
pub struct ReportArgs {
    /// Batch to report on.
    #[arg(long)]
    pub batch_id: String,

    /// Output format.
    #[arg(long, value_enum, default_value_t = ReportFormat::Csv)]
    pub format: ReportFormat,

    /// Output file; stdout when omitted.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

pub async fn run(ctx: &WorkerContext, args: ReportArgs) -> Result<()> {
    let rows = report_rows(ctx, &args.batch_id).await?;
    if rows.is_empty() {
        bail!("no data found for batch: {}", args.batch_id);
    }

    let content = match args.format {
        ReportFormat::Csv => format_csv(&rows)?,
        ReportFormat::Markdown => format_markdown(&rows),
    };

    match args.output {
        Some(path) => {
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("writing {}", path.display()))?;
            println!("Report written to: {}", path.display());
        }
        None => print!("{content}"),
    }
    Ok(())
}

/// `(source_filename, code)` pairs, ordered by filename.
async fn report_rows(ctx: &WorkerContext, batch_id: &str) -> Result<Vec<(String, String)>> {
    let detections = ctx.store.detections().find_by_batch(batch_id).await?;
    let mut rows: BTreeMap<String, String> = BTreeMap::new();

    let reportable = |d: &DetectionRecord| !d.rejected && !d.ambiguous;
    // Chosen detections take precedence over merely-valid ones.
    for detection in detections.iter().filter(|d| d.chosen) {
        if let Some(filename) = &detection.source_filename {
            rows.entry(filename.clone())
                .or_insert_with(|| detection.code.clone());
        }
    }
    for detection in detections.iter().filter(|d| reportable(d)) {
        if let Some(filename) = &detection.source_filename {
            rows.entry(filename.clone())
                .or_insert_with(|| detection.code.clone());
        }
    }

    let failed = ctx
        .store
        .images()
        .find_by_status(ImageStatus::Failed, 10_000, Some(batch_id))
        .await?;
    for image in failed {
        if let Some(filename) = image.source_filename {
            rows.entry(filename).or_insert_with(|| "failed".to_string());
        }
    }

    Ok(rows.into_iter().collect())
}

fn format_csv(rows: &[(String, String)]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(["source_filename", "code"])?;
    for (filename, code) in rows {
        writer.write_record([filename, code])?;
    }
    let bytes = writer.into_inner().context("flushing csv")?;
    Ok(String::from_utf8(bytes).context("csv is not utf-8")?)
}

fn format_markdown(rows: &[(String, String)]) -> String {
    let mut lines = vec![
        "| source_filename | code |".to_string(),
        "|-----------------|------|".to_string(),
    ];
    for (filename, code) in rows {
        lines.push(format!("| {filename} | {code} |"));
    }
    lines.join("\n") + "\n"
}
