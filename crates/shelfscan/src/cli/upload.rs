//! Upload images into a batch: blob to incoming/, pending record per file.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::Args;
use tracing::warn;
use walkdir::WalkDir;

use shelfscan_model::{paths, ImageRecord};
use shelfscan_worker::WorkerContext;

const SUPPORTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "bmp", "webp"];

#[derive(Args, Debug)]
pub struct UploadArgs {
    /// Batch identifier for this upload session.
    #[arg(long)]
    pub batch_id: String,

    /// Source directory (or single file) containing images.
    #[arg(long)]
    pub source: PathBuf,

    /// Prefix for external IDs.
    #[arg(long, default_value = "")]
    pub prefix: String,

    /// Recursively search subdirectories.
    #[arg(long)]
    pub recursive: bool,

    /// Show what would be uploaded without uploading.
    #[arg(long)]
    pub dry_run: bool,

    /// Skip files already present in this batch (by filename).
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub skip_duplicates: bool,
}

pub async fn run(ctx: &WorkerContext, args: UploadArgs) -> Result<()> {
    let files = find_images(&args.source, args.recursive)?;
    if files.is_empty() {
        bail!("no images found in {}", args.source.display());
    }
    println!("Found {} images", files.len());

    if args.dry_run {
        println!("[dry run] would upload:");
        for file in files.iter().take(10) {
            println!("  - {}", file_name(file));
        }
        if files.len() > 10 {
            println!("  ... and {} more", files.len() - 10);
        }
        return Ok(());
    }

    let mut uploaded = 0usize;
    let mut skipped = 0usize;
    let mut failed = 0usize;

    for file in &files {
        let filename = file_name(file);
        if args.skip_duplicates {
            let existing = ctx
                .store
                .images()
                .get_by_source_filename(&args.batch_id, &filename)
                .await?;
            if existing.is_some() {
                skipped += 1;
                continue;
            }
        }

        match upload_one(ctx, &args, file).await {
            Ok(()) => uploaded += 1,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "failed to upload image");
                failed += 1;
            }
        }
    }

    println!("Upload complete");
    println!("  uploaded: {uploaded}");
    println!("  skipped (duplicates): {skipped}");
    println!("  failed: {failed}");
    if uploaded > 0 {
        println!(
            "\nImages are queued under batch '{}'; run the dispatcher and workers to process them.",
            args.batch_id
        );
    }
    if failed > 0 {
        bail!("{failed} uploads failed");
    }
    Ok(())
}

async fn upload_one(ctx: &WorkerContext, args: &UploadArgs, file: &Path) -> Result<()> {
    let data = tokio::fs::read(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let extension = file
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("jpg")
        .to_ascii_lowercase();
    let filename = file_name(file);
    let stem = file
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(&filename)
        .to_string();

    let mut image = ImageRecord::new(&args.batch_id, String::new());
    image.source_path = paths::incoming(&args.batch_id, &image.image_id, &extension);
    image.source_filename = Some(filename.clone());
    image.external_id = Some(format!("{}{}", args.prefix, stem));
    image.content_type = content_type(&extension).to_string();
    image.file_size_bytes = Some(data.len() as i64);

    let metadata = [
        ("batch_id".to_string(), args.batch_id.clone()),
        ("image_id".to_string(), image.image_id.clone()),
        ("original_filename".to_string(), filename),
    ]
    .into_iter()
    .collect();

    ctx.blobs
        .put(&image.source_path, &data, &image.content_type, Some(&metadata))
        .await
        .context("uploading blob")?;
    ctx.store.images().create(&image).await?;
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}

fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn find_images(source: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if source.is_file() {
        if !is_supported(source) {
            bail!("{} is not a supported image file", source.display());
        }
        return Ok(vec![source.to_path_buf()]);
    }
    if !source.is_dir() {
        bail!("source does not exist: {}", source.display());
    }

    let mut found = BTreeSet::new();
    let max_depth = if recursive { usize::MAX } else { 1 };
    for entry in WalkDir::new(source).max_depth(max_depth) {
        let entry = entry.context("walking source directory")?;
        if entry.file_type().is_file() && is_supported(entry.path()) {
            found.insert(entry.path().to_path_buf());
        }
    }
    Ok(found.into_iter().collect())
}

fn content_type(extension: &str) -> &'static str {
    match extension {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}
