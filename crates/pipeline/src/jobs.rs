//! The two job kinds the service runs: mask synthesis and external
//! inference.
//!
//! Both work inside one directory per reference image,
//! `{work_root}/{group_dir}`, and mirror their artifacts to the object
//! store under the configured naming strategy's key prefix.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use inpaint_cloud::StoreGateway;
use inpaint_core::image_io::{ImageBuffer, ImageFetcher, CANONICAL_SIZE};
use inpaint_core::mask;
use inpaint_core::naming::{source_stem, OutputNaming};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use validator::Validate;

use crate::error::JobError;
use crate::executor::JobFuture;
use crate::inference::{InferenceEngine, InferenceRequest};

pub const DEFAULT_SEED: u64 = 321;
pub const DEFAULT_SCALE: f64 = 20.0;

const PNG: &str = "image/png";

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// Collaborators shared by every job.
#[derive(Clone)]
pub struct JobContext {
    pub fetcher: ImageFetcher,
    pub gateway: StoreGateway,
    pub engine: Arc<dyn InferenceEngine>,
    pub naming: Arc<dyn OutputNaming>,
    pub work_root: PathBuf,
    pub canonical_size: u32,
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("naming", &self.naming)
            .field("work_root", &self.work_root)
            .field("canonical_size", &self.canonical_size)
            .finish_non_exhaustive()
    }
}

impl JobContext {
    pub fn new(
        gateway: StoreGateway,
        engine: Arc<dyn InferenceEngine>,
        naming: Arc<dyn OutputNaming>,
        work_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            fetcher: ImageFetcher::new(),
            gateway,
            engine,
            naming,
            work_root: work_root.into(),
            canonical_size: CANONICAL_SIZE,
        }
    }

    /// Working directory for the group keyed by `reference_source`.
    pub fn group_dir(&self, reference_source: &str) -> PathBuf {
        self.work_root.join(self.naming.group_dir(reference_source))
    }

    async fn prepare_group_dir(&self, reference_source: &str) -> Result<PathBuf, JobError> {
        let dir = self.group_dir(reference_source);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| JobError::io(&dir, e))?;
        Ok(dir)
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

/// Payload of an inference job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct InferenceJobRequest {
    #[validate(length(min = 1, message = "image_path must not be empty"))]
    pub image_path: String,

    #[validate(length(min = 1, message = "mask_path must not be empty"))]
    pub mask_path: String,

    #[validate(length(min = 1, message = "reference_path must not be empty"))]
    pub reference_path: String,

    #[serde(default = "default_seed")]
    pub seed: u64,

    #[serde(default = "default_scale")]
    #[validate(range(exclusive_min = 0.0, message = "scale must be positive"))]
    pub scale: f64,
}

/// Payload of a mask job.
///
/// Also accepts the field names older clients send:
/// `processed_image_path` for `before_path` and `original_image_path` for
/// `after_path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct MaskRequest {
    #[serde(alias = "processed_image_path")]
    #[validate(length(min = 1, message = "before_path must not be empty"))]
    pub before_path: String,

    #[serde(alias = "original_image_path")]
    #[validate(length(min = 1, message = "after_path must not be empty"))]
    pub after_path: String,

    #[validate(length(min = 1, message = "reference_path must not be empty"))]
    pub reference_path: String,
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

fn default_scale() -> f64 {
    DEFAULT_SCALE
}

// ---------------------------------------------------------------------------
// Job constructors
// ---------------------------------------------------------------------------

pub fn inference_job(ctx: JobContext, request: InferenceJobRequest) -> JobFuture {
    Box::pin(async move { run_inference(&ctx, &request).await })
}

pub fn mask_job(ctx: JobContext, request: MaskRequest) -> JobFuture {
    Box::pin(async move { run_mask(&ctx, &request).await })
}

// ---------------------------------------------------------------------------
// Inference
// ---------------------------------------------------------------------------

/// Normalise the input triple, run the engine, and mirror the group
/// directory to the store.
///
/// Result: `{processed_image_path, s3_processed_image_path, s3_urls}`.
pub async fn run_inference(
    ctx: &JobContext,
    request: &InferenceJobRequest,
) -> Result<Value, JobError> {
    let group_dir = ctx.prepare_group_dir(&request.reference_path).await?;

    let (content, mask_image, reference) = tokio::try_join!(
        ctx.fetcher.fetch(&request.image_path),
        ctx.fetcher.fetch_grayscale(&request.mask_path),
        ctx.fetcher.fetch(&request.reference_path),
    )?;

    let stem = source_stem(&request.image_path);
    let engine_request = InferenceRequest {
        content: group_dir.join(format!("{stem}_temp.png")),
        mask: group_dir.join(format!("{stem}_mask_temp.png")),
        reference: group_dir.join(format!("{stem}_reference_temp.png")),
        seed: request.seed,
        scale: request.scale,
        output_dir: group_dir.clone(),
    };
    let temporaries = [
        engine_request.content.clone(),
        engine_request.mask.clone(),
        engine_request.reference.clone(),
    ];

    let written = write_pngs(
        vec![
            (content, engine_request.content.clone()),
            (mask_image, engine_request.mask.clone()),
            (reference, engine_request.reference.clone()),
        ],
        Some(ctx.canonical_size),
    )
    .await;

    let outputs = match written {
        Ok(()) => ctx.engine.run(&engine_request).await.map_err(JobError::from),
        Err(e) => Err(e),
    };
    remove_files(&temporaries).await;
    let outputs = outputs?;

    let processed = outputs
        .into_iter()
        .next()
        .unwrap_or_else(|| engine_request.expected_output());

    let prefix = ctx
        .naming
        .key_prefix(&request.image_path, &request.reference_path);
    let mut s3_urls = ctx.gateway.put_tree(&group_dir, &prefix).await?;

    // The tree upload tolerates per-file failures; the processed image
    // itself must reach the store.
    let processed_key = relative_key(&processed, &group_dir);
    let s3_processed_image_path = match s3_urls.get(&processed_key) {
        Some(url) => url.clone(),
        None => {
            let url = ctx
                .gateway
                .put_file(&processed, &format!("{prefix}{processed_key}"), PNG)
                .await?;
            s3_urls.insert(processed_key, url.clone());
            url
        }
    };

    Ok(json!({
        "processed_image_path": processed.display().to_string(),
        "s3_processed_image_path": s3_processed_image_path,
        "s3_urls": s3_urls,
    }))
}

// ---------------------------------------------------------------------------
// Mask
// ---------------------------------------------------------------------------

/// Synthesize the edit mask, save it as `mask_{before_stem}.png` in the
/// group directory, and upload it.
///
/// Result: `{mask_path, s3_mask_url}`.
pub async fn run_mask(ctx: &JobContext, request: &MaskRequest) -> Result<Value, JobError> {
    let group_dir = ctx.prepare_group_dir(&request.reference_path).await?;

    let (before, after) = tokio::try_join!(
        ctx.fetcher.fetch(&request.before_path),
        ctx.fetcher.fetch(&request.after_path),
    )?;

    let result = tokio::task::spawn_blocking(move || mask::synthesize(&before, &after)).await?;

    let file_name = format!("mask_{}.png", source_stem(&request.before_path));
    let mask_path = group_dir.join(&file_name);
    write_pngs(vec![(result.into_buffer(), mask_path.clone())], None).await?;

    let key = format!(
        "{}{}/{file_name}",
        ctx.naming.key_prefix(&request.after_path, &request.reference_path),
        ctx.naming.group_dir(&request.reference_path),
    );
    let s3_mask_url = ctx.gateway.put_file(&mask_path, &key, PNG).await?;

    Ok(json!({
        "mask_path": mask_path.display().to_string(),
        "s3_mask_url": s3_mask_url,
    }))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Save `images` as PNGs on the blocking pool, resampling each to a
/// `size` x `size` square first when one is given.
async fn write_pngs(
    images: Vec<(ImageBuffer, PathBuf)>,
    size: Option<u32>,
) -> Result<(), JobError> {
    tokio::task::spawn_blocking(move || {
        images.iter().try_for_each(|(image, path)| match size {
            Some(size) => image.normalized(size).save_png(path),
            None => image.save_png(path),
        })
    })
    .await??;
    Ok(())
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove temporary file");
            }
        }
    }
}

/// `path` relative to `root` with forward slashes, or its file name when it
/// lies outside `root`.
fn relative_key(path: &Path, root: &Path) -> String {
    match path.strip_prefix(root) {
        Ok(relative) => relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
        Err(_) => path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
