//! Output naming strategies.
//!
//! Decide where a job's local artifacts live and which remote key prefix
//! they are mirrored under. The strategy is pluggable so deployments whose
//! upload pipeline embeds extra tokens in file names can choose how the
//! content name is recovered.

use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;

/// Fallback stem for sources whose path has no usable file name.
const DEFAULT_STEM: &str = "image";

/// Strategy for deriving group directories and remote key prefixes.
pub trait OutputNaming: Send + Sync + fmt::Debug {
    /// Directory (relative to the work root) holding one input group's
    /// temporaries and results.
    fn group_dir(&self, reference_source: &str) -> String {
        format!("{}_results", source_stem(reference_source))
    }

    /// File name identifying the content image in remote keys.
    fn content_name(&self, content_source: &str) -> String;

    /// Remote key prefix (always ends with `/`).
    ///
    /// `{group_dir}/{content_name}-diffusion-results/`
    fn key_prefix(&self, content_source: &str, reference_source: &str) -> String {
        format!(
            "{}/{}-diffusion-results/",
            self.group_dir(reference_source),
            self.content_name(content_source),
        )
    }
}

/// Uses the content source's file name as-is.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileNameNaming;

impl OutputNaming for FileNameNaming {
    fn content_name(&self, content_source: &str) -> String {
        source_file_name(content_source)
    }
}

/// Keeps only the text after the last `-` of the content source.
///
/// Matches upload pipelines that store objects as `{timestamp}-{name}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HyphenSuffixNaming;

impl OutputNaming for HyphenSuffixNaming {
    fn content_name(&self, content_source: &str) -> String {
        let name = source_file_name(content_source);
        name.rsplit('-').next().unwrap_or(&name).to_string()
    }
}

/// Resolve a strategy by its configuration name.
///
/// - `file-name` (alias `reference`): [`FileNameNaming`]
/// - `hyphen-suffix`: [`HyphenSuffixNaming`]
pub fn naming_from_name(name: &str) -> Result<Arc<dyn OutputNaming>, CoreError> {
    match name {
        "file-name" | "reference" => Ok(Arc::new(FileNameNaming)),
        "hyphen-suffix" => Ok(Arc::new(HyphenSuffixNaming)),
        other => Err(CoreError::Validation(format!(
            "Unknown output naming '{other}'. Must be one of: file-name, hyphen-suffix"
        ))),
    }
}

/// Last path segment of a URL or filesystem path, ignoring any query or
/// fragment. Falls back to `"image"` when empty.
pub fn source_file_name(source: &str) -> String {
    let path = source
        .split(['?', '#'])
        .next()
        .unwrap_or(source)
        .trim_end_matches(['/', '\\']);
    let name = path.rsplit(['/', '\\']).next().unwrap_or(path);
    if name.is_empty() {
        DEFAULT_STEM.to_string()
    } else {
        name.to_string()
    }
}

/// [`source_file_name`] without its extension.
pub fn source_stem(source: &str) -> String {
    let name = source_file_name(source);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}
