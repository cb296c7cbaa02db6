//! Packages a build directory and drives the runtime image build.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use cradle_runtime::{BuildEvent, ContainerRuntime, RuntimeError};
use futures_util::StreamExt;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Outcome of a successful build.
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub image_tag: String,
    pub image_id: String,
    /// Number of progress lines the runtime reported.
    pub progress_lines: usize,
}

/// Builds workload images through a [`ContainerRuntime`].
#[derive(Clone)]
pub struct ImageBuilder {
    runtime: Arc<dyn ContainerRuntime>,
}

impl ImageBuilder {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    /// Build `context_dir` into an image tagged `image_tag`.
    ///
    /// The diagnostic stream is always drained to its end. On any error the
    /// tag must be treated as unusable, even if some layers were built.
    pub async fn build(&self, context_dir: &Path, image_tag: &str) -> OrchestratorResult<BuildReport> {
        let failed = |reason: String| OrchestratorError::BuildFailed {
            image: image_tag.to_string(),
            reason,
        };

        let dir = context_dir.to_path_buf();
        let context = tokio::task::spawn_blocking(move || pack_context(&dir))
            .await
            .map_err(|e| failed(format!("context packaging task failed: {e}")))?
            .map_err(|e| failed(format!("cannot package build context: {e}")))?;

        info!(image = %image_tag, context_bytes = context.len(), "building image");

        let mut stream = self.runtime.build_image(context, image_tag);
        let mut received = 0usize;
        let mut progress_lines = 0usize;
        let mut image_id = None;
        let mut build_error: Option<String> = None;

        while let Some(item) = stream.next().await {
            received += 1;
            match item {
                Ok(BuildEvent::Progress(line)) => {
                    progress_lines += 1;
                    debug!(image = %image_tag, "{line}");
                }
                Ok(BuildEvent::Other) => {}
                Ok(BuildEvent::Error(message)) => {
                    warn!(image = %image_tag, %message, "build step failed");
                    build_error.get_or_insert(message);
                }
                Ok(BuildEvent::Built { image_id: id }) => {
                    image_id = Some(id);
                }
                Err(RuntimeError::Unavailable(reason)) if received == 1 => {
                    return Err(OrchestratorError::RuntimeUnavailable {
                        operation: "build",
                        reason,
                    });
                }
                Err(e) => {
                    // The transport is broken; nothing more will arrive.
                    build_error.get_or_insert(format!("build stream aborted: {e}"));
                    break;
                }
            }
        }

        if let Some(reason) = build_error {
            return Err(failed(reason));
        }
        let image_id = image_id
            .ok_or_else(|| failed("build stream ended without a success signal".to_string()))?;

        info!(image = %image_tag, %image_id, progress_lines, "image built");
        Ok(BuildReport {
            image_tag: image_tag.to_string(),
            image_id,
            progress_lines,
        })
    }
}

/// Tar `dir` (uncompressed) with paths relative to it.
///
/// The template's `.git` directory is not part of the build context.
pub(crate) fn pack_context(dir: &Path) -> std::io::Result<Bytes> {
    if !dir.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        ));
    }

    let mut builder = tar::Builder::new(Vec::new());
    builder.follow_symlinks(false);

    let walker = WalkDir::new(dir)
        .min_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"));

    for entry in walker {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative: PathBuf = entry
            .path()
            .strip_prefix(dir)
            .map_err(std::io::Error::other)?
            .to_path_buf();
        if entry.file_type().is_dir() {
            builder.append_dir(&relative, entry.path())?;
        } else {
            builder.append_path_with_name(entry.path(), &relative)?;
        }
    }

    Ok(Bytes::from(builder.into_inner()?))
}
