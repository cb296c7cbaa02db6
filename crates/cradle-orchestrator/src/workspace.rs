//! Identity-scoped build workspaces and the templates that seed them.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use cradle_core::WorkloadIdentity;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{OrchestratorError, OrchestratorResult};

/// Directory owned by one in-flight build for one identity.
#[derive(Debug)]
pub struct BuildWorkspace {
    path: PathBuf,
}

impl BuildWorkspace {
    /// Wipe and recreate `root/customer/workload`.
    pub fn prepare(root: &Path, identity: &WorkloadIdentity) -> OrchestratorResult<Self> {
        let path = identity.workspace_dir(root);
        if path.exists() {
            fs::remove_dir_all(&path).map_err(|e| {
                OrchestratorError::Workspace(format!("cannot clear {}: {e}", path.display()))
            })?;
        }
        fs::create_dir_all(&path).map_err(|e| {
            OrchestratorError::Workspace(format!("cannot create {}: {e}", path.display()))
        })?;
        debug!(%identity, path = ?path, "build workspace prepared");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Delete the workspace. Failures are logged, not returned.
    pub fn discard(self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = ?self.path, error = %e, "failed to discard build workspace");
        }
    }
}

/// Materializes the build template into an empty directory.
#[async_trait]
pub trait TemplateProvider: Send + Sync {
    async fn materialize(&self, dest: &Path) -> OrchestratorResult<()>;

    /// Short description for logs. Must not contain credentials.
    fn describe(&self) -> String;
}

/// Template copied from a local directory.
#[derive(Debug, Clone)]
pub struct LocalTemplate {
    path: PathBuf,
}

impl LocalTemplate {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TemplateProvider for LocalTemplate {
    async fn materialize(&self, dest: &Path) -> OrchestratorResult<()> {
        let src = self.path.clone();
        let dst = dest.to_path_buf();
        let copied = tokio::task::spawn_blocking(move || copy_tree(&src, &dst))
            .await
            .map_err(|e| OrchestratorError::Workspace(format!("template copy task failed: {e}")))??;
        debug!(template = %self.path.display(), files = copied, "template copied");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Copy `src` into `dst`, skipping the top-level `.git` directory.
fn copy_tree(src: &Path, dst: &Path) -> OrchestratorResult<usize> {
    let err = |msg: String| OrchestratorError::Workspace(msg);
    if !src.is_dir() {
        return Err(err(format!("template {} is not a directory", src.display())));
    }

    let mut files = 0;
    let walker = WalkDir::new(src)
        .min_depth(1)
        .into_iter()
        .filter_entry(|e| !(e.depth() == 1 && e.file_name() == ".git"));
    for entry in walker {
        let entry = entry.map_err(|e| err(format!("cannot read template: {e}")))?;
        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| err(e.to_string()))?;
        let target = dst.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)
                .map_err(|e| err(format!("cannot create {}: {e}", target.display())))?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)
                .map_err(|e| err(format!("cannot copy {}: {e}", relative.display())))?;
            files += 1;
        } else {
            debug!(path = %relative.display(), "skipping non-regular template entry");
        }
    }
    Ok(files)
}

/// Template fetched with a shallow `git clone`.
#[derive(Clone)]
pub struct GitTemplate {
    url: String,
    reference: String,
    token: Option<String>,
}

impl GitTemplate {
    pub fn new(url: impl Into<String>, reference: impl Into<String>, token: Option<String>) -> Self {
        Self {
            url: url.into(),
            reference: reference.into(),
            token: token.filter(|t| !t.is_empty()),
        }
    }

    /// URL handed to git, with the access token embedded for https remotes.
    fn authenticated_url(&self) -> String {
        match (&self.token, self.url.strip_prefix("https://")) {
            (Some(token), Some(rest)) => format!("https://x-access-token:{token}@{rest}"),
            _ => self.url.clone(),
        }
    }
}

impl std::fmt::Debug for GitTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTemplate")
            .field("url", &self.url)
            .field("reference", &self.reference)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

#[async_trait]
impl TemplateProvider for GitTemplate {
    async fn materialize(&self, dest: &Path) -> OrchestratorResult<()> {
        info!(url = %self.url, reference = %self.reference, "cloning build template");

        let output = tokio::process::Command::new("git")
            .arg("clone")
            .args(["--depth", "1", "--branch", &self.reference])
            .arg(self.authenticated_url())
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| OrchestratorError::Workspace(format!("cannot run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = match &self.token {
                Some(token) => stderr.replace(token.as_str(), "<redacted>"),
                None => stderr.into_owned(),
            };
            return Err(OrchestratorError::Workspace(format!(
                "git clone of {} ({}) failed: {}",
                self.url,
                self.reference,
                stderr.trim()
            )));
        }
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}@{}", self.url, self.reference)
    }
}
