//! cradle.toml configuration parser.
//!
//! Values are read from the file first, then the process environment is
//! layered on top (the variable names are the ones the deployment scripts
//! already export: `NETWORK_NAME`, `NATS_URL`, `GITHUB_TOKEN`, ...).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CradleConfig {
    pub debug: bool,
    pub server: ServerConfig,
    pub runtime: RuntimeConfig,
    pub stream: StreamConfig,
    pub diagnostics: DiagnosticsConfig,
    pub workspace: WorkspaceConfig,
    pub template: TemplateConfig,
    pub controller: ControllerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5005,
            max_upload_bytes: 10 << 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Network every workload container is attached to.
    pub network: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            network: "sensority-labs".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub bus_url: String,
    pub events_stream: String,
    pub findings_stream: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            bus_url: "nats://nats:4222".to_string(),
            events_stream: "events".to_string(),
            findings_stream: "findings".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub dsn: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: PathBuf,
    /// Subdirectory of the build template that receives the workload source.
    pub workload_subdir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: std::env::temp_dir().join("cradle"),
            workload_subdir: "bot".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateConfig {
    pub git_url: Option<String>,
    pub reference: String,
    /// Local template directory; takes precedence over `git_url`.
    pub path: Option<PathBuf>,
    #[serde(skip_serializing)]
    pub token: Option<String>,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            git_url: None,
            reference: "main".to_string(),
            path: None,
            token: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub url: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
}

impl CradleConfig {
    pub fn from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Layer environment overrides on top of the parsed file.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`; tests pass a map.
    pub fn apply_env<F>(&mut self, lookup: F) -> CoreResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("DEBUG") {
            self.debug = v == "true" || v == "1";
        }
        if let Some(v) = get("PORT") {
            self.server.port = v
                .parse()
                .map_err(|_| CoreError::InvalidConfig(format!("PORT {v:?} is not a port number")))?;
        }
        if let Some(v) = get("NETWORK_NAME") {
            self.runtime.network = v;
        }
        if let Some(v) = get("NATS_URL") {
            self.stream.bus_url = v;
        }
        if let Some(v) = get("EVENTS_STREAM_NAME") {
            self.stream.events_stream = v;
        }
        if let Some(v) = get("FINDINGS_STREAM_NAME") {
            self.stream.findings_stream = v;
        }
        if let Some(v) = get("SENTRY_DSN") {
            self.diagnostics.dsn = Some(v);
        }
        if let Some(v) = get("GITHUB_TOKEN") {
            self.template.token = Some(v);
        }
        if let Some(v) = get("CORE_URL") {
            self.controller.url = Some(v);
        }
        if let Some(v) = get("API_ACCESS_TOKEN") {
            self.controller.access_token = Some(v);
        }
        if let Some(v) = get("CRADLE_WORKSPACE") {
            self.workspace.root = PathBuf::from(v);
        }
        Ok(())
    }

    /// Check the settings every deploy depends on.
    pub fn validate(&self) -> CoreResult<()> {
        if self.template.path.is_none() && self.template.git_url.is_none() {
            return Err(CoreError::InvalidConfig(
                "no build template: set [template].path or [template].git_url".to_string(),
            ));
        }
        if self.runtime.network.trim().is_empty() {
            return Err(CoreError::InvalidConfig("[runtime].network is empty".to_string()));
        }
        for (name, value) in [
            ("bus_url", &self.stream.bus_url),
            ("events_stream", &self.stream.events_stream),
            ("findings_stream", &self.stream.findings_stream),
        ] {
            if value.trim().is_empty() {
                return Err(CoreError::InvalidConfig(format!("[stream].{name} is empty")));
            }
        }
        let subdir = &self.workspace.workload_subdir;
        if subdir.is_empty() || subdir.contains(['/', '\\']) || subdir == "." || subdir == ".." {
            return Err(CoreError::InvalidConfig(format!(
                "[workspace].workload_subdir {subdir:?} must be a single path segment"
            )));
        }
        if self.server.max_upload_bytes == 0 {
            return Err(CoreError::InvalidConfig(
                "[server].max_upload_bytes must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
