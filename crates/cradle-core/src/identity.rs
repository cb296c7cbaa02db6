//! Workload identity and the runtime names derived from it.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::error::{CoreError, CoreResult};

/// Longest accepted customer or workload name.
pub const MAX_NAME_LEN: usize = 128;

/// Tag applied to every workload image.
pub const IMAGE_TAG_SUFFIX: &str = "latest";

/// Shortest accepted workload name; the engine rejects one-character
/// container names.
pub const MIN_WORKLOAD_LEN: usize = 2;

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("static name pattern")
});

/// Image repository path component. Every match is also a valid container
/// name, so the workload maps 1:1 onto both.
static WORKLOAD_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9]+(?:(?:[._]|__|-+)[a-z0-9]+)*$").expect("static workload pattern")
});

/// The (customer, workload) pair identifying one deployable unit.
///
/// Both parts are validated on construction so they can be used verbatim as
/// container names and filesystem path segments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct WorkloadIdentity {
    customer: String,
    workload: String,
}

impl WorkloadIdentity {
    pub fn new(customer: impl Into<String>, workload: impl Into<String>) -> CoreResult<Self> {
        let customer = customer.into();
        let workload = workload.into();
        validate_name("customer", &customer)?;
        validate_name("workload", &workload)?;
        validate_workload(&workload)?;
        Ok(Self { customer, workload })
    }

    pub fn customer(&self) -> &str {
        &self.customer
    }

    pub fn workload(&self) -> &str {
        &self.workload
    }

    /// Name of the single container allowed for this identity.
    pub fn container_name(&self) -> &str {
        &self.workload
    }

    /// Image tag built for this identity.
    pub fn image_tag(&self) -> String {
        format!("{}:{IMAGE_TAG_SUFFIX}", self.workload)
    }

    /// Identity-scoped build workspace under `root`.
    pub fn workspace_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.customer).join(&self.workload)
    }

    /// Key used to serialize operations on this identity's container.
    ///
    /// Containers are named by workload alone, so identities of different
    /// customers sharing a workload name share the key.
    pub fn key(&self) -> String {
        format!("container:{}", self.container_name())
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.customer, self.workload)
    }
}

fn validate_name(kind: &str, value: &str) -> CoreResult<()> {
    if value.is_empty() {
        return Err(CoreError::InvalidIdentity(format!("{kind} name is empty")));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(CoreError::InvalidIdentity(format!(
            "{kind} name exceeds {MAX_NAME_LEN} characters"
        )));
    }
    if !NAME_PATTERN.is_match(value) {
        return Err(CoreError::InvalidIdentity(format!(
            "{kind} name {value:?} must match [A-Za-z0-9][A-Za-z0-9_.-]*"
        )));
    }
    Ok(())
}

fn validate_workload(value: &str) -> CoreResult<()> {
    if value.len() < MIN_WORKLOAD_LEN {
        return Err(CoreError::InvalidIdentity(format!(
            "workload name {value:?} is shorter than {MIN_WORKLOAD_LEN} characters"
        )));
    }
    if !WORKLOAD_PATTERN.is_match(value) {
        return Err(CoreError::InvalidIdentity(format!(
            "workload name {value:?} must be lowercase alphanumerics joined by single '.' or '_', '__', or runs of '-'"
        )));
    }
    Ok(())
}
