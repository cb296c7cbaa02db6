//! Request and response shapes shared by all runtime backends.

use std::collections::HashMap;
use std::pin::Pin;

use futures_util::Stream;

use crate::error::RuntimeResult;

/// Stream of build diagnostics returned by [`crate::ContainerRuntime::build_image`].
pub type BuildStream<'a> = Pin<Box<dyn Stream<Item = RuntimeResult<BuildEvent>> + Send + 'a>>;

/// One element of a build diagnostic stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildEvent {
    /// A human-readable progress line.
    Progress(String),
    /// An element carrying nothing worth surfacing (status pings, etc.).
    Other,
    /// The build failed; the message is the runtime's diagnostic.
    Error(String),
    /// Explicit success signal with the built image ID.
    Built { image_id: String },
}

/// Everything needed to create a container. Containers are always created
/// with the on-failure restart policy.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `KEY=VALUE` strings.
    pub env: Vec<String>,
    pub network: String,
    pub labels: HashMap<String, String>,
}

/// A container as reported by a list call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSummary {
    pub id: String,
    /// Names as reported by the engine, each with a leading `/`.
    pub names: Vec<String>,
    pub image: String,
    pub labels: HashMap<String, String>,
}

impl ContainerSummary {
    /// Exact, case-sensitive match against a container name.
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/') == Some(name))
    }
}

/// A container as reported by an inspect call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerDetails {
    pub id: String,
    /// Name without the leading `/`.
    pub name: String,
    pub image: String,
    /// The engine's native state string (`running`, `exited`, ...).
    pub state: String,
    pub labels: HashMap<String, String>,
    pub env: Vec<String>,
}

impl ContainerDetails {
    pub fn env_var(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|kv| {
            kv.split_once('=')
                .filter(|(k, _)| *k == key)
                .map(|(_, v)| v)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_match_is_exact_and_case_sensitive() {
        let summary = ContainerSummary {
            id: "abc".to_string(),
            names: vec!["/bot1".to_string()],
            image: "bot1:latest".to_string(),
            labels: HashMap::new(),
        };
        assert!(summary.has_name("bot1"));
        assert!(!summary.has_name("Bot1"));
        assert!(!summary.has_name("bot"));
        assert!(!summary.has_name("/bot1"));
    }

    #[test]
    fn env_var_lookup() {
        let details = ContainerDetails {
            id: "abc".to_string(),
            name: "bot1".to_string(),
            image: "bot1:latest".to_string(),
            state: "running".to_string(),
            labels: HashMap::new(),
            env: vec!["CUSTOMER_NAME=acme".to_string(), "URL=a=b".to_string()],
        };
        assert_eq!(details.env_var("CUSTOMER_NAME"), Some("acme"));
        assert_eq!(details.env_var("URL"), Some("a=b"));
        assert_eq!(details.env_var("MISSING"), None);
    }
}
