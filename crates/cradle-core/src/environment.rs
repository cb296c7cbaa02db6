//! The environment contract injected into every workload container.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{DiagnosticsConfig, StreamConfig};
use crate::error::{CoreError, CoreResult};
use crate::identity::WorkloadIdentity;

pub const NATS_URL: &str = "NATS_URL";
pub const EVENTS_STREAM_NAME: &str = "EVENTS_STREAM_NAME";
pub const FINDINGS_STREAM_NAME: &str = "FINDINGS_STREAM_NAME";
pub const CUSTOMER_NAME: &str = "CUSTOMER_NAME";
pub const BOT_NAME: &str = "BOT_NAME";
pub const SENTRY_DSN: &str = "SENTRY_DSN";

/// Complete set of variables for one workload container.
///
/// Only constructible through [`EnvironmentContract::build`], which refuses
/// to produce a partial contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentContract {
    vars: BTreeMap<String, String>,
}

impl EnvironmentContract {
    /// Assemble the contract from explicit configuration and the identity.
    ///
    /// `extra` holds per-workload variables (e.g. fetched from the
    /// controller). Contract keys always win over extras of the same name.
    pub fn build(
        stream: &StreamConfig,
        diagnostics: &DiagnosticsConfig,
        identity: &WorkloadIdentity,
        extra: &BTreeMap<String, String>,
    ) -> CoreResult<Self> {
        require(NATS_URL, &stream.bus_url)?;
        require(EVENTS_STREAM_NAME, &stream.events_stream)?;
        require(FINDINGS_STREAM_NAME, &stream.findings_stream)?;

        let mut vars = BTreeMap::new();
        for (key, value) in extra {
            if key.is_empty() || key.contains('=') {
                return Err(CoreError::IncompleteEnvironment(format!(
                    "invalid variable name {key:?}"
                )));
            }
            vars.insert(key.clone(), value.clone());
        }

        vars.insert(NATS_URL.to_string(), stream.bus_url.clone());
        vars.insert(EVENTS_STREAM_NAME.to_string(), stream.events_stream.clone());
        vars.insert(FINDINGS_STREAM_NAME.to_string(), stream.findings_stream.clone());
        vars.insert(CUSTOMER_NAME.to_string(), identity.customer().to_string());
        vars.insert(BOT_NAME.to_string(), identity.workload().to_string());
        match diagnostics.dsn.as_deref() {
            Some(dsn) if !dsn.is_empty() => {
                vars.insert(SENTRY_DSN.to_string(), dsn.to_string());
            }
            _ => {
                vars.remove(SENTRY_DSN);
            }
        }

        Ok(Self { vars })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Render as `KEY=VALUE` strings, sorted by key.
    pub fn to_env_vars(&self) -> Vec<String> {
        self.vars.iter().map(|(k, v)| format!("{k}={v}")).collect()
    }
}

fn require(key: &str, value: &str) -> CoreResult<()> {
    if value.trim().is_empty() {
        return Err(CoreError::IncompleteEnvironment(format!("{key} is empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream() -> StreamConfig {
        StreamConfig {
            bus_url: "nats://x:4222".to_string(),
            events_stream: "events".to_string(),
            findings_stream: "findings".to_string(),
        }
    }

    fn identity() -> WorkloadIdentity {
        WorkloadIdentity::new("acme", "bot1").unwrap()
    }

    #[test]
    fn renders_full_contract_sorted() {
        let diagnostics = DiagnosticsConfig {
            dsn: Some("https://key@sentry.example/1".to_string()),
        };
        let env = EnvironmentContract::build(&stream(), &diagnostics, &identity(), &BTreeMap::new())
            .unwrap();

        assert_eq!(
            env.to_env_vars(),
            vec![
                "BOT_NAME=bot1",
                "CUSTOMER_NAME=acme",
                "EVENTS_STREAM_NAME=events",
                "FINDINGS_STREAM_NAME=findings",
                "NATS_URL=nats://x:4222",
                "SENTRY_DSN=https://key@sentry.example/1",
            ]
        );
    }

    #[test]
    fn omits_unset_diagnostics() {
        let env = EnvironmentContract::build(
            &stream(),
            &DiagnosticsConfig::default(),
            &identity(),
            &BTreeMap::new(),
        )
        .unwrap();
        assert!(env.get(SENTRY_DSN).is_none());
        assert_eq!(env.get(NATS_URL), Some("nats://x:4222"));
    }

    #[test]
    fn contract_keys_override_extras() {
        let mut extra = BTreeMap::new();
        extra.insert("BOT_NAME".to_string(), "spoofed".to_string());
        extra.insert("SENTRY_DSN".to_string(), "spoofed".to_string());
        extra.insert("RPC_URL".to_string(), "https://rpc.example".to_string());

        let env =
            EnvironmentContract::build(&stream(), &DiagnosticsConfig::default(), &identity(), &extra)
                .unwrap();
        assert_eq!(env.get(BOT_NAME), Some("bot1"));
        assert_eq!(env.get("RPC_URL"), Some("https://rpc.example"));
        assert!(env.get(SENTRY_DSN).is_none());
    }

    #[test]
    fn refuses_partial_contract() {
        let mut s = stream();
        s.findings_stream = "  ".to_string();
        let err = EnvironmentContract::build(&s, &DiagnosticsConfig::default(), &identity(), &BTreeMap::new())
            .unwrap_err();
        assert!(err.to_string().contains(FINDINGS_STREAM_NAME));
    }

    #[test]
    fn rejects_malformed_extra_keys() {
        let mut extra = BTreeMap::new();
        extra.insert("A=B".to_string(), "x".to_string());
        let result =
            EnvironmentContract::build(&stream(), &DiagnosticsConfig::default(), &identity(), &extra);
        assert!(matches!(result, Err(CoreError::IncompleteEnvironment(_))));
    }
}
