//! Client for the external controller that owns per-workload settings and
//! tracks which container currently serves each workload.

use std::collections::BTreeMap;

use cradle_core::WorkloadIdentity;
use cradle_core::config::ControllerConfig;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

const TOKEN_HEADER: &str = "X-Token";

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("controller request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    #[error("controller returned HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("controller response from {url} is not a string map: {reason}")]
    Decode { url: String, reason: String },
}

#[derive(Serialize)]
struct ContainerReport<'a> {
    system_user_name: &'a str,
    bot_name: &'a str,
    container_id: &'a str,
}

#[derive(Clone)]
pub struct ControllerClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl ControllerClient {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            http: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        }
    }

    /// `None` when no controller URL is configured.
    pub fn from_config(config: &ControllerConfig) -> Option<Self> {
        config
            .url
            .as_deref()
            .filter(|url| !url.is_empty())
            .map(|url| Self::new(url, config.access_token.clone()))
    }

    fn with_token(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header(TOKEN_HEADER, self.token.as_deref().unwrap_or_default())
    }

    /// Extra environment variables configured for a workload.
    pub async fn fetch_env(
        &self,
        identity: &WorkloadIdentity,
    ) -> Result<BTreeMap<String, String>, ControllerError> {
        let url = format!(
            "{}/customers/get-bot-config/{}/{}",
            self.base_url,
            identity.customer(),
            identity.workload()
        );
        debug!(%identity, %url, "fetching workload config");

        let response = self
            .with_token(self.http.get(&url))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| ControllerError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| ControllerError::Request {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_slice(&body).map_err(|e| ControllerError::Decode {
            url,
            reason: e.to_string(),
        })
    }

    /// Tell the controller which container now serves `identity`.
    pub async fn report_container(
        &self,
        identity: &WorkloadIdentity,
        container_id: &str,
    ) -> Result<(), ControllerError> {
        let url = format!("{}/customers/set-bot-container-id", self.base_url);
        let report = ContainerReport {
            system_user_name: identity.customer(),
            bot_name: identity.workload(),
            container_id,
        };

        let response = self
            .with_token(self.http.post(&url))
            .json(&report)
            .send()
            .await
            .map_err(|e| ControllerError::Request {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ControllerError::Status {
                url,
                status: status.as_u16(),
            });
        }
        debug!(%identity, %container_id, "container reported to controller");
        Ok(())
    }
}
