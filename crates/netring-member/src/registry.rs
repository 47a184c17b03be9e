use std::time::Duration;

use reqwest::StatusCode;

use netring_common::{
    DeregisterRequest, HeartbeatRequest, MemberRecord, MembersResponse, MetricsSnapshot,
    RegisterRequest, RegisterResponse, ReportMetricsRequest,
};

#[derive(thiserror::Error, Debug)]
pub enum RegistryError {
    #[error("member not known to registry")]
    NotFound,
    #[error("member deregistered by registry")]
    Gone,
    #[error("registry returned status {0}")]
    Status(StatusCode),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

impl RegistryError {
    /// NotFound/Gone mean the registry disagrees about our membership;
    /// the registration maintainer must run again.
    pub fn needs_reregistration(&self) -> bool {
        matches!(self, RegistryError::NotFound | RegistryError::Gone)
    }
}

/// Deadline for routine control-plane calls; deregister carries its own
/// shorter one.
const CONTROL_TIMEOUT: Duration = Duration::from_secs(10);

/// Thin client over the registry HTTP API. Shares the member's single
/// pooled HTTP client.
#[derive(Clone)]
pub struct RegistryClient {
    base: String,
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new(url: &str, http: reqwest::Client) -> Self {
        Self {
            base: url.trim_end_matches('/').to_string(),
            http,
        }
    }

    pub async fn register(&self, req: &RegisterRequest) -> Result<RegisterResponse, RegistryError> {
        let resp = self
            .http
            .post(format!("{}/register", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(req)
            .send()
            .await?;
        Ok(check(resp)?.json().await?)
    }

    pub async fn heartbeat(&self, instance_id: &str) -> Result<(), RegistryError> {
        let resp = self
            .http
            .post(format!("{}/heartbeat", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(&HeartbeatRequest {
                instance_id: instance_id.to_string(),
            })
            .send()
            .await?;
        check(resp)?;
        Ok(())
    }

    /// Best-effort shutdown notice with its own short deadline.
    pub async fn deregister(&self, instance_id: &str, timeout: Duration) -> Result<(), RegistryError> {
        let resp = self
            .http
            .post(format!("{}/deregister", self.base))
            .timeout(timeout)
            .json(&DeregisterRequest {
                instance_id: instance_id.to_string(),
            })
            .send()
            .await?;
        check(resp)?;
        Ok(())
    }

    pub async fn fetch_members(&self) -> Result<Vec<MemberRecord>, RegistryError> {
        let resp = self
            .http
            .get(format!("{}/members", self.base))
            .timeout(CONTROL_TIMEOUT)
            .send()
            .await?;
        let body: MembersResponse = check(resp)?.json().await?;
        Ok(body.members)
    }

    pub async fn report_metrics(
        &self,
        instance_id: &str,
        snapshot: &MetricsSnapshot,
    ) -> Result<(), RegistryError> {
        let snapshot = serde_json::to_value(snapshot)
            .map_err(|_| RegistryError::Status(StatusCode::BAD_REQUEST))?;
        let resp = self
            .http
            .post(format!("{}/report_metrics", self.base))
            .timeout(CONTROL_TIMEOUT)
            .json(&ReportMetricsRequest {
                instance_id: instance_id.to_string(),
                snapshot,
            })
            .send()
            .await?;
        check(resp)?;
        Ok(())
    }
}

fn check(resp: reqwest::Response) -> Result<reqwest::Response, RegistryError> {
    match resp.status() {
        StatusCode::NOT_FOUND => Err(RegistryError::NotFound),
        StatusCode::GONE => Err(RegistryError::Gone),
        status if !status.is_success() => Err(RegistryError::Status(status)),
        _ => Ok(resp),
    }
}
