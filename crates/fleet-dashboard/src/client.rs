//! Dashboard API client.
//!
//! [`ActionBatchApi`] and [`NetworkApi`] are the seams the orchestrator is
//! written against; [`HttpDashboardClient`] implements both over HTTPS.
//! This layer performs no retries: a transport failure is surfaced as
//! [`DashboardError::Transport`] and the caller decides whether repeating
//! the request could duplicate side effects.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument};

use crate::batch::{ActionBatch, BatchUpdate, NewActionBatch};
use crate::error::{DashboardError, DashboardResult};
use crate::network::{BlinkRequest, Network, NewNetwork, Organization};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.meraki.com/api/v0";

/// Header carrying the API key when [`AuthStyle::ApiKeyHeader`] is used.
pub const API_KEY_HEADER: &str = "X-Cisco-Meraki-API-Key";

/// Path of an organization's batch collection.
pub fn batches_path(org: &str) -> String {
    format!("/organizations/{}/actionBatches", org)
}

/// Path of a single batch.
pub fn batch_path(org: &str, batch_id: &str) -> String {
    format!("/organizations/{}/actionBatches/{}", org, batch_id)
}

/// Path of an organization's network collection.
pub fn networks_path(org: &str) -> String {
    format!("/organizations/{}/networks", org)
}

/// Path of a single network.
pub fn network_path(network_id: &str) -> String {
    format!("/networks/{}", network_id)
}

/// The four batch operations plus confirmation of a pending batch.
#[async_trait]
pub trait ActionBatchApi: Send + Sync {
    /// Submits a batch. Synchronous batches come back with a resolved status.
    async fn submit_batch(&self, org: &str, batch: &NewActionBatch)
    -> DashboardResult<ActionBatch>;

    /// Fetches one batch. Unknown ids yield [`DashboardError::NotFound`].
    async fn get_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch>;

    /// Lists the organization's batches.
    async fn list_batches(&self, org: &str) -> DashboardResult<Vec<ActionBatch>>;

    /// Deletes (cancels) a batch that has not run yet.
    async fn cancel_batch(&self, org: &str, batch_id: &str) -> DashboardResult<()>;

    /// Confirms a batch that was submitted unconfirmed.
    async fn confirm_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch>;
}

/// Organization and network endpoints used around the batches.
#[async_trait]
pub trait NetworkApi: Send + Sync {
    /// Lists organizations the API key can access.
    async fn list_organizations(&self) -> DashboardResult<Vec<Organization>>;

    /// Lists the networks of an organization.
    async fn list_networks(&self, org: &str) -> DashboardResult<Vec<Network>>;

    /// Creates a network outside of any batch.
    async fn create_network(&self, org: &str, network: &NewNetwork) -> DashboardResult<Network>;

    /// Enables or disables VLANs on a network's appliance.
    async fn set_vlans_enabled(&self, network_id: &str, enabled: bool) -> DashboardResult<()>;

    /// Deletes a network.
    async fn delete_network(&self, network_id: &str) -> DashboardResult<()>;

    /// Blinks a device's LEDs.
    async fn blink_device(
        &self,
        network_id: &str,
        serial: &str,
        request: &BlinkRequest,
    ) -> DashboardResult<()>;
}

/// Everything the orchestrator needs from the controller.
pub trait DashboardApi: ActionBatchApi + NetworkApi {}

impl<T: ActionBatchApi + NetworkApi + ?Sized> DashboardApi for T {}

/// How the API key is presented.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthStyle {
    /// `X-Cisco-Meraki-API-Key: <key>`
    #[default]
    ApiKeyHeader,
    /// `Authorization: Bearer <key>`
    Bearer,
}

/// Connection settings for [`HttpDashboardClient`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API root, e.g. `https://api.meraki.com/api/v0`
    pub base_url: String,
    /// API key
    pub api_key: String,
    /// Header style for the key
    pub auth_style: AuthStyle,
    /// Per-request timeout
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Creates a config for the default API root.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            auth_style: AuthStyle::default(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Overrides the API root.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Overrides the auth header style.
    pub fn with_auth_style(mut self, auth_style: AuthStyle) -> Self {
        self.auth_style = auth_style;
        self
    }

    /// Overrides the request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// reqwest-backed dashboard client.
#[derive(Debug, Clone)]
pub struct HttpDashboardClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    auth_style: AuthStyle,
}

impl HttpDashboardClient {
    /// Builds a client from its config.
    pub fn new(config: ClientConfig) -> DashboardResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(DashboardError::invalid_request("API key is empty"));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| DashboardError::transport("build http client", e.to_string()))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            auth_style: config.auth_style,
        })
    }

    /// API root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(ACCEPT, "application/json");
        match self.auth_style {
            AuthStyle::ApiKeyHeader => request.header(API_KEY_HEADER, &self.api_key),
            AuthStyle::Bearer => request.bearer_auth(&self.api_key),
        }
    }

    /// Sends a request and returns the raw body of a success response.
    async fn execute(
        &self,
        operation: &str,
        path: &str,
        request: RequestBuilder,
    ) -> DashboardResult<String> {
        let response = self
            .authorize(request)
            .send()
            .await
            .map_err(|e| DashboardError::transport(operation, e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| DashboardError::transport(operation, e.to_string()))?;

        debug!(operation, path, status = status.as_u16(), "dashboard response");

        if status == StatusCode::NOT_FOUND {
            return Err(DashboardError::not_found(path));
        }
        if !status.is_success() {
            return Err(DashboardError::rejection(status.as_u16(), body));
        }
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(operation: &str, body: &str) -> DashboardResult<T> {
        serde_json::from_str(body).map_err(|e| DashboardError::decode(operation, e.to_string()))
    }
}

#[async_trait]
impl ActionBatchApi for HttpDashboardClient {
    #[instrument(skip(self, batch), fields(actions = batch.len(), synchronous = batch.synchronous))]
    async fn submit_batch(
        &self,
        org: &str,
        batch: &NewActionBatch,
    ) -> DashboardResult<ActionBatch> {
        const OP: &str = "submit action batch";
        let path = batches_path(org);
        let body = self
            .execute(OP, &path, self.http.post(self.url(&path)).json(batch))
            .await?;
        Self::decode(OP, &body)
    }

    async fn get_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch> {
        const OP: &str = "get action batch";
        let path = batch_path(org, batch_id);
        let body = self.execute(OP, &path, self.http.get(self.url(&path))).await?;
        Self::decode(OP, &body)
    }

    async fn list_batches(&self, org: &str) -> DashboardResult<Vec<ActionBatch>> {
        const OP: &str = "list action batches";
        let path = batches_path(org);
        let body = self.execute(OP, &path, self.http.get(self.url(&path))).await?;
        Self::decode(OP, &body)
    }

    async fn cancel_batch(&self, org: &str, batch_id: &str) -> DashboardResult<()> {
        let path = batch_path(org, batch_id);
        self.execute("delete action batch", &path, self.http.delete(self.url(&path)))
            .await?;
        Ok(())
    }

    async fn confirm_batch(&self, org: &str, batch_id: &str) -> DashboardResult<ActionBatch> {
        const OP: &str = "confirm action batch";
        let path = batch_path(org, batch_id);
        let update = BatchUpdate {
            confirmed: true,
            synchronous: false,
        };
        let body = self
            .execute(OP, &path, self.http.put(self.url(&path)).json(&update))
            .await?;
        Self::decode(OP, &body)
    }
}

#[async_trait]
impl NetworkApi for HttpDashboardClient {
    async fn list_organizations(&self) -> DashboardResult<Vec<Organization>> {
        const OP: &str = "list organizations";
        let path = "/organizations";
        let body = self.execute(OP, path, self.http.get(self.url(path))).await?;
        Self::decode(OP, &body)
    }

    async fn list_networks(&self, org: &str) -> DashboardResult<Vec<Network>> {
        const OP: &str = "list networks";
        let path = networks_path(org);
        let body = self.execute(OP, &path, self.http.get(self.url(&path))).await?;
        Self::decode(OP, &body)
    }

    async fn create_network(&self, org: &str, network: &NewNetwork) -> DashboardResult<Network> {
        const OP: &str = "create network";
        let path = networks_path(org);
        let body = self
            .execute(OP, &path, self.http.post(self.url(&path)).json(network))
            .await?;
        Self::decode(OP, &body)
    }

    async fn set_vlans_enabled(&self, network_id: &str, enabled: bool) -> DashboardResult<()> {
        let path = format!("{}/vlansEnabledState", network_path(network_id));
        let payload = serde_json::json!({ "enabled": enabled });
        self.execute(
            "set VLANs enabled state",
            &path,
            self.http.put(self.url(&path)).json(&payload),
        )
        .await?;
        Ok(())
    }

    async fn delete_network(&self, network_id: &str) -> DashboardResult<()> {
        let path = network_path(network_id);
        self.execute("delete network", &path, self.http.delete(self.url(&path)))
            .await?;
        Ok(())
    }

    async fn blink_device(
        &self,
        network_id: &str,
        serial: &str,
        request: &BlinkRequest,
    ) -> DashboardResult<()> {
        let path = format!("{}/devices/{}/blinkLeds", network_path(network_id), serial);
        self.execute(
            "blink device LEDs",
            &path,
            self.http.post(self.url(&path)).json(request),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(batches_path("42"), "/organizations/42/actionBatches");
        assert_eq!(batch_path("42", "7"), "/organizations/42/actionBatches/7");
        assert_eq!(networks_path("42"), "/organizations/42/networks");
        assert_eq!(network_path("N_1"), "/networks/N_1");
    }

    #[test]
    fn test_client_rejects_empty_key() {
        let err = HttpDashboardClient::new(ClientConfig::new("  ")).unwrap_err();
        assert!(matches!(err, DashboardError::InvalidRequest { .. }));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let client =
            HttpDashboardClient::new(ClientConfig::new("key").with_base_url("http://localhost/api/"))
                .unwrap();
        assert_eq!(client.base_url(), "http://localhost/api");
        assert_eq!(client.url("/organizations"), "http://localhost/api/organizations");
    }

    #[test]
    fn test_auth_style_config_names() {
        let style: AuthStyle = serde_json::from_str("\"bearer\"").unwrap();
        assert_eq!(style, AuthStyle::Bearer);
        let style: AuthStyle = serde_json::from_str("\"api-key-header\"").unwrap();
        assert_eq!(style, AuthStyle::ApiKeyHeader);
    }
}
