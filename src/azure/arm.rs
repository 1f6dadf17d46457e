//! # ARM Client
//!
//! REST client for Azure Resource Manager.
//!
//! Holds the HTTP client, the token credential and a cached bearer token.
//! Every request is timed and recorded in the Azure operation metrics; a
//! `404` on a read surfaces as `None` so callers can tell "absent" apart
//! from "failed".

use crate::azure::{
    AzureError, Deployment, DeploymentParameters, DeploymentRequest, DeploymentsClient,
    ProvisioningState,
};
use crate::config::ControllerConfig;
use crate::constants::ARM_SCOPE;
use crate::observability::metrics;
use async_trait::async_trait;
use azure_core::credentials::TokenCredential;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{debug, info};
use typespec_client_core::time::{Duration, OffsetDateTime};

const DEPLOYMENTS_API_VERSION: &str = "2021-04-01";
pub(super) const COMPUTE_API_VERSION: &str = "2023-09-01";
pub(super) const SKUS_API_VERSION: &str = "2021-07-01";

/// Tokens closer to expiry than this are refreshed before use
const TOKEN_REFRESH_MARGIN_SECS: i64 = 300;

struct CachedToken {
    secret: String,
    expires_on: OffsetDateTime,
}

/// Azure Resource Manager client for one subscription
pub struct ArmClient {
    http: reqwest::Client,
    endpoint: String,
    subscription_id: String,
    credential: Arc<dyn TokenCredential>,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for ArmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArmClient")
            .field("endpoint", &self.endpoint)
            .field("subscription_id", &self.subscription_id)
            .finish_non_exhaustive()
    }
}

impl ArmClient {
    /// Create a client for `subscription_id` against `endpoint`
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(
        endpoint: &str,
        subscription_id: &str,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, AzureError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        let endpoint = endpoint.trim_end_matches('/').to_string();
        info!(endpoint = %endpoint, "Azure Resource Manager endpoint");
        Ok(Self {
            http,
            endpoint,
            subscription_id: subscription_id.to_string(),
            credential,
            token: Mutex::new(None),
        })
    }

    /// Create a client from the operator configuration
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn from_config(
        config: &ControllerConfig,
        credential: Arc<dyn TokenCredential>,
    ) -> Result<Self, AzureError> {
        Self::new(&config.arm_endpoint, &config.subscription_id, credential)
    }

    /// Bearer token for ARM, refreshed when close to expiry
    async fn bearer(&self) -> Result<String, AzureError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_on - Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)
                > OffsetDateTime::now_utc()
            {
                return Ok(token.secret.clone());
            }
        }

        debug!("Acquiring Azure Resource Manager token");
        let fresh = self
            .credential
            .get_token(&[ARM_SCOPE], None)
            .await
            .map_err(|e| AzureError::Credential(e.to_string()))?;
        let secret = fresh.token.secret().to_string();
        *cached = Some(CachedToken {
            secret: secret.clone(),
            expires_on: fresh.expires_on,
        });
        Ok(secret)
    }

    /// URL of a resource inside a resource group
    pub(super) fn resource_url(
        &self,
        resource_group: &str,
        provider_path: &str,
        api_version: &str,
    ) -> String {
        format!(
            "{}/subscriptions/{}/resourceGroups/{}/providers/{}?api-version={}",
            self.endpoint, self.subscription_id, resource_group, provider_path, api_version
        )
    }

    /// URL of a subscription-level resource
    pub(super) fn subscription_url(&self, provider_path: &str, query: &str) -> String {
        format!(
            "{}/subscriptions/{}/providers/{}?{}",
            self.endpoint, self.subscription_id, provider_path, query
        )
    }

    /// Send a request; `Ok(None)` on 404
    pub(super) async fn send(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<reqwest::Response>, AzureError> {
        let start = Instant::now();
        let result = self.send_inner(operation, method, url, body).await;
        metrics::record_azure_operation(operation, start.elapsed().as_secs_f64(), result.is_ok());
        result
    }

    async fn send_inner(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<Option<reqwest::Response>, AzureError> {
        let token = self.bearer().await?;
        let mut request = self.http.request(method, url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            debug!(operation, "Azure resource not found");
            return Ok(None);
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(AzureError::Http {
                operation: operation.to_string(),
                status: status.as_u16(),
                message,
            });
        }
        Ok(Some(response))
    }

    /// GET and decode; `Ok(None)` on 404
    pub(super) async fn get_json<T: DeserializeOwned>(
        &self,
        operation: &str,
        url: &str,
    ) -> Result<Option<T>, AzureError> {
        match self.send(operation, Method::GET, url, None).await? {
            Some(response) => response
                .json::<T>()
                .await
                .map(Some)
                .map_err(|e| AzureError::Decode {
                    operation: operation.to_string(),
                    message: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    /// Mutating call on a resource that must exist
    pub(super) async fn execute(
        &self,
        operation: &str,
        method: Method,
        url: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<(), AzureError> {
        match self.send(operation, method, url, body).await? {
            Some(_) => Ok(()),
            None => Err(AzureError::NotFound {
                resource: operation.to_string(),
            }),
        }
    }

    /// DELETE where an absent resource counts as deleted
    pub(super) async fn delete_resource(&self, operation: &str, url: &str) -> Result<(), AzureError> {
        self.send(operation, Method::DELETE, url, None).await?;
        Ok(())
    }

    fn deployment_url(&self, resource_group: &str, name: &str) -> String {
        self.resource_url(
            resource_group,
            &format!("Microsoft.Resources/deployments/{name}"),
            DEPLOYMENTS_API_VERSION,
        )
    }
}

#[derive(Debug, Deserialize)]
struct ArmDeployment {
    name: String,
    properties: ArmDeploymentProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmDeploymentProperties {
    provisioning_state: String,
    #[serde(default)]
    parameters: serde_json::Value,
}

impl From<ArmDeployment> for Deployment {
    fn from(raw: ArmDeployment) -> Self {
        Self {
            name: raw.name,
            provisioning_state: ProvisioningState::parse(&raw.properties.provisioning_state),
            parameters: DeploymentParameters::from_arm(&raw.properties.parameters),
        }
    }
}

#[async_trait]
impl DeploymentsClient for ArmClient {
    async fn get(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Option<Deployment>, AzureError> {
        let url = self.deployment_url(resource_group, name);
        let raw: Option<ArmDeployment> = self.get_json("get_deployment", &url).await?;
        Ok(raw.map(Deployment::from))
    }

    async fn create_or_update(
        &self,
        resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
    ) -> Result<(), AzureError> {
        let url = self.deployment_url(resource_group, name);
        let body = serde_json::json!({
            "properties": {
                "mode": "Incremental",
                "template": request.template,
                "parameters": request.parameters.to_arm(),
            }
        });
        info!(resource_group, deployment = name, "Submitting ARM deployment");
        self.send("put_deployment", Method::PUT, &url, Some(&body))
            .await?
            .ok_or_else(|| AzureError::NotFound {
                resource: format!("resource group {resource_group}"),
            })?;
        Ok(())
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError> {
        let url = self.deployment_url(resource_group, name);
        self.delete_resource("delete_deployment", &url).await
    }
}
