//! # Azure Credentials
//!
//! Selects the token credential used for Azure Resource Manager calls.
//!
//! Order of precedence:
//! 1. A static bearer token (`AZURE_ACCESS_TOKEN`), for local runs and tests
//! 2. Workload Identity when a client ID is configured
//! 3. Managed Identity

use crate::config::ControllerConfig;
use anyhow::{Context, Result};
use async_trait::async_trait;
use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_identity::{ManagedIdentityCredential, WorkloadIdentityCredential};
use std::sync::Arc;
use tracing::info;
use typespec_client_core::time::{Duration, OffsetDateTime};

/// Credential handing out a fixed bearer token
///
/// The token is reported as valid for one hour from each request so the
/// client-side cache never treats it as expired.
pub struct StaticTokenCredential {
    token: String,
}

impl std::fmt::Debug for StaticTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticTokenCredential").finish_non_exhaustive()
    }
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenCredential for StaticTokenCredential {
    async fn get_token(
        &self,
        _scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        Ok(AccessToken::new(
            Secret::new(self.token.clone()),
            OffsetDateTime::now_utc() + Duration::seconds(3600),
        ))
    }
}

/// Build the credential described by the configuration
/// # Errors
/// Returns an error if the Azure identity credential cannot be created
pub fn build_credential(config: &ControllerConfig) -> Result<Arc<dyn TokenCredential>> {
    if let Some(token) = &config.static_access_token {
        info!("Using static Azure access token from AZURE_ACCESS_TOKEN");
        return Ok(Arc::new(StaticTokenCredential::new(token.clone())));
    }

    let credential: Arc<dyn TokenCredential> = match &config.azure_client_id {
        Some(client_id) => {
            info!(
                client_id = %client_id,
                "Using Azure Workload Identity authentication"
            );
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: Some(client_id.clone()),
                ..Default::default()
            };
            WorkloadIdentityCredential::new(Some(options))
                .context("Failed to create WorkloadIdentityCredential")?
        }
        None => {
            info!("No Azure client ID configured, using Managed Identity");
            ManagedIdentityCredential::new(None)
                .context("Failed to create ManagedIdentityCredential")?
        }
    };
    Ok(credential)
}
