//! # VM Size Capabilities
//!
//! Resource SKU lookup used when a scale set does not exist yet and its
//! storage tier and networking mode have to be derived from the VM size.

use super::arm::{ArmClient, SKUS_API_VERSION};
use crate::azure::{AzureError, VmCapabilities, VmSizeCapabilities};
use async_trait::async_trait;
use serde::Deserialize;

const ACCELERATED_NETWORKING_CAPABILITY: &str = "AcceleratedNetworkingEnabled";
const PREMIUM_IO_CAPABILITY: &str = "PremiumIO";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SkuPage {
    #[serde(default)]
    value: Vec<ResourceSku>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceSku {
    #[serde(default)]
    resource_type: String,
    name: String,
    #[serde(default)]
    capabilities: Vec<SkuCapability>,
}

#[derive(Debug, Deserialize)]
struct SkuCapability {
    name: String,
    value: String,
}

impl ResourceSku {
    fn flag(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name == name && c.value.eq_ignore_ascii_case("true"))
    }
}

#[async_trait]
impl VmCapabilities for ArmClient {
    async fn capabilities(
        &self,
        location: &str,
        vm_size: &str,
    ) -> Result<VmSizeCapabilities, AzureError> {
        let query = format!(
            "api-version={SKUS_API_VERSION}&%24filter=location%20eq%20%27{location}%27"
        );
        let mut next = Some(self.subscription_url("Microsoft.Compute/skus", &query));
        while let Some(url) = next {
            let page: Option<SkuPage> = self.get_json("list_skus", &url).await?;
            let Some(page) = page else { break };
            if let Some(sku) = page
                .value
                .iter()
                .find(|s| s.resource_type == "virtualMachines" && s.name.eq_ignore_ascii_case(vm_size))
            {
                return Ok(VmSizeCapabilities {
                    accelerated_networking: sku.flag(ACCELERATED_NETWORKING_CAPABILITY),
                    premium_io: sku.flag(PREMIUM_IO_CAPABILITY),
                });
            }
            next = page.next_link;
        }
        Err(AzureError::NotFound {
            resource: format!("VM size {vm_size} in {location}"),
        })
    }
}
