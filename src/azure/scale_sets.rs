//! # Scale Sets
//!
//! Virtual machine scale set operations on [`ArmClient`].

use super::arm::{ArmClient, COMPUTE_API_VERSION};
use crate::azure::{AzureError, ProvisioningState, ScaleSet, ScaleSetInstance, ScaleSetsClient};
use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::info;

#[derive(Debug, Deserialize)]
struct ArmScaleSet {
    name: String,
    #[serde(default)]
    sku: Option<ArmSku>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    properties: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct ArmSku {
    #[serde(default)]
    capacity: Option<u32>,
}

impl From<ArmScaleSet> for ScaleSet {
    fn from(raw: ArmScaleSet) -> Self {
        let profile = raw.properties.get("virtualMachineProfile");
        let storage_account_type = profile
            .and_then(|p| p.pointer("/storageProfile/osDisk/managedDisk/storageAccountType"))
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        let accelerated_networking = profile
            .and_then(|p| p.pointer("/networkProfile/networkInterfaceConfigurations/0/properties/enableAcceleratedNetworking"))
            .and_then(serde_json::Value::as_bool);
        Self {
            name: raw.name,
            capacity: raw.sku.and_then(|s| s.capacity).unwrap_or_default(),
            storage_account_type,
            accelerated_networking,
            tags: raw.tags,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmInstancePage {
    #[serde(default)]
    value: Vec<ArmInstance>,
    #[serde(default)]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmInstance {
    instance_id: String,
    #[serde(default)]
    properties: ArmInstanceProperties,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmInstanceProperties {
    #[serde(default)]
    provisioning_state: Option<String>,
    #[serde(default)]
    latest_model_applied: Option<bool>,
    #[serde(default)]
    os_profile: Option<ArmOsProfile>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ArmOsProfile {
    #[serde(default)]
    computer_name: Option<String>,
}

impl From<ArmInstance> for ScaleSetInstance {
    fn from(raw: ArmInstance) -> Self {
        let props = raw.properties;
        Self {
            instance_id: raw.instance_id,
            computer_name: props
                .os_profile
                .and_then(|p| p.computer_name)
                .unwrap_or_default(),
            provisioning_state: ProvisioningState::parse(
                props.provisioning_state.as_deref().unwrap_or("Unknown"),
            ),
            latest_model_applied: props.latest_model_applied.unwrap_or(true),
        }
    }
}

impl ArmClient {
    fn scale_set_url(&self, resource_group: &str, name: &str) -> String {
        self.resource_url(
            resource_group,
            &format!("Microsoft.Compute/virtualMachineScaleSets/{name}"),
            COMPUTE_API_VERSION,
        )
    }

    fn scale_set_action_url(&self, resource_group: &str, name: &str, action: &str) -> String {
        self.resource_url(
            resource_group,
            &format!("Microsoft.Compute/virtualMachineScaleSets/{name}/{action}"),
            COMPUTE_API_VERSION,
        )
    }

    async fn instance_action(
        &self,
        operation: &str,
        resource_group: &str,
        name: &str,
        action: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        if instance_ids.is_empty() {
            return Ok(());
        }
        info!(
            resource_group,
            scale_set = name,
            action,
            instances = ?instance_ids,
            "Running scale set instance action"
        );
        let url = self.scale_set_action_url(resource_group, name, action);
        let body = serde_json::json!({ "instanceIds": instance_ids });
        self.execute(operation, Method::POST, &url, Some(&body)).await
    }
}

#[async_trait]
impl ScaleSetsClient for ArmClient {
    async fn get(&self, resource_group: &str, name: &str) -> Result<Option<ScaleSet>, AzureError> {
        let url = self.scale_set_url(resource_group, name);
        let raw: Option<ArmScaleSet> = self.get_json("get_scale_set", &url).await?;
        Ok(raw.map(ScaleSet::from))
    }

    async fn list_instances(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<Vec<ScaleSetInstance>, AzureError> {
        let mut instances = Vec::new();
        let mut next = Some(self.scale_set_action_url(resource_group, name, "virtualMachines"));
        while let Some(url) = next {
            let page: Option<ArmInstancePage> = self.get_json("list_instances", &url).await?;
            let Some(page) = page else {
                return Err(AzureError::NotFound {
                    resource: format!("scale set {resource_group}/{name}"),
                });
            };
            instances.extend(page.value.into_iter().map(ScaleSetInstance::from));
            next = page.next_link;
        }
        Ok(instances)
    }

    async fn set_capacity(
        &self,
        resource_group: &str,
        name: &str,
        capacity: u32,
    ) -> Result<(), AzureError> {
        info!(resource_group, scale_set = name, capacity, "Setting scale set capacity");
        let url = self.scale_set_url(resource_group, name);
        let body = serde_json::json!({ "sku": { "capacity": capacity } });
        self.execute("set_capacity", Method::PATCH, &url, Some(&body))
            .await
    }

    async fn set_tags(
        &self,
        resource_group: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), AzureError> {
        let url = self.scale_set_url(resource_group, name);
        let body = serde_json::json!({ "tags": tags });
        self.execute("set_tags", Method::PATCH, &url, Some(&body))
            .await
    }

    async fn delete_instances(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.instance_action("delete_instances", resource_group, name, "delete", instance_ids)
            .await
    }

    async fn update_instances(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.instance_action(
            "update_instances",
            resource_group,
            name,
            "manualupgrade",
            instance_ids,
        )
        .await
    }

    async fn reimage(
        &self,
        resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.instance_action("reimage_instances", resource_group, name, "reimage", instance_ids)
            .await
    }

    async fn delete(&self, resource_group: &str, name: &str) -> Result<(), AzureError> {
        info!(resource_group, scale_set = name, "Deleting scale set");
        let url = self.scale_set_url(resource_group, name);
        self.delete_resource("delete_scale_set", &url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::azure::arm::tests::{client_for, SUBSCRIPTION};
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn vmss_path(suffix: &str) -> String {
        format!(
            "/subscriptions/{SUBSCRIPTION}/resourceGroups/rg/providers/Microsoft.Compute/virtualMachineScaleSets/nodepool-a{suffix}"
        )
    }

    #[tokio::test]
    async fn test_get_scale_set_reads_profile() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(vmss_path("")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "name": "nodepool-a",
                "sku": {"name": "Standard_D4s_v3", "capacity": 3},
                "tags": {"cluster-autoscaler-enabled": "true"},
                "properties": {
                    "virtualMachineProfile": {
                        "storageProfile": {
                            "osDisk": {"managedDisk": {"storageAccountType": "Premium_LRS"}}
                        },
                        "networkProfile": {
                            "networkInterfaceConfigurations": [
                                {"properties": {"enableAcceleratedNetworking": true}}
                            ]
                        }
                    }
                }
            })))
            .mount(&server)
            .await;

        let scale_set = ScaleSetsClient::get(&client_for(&server), "rg", "nodepool-a")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(scale_set.capacity, 3);
        assert_eq!(scale_set.storage_account_type.as_deref(), Some("Premium_LRS"));
        assert_eq!(scale_set.accelerated_networking, Some(true));
        assert_eq!(
            scale_set.tags.get("cluster-autoscaler-enabled").map(String::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn test_list_instances_follows_next_link() {
        let server = MockServer::start().await;
        let next_link = format!("{}/page-two", server.uri());
        Mock::given(method("GET"))
            .and(path(vmss_path("/virtualMachines")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "instanceId": "0",
                    "properties": {
                        "provisioningState": "Succeeded",
                        "latestModelApplied": true,
                        "osProfile": {"computerName": "nodepool-a000000"}
                    }
                }],
                "nextLink": next_link
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/page-two"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [{
                    "instanceId": "1",
                    "properties": {
                        "provisioningState": "Failed",
                        "latestModelApplied": false,
                        "osProfile": {"computerName": "nodepool-a000001"}
                    }
                }]
            })))
            .mount(&server)
            .await;

        let instances = client_for(&server)
            .list_instances("rg", "nodepool-a")
            .await
            .unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].instance_id, "1");
        assert_eq!(instances[1].provisioning_state, ProvisioningState::Failed);
        assert!(!instances[1].latest_model_applied);
    }

    #[tokio::test]
    async fn test_delete_instances_posts_ids() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(vmss_path("/delete")))
            .and(body_json(json!({"instanceIds": ["2", "3"]})))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        client_for(&server)
            .delete_instances("rg", "nodepool-a", &["2".to_string(), "3".to_string()])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_empty_instance_action_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        client_for(&server)
            .reimage("rg", "nodepool-a", &[])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_capacity_on_missing_scale_set_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("PATCH"))
            .and(path(vmss_path("")))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .set_capacity("rg", "nodepool-a", 6)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
