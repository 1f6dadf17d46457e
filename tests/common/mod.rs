//! Common test utilities for the end-to-end reconciliation tests
//!
//! [`FakeCloud`] is an in-memory Azure subscription plus the tenant cluster
//! running on it. Submitting a deployment creates or reshapes its scale set,
//! every scale set instance backs one tenant node, and each node carries the
//! release its instance was imaged with.

#![allow(dead_code, reason = "each test binary uses a different subset")]

use async_trait::async_trait;
use azure_cluster_operator::azure::{
    AzureError, Deployment, DeploymentRequest, DeploymentsClient, ProvisioningState, ScaleSet,
    ScaleSetInstance, ScaleSetsClient, TagAutoscaler, VmCapabilities, VmSizeCapabilities,
};
use azure_cluster_operator::config::ControllerConfig;
use azure_cluster_operator::constants::{
    AUTOSCALER_ENABLED_TAG, CLUSTER_LABEL, NODE_POOL_LABEL, RELEASE_VERSION_LABEL,
};
use azure_cluster_operator::controller::deployment::TemplateSource;
use azure_cluster_operator::controller::{Collaborators, Context};
use azure_cluster_operator::crd::{
    AzureControlPlane, AzureControlPlaneSpec, AzureNodePool, AzureNodePoolSpec, Condition,
    NodeDrainRequest, NodeDrainRequestStatus, CONDITION_DRAINED, CONDITION_READY,
};
use azure_cluster_operator::kubernetes::{
    new_drain_request, BootstrapData, ControlPlaneLookup, DrainRequests, ReleaseCatalog,
    ReleaseInfo, TenantClusters, TenantError, TenantNode, TenantNodes,
};
use azure_cluster_operator::status::{MemoryStatusStore, TargetRef};
use azure_cluster_operator::watchdog::Watchdog;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const NAMESPACE: &str = "org-acme";
pub const CLUSTER_ID: &str = "c7f2a";
pub const RESOURCE_GROUP: &str = "c7f2a";
pub const NODE_POOL: &str = "np01";

/// Something the fake observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloudEvent {
    Capacity { vmss: String, capacity: u32 },
    InstancesDeleted { vmss: String, ids: Vec<String> },
    Reimaged { vmss: String, id: String },
    Cordoned { node: String },
    AutoscalerTag { vmss: String, enabled: Option<String> },
}

#[derive(Debug, Clone)]
pub struct FakeInstance {
    pub id: String,
    pub release: String,
    pub latest_model: bool,
}

#[derive(Debug, Clone)]
pub struct FakeScaleSet {
    pub capacity: u32,
    pub tags: BTreeMap<String, String>,
    pub model_release: String,
    pub role: &'static str,
    pub storage: String,
    pub accelerated: bool,
    pub instances: Vec<FakeInstance>,
    next_id: u32,
}

impl FakeScaleSet {
    /// Add or remove instances until the count matches the capacity
    fn settle(&mut self) {
        while self.instances.len() < self.capacity as usize {
            self.instances.push(FakeInstance {
                id: self.next_id.to_string(),
                release: self.model_release.clone(),
                latest_model: true,
            });
            self.next_id += 1;
        }
        self.instances.truncate(self.capacity as usize);
    }
}

fn computer_name(vmss: &str, id: &str) -> String {
    format!("{vmss}{id:0>6}")
}

#[derive(Debug, Default)]
pub struct World {
    pub deployments: BTreeMap<String, Deployment>,
    pub scale_sets: BTreeMap<String, FakeScaleSet>,
    pub cordoned: BTreeSet<String>,
    pub drains: BTreeMap<String, NodeDrainRequest>,
    pub events: Vec<CloudEvent>,
    pub guards: usize,
    pub failed_instance_sweeps: usize,
    pub submissions: Vec<String>,
}

/// In-memory Azure subscription and tenant cluster
#[derive(Debug, Clone, Default)]
pub struct FakeCloud {
    world: Arc<Mutex<World>>,
}

impl FakeCloud {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn world(&self) -> MutexGuard<'_, World> {
        self.world
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// What the external drain controller does between two passes
    pub fn complete_drains(&self) {
        for request in self.world().drains.values_mut() {
            request.status = Some(NodeDrainRequestStatus {
                conditions: vec![Condition {
                    r#type: CONDITION_DRAINED.to_string(),
                    status: "True".to_string(),
                    last_transition_time: None,
                    reason: None,
                    message: None,
                }],
            });
        }
    }

    pub fn scale_set(&self, name: &str) -> Option<FakeScaleSet> {
        self.world().scale_sets.get(name).cloned()
    }

    pub fn events(&self) -> Vec<CloudEvent> {
        self.world().events.clone()
    }

    /// Releases of the scale set's instances
    pub fn releases(&self, vmss: &str) -> Vec<String> {
        self.scale_set(vmss)
            .map(|s| s.instances.into_iter().map(|i| i.release).collect())
            .unwrap_or_default()
    }

    fn with_scale_set<T>(
        &self,
        name: &str,
        update: impl FnOnce(&mut FakeScaleSet, &mut Vec<CloudEvent>) -> T,
    ) -> Result<T, AzureError> {
        let mut world = self.world();
        let World {
            scale_sets, events, ..
        } = &mut *world;
        let scale_set = scale_sets.get_mut(name).ok_or_else(|| AzureError::NotFound {
            resource: format!("scale set {name}"),
        })?;
        Ok(update(scale_set, events))
    }
}

#[async_trait]
impl DeploymentsClient for FakeCloud {
    async fn get(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Option<Deployment>, AzureError> {
        Ok(self.world().deployments.get(name).cloned())
    }

    async fn create_or_update(
        &self,
        _resource_group: &str,
        name: &str,
        request: &DeploymentRequest,
    ) -> Result<(), AzureError> {
        let parameters = request.parameters.clone();
        let text = |key: &str| {
            parameters
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        let release = text("releaseVersion");
        let (vmss, role) = match parameters.get("nodePoolId").and_then(Value::as_str) {
            Some(pool) => (format!("nodepool-{pool}"), "worker"),
            None => (format!("{}-master", text("clusterId")), "control-plane"),
        };
        let replicas = parameters
            .get("replicas")
            .and_then(Value::as_u64)
            .and_then(|r| u32::try_from(r).ok())
            .unwrap_or(1);

        let mut world = self.world();
        let scale_set = world
            .scale_sets
            .entry(vmss)
            .or_insert_with(|| FakeScaleSet {
                capacity: 0,
                tags: BTreeMap::new(),
                model_release: release.clone(),
                role,
                storage: String::new(),
                accelerated: false,
                instances: Vec::new(),
                next_id: 0,
            });
        if scale_set.model_release != release {
            scale_set.model_release = release;
            for instance in &mut scale_set.instances {
                instance.latest_model = false;
            }
        }
        scale_set.storage = text("storageAccountType");
        scale_set.accelerated = parameters
            .get("acceleratedNetworking")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        scale_set.capacity = replicas;
        scale_set.settle();

        world.submissions.push(name.to_string());
        world.deployments.insert(
            name.to_string(),
            Deployment {
                name: name.to_string(),
                provisioning_state: ProvisioningState::Succeeded,
                parameters,
            },
        );
        Ok(())
    }

    async fn delete(&self, _resource_group: &str, name: &str) -> Result<(), AzureError> {
        self.world().deployments.remove(name);
        Ok(())
    }
}

#[async_trait]
impl ScaleSetsClient for FakeCloud {
    async fn get(&self, _resource_group: &str, name: &str) -> Result<Option<ScaleSet>, AzureError> {
        Ok(self.world().scale_sets.get(name).map(|s| ScaleSet {
            name: name.to_string(),
            capacity: s.capacity,
            storage_account_type: (!s.storage.is_empty()).then(|| s.storage.clone()),
            accelerated_networking: Some(s.accelerated),
            tags: s.tags.clone(),
        }))
    }

    async fn list_instances(
        &self,
        _resource_group: &str,
        name: &str,
    ) -> Result<Vec<ScaleSetInstance>, AzureError> {
        let world = self.world();
        let Some(scale_set) = world.scale_sets.get(name) else {
            return Ok(Vec::new());
        };
        Ok(scale_set
            .instances
            .iter()
            .map(|i| ScaleSetInstance {
                instance_id: i.id.clone(),
                computer_name: computer_name(name, &i.id),
                provisioning_state: ProvisioningState::Succeeded,
                latest_model_applied: i.latest_model,
            })
            .collect())
    }

    async fn set_capacity(
        &self,
        _resource_group: &str,
        name: &str,
        capacity: u32,
    ) -> Result<(), AzureError> {
        self.with_scale_set(name, |scale_set, events| {
            scale_set.capacity = capacity;
            scale_set.settle();
            events.push(CloudEvent::Capacity {
                vmss: name.to_string(),
                capacity,
            });
        })
    }

    async fn set_tags(
        &self,
        _resource_group: &str,
        name: &str,
        tags: &BTreeMap<String, String>,
    ) -> Result<(), AzureError> {
        self.with_scale_set(name, |scale_set, events| {
            scale_set.tags = tags.clone();
            events.push(CloudEvent::AutoscalerTag {
                vmss: name.to_string(),
                enabled: tags.get(AUTOSCALER_ENABLED_TAG).cloned(),
            });
        })
    }

    async fn delete_instances(
        &self,
        _resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.with_scale_set(name, |scale_set, events| {
            scale_set
                .instances
                .retain(|i| !instance_ids.contains(&i.id));
            scale_set.capacity = u32::try_from(scale_set.instances.len()).unwrap_or(u32::MAX);
            events.push(CloudEvent::InstancesDeleted {
                vmss: name.to_string(),
                ids: instance_ids.to_vec(),
            });
        })
    }

    async fn update_instances(
        &self,
        _resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.with_scale_set(name, |scale_set, _| {
            for instance in &mut scale_set.instances {
                if instance_ids.contains(&instance.id) {
                    instance.latest_model = true;
                }
            }
        })
    }

    async fn reimage(
        &self,
        _resource_group: &str,
        name: &str,
        instance_ids: &[String],
    ) -> Result<(), AzureError> {
        self.with_scale_set(name, |scale_set, events| {
            let release = scale_set.model_release.clone();
            for instance in &mut scale_set.instances {
                if instance_ids.contains(&instance.id) {
                    instance.release = release.clone();
                    events.push(CloudEvent::Reimaged {
                        vmss: name.to_string(),
                        id: instance.id.clone(),
                    });
                }
            }
        })
    }

    async fn delete(&self, _resource_group: &str, name: &str) -> Result<(), AzureError> {
        self.world().scale_sets.remove(name);
        Ok(())
    }
}

#[async_trait]
impl VmCapabilities for FakeCloud {
    async fn capabilities(
        &self,
        _location: &str,
        _vm_size: &str,
    ) -> Result<VmSizeCapabilities, AzureError> {
        Ok(VmSizeCapabilities {
            accelerated_networking: true,
            premium_io: true,
        })
    }
}

#[async_trait]
impl TenantNodes for FakeCloud {
    async fn list_nodes(&self) -> Result<Vec<TenantNode>, TenantError> {
        let world = self.world();
        let mut nodes = Vec::new();
        for (vmss, scale_set) in &world.scale_sets {
            for instance in &scale_set.instances {
                let name = computer_name(vmss, &instance.id).to_ascii_lowercase();
                nodes.push(TenantNode {
                    labels: BTreeMap::from([
                        (RELEASE_VERSION_LABEL.to_string(), instance.release.clone()),
                        (format!("node-role.kubernetes.io/{}", scale_set.role), String::new()),
                    ]),
                    ready: true,
                    unschedulable: world.cordoned.contains(&name),
                    name,
                });
            }
        }
        Ok(nodes)
    }

    async fn cordon(&self, node_name: &str) -> Result<(), TenantError> {
        let mut world = self.world();
        world.cordoned.insert(node_name.to_string());
        world.events.push(CloudEvent::Cordoned {
            node: node_name.to_string(),
        });
        Ok(())
    }
}

#[async_trait]
impl TenantClusters for FakeCloud {
    async fn nodes_client(
        &self,
        _namespace: &str,
        _cluster_id: &str,
    ) -> Result<Option<Arc<dyn TenantNodes>>, TenantError> {
        Ok(Some(Arc::new(self.clone())))
    }
}

fn selects(request: &NodeDrainRequest, cluster_id: &str, node_pool: &str) -> bool {
    let labels = request.metadata.labels.as_ref();
    let label = |key: &str| labels.and_then(|l| l.get(key)).map(String::as_str);
    label(CLUSTER_LABEL) == Some(cluster_id) && label(NODE_POOL_LABEL) == Some(node_pool)
}

#[async_trait]
impl DrainRequests for FakeCloud {
    async fn list(
        &self,
        _namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<Vec<NodeDrainRequest>> {
        Ok(self
            .world()
            .drains
            .values()
            .filter(|r| selects(r, cluster_id, node_pool))
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        namespace: &str,
        cluster_id: &str,
        node_pool: &str,
        node_name: &str,
        timeout: Duration,
    ) -> anyhow::Result<()> {
        let mut request = new_drain_request(cluster_id, node_pool, node_name, timeout);
        request.metadata.namespace = Some(namespace.to_string());
        let name = kube::ResourceExt::name_any(&request);
        self.world().drains.entry(name).or_insert(request);
        Ok(())
    }

    async fn delete(&self, _namespace: &str, name: &str) -> anyhow::Result<()> {
        self.world().drains.remove(name);
        Ok(())
    }

    async fn delete_all(
        &self,
        _namespace: &str,
        cluster_id: &str,
        node_pool: &str,
    ) -> anyhow::Result<()> {
        self.world()
            .drains
            .retain(|_, r| !selects(r, cluster_id, node_pool));
        Ok(())
    }
}

#[async_trait]
impl ReleaseCatalog for FakeCloud {
    async fn components(&self, release_version: &str) -> anyhow::Result<ReleaseInfo> {
        let (kubernetes, image) = match release_version {
            "14.1.0" => ("1.29.4", "3815.2.5"),
            "15.0.0" => ("1.30.2", "3975.2.1"),
            other => anyhow::bail!("release {other} not found"),
        };
        Ok(ReleaseInfo {
            kubernetes: kubernetes.to_string(),
            image: image.to_string(),
        })
    }
}

#[async_trait]
impl BootstrapData for FakeCloud {
    async fn is_available(&self, _namespace: &str, _cluster_id: &str) -> anyhow::Result<bool> {
        Ok(true)
    }
}

#[async_trait]
impl ControlPlaneLookup for FakeCloud {
    async fn is_deleting(&self, _namespace: &str, _name: &str) -> anyhow::Result<bool> {
        Ok(false)
    }
}

impl TemplateSource for FakeCloud {
    fn master_template(&self) -> anyhow::Result<Value> {
        Ok(json!({
            "contentVersion": "1.0.0.0",
            "resources": [{ "type": "Microsoft.Compute/virtualMachineScaleSets", "role": "master" }]
        }))
    }

    fn worker_template(&self) -> anyhow::Result<Value> {
        Ok(json!({
            "contentVersion": "1.0.0.0",
            "resources": [{ "type": "Microsoft.Compute/virtualMachineScaleSets", "role": "worker" }]
        }))
    }
}

impl Watchdog for FakeCloud {
    fn guard_vmss(&self, _resource_group: &str, _scale_set: &str) -> bool {
        self.world().guards += 1;
        true
    }

    fn delete_failed_vmss(&self, _resource_group: &str, _scale_set: &str) -> bool {
        self.world().failed_instance_sweeps += 1;
        true
    }
}

/// Reconciler context wired to `cloud` and `store`
pub fn context(cloud: &FakeCloud, store: &Arc<MemoryStatusStore>) -> Context {
    let shared = Arc::new(cloud.clone());
    let collaborators = Collaborators {
        deployments: Arc::clone(&shared) as Arc<dyn DeploymentsClient>,
        scale_sets: Arc::clone(&shared) as Arc<dyn ScaleSetsClient>,
        capabilities: Arc::clone(&shared) as Arc<dyn VmCapabilities>,
        autoscaler: Arc::new(TagAutoscaler::new(Arc::clone(&shared) as Arc<dyn ScaleSetsClient>)),
        watchdog: Arc::clone(&shared) as Arc<dyn Watchdog>,
        tenants: Arc::clone(&shared) as Arc<dyn TenantClusters>,
        drains: Arc::clone(&shared) as Arc<dyn DrainRequests>,
        releases: Arc::clone(&shared) as Arc<dyn ReleaseCatalog>,
        bootstrap: Arc::clone(&shared) as Arc<dyn BootstrapData>,
        control_planes: Arc::clone(&shared) as Arc<dyn ControlPlaneLookup>,
        templates: shared,
        master_status: Arc::clone(store) as _,
        node_pool_status: Arc::clone(store) as _,
    };
    Context::new(ControllerConfig::default(), collaborators)
}

pub fn control_plane(release: &str) -> AzureControlPlane {
    let mut control_plane = AzureControlPlane::new(
        CLUSTER_ID,
        AzureControlPlaneSpec {
            cluster_id: CLUSTER_ID.to_string(),
            resource_group: RESOURCE_GROUP.to_string(),
            location: "westeurope".to_string(),
            replicas: 3,
            vm_size: "Standard_D4s_v3".to_string(),
            release_version: release.to_string(),
            availability_zones: vec!["1".to_string(), "2".to_string(), "3".to_string()],
            subnet_name: format!("{CLUSTER_ID}-master-subnet"),
        },
    );
    control_plane.metadata.namespace = Some(NAMESPACE.to_string());
    control_plane.metadata.generation = Some(1);
    control_plane
}

pub fn node_pool(release: &str, replicas: u32) -> AzureNodePool {
    let mut node_pool = AzureNodePool::new(
        NODE_POOL,
        AzureNodePoolSpec {
            cluster_id: CLUSTER_ID.to_string(),
            control_plane_ref: CLUSTER_ID.to_string(),
            resource_group: RESOURCE_GROUP.to_string(),
            location: "westeurope".to_string(),
            replicas,
            min_replicas: Some(replicas),
            max_replicas: Some(replicas + 2),
            vm_size: "Standard_D8s_v3".to_string(),
            release_version: release.to_string(),
            failure_domains: vec!["1".to_string(), "2".to_string()],
            subnet_name: format!("{CLUSTER_ID}-worker-subnet"),
        },
    );
    node_pool.metadata.namespace = Some(NAMESPACE.to_string());
    node_pool.metadata.generation = Some(1);
    node_pool
}

/// Current state token of `machine` for `target`
pub fn state_of(store: &MemoryStatusStore, target: &TargetRef, machine: &str) -> Option<String> {
    store
        .status(target)?
        .state_machines
        .get(machine)?
        .state
        .clone()
}

/// Status of the `Ready` condition of `target`
pub fn ready_of(store: &MemoryStatusStore, target: &TargetRef) -> Option<String> {
    store
        .status(target)?
        .conditions
        .into_iter()
        .find(|c| c.r#type == CONDITION_READY)
        .map(|c| c.status)
}

/// States `machine` passed through for `target`, in order
pub fn history_of(store: &MemoryStatusStore, target: &TargetRef, machine: &str) -> Vec<String> {
    store
        .state_history()
        .into_iter()
        .filter(|(t, m, _)| t == target && m == machine)
        .map(|(_, _, state)| state)
        .collect()
}
