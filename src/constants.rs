//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! These values represent reasonable defaults and can be overridden via
//! environment variables where applicable (see [`crate::config::ControllerConfig`]).

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 8080;

/// Requeue interval when a pass ended without a state change (seconds)
pub const DEFAULT_STEADY_REQUEUE_SECS: u64 = 60;

/// Requeue interval after a pass advanced the state machine (seconds)
/// Short so that the next step of a multi-step operation starts promptly
pub const DEFAULT_TRANSITION_REQUEUE_SECS: u64 = 5;

/// Fibonacci backoff floor for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 15;

/// Fibonacci backoff ceiling for failed reconciliations (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 600;

/// Number of long-lived watchdog worker tasks
pub const DEFAULT_WATCHDOG_WORKERS: usize = 5;

/// Minimum time between two units of work of the same watchdog job (seconds)
pub const DEFAULT_WATCHDOG_COOLDOWN_SECS: u64 = 300;

/// Lower bound of the jitter applied before re-queueing an unfinished job
pub const JOB_REQUEUE_JITTER_MIN_MS: u64 = 10;

/// Upper bound of the jitter applied before re-queueing an unfinished job
pub const JOB_REQUEUE_JITTER_MAX_MS: u64 = 100;

/// Attempts made to delete one failed instance before the job run fails
pub const INSTANCE_DELETE_ATTEMPTS: u32 = 3;

/// Consecutive healthy checks after which a guard job is finished
pub const GUARD_HEALTHY_CHECKS: u32 = 3;

/// Reimage rounds after which a guard job gives up
pub const GUARD_MAX_REIMAGE_ROUNDS: u32 = 10;

/// Default timeout handed to the drain controller for each node (seconds)
pub const DEFAULT_DRAIN_TIMEOUT_SECS: u64 = 600;

/// Default Azure Resource Manager endpoint
pub const DEFAULT_ARM_ENDPOINT: &str = "https://management.azure.com";

/// OAuth scope for Azure Resource Manager tokens
pub const ARM_SCOPE: &str = "https://management.azure.com/.default";

/// Default directory holding the opaque deployment templates
pub const DEFAULT_TEMPLATE_DIR: &str = "/etc/azure-cluster-operator/templates";

/// Field manager used for every write issued by the operator
pub const FIELD_MANAGER: &str = "azure-cluster-operator";

/// Finalizer placed on control planes and node pools
pub const FINALIZER: &str = "azure-cluster.io/operator";

/// Node label carrying the release version a node was bootstrapped with
pub const RELEASE_VERSION_LABEL: &str = "release.azure-cluster.io/version";

/// Label put on drain requests to select those of one cluster
pub const CLUSTER_LABEL: &str = "azure-cluster.io/cluster";

/// Label put on drain requests to select those of one node pool
pub const NODE_POOL_LABEL: &str = "azure-cluster.io/node-pool";

/// Control plane role label on tenant nodes
pub const CONTROL_PLANE_ROLE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/// Worker role label on tenant nodes
pub const WORKER_ROLE_LABEL: &str = "node-role.kubernetes.io/worker";

/// Legacy role label (`kubernetes.io/role=<role>`)
pub const LEGACY_ROLE_LABEL: &str = "kubernetes.io/role";

/// Scale set tag read by cluster-autoscaler auto-discovery
pub const AUTOSCALER_ENABLED_TAG: &str = "cluster-autoscaler-enabled";

/// Scale set tag holding the autoscaler lower bound
pub const AUTOSCALER_MIN_TAG: &str = "min";

/// Scale set tag holding the autoscaler upper bound
pub const AUTOSCALER_MAX_TAG: &str = "max";
