//! Azure Cluster Operator Library
//!
//! Core of the operator that converges Azure-hosted tenant control planes and
//! node pools. Tests live next to the code in each module and under `tests/`.
//!
//! ## Quick Start
//!
//! ```rust
//! use azure_cluster_operator::prelude::*;
//! ```

pub mod azure;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod kubernetes;
pub mod observability;
pub mod prelude;
pub mod runtime;
pub mod server;
pub mod statemachine;
pub mod status;
pub mod watchdog;
