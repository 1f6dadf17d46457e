//! # Configuration
//!
//! Operator-level settings. Everything is read from the environment once at
//! startup; the deployment populates the environment from a ConfigMap.

mod controller;

pub use controller::{ControllerConfig, LogFormat};
