//! # Runtime
//!
//! Process wiring: startup, the two controller watch loops and their error
//! policy.
//!
//! - `initialization.rs` - configuration, logging, metrics server, clients
//! - `watch_loop.rs` - `Controller`s for `AzureControlPlane` and `AzureNodePool`
//! - `error_policy.rs` - per-resource Fibonacci backoff on failed passes

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;
