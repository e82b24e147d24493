//! Shipgate daemon.
//!
//! - [`api`]: admin HTTP API (webhook, triggers, runs, rollback, fleet)
//! - [`listener`]: edge and origin gate listeners that proxy to the fleet
//! - [`member`]: fleet members reached over HTTP
//! - [`provisioner`]: standby-pool provisioner for the autoscaler
//! - [`scaler`]: periodic health, scaling and catch-up tick
//! - [`app`]: wiring from [`shipgate_core::StackConfig`]

pub mod api;
pub mod app;
pub mod listener;
pub mod member;
pub mod provisioner;
pub mod scaler;

pub use app::App;
