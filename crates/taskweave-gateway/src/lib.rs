//! Taskweave Gateway — HTTP ingress for the orchestrator

pub mod server;

pub use server::{start_gateway, BindMode, GatewayConfig};
