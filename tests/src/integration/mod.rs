//! Cross-crate integration flows.

pub mod reload_rotation;
pub mod rpc_flows;
