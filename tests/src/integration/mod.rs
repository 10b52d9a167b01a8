//! Integration flows.

pub mod hot_swap;
pub mod node_flows;
pub mod sqlite_flows;
