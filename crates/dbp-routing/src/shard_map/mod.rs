//! # Shard Map
//!
//! Database groups, the immutable routing snapshot and its builder.
//!
//! ## Routing
//!
//! - Hash tables: `|key| mod count` picks the physical table, suffixed
//!   `_{index}` when the table is split.
//! - Range tables: `key / span` picks a category slot; paired slots split
//!   odd and even keys; secondary splits append `bucket + base`.

mod builder;
mod group;
mod map;

#[cfg(test)]
pub(crate) mod fixtures;
#[cfg(test)]
mod tests;

pub use builder::ShardMapBuilder;
pub use group::{DatabaseGroup, GroupMember};
pub use map::{QueryTarget, Route, ShardMap, TransactionTarget};
