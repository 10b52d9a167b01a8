//! # Task Model
//!
//! Answer channels, executable tasks and the multi-shard aggregation
//! coordinator.

pub mod aggregation;
pub mod answer;
pub mod package;

pub use aggregation::{AggregateKind, AggregatedTask, AggregationUnit};
pub use answer::{Answer, AnswerChannel, AnswerError, AnswerSink};
pub use package::{QueryTask, Reply, Task, TaskBox, TransactionTask};
