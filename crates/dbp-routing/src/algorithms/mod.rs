//! # Algorithms
//!
//! Pure text and hashing algorithms used on the request path.

pub mod jenkins;
pub mod params;
pub mod statement;
pub mod suffix;

pub use jenkins::{hash_string_key, jenkins_one_at_a_time};
pub use params::{assemble, preassemble, Preassembled};
pub use statement::{extract_sql, StatementClassifier};
pub use suffix::add_table_suffix;
