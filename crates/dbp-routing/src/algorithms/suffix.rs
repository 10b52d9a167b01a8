//! # Suffix Rewriter
//!
//! Inserts a physical table suffix (`_3`, `105`) right after the logical
//! table name in a statement.

use super::statement::{starts_with_keyword, word_after_from};
use crate::domain::RouterError;

/// Insert `suffix` after `table` in `sql`.
///
/// For `SELECT` statements only the word following `FROM` is considered
/// and it must equal `table` exactly. Other statements use the first
/// textual occurrence of `table`. An empty suffix leaves `sql` unchanged.
pub fn add_table_suffix(sql: &str, table: &str, suffix: &str) -> Result<String, RouterError> {
    if suffix.is_empty() {
        return Ok(sql.to_string());
    }

    let bytes = sql.as_bytes();
    let insert_at = if starts_with_keyword(bytes, "select") {
        word_after_from(bytes, "select".len())
            .filter(|&(start, end)| &bytes[start..end] == table.as_bytes())
            .map(|(_, end)| end)
    } else {
        sql.find(table).map(|pos| pos + table.len())
    };

    let insert_at = insert_at.ok_or_else(|| RouterError::SuffixInsertionFailed {
        table: table.to_string(),
    })?;

    let mut rewritten = String::with_capacity(sql.len() + suffix.len());
    rewritten.push_str(&sql[..insert_at]);
    rewritten.push_str(suffix);
    rewritten.push_str(&sql[insert_at..]);
    Ok(rewritten)
}
