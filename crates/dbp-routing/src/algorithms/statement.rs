//! # Statement Classifier
//!
//! Lexical allow-list check of raw SQL: finds the statement verb, whether it
//! must run on the master and the first table-like token. This is a word
//! scanner over fixed character classes, not a parser.

use crate::domain::{Classification, RouterError, StatementKind};

/// Stripped from the front of a statement.
const HEAD_TRIM: &[u8] = b" \t\n\r";
/// Stripped from the end of a statement.
const TAIL_TRIM: &[u8] = b" \t\n\r;\0";
/// Skipped before a word.
const WORD_LEAD: &[u8] = b" \t,*()\n\r";
/// Terminates a word.
const WORD_END: &[u8] = b" \t,*()\n\r\0";

/// Modifiers between a write verb and its table.
const WRITE_MODIFIERS: [&str; 5] = ["INTO", "IGNORE", "DELAYED", "LOW_PRIORITY", "HIGH_PRIORITY"];

#[derive(Clone, Copy)]
enum TableRule {
    AfterFrom,
    AfterModifiers,
    NextWord,
    AfterTableKeyword,
}

struct Verb {
    keyword: &'static str,
    kind: StatementKind,
    rule: TableRule,
    manager_only: bool,
}

const VERBS: [Verb; 10] = [
    Verb {
        keyword: "select",
        kind: StatementKind::Select,
        rule: TableRule::AfterFrom,
        manager_only: false,
    },
    Verb {
        keyword: "update",
        kind: StatementKind::Update,
        rule: TableRule::AfterModifiers,
        manager_only: false,
    },
    Verb {
        keyword: "insert",
        kind: StatementKind::Insert,
        rule: TableRule::AfterModifiers,
        manager_only: false,
    },
    Verb {
        keyword: "delete",
        kind: StatementKind::Delete,
        rule: TableRule::AfterFrom,
        manager_only: false,
    },
    Verb {
        keyword: "replace",
        kind: StatementKind::Replace,
        rule: TableRule::AfterModifiers,
        manager_only: false,
    },
    Verb {
        keyword: "desc",
        kind: StatementKind::Desc,
        rule: TableRule::NextWord,
        manager_only: false,
    },
    Verb {
        keyword: "describe",
        kind: StatementKind::Describe,
        rule: TableRule::NextWord,
        manager_only: false,
    },
    Verb {
        keyword: "explain",
        kind: StatementKind::Explain,
        rule: TableRule::NextWord,
        manager_only: false,
    },
    Verb {
        keyword: "show create table",
        kind: StatementKind::ShowCreateTable,
        rule: TableRule::NextWord,
        manager_only: true,
    },
    Verb {
        keyword: "alter",
        kind: StatementKind::Alter,
        rule: TableRule::AfterTableKeyword,
        manager_only: true,
    },
];

/// Trim leading whitespace and trailing whitespace, `;` and NUL.
pub fn extract_sql(sql: &str) -> &str {
    let in_class = |class: &'static [u8]| move |c: char| c.is_ascii() && class.contains(&(c as u8));
    sql.trim_end_matches(in_class(TAIL_TRIM))
        .trim_start_matches(in_class(HEAD_TRIM))
}

/// Case-insensitive verb match followed by a separator.
///
/// The byte after the keyword must exist and be neither alphanumeric nor a
/// control character, so `selection` and a bare `select` do not match.
pub(crate) fn starts_with_keyword(sql: &[u8], keyword: &str) -> bool {
    let keyword = keyword.as_bytes();
    if sql.len() <= keyword.len() || !sql[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return false;
    }
    let next = sql[keyword.len()];
    !next.is_ascii_alphanumeric() && !next.is_ascii_control()
}

/// Byte range of the next word at or after `from`.
pub(crate) fn next_word(sql: &[u8], from: usize) -> (usize, usize) {
    let mut start = from.min(sql.len());
    while start < sql.len() && WORD_LEAD.contains(&sql[start]) {
        start += 1;
    }
    let mut end = start;
    while end < sql.len() && !WORD_END.contains(&sql[end]) {
        end += 1;
    }
    (start, end)
}

/// Byte range of the word following the first `from` after `offset`.
pub(crate) fn word_after_from(sql: &[u8], offset: usize) -> Option<(usize, usize)> {
    word_after_keyword(sql, offset, b"from")
}

fn word_after_keyword(sql: &[u8], offset: usize, keyword: &[u8]) -> Option<(usize, usize)> {
    let mut pos = offset;
    loop {
        let (start, end) = next_word(sql, pos);
        if start == end {
            return None;
        }
        pos = end;
        if sql[start..end].eq_ignore_ascii_case(keyword) {
            let (table_start, table_end) = next_word(sql, pos);
            return (table_start < table_end).then_some((table_start, table_end));
        }
    }
}

fn word_after_modifiers(sql: &[u8], offset: usize) -> Option<(usize, usize)> {
    let mut pos = offset;
    loop {
        let (start, end) = next_word(sql, pos);
        if start == end {
            return None;
        }
        let word = &sql[start..end];
        if WRITE_MODIFIERS
            .iter()
            .any(|m| word.eq_ignore_ascii_case(m.as_bytes()))
        {
            pos = end;
            continue;
        }
        return Some((start, end));
    }
}

fn first_word(sql: &[u8], offset: usize) -> Option<(usize, usize)> {
    let (start, end) = next_word(sql, offset);
    (start < end).then_some((start, end))
}

/// Statement classifier.
///
/// In manager mode `ALTER` and `SHOW CREATE TABLE` are accepted and
/// [`StatementClassifier::classify_select`] accepts every verb.
#[derive(Clone, Copy, Debug, Default)]
pub struct StatementClassifier {
    manager_mode: bool,
}

impl StatementClassifier {
    /// Create a classifier.
    pub fn new(manager_mode: bool) -> Self {
        Self { manager_mode }
    }

    /// Whether manager-only verbs are accepted.
    pub fn manager_mode(&self) -> bool {
        self.manager_mode
    }

    fn verb(&self, sql: &[u8]) -> Option<&'static Verb> {
        VERBS
            .iter()
            .filter(|v| self.manager_mode || !v.manager_only)
            .find(|v| starts_with_keyword(sql, v.keyword))
    }

    /// Statement verb, if allow-listed.
    pub fn kind_of(&self, sql: &str) -> Option<StatementKind> {
        self.verb(sql.as_bytes()).map(|v| v.kind)
    }

    /// Classify an extracted statement.
    ///
    /// Fails with `DisabledStatement` when the verb is not allow-listed.
    /// A missing table is not an error here; callers that need one decide.
    pub fn classify(&self, sql: &str) -> Result<Classification, RouterError> {
        let bytes = sql.as_bytes();
        let verb = self.verb(bytes).ok_or(RouterError::DisabledStatement)?;
        let offset = verb.keyword.len();
        let range = match verb.rule {
            TableRule::AfterFrom => word_after_from(bytes, offset),
            TableRule::AfterModifiers => word_after_modifiers(bytes, offset),
            TableRule::NextWord => first_word(bytes, offset),
            TableRule::AfterTableKeyword => word_after_keyword(bytes, offset, b"table"),
        };
        Ok(Classification {
            kind: verb.kind,
            force_master: verb.kind.force_master(),
            table: range.map(|(start, end)| sql[start..end].to_string()),
        })
    }

    /// Classify a statement that fans out to several shards.
    ///
    /// Only `SELECT` is accepted outside manager mode.
    pub fn classify_select(&self, sql: &str) -> Result<Classification, RouterError> {
        let classification = self.classify(sql)?;
        if !self.manager_mode && classification.kind != StatementKind::Select {
            return Err(RouterError::DisabledStatement);
        }
        Ok(classification)
    }
}
