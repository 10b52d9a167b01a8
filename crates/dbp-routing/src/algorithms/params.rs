//! # Placeholder Substitution
//!
//! `?` placeholders are filled in two passes. [`preassemble`] runs on the
//! request path: unquoted placeholders take the raw parameter, quoted ones
//! (`'?'`) stay in place and their parameter is deferred. [`assemble`] runs on
//! the worker after the deferred parameters were escaped by the driver.

use crate::domain::RouterError;

/// Statement with quoted placeholders still open, plus their parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Preassembled {
    /// Statement used for classification and routing.
    pub semisql: String,
    /// Parameters for the remaining `?`, in order.
    pub rest_params: Vec<String>,
}

/// First substitution pass.
///
/// Every placeholder must consume exactly one parameter.
pub fn preassemble(sql: &str, params: &[String]) -> Result<Preassembled, RouterError> {
    let bytes = sql.as_bytes();
    let mut semisql = String::with_capacity(sql.len());
    let mut rest_params = Vec::new();
    let mut params_iter = params.iter();
    let mut begin = 0;

    while let Some(offset) = sql[begin..].find('?') {
        let pos = begin + offset;
        let param = params_iter.next().ok_or(RouterError::InvalidParameters)?;
        semisql.push_str(&sql[begin..pos]);

        let quoted = pos > 0 && bytes[pos - 1] == b'\'' && bytes.get(pos + 1) == Some(&b'\'');
        if quoted {
            rest_params.push(param.clone());
            semisql.push('?');
        } else {
            semisql.push_str(param);
        }
        begin = pos + 1;
    }

    if params_iter.next().is_some() {
        return Err(RouterError::InvalidParameters);
    }
    semisql.push_str(&sql[begin..]);

    Ok(Preassembled {
        semisql,
        rest_params,
    })
}

/// Second substitution pass with already escaped parameters.
pub fn assemble(semisql: &str, escaped: &[String]) -> Result<String, RouterError> {
    let mut sql = String::with_capacity(semisql.len() + escaped.iter().map(String::len).sum::<usize>());
    let mut params_iter = escaped.iter();
    let mut pieces = semisql.split('?');

    if let Some(first) = pieces.next() {
        sql.push_str(first);
    }
    for piece in pieces {
        let param = params_iter.next().ok_or(RouterError::InvalidParameters)?;
        sql.push_str(param);
        sql.push_str(piece);
    }

    if params_iter.next().is_some() {
        return Err(RouterError::InvalidParameters);
    }
    Ok(sql)
}
