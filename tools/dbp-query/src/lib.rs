//! DBProxy query tool: a minimal client for the node's JSON-lines protocol
//! and a renderer for its answers.

#![warn(missing_docs)]

use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

/// Errors while talking to a node.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Socket failure.
    #[error("Connection failed: {0}")]
    Connection(#[from] std::io::Error),
    /// No answer in time.
    #[error("No answer within {0:?}")]
    Timeout(Duration),
    /// Connection closed before an answer.
    #[error("Connection closed by node")]
    Closed,
    /// Answer line was not JSON.
    #[error("Failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),
    /// The node answered with an error.
    #[error("[{raiser} {code}] {ex}")]
    Answer {
        /// Error code.
        code: i64,
        /// Message.
        ex: String,
        /// `DBProxy` or `database`.
        raiser: String,
    },
}

/// Arguments of a `query` request.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    /// Shard key.
    pub hint_id: i64,
    /// Logical table.
    pub table_name: Option<String>,
    /// Cluster scope.
    pub cluster: String,
    /// Statement.
    pub sql: String,
    /// Read from the master.
    pub master: bool,
    /// Placeholder values.
    pub params: Vec<String>,
}

impl QueryArgs {
    /// camelCase request arguments.
    pub fn to_json(&self) -> Value {
        let mut args = json!({
            "hintId": self.hint_id,
            "cluster": self.cluster,
            "sql": self.sql,
            "master": self.master,
        });
        if let Some(table) = &self.table_name {
            args["tableName"] = json!(table);
        }
        if !self.params.is_empty() {
            args["params"] = json!(self.params);
        }
        args
    }
}

/// Send `method` with `args` to `address` and wait for the answer.
pub async fn call(
    address: &str,
    method: &str,
    args: Value,
    timeout: Duration,
) -> Result<Value, ClientError> {
    let exchange = async {
        let stream = TcpStream::connect(address).await?;
        let (reader, mut writer) = stream.into_split();

        let mut request = serde_json::to_vec(&json!({ "id": 1, "method": method, "args": args }))?;
        request.push(b'\n');
        writer.write_all(&request).await?;

        let line = BufReader::new(reader)
            .lines()
            .next_line()
            .await?
            .ok_or(ClientError::Closed)?;
        Ok::<Value, ClientError>(serde_json::from_str(&line)?)
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| ClientError::Timeout(timeout))??;
    unwrap_response(response)
}

/// Split a response line into the answer or its error.
pub fn unwrap_response(mut response: Value) -> Result<Value, ClientError> {
    if let Some(error) = response.get("error") {
        return Err(ClientError::Answer {
            code: error["code"].as_i64().unwrap_or_default(),
            ex: error["ex"].as_str().unwrap_or_default().to_string(),
            raiser: error["raiser"].as_str().unwrap_or_default().to_string(),
        });
    }
    Ok(response["ok"].take())
}

fn cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn border(widths: &[usize], left: char, mid: char, right: char) -> String {
    let mut line = String::new();
    line.push(left);
    for (i, width) in widths.iter().enumerate() {
        line.push_str(&"─".repeat(width + 2));
        line.push(if i + 1 == widths.len() { right } else { mid });
    }
    line
}

fn row_line(cells: &[String], widths: &[usize]) -> String {
    let mut line = String::from("│");
    for (text, width) in cells.iter().zip(widths) {
        let pad = width - text.chars().count();
        line.push(' ');
        line.push_str(text);
        line.push_str(&" ".repeat(pad + 1));
        line.push('│');
    }
    line
}

/// Render an answer: a boxed table for row sets, a summary for writes.
pub fn render_answer(answer: &Value) -> String {
    if let Some(fields) = answer.get("fields").and_then(Value::as_array) {
        let header: Vec<String> = fields.iter().map(cell).collect();
        let rows: Vec<Vec<String>> = answer["rows"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        let cells = row.as_array().map(Vec::as_slice).unwrap_or_default();
                        (0..header.len())
                            .map(|i| cells.get(i).map(cell).unwrap_or_default())
                            .collect()
                    })
                    .collect()
            })
            .unwrap_or_default();

        let widths: Vec<usize> = (0..header.len())
            .map(|i| {
                rows.iter()
                    .map(|row| row[i].chars().count())
                    .chain(std::iter::once(header[i].chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut lines = vec![
            border(&widths, '┌', '┬', '┐'),
            row_line(&header, &widths),
            border(&widths, '├', '┼', '┤'),
        ];
        lines.extend(rows.iter().map(|row| row_line(row, &widths)));
        lines.push(border(&widths, '└', '┴', '┘'));
        lines.push(format!("{} row(s)", rows.len()));
        return lines.join("\n");
    }

    if let (Some(affected), Some(insert_id)) = (
        answer.get("affectedRows").and_then(Value::as_u64),
        answer.get("insertId").and_then(Value::as_i64),
    ) {
        return format!("Affected rows: {affected}, insert id: {insert_id}");
    }

    serde_json::to_string_pretty(answer).unwrap_or_else(|_| answer.to_string())
}
