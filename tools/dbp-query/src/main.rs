//! dbp-query: send one statement to a DBProxy node.

use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use dbp_query::{call, render_answer, QueryArgs};

/// Send one `query` request to a DBProxy node
#[derive(Parser, Debug)]
#[command(name = "dbp-query")]
#[command(about = "Send one statement to a DBProxy node and print the answer")]
struct Args {
    /// Node host
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Node port
    #[arg(short, long, default_value = "12321")]
    port: u16,

    /// Shard key
    #[arg(long, default_value = "0")]
    hint: i64,

    /// Logical table (taken from the statement when omitted)
    #[arg(short, long)]
    table: Option<String>,

    /// Cluster scope
    #[arg(long, default_value = "")]
    cluster: String,

    /// Read from the master
    #[arg(long)]
    master: bool,

    /// Answer timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Statement
    sql: String,

    /// Values for `?` placeholders
    params: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let address = format!("{}:{}", args.host, args.port);
    let request = QueryArgs {
        hint_id: args.hint,
        table_name: args.table,
        cluster: args.cluster,
        sql: args.sql,
        master: args.master,
        params: args.params,
    };

    let started = Instant::now();
    let answer = call(
        &address,
        "query",
        request.to_json(),
        Duration::from_secs(args.timeout),
    )
    .await?;

    println!("{}", render_answer(&answer));
    println!("Elapsed: {:.3} ms", started.elapsed().as_secs_f64() * 1000.0);
    Ok(())
}
