//! Basic SDK usage example.
//!
//! Registers a word-splitting graph built from the server's built-in
//! functions, invokes it, and prints the fanned-out outputs.
//!
//! Run with: cargo run --example basic_usage

use cascade_sdk::{CascadeClient, CascadeResult, GraphDefinition};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> CascadeResult<()> {
    tracing_subscriber::fmt::init();

    let client = CascadeClient::builder()
        .base_url("http://localhost:8900")
        .timeout(Duration::from_secs(30))
        .build()?;

    let health = client.health().check().await?;
    println!("Server status: {} ({})", health.status, health.version);

    println!("\nAvailable functions:");
    for function in client.graphs().functions().await? {
        println!("  {}: {}", function.fn_name, function.description);
    }

    let definition: GraphDefinition = serde_json::from_value(json!({
        "name": "shout",
        "description": "Uppercase every word of a sentence",
        "start_node": "split",
        "nodes": {
            "split": { "name": "split", "fn_name": "split_words", "input": "string", "output": "list<string>" },
            "upper": { "name": "upper", "fn_name": "uppercase", "input": "string", "output": "string" }
        },
        "edges": { "split": ["upper"] }
    }))?;

    let name = client.graphs().register(&definition).await?;
    println!("\nRegistered graph {}", name);

    let id = client
        .invocations()
        .invoke_and_wait(&name, json!("typed graphs fan out"), Duration::from_secs(10))
        .await?;

    let summary = client.invocations().get(&name, id).await?;
    println!("Invocation {}: {:?}, {} runs", id, summary.status, summary.runs_created);

    let outputs = client.invocations().outputs(&name, id, "upper").await?;
    for (output, record) in outputs.outputs.iter().zip(&outputs.records) {
        println!("  #{} {} (sha256 {})", record.index, output, record.payload_sha256.0);
    }

    client.graphs().delete(&name).await?;
    Ok(())
}
