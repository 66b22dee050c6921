//! # ct-cli: The "Voice" of CANTATA
//!
//! Command-line client for the analytics hub.
//!
//! - `ct save <table> <file.json>`: save one document, or a bulk array.
//! - `ct query <request.json>`: run an action synchronously.
//! - `ct submit <request.json>` / `ct poll <action> <key>`: async execution.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use ct_core::{ActionResponse, AsyncDataToken, Document};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use tabled::{Table, Tabled};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// CANTATA: a time-sharded analytics event store.
#[derive(Parser)]
#[command(name = "ct", version, about, long_about = None)]
struct Cli {
    /// Print raw JSON instead of tables.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save documents from a JSON file (an object, or an array for bulk).
    Save { table: String, file: PathBuf },

    /// Fetch documents by id.
    Get {
        table: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Run an action request synchronously.
    Query { request: PathBuf },

    /// Submit an action request for async execution and print its token.
    Submit { request: PathBuf },

    /// Poll an async token until its result is ready or failed.
    Poll {
        action: String,
        key: String,
        #[arg(long, default_value_t = 500)]
        interval_ms: u64,
        #[arg(long, default_value_t = 120)]
        attempts: u32,
    },

    /// Show the field mappings of a table.
    Mappings { table: String },

    /// Manage tables.
    Tables {
        #[command(subcommand)]
        action: TableCmd,
    },
}

#[derive(Subcommand)]
enum TableCmd {
    Create {
        name: String,
        #[arg(long, default_value_t = 15)]
        ttl_days: u32,
    },
    Get {
        name: String,
    },
    List,
}

#[derive(Tabled)]
struct DocumentRow {
    id: String,
    timestamp: String,
    data: String,
}

impl From<&Document> for DocumentRow {
    fn from(doc: &Document) -> Self {
        let timestamp = DateTime::<Utc>::from_timestamp_millis(doc.timestamp)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
            .unwrap_or_else(|| doc.timestamp.to_string());
        Self {
            id: doc.id.clone(),
            timestamp,
            data: doc.data.to_string(),
        }
    }
}

fn documents_table(docs: &[Document]) -> String {
    Table::new(docs.iter().map(DocumentRow::from)).to_string()
}

/// Hub URL for a path under `base_url`, each segment percent-encoded.
fn endpoint(base_url: &str, segments: &[&str]) -> CliResult<Url> {
    let mut url = Url::parse(base_url)?;
    url.path_segments_mut()
        .map_err(|_| format!("{} cannot be used as a base URL", base_url))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

fn multi_get_url(base_url: &str, table: &str, ids: &[String]) -> CliResult<Url> {
    let mut url = endpoint(base_url, &["document", table])?;
    {
        let mut query = url.query_pairs_mut();
        for id in ids {
            query.append_pair("id", id);
        }
    }
    Ok(url)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let client = reqwest::Client::new();
    let base_url =
        std::env::var("CT_BASE_URL").unwrap_or_else(|_| "http://127.0.0.1:4000".to_string());

    match cli.command {
        Commands::Save { table, file } => {
            let payload: Value = serde_json::from_str(&std::fs::read_to_string(&file)?)?;
            let url = if payload.is_array() {
                endpoint(&base_url, &["document", &table, "bulk"])?
            } else {
                endpoint(&base_url, &["document", &table])?
            };
            let resp = client.post(url).json(&payload).send().await?;
            let body = expect_ok(resp).await?;
            if cli.json {
                print_json(&body)?;
            } else {
                println!("Saved to {}", table);
            }
        }

        Commands::Get { table, ids } => {
            let url = if ids.len() == 1 {
                endpoint(&base_url, &["document", &table, &ids[0]])?
            } else {
                multi_get_url(&base_url, &table, &ids)?
            };
            let body = expect_ok(client.get(url).send().await?).await?;
            if cli.json {
                print_json(&body)?;
            } else {
                let docs: Vec<Document> = if body.is_array() {
                    serde_json::from_value(body)?
                } else {
                    vec![serde_json::from_value(body)?]
                };
                println!("{}", documents_table(&docs));
            }
        }

        Commands::Query { request } => {
            let payload: Value = serde_json::from_str(&std::fs::read_to_string(&request)?)?;
            let url = endpoint(&base_url, &["analytics"])?;
            let body = expect_ok(client.post(url).json(&payload).send().await?).await?;
            print_response(body, cli.json)?;
        }

        Commands::Submit { request } => {
            let payload: Value = serde_json::from_str(&std::fs::read_to_string(&request)?)?;
            let url = endpoint(&base_url, &["async", "analytics"])?;
            let body = expect_ok(client.post(url).json(&payload).send().await?).await?;
            let token: AsyncDataToken = serde_json::from_value(body)?;
            if cli.json {
                print_json(&serde_json::to_value(&token)?)?;
            } else {
                println!("{} {}", token.action, token.key);
            }
        }

        Commands::Poll {
            action,
            key,
            interval_ms,
            attempts,
        } => {
            let url = endpoint(&base_url, &["async", &action, &key])?;
            for _ in 0..attempts {
                let resp = client.get(url.clone()).send().await?;
                if resp.status() == StatusCode::ACCEPTED {
                    tokio::time::sleep(Duration::from_millis(interval_ms)).await;
                    continue;
                }
                let body = expect_ok(resp).await?;
                return print_response(body, cli.json);
            }
            return Err(format!("{} {} still pending after {} polls", action, key, attempts).into());
        }

        Commands::Mappings { table } => {
            let url = endpoint(&base_url, &["mappings", &table])?;
            let body = expect_ok(client.get(url).send().await?).await?;
            print_json(&body)?;
        }

        Commands::Tables { action } => match action {
            TableCmd::Create { name, ttl_days } => {
                let url = endpoint(&base_url, &["tables"])?;
                let payload = serde_json::json!({ "name": name, "ttl_days": ttl_days });
                let body = expect_ok(client.post(url).json(&payload).send().await?).await?;
                print_json(&body)?;
            }
            TableCmd::Get { name } => {
                let url = endpoint(&base_url, &["tables", &name])?;
                let body = expect_ok(client.get(url).send().await?).await?;
                print_json(&body)?;
            }
            TableCmd::List => {
                let url = endpoint(&base_url, &["tables"])?;
                let body = expect_ok(client.get(url).send().await?).await?;
                print_json(&body)?;
            }
        },
    }
    Ok(())
}

/// Body of a successful response, or an error carrying the hub's error code.
async fn expect_ok(resp: reqwest::Response) -> CliResult<Value> {
    let status = resp.status();
    let body = resp.json::<Value>().await.unwrap_or(Value::Null);
    if status.is_success() {
        return Ok(body);
    }
    let code = body
        .get("error")
        .or_else(|| body.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");
    Err(format!("{} ({})", code, status).into())
}

fn print_json(body: &Value) -> CliResult<()> {
    println!("{}", serde_json::to_string_pretty(body)?);
    Ok(())
}

fn print_response(body: Value, json: bool) -> CliResult<()> {
    if json {
        return print_json(&body);
    }
    match serde_json::from_value::<ActionResponse>(body.clone()) {
        Ok(ActionResponse::Query { documents }) => {
            println!("{}", documents_table(&documents));
            Ok(())
        }
        _ => print_json(&body),
    }
}
