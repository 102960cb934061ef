use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde::Deserialize;

use sql_query_buddy::build_services;
use sql_query_buddy::config::Settings;
use sql_query_buddy::generator::SqlAnswer;
use sql_query_buddy::store::SearchHit;

#[derive(Parser)]
#[command(
    name = "sql-buddy",
    about = "SQL Query Buddy: register table metadata and turn questions into SQL"
)]
struct Cli {
    /// Output machine-readable JSON (default: human-readable)
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate SQL for a natural-language question
    Ask {
        /// The question (positional, collects remaining args)
        question: Vec<String>,
    },
    /// Register or replace a table's metadata
    AddTable {
        #[arg(long, required_unless_present = "file")]
        name: Option<String>,
        #[arg(long, required_unless_present = "file")]
        schema: Option<String>,
        #[arg(long, default_value = "")]
        description: String,
        /// JSON file with one object or an array of
        /// {"table_name", "schema_info", "description"}
        #[arg(long, conflicts_with_all = ["name", "schema"])]
        file: Option<PathBuf>,
    },
    /// List registered tables
    Tables,
    /// Show the metadata chunks closest to a query
    Search {
        query: Vec<String>,
        #[arg(long, default_value = "3")]
        top_k: usize,
    },
}

#[derive(Debug, Deserialize)]
struct TableMetadata {
    table_name: String,
    schema_info: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetadataFile {
    One(TableMetadata),
    Many(Vec<TableMetadata>),
}

impl MetadataFile {
    fn into_vec(self) -> Vec<TableMetadata> {
        match self {
            Self::One(t) => vec![t],
            Self::Many(ts) => ts,
        }
    }
}

// ============================================================================
// Output Formatting
// ============================================================================

fn print_answer(answer: &SqlAnswer) {
    println!("SQL:");
    println!("{}", answer.sql);
    println!();
    println!("Explicación:");
    println!("  {}", answer.explanation);
    println!();
    println!("Optimización:");
    println!("  {}", answer.optimization);
}

fn print_hits(hits: &[SearchHit]) {
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (chunk {}, score {:.3})",
            i + 1,
            hit.table_name,
            hit.chunk_id,
            hit.score
        );
        for line in hit.content.lines() {
            println!("     {line}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = Settings::from_env()?;
    let (rag, generator) = build_services(&settings)?;

    match cli.command {
        Command::Ask { question } => {
            let question = question.join(" ");
            if question.trim().is_empty() {
                return Err("question must not be empty".into());
            }

            let answer = match generator.generate(&question).await {
                Ok(answer) => answer,
                Err(e) => {
                    eprintln!("warning: SQL generation failed ({e})");
                    SqlAnswer::from_error(&e)
                }
            };

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
        }
        Command::AddTable {
            name,
            schema,
            description,
            file,
        } => {
            let tables = match file {
                Some(path) => {
                    let data = std::fs::read_to_string(&path)?;
                    serde_json::from_str::<MetadataFile>(&data)?.into_vec()
                }
                None => vec![TableMetadata {
                    table_name: name.unwrap_or_default(),
                    schema_info: schema.unwrap_or_default(),
                    description,
                }],
            };

            let mut results = Vec::new();
            for table in tables {
                if table.table_name.trim().is_empty() || table.schema_info.trim().is_empty() {
                    eprintln!("Skipping entry with empty table name or schema.");
                    continue;
                }
                let chunks = rag
                    .add_table_metadata(
                        table.table_name.trim(),
                        table.schema_info.trim(),
                        table.description.trim(),
                    )
                    .await?;
                if !cli.json {
                    println!("Stored table: {} ({chunks} chunks)", table.table_name.trim());
                }
                results.push(serde_json::json!({
                    "table_name": table.table_name.trim(),
                    "chunks": chunks,
                }));
            }

            if cli.json {
                println!("{}", serde_json::to_string_pretty(&results)?);
            }
        }
        Command::Tables => {
            let tables = rag.table_names().await;
            if cli.json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&serde_json::json!({
                        "tables": tables,
                        "total_count": tables.len(),
                    }))?
                );
            } else if tables.is_empty() {
                eprintln!("No tables registered.");
            } else {
                println!("Tables:");
                for table in &tables {
                    println!("  - {table}");
                }
            }
        }
        Command::Search { query, top_k } => {
            let query = query.join(" ");
            let hits = rag.search_relevant_tables(&query, top_k).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                eprintln!("No matching tables.");
            } else {
                print_hits(&hits);
            }
        }
    }

    Ok(())
}
