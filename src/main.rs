//! querykit - Main entry point.
//!
//! Loads a settings file and runs one read-only command against it,
//! printing the result as JSON on stdout.

use querykit::config::{Command, Config, OutputFormat, Settings};
use querykit::models::QueryParam;
use querykit::{Database, QueryBuilder};
use serde::Serialize;
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging. Logs go to stderr.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_json<T: Serialize>(value: &T, format: OutputFormat) -> Result<(), serde_json::Error> {
    let text = match format {
        OutputFormat::Pretty => serde_json::to_string_pretty(value)?,
        OutputFormat::Compact => serde_json::to_string(value)?,
    };
    println!("{text}");
    Ok(())
}

fn builder_for(db: &Database, connection: Option<&str>, table: &str) -> QueryBuilder {
    match connection {
        Some(name) => db.query(name, table),
        None => db.table(table),
    }
}

/// Numeric cursors are bound as integers, anything else as text.
fn parse_cursor(raw: &str) -> QueryParam {
    raw.parse::<i64>()
        .map(QueryParam::Int)
        .unwrap_or_else(|_| QueryParam::String(raw.to_string()))
}

async fn run(db: &Database, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    match &config.command {
        Command::Connections => {
            let connections = db.manager().list_connections().await;
            print_json(&connections, config.output)?;
        }
        Command::Count { table, connection } => {
            let count = builder_for(db, connection.as_deref(), table).count().await?;
            print_json(&json!({ "table": table, "count": count }), config.output)?;
        }
        Command::Page {
            table,
            page,
            per_page,
            order_by,
            connection,
        } => {
            let mut builder = builder_for(db, connection.as_deref(), table);
            if let Some(column) = order_by {
                builder = builder.order_by(column);
            }
            let result = builder.paginate(*page, *per_page).await?;
            print_json(&result, config.output)?;
        }
        Command::Cursor {
            table,
            column,
            cursor,
            per_page,
            desc,
            connection,
        } => {
            let cursor = cursor.as_deref().map(parse_cursor);
            let result = builder_for(db, connection.as_deref(), table)
                .cursor_paginate(column, cursor, *per_page, *desc)
                .await?;
            print_json(&result, config.output)?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse_args();

    // Logging stays off unless requested so stdout carries only results
    if config.enable_logs {
        init_tracing(&config);
    }

    info!(
        settings = %config.config.display(),
        "Starting querykit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let settings = Settings::load(&config.config)?;
    let db = Database::from_settings(&settings).await?;

    let result = run(&db, &config).await;
    db.manager().close_all().await;

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        return Err(e);
    }
    Ok(())
}
