use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};
use modelbase::core::{PrimaryKey, StorageMode, Value};
use modelbase::query::{Filter, PageRequest, QueryBuilder, QueryPlan, scan, sql};
use modelbase::schema::{Field, Schema, SchemaFile};
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "modelbase-schema")]
#[command(about = "Developer tooling for modelbase schema files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fields, families, indexes, key and bookkeeping fields
    Describe {
        #[arg(long)]
        schema: PathBuf,
        /// Only the schema stored in this table
        #[arg(long)]
        table: Option<String>,
    },
    /// Wide-column table options as JSON
    TableConfig {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        table: Option<String>,
    },
    /// Selected index and the compiled statement or scan filter
    Plan {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        table: Option<String>,
        /// `key=value`, where key may carry an operator suffix such as `age__gte`
        #[arg(long = "filter")]
        filters: Vec<String>,
        #[arg(long)]
        cursor: Option<String>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        asc: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Describe { schema, table } => {
            for schema in load(&schema, table.as_deref())? {
                describe(&schema);
            }
            Ok(())
        }
        Command::TableConfig { schema, table } => {
            let mut tables = serde_json::Map::new();
            for schema in load(&schema, table.as_deref())? {
                if schema.mode() != StorageMode::WideColumn {
                    continue;
                }
                let options = serde_json::to_value(schema.table_options())
                    .context("Failed to encode table options")?;
                tables.insert(schema.table().to_string(), options);
            }
            println!("{}", serde_json::to_string_pretty(&Json::Object(tables))?);
            Ok(())
        }
        Command::Plan {
            schema,
            table,
            filters,
            cursor,
            limit,
            asc,
        } => {
            let schemas = load(&schema, table.as_deref())?;
            let [schema] = schemas.as_slice() else {
                return Err(anyhow!(
                    "'{}' declares {} tables; pick one with --table",
                    schema.display(),
                    schemas.len()
                ));
            };
            let filter = parse_filter(&filters)?;
            let mut page = PageRequest::new().limit(limit);
            if asc {
                page = page.ascending();
            }
            if let Some(cursor) = cursor {
                page = page.cursor(parse_cursor(&cursor));
            }
            plan(schema, &filter, &page)
        }
    }
}

fn load(path: &Path, table: Option<&str>) -> Result<Vec<Arc<Schema>>> {
    let file = SchemaFile::from_path(path)
        .with_context(|| format!("Failed to read schema file '{}'", path.display()))?;
    let schemas = file
        .resolve()
        .with_context(|| format!("Invalid schema file '{}'", path.display()))?;
    let Some(table) = table else {
        return Ok(schemas);
    };
    let selected: Vec<_> = schemas.into_iter().filter(|s| s.table() == table).collect();
    if selected.is_empty() {
        return Err(anyhow!("No schema stores table '{}'", table));
    }
    Ok(selected)
}

fn field_line(field: &Field) -> String {
    let mut flags = Vec::new();
    if field.is_primary_key() {
        flags.push("primary key");
    }
    if field.is_queryable() {
        flags.push("queryable");
    }
    if field.is_mapped() {
        flags.push("mapped");
    }
    let mut line = format!("{} {}", field.qualified_name(), field.kind().name());
    if let Some(default) = field.declared_default() {
        line.push_str(&format!(" = {}", default.to_plain_json()));
    }
    if !flags.is_empty() {
        line.push_str(&format!(" [{}]", flags.join(", ")));
    }
    line
}

fn describe(schema: &Schema) {
    println!(
        "{} ({}.{}, {})",
        schema.name(),
        schema.database(),
        schema.table(),
        schema.mode()
    );
    println!("  key: {}", schema.primary_key());
    for field in schema.fields() {
        println!("  {}", field_line(field));
    }
    for family in schema.families() {
        println!("  family {}", family.name());
        for field in family.fields() {
            println!("    {}", field_line(field));
        }
    }
    for index in schema.indexes() {
        println!("  index {} ({})", index.name, index.fields.join(", "));
    }
    println!("  queryable: {}", schema.queryable().join(", "));
    let bookkeeping = [
        ("version", schema.version_field()),
        ("created", schema.create_time_field()),
        ("updated", schema.update_time_field()),
    ];
    for (label, field) in bookkeeping {
        if let Some(field) = field {
            println!("  {}: {}", label, field);
        }
    }
}

fn parse_filter(entries: &[String]) -> Result<Filter> {
    let mut filter = Filter::new();
    for entry in entries {
        let (key, raw) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("Invalid filter '{}'. Expected format: key=value", entry))?;
        let value = match serde_json::from_str::<Json>(raw) {
            Ok(json) => Value::from_plain_json(&json),
            Err(_) => Value::Text(raw.to_string()),
        };
        filter.insert(key.trim(), value);
    }
    Ok(filter)
}

fn parse_cursor(raw: &str) -> PrimaryKey {
    match raw.parse::<i64>() {
        Ok(id) => PrimaryKey::Int(id),
        Err(_) => PrimaryKey::Text(raw.to_string()),
    }
}

fn plan(schema: &Arc<Schema>, filter: &Filter, page: &PageRequest) -> Result<()> {
    let plan: QueryPlan = QueryBuilder::new(Arc::clone(schema))
        .plan(filter, page)
        .context("Failed to plan query")?;

    match &plan.index {
        Some(seek) => println!("index: {} ({})", seek.name, plan.index_fields().join(", ")),
        None => println!("index: none"),
    }

    match schema.mode() {
        StorageMode::Relational => {
            let statement = sql::select(schema.table(), &plan)?;
            println!("sql: {}", statement.sql);
            println!("params: {}", Json::Array(statement.params));
        }
        StorageMode::WideColumn => {
            let spec = scan::compile(&plan)?;
            println!("filter: {}", spec.filter.as_deref().unwrap_or("<none>"));
            println!("reversed: {}", spec.reversed);
            if let Some(limit) = spec.limit {
                println!("limit: {}", limit);
            }
        }
    }
    Ok(())
}
