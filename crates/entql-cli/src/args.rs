//! Command-line arguments.

use crate::output::OutputFormat;
use clap::Parser;
use entql_core::Value;
use std::path::PathBuf;

/// ENTQL query rewriter
#[derive(Parser, Debug)]
#[command(name = "entql")]
#[command(version, about = "Rewrite ENTQL queries with tenant, soft-delete and row-level criteria")]
pub struct Args {
    /// Schema file (JSON)
    #[arg(short, long)]
    pub schema: PathBuf,

    /// Engine configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Query text; read from stdin when omitted
    #[arg(short, long)]
    pub query: Option<String>,

    /// Query parameter as name=value; JSON values are typed, anything else is a string
    #[arg(short, long = "param", value_parser = parse_assignment)]
    pub params: Vec<(String, Value)>,

    /// Current tenant; the schema's sentinel is used when omitted
    #[arg(short, long)]
    pub tenant: Option<String>,

    /// Current principal
    #[arg(long, default_value = "anonymous")]
    pub principal: String,

    /// Security-context attribute as name=value
    #[arg(short, long = "attribute", value_parser = parse_assignment)]
    pub attributes: Vec<(String, Value)>,

    /// Run as an admin context (bypasses row-level policies)
    #[arg(long)]
    pub admin: bool,

    /// Hide soft-deleted rows
    #[arg(long)]
    pub soft_delete: bool,

    /// Do not apply the tenant criterion
    #[arg(long)]
    pub no_tenant: bool,

    /// Row-level policy file (JSON array)
    #[arg(long)]
    pub policies: Option<PathBuf>,

    /// Report the select-list position of this path, e.g. e.id
    #[arg(long)]
    pub position: Option<String>,

    /// Output format
    #[arg(long, default_value = "text", value_enum)]
    pub format: OutputFormat,
}

/// Parse `name=value`.
pub fn parse_assignment(arg: &str) -> Result<(String, Value), String> {
    let (name, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{}'", arg))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("missing name in '{}'", arg));
    }
    let value = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(json) => Value::from_json(&json),
        Err(_) => Value::from(raw),
    };
    Ok((name.to_string(), value))
}
