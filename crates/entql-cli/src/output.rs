//! Output formatters for rewrite results.

use clap::ValueEnum;
use entql_core::{ExpressionPosition, ParameterMap, RewrittenQuery};
use serde_json::json;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Query text followed by one parameter per line
    Text,
    /// JSON object
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Trait for formatting output.
pub trait Formatter {
    /// Format a rewritten query, with the position lookup if one was requested.
    fn format_rewrite(
        &self,
        result: &RewrittenQuery,
        position: Option<(&str, Option<ExpressionPosition>)>,
    ) -> String;

    /// Format an error message.
    fn format_error(&self, error: &str) -> String;
}

/// Create a formatter for the given output format.
pub fn create_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter),
    }
}

/// Plain text formatter.
pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_rewrite(
        &self,
        result: &RewrittenQuery,
        position: Option<(&str, Option<ExpressionPosition>)>,
    ) -> String {
        let mut output = result.text.clone();

        for (name, binding) in result.parameters.iter() {
            output.push_str(&format!("\n  :{} = {} ({})", name, binding.value, binding.origin));
        }

        if let Some((path, found)) = position {
            match found {
                Some(p) if p.is_aggregate => output.push_str(&format!(
                    "\n{} is select item {} (aggregate)",
                    path, p.index
                )),
                Some(p) => output.push_str(&format!("\n{} is select item {}", path, p.index)),
                None => output.push_str(&format!("\n{} is not in the select list", path)),
            }
        }

        output
    }

    fn format_error(&self, error: &str) -> String {
        error.to_string()
    }
}

/// JSON formatter.
pub struct JsonFormatter;

fn parameters_json(parameters: &ParameterMap) -> serde_json::Value {
    serde_json::Value::Array(
        parameters
            .iter()
            .map(|(name, binding)| {
                json!({
                    "name": name,
                    "value": binding.value.to_json(),
                    "type": binding.declared_type.map(|t| t.name()),
                    "origin": binding.origin.to_string(),
                })
            })
            .collect(),
    )
}

impl Formatter for JsonFormatter {
    fn format_rewrite(
        &self,
        result: &RewrittenQuery,
        position: Option<(&str, Option<ExpressionPosition>)>,
    ) -> String {
        let mut output = json!({
            "query": result.text,
            "parameters": parameters_json(&result.parameters),
            "criteria": result.model.applied_criteria().iter().collect::<Vec<_>>(),
        });

        if let Some((path, found)) = position {
            output["position"] = json!({
                "path": path,
                "index": found.map(|p| p.index),
                "aggregate": found.map(|p| p.is_aggregate),
            });
        }

        serde_json::to_string_pretty(&output).unwrap_or_else(|_| output.to_string())
    }

    fn format_error(&self, error: &str) -> String {
        json!({ "error": error }).to_string()
    }
}
