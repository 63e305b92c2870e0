//! ENTQL Command-Line Rewriter
//!
//! Loads a schema, rewrites one query for a security context and prints the
//! final text and parameters.

mod args;
mod error;
mod output;

use args::Args;
use clap::Parser;
use entql_core::criteria::{CriterionRegistry, RowLevelCriterion, SoftDeleteCriterion, TenantCriterion};
use entql_core::{EngineConfig, ParameterMap, RewriteEngine, SchemaBundle, SecurityContext};
use error::CliError;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entql=info".into()),
        )
        .init();

    let args = Args::parse();
    let formatter = output::create_formatter(args.format);

    match run(&args) {
        Ok(output) => println!("{}", output),
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e.to_string()));
            std::process::exit(1);
        }
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn run(args: &Args) -> Result<String, CliError> {
    let schema = SchemaBundle::from_json(&read_file(&args.schema)?)?;
    let config = match &args.config {
        Some(path) => EngineConfig::from_json(&read_file(path)?)?,
        None => EngineConfig::default(),
    };
    let registry = build_registry(args)?;
    tracing::info!(
        entities = schema.len(),
        criteria = ?registry.names(),
        "loaded schema"
    );

    let engine = RewriteEngine::new(Arc::new(schema), Arc::new(registry), config)?;

    let query = match &args.query {
        Some(query) => query.clone(),
        None => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(CliError::Stdin)?;
            buf
        }
    };
    let query = query.trim();
    if query.is_empty() {
        return Err(CliError::EmptyQuery);
    }

    let parameters: ParameterMap = args.params.iter().cloned().collect();
    let security = security_context(args);

    let result = engine
        .rewrite(query, parameters, &security)
        .map_err(|e| CliError::rewrite(e, query))?;

    let position = match &args.position {
        Some(path) => Some((
            path.as_str(),
            engine
                .position_of(&result.model, path)
                .map_err(|e| CliError::rewrite(e, path))?,
        )),
        None => None,
    };

    Ok(output::create_formatter(args.format).format_rewrite(&result, position))
}

fn build_registry(args: &Args) -> Result<CriterionRegistry, CliError> {
    let mut builder = CriterionRegistry::builder();
    if !args.no_tenant {
        builder = builder.register(TenantCriterion::new());
    }
    if args.soft_delete {
        builder = builder.register(SoftDeleteCriterion::new());
    }
    if let Some(path) = &args.policies {
        let policies: Vec<RowLevelCriterion> = serde_json::from_str(&read_file(path)?)
            .map_err(|source| CliError::Policies {
                path: path.clone(),
                source,
            })?;
        for policy in policies {
            builder = builder.register(policy);
        }
    }
    Ok(builder.build()?)
}

fn security_context(args: &Args) -> SecurityContext {
    let mut security = SecurityContext::new(args.principal.as_str());
    if let Some(tenant) = &args.tenant {
        security = security.with_tenant(tenant.as_str());
    }
    for (name, value) in &args.attributes {
        security = security.with_attribute(name.as_str(), value.clone());
    }
    if args.admin {
        security = security.as_admin();
    }
    security
}
