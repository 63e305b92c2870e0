//! CLI error types.

use entql_core::RewriteError;
use std::path::PathBuf;
use thiserror::Error;

/// Failures of a CLI run.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read query from stdin: {0}")]
    Stdin(#[source] std::io::Error),

    #[error("invalid policy file {}: {source}", path.display())]
    Policies {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("query is empty")]
    EmptyQuery,

    /// A rewrite failure, rendered against the query text.
    #[error("{rendered}")]
    Rewrite {
        rendered: String,
        #[source]
        source: RewriteError,
    },
}

impl CliError {
    pub fn rewrite(source: RewriteError, query: &str) -> Self {
        CliError::Rewrite {
            rendered: source.format_with_source(query),
            source,
        }
    }
}

impl From<RewriteError> for CliError {
    fn from(source: RewriteError) -> Self {
        CliError::Rewrite {
            rendered: source.to_string(),
            source,
        }
    }
}
