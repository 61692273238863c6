use std::path::PathBuf;
use thiserror::Error;

use crate::probe::ProbeError;

/// Errors that abort the run before any job is executed.
#[derive(Debug, Error)]
pub enum FatalError {
    #[error("invalid arguments: {0}")]
    Config(String),

    #[error("cannot access {}: {source}", .path.display())]
    Access {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("required tool '{0}' was not found on PATH")]
    DependencyMissing(String),
}

/// Errors scoped to a single job. They are counted in the summary and the
/// rest of the batch keeps going unless --fail-fast was given.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Probe(#[from] ProbeError),

    #[error("{program} failed ({}): {detail}", describe_exit(.code))]
    Tool {
        program: String,
        code: Option<i32>,
        detail: String,
    },

    #[error("command succeeded but produced no output file")]
    MissingOutput,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "killed by signal".to_string(),
    }
}
