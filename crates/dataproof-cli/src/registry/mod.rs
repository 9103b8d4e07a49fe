//! Per-run directories holding the config, logs, metrics and report of one
//! `dataproof verify` invocation.

mod logging;
mod run;

pub use logging::{init_console_logging, init_run_logging};
pub use run::{RunContext, RunOptions, RunPaths, start_run, write_report, write_result};

use std::path::PathBuf;

use thiserror::Error;

/// Failures while recording a run; each names the artifact involved.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("cannot create run directory {}: {source}", path.display())]
    RunDirectory {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot write run artifact {}: {source}", path.display())]
    Artifact {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot encode run artifact {}: {source}", path.display())]
    Encode {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("cannot install run logging: {0}")]
    Logging(String),
}

impl RegistryError {
    fn artifact(path: &std::path::Path) -> impl FnOnce(std::io::Error) -> Self + '_ {
        move |source| RegistryError::Artifact {
            path: path.to_path_buf(),
            source,
        }
    }
}

pub type RegistryResult<T> = std::result::Result<T, RegistryError>;
