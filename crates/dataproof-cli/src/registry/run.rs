use std::fs::{OpenOptions, create_dir_all};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use chrono::{DateTime, Utc};
use serde::Serialize;

use dataproof_analyzers::ResultKey;
use dataproof_checks::{VerificationResult, render_report};

use super::{RegistryError, RegistryResult};

/// Serializable options for runs.
#[derive(Debug, Clone, Serialize)]
pub struct RunOptions {
    pub data: PathBuf,
    pub suite: PathBuf,
    pub partitions: usize,
    pub repository: Option<PathBuf>,
    pub result_key: Option<ResultKey>,
    pub aggregate_with: Vec<ResultKey>,
    pub save_states: bool,
    pub save_results: bool,
}

/// Metadata captured at run start.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub strict: bool,
    pub run_dir: PathBuf,
    pub options: RunOptions,
}

/// JSON config written to each run directory.
#[derive(Debug, Serialize)]
pub struct RunConfig {
    pub run_id: String,
    pub started_at: String,
    pub strict: bool,
    pub options: RunOptions,
    pub git: GitInfo,
}

/// Git metadata for reproducibility.
#[derive(Debug, Serialize)]
pub struct GitInfo {
    pub commit: Option<String>,
    pub dirty: Option<bool>,
}

/// Paths for run artifacts.
#[derive(Debug, Clone)]
pub struct RunPaths {
    pub root: PathBuf,
    pub logs_path: PathBuf,
    pub metrics_path: PathBuf,
    pub report_path: PathBuf,
}

pub fn start_run(ctx: &RunContext) -> RegistryResult<RunPaths> {
    let timestamp = ctx.started_at.format("%Y-%m-%dT%H-%M-%SZ").to_string();
    let root = ctx.run_dir.join(format!("{timestamp}__run_{}", ctx.run_id));

    create_dir_all(&root).map_err(|source| RegistryError::RunDirectory {
        path: root.clone(),
        source,
    })?;

    let config_path = root.join("config.json");
    let logs_path = root.join("logs.ndjson");
    let metrics_path = root.join("metrics.json");
    let report_path = root.join("report.md");

    let config = RunConfig {
        run_id: ctx.run_id.clone(),
        started_at: ctx.started_at.to_rfc3339(),
        strict: ctx.strict,
        options: ctx.options.clone(),
        git: collect_git_info(),
    };

    write_json(&config_path, &config)?;

    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&logs_path)
        .map_err(RegistryError::artifact(&logs_path))?;

    Ok(RunPaths {
        root,
        logs_path,
        metrics_path,
        report_path,
    })
}

pub fn write_result(paths: &RunPaths, result: &VerificationResult) -> RegistryResult<()> {
    write_json(&paths.metrics_path, result)
}

pub fn write_report(paths: &RunPaths, result: &VerificationResult) -> RegistryResult<()> {
    let path = &paths.report_path;
    let mut file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(RegistryError::artifact(path))?;
    file.write_all(render_report(result).as_bytes())
        .and_then(|()| file.write_all(b"\n"))
        .map_err(RegistryError::artifact(path))
}

pub fn collect_git_info() -> GitInfo {
    let commit = Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .and_then(|output| {
            if output.status.success() {
                Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
            } else {
                None
            }
        })
        .filter(|value| !value.is_empty());

    let dirty = Command::new("git")
        .args(["status", "--porcelain"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| !output.stdout.is_empty());

    GitInfo { commit, dirty }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> RegistryResult<()> {
    let file = OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
        .map_err(RegistryError::artifact(path))?;
    serde_json::to_writer_pretty(file, value).map_err(|source| RegistryError::Encode {
        path: path.to_path_buf(),
        source,
    })
}
