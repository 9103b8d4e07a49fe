mod registry;
mod settings;

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use dataproof_analyzers::{
    FileSystemRepository, InMemoryEngine, MetricsRepository, RangeQuery, RepositoryError,
    ResultKey,
};
use dataproof_checks::{
    CheckStatus, SuiteError, VerificationError, VerificationOptions, VerificationSuite,
    load_suite, suite_json_schema,
};
use dataproof_core::{CsvOptions, Error as CoreError, Schema, read_csv_path};
use registry::{
    RunContext, RunOptions, init_console_logging, init_run_logging, start_run, write_report,
    write_result,
};
use settings::{CliSettings, SettingsError, load_or_create_settings};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
enum CliError {
    #[error("registry error: {0}")]
    Registry(#[from] registry::RegistryError),
    #[error("settings error: {0}")]
    Settings(#[from] SettingsError),
    #[error("core error: {0}")]
    Core(#[from] CoreError),
    #[error("suite error: {0}")]
    Suite(#[from] SuiteError),
    #[error("verification error: {0}")]
    Verification(#[from] VerificationError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("verification finished with status {0}")]
    Failed(&'static str),
}

#[derive(Parser, Debug)]
#[command(name = "dataproof", version, about = "Data quality verification")]
struct Cli {
    /// Settings file; created with defaults when missing.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Verify a CSV dataset against a suite of checks.
    Verify(VerifyArgs),
    /// Print stored repository entries as JSON.
    History(HistoryArgs),
    /// Print the JSON Schema of suite files.
    SuiteSchema,
}

#[derive(Args, Debug)]
struct VerifyArgs {
    /// CSV file with a header row.
    #[arg(long)]
    data: PathBuf,
    /// Suite file (.toml or .json).
    #[arg(long)]
    suite: PathBuf,
    /// Optional JSON schema for the CSV; types are inferred otherwise.
    #[arg(long)]
    schema: Option<PathBuf>,
    /// Output directory for runs.
    #[arg(long)]
    run_dir: Option<PathBuf>,
    /// Number of partitions to scan in parallel.
    #[arg(long)]
    partitions: Option<usize>,
    /// Metrics repository directory.
    #[arg(long)]
    repository: Option<PathBuf>,
    /// Dataset date of this run, milliseconds since the epoch.
    #[arg(long)]
    dataset_date: Option<i64>,
    /// Tag of this run, as KEY=VALUE.
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,
    /// Aggregate with states stored for these dataset dates (same tags).
    #[arg(long = "aggregate-date")]
    aggregate_dates: Vec<i64>,
    /// Save the final states under this run's key.
    #[arg(long, default_value_t = false)]
    save_states: bool,
    /// Save or append metrics under this run's key.
    #[arg(long, default_value_t = false)]
    save_results: bool,
    /// Reuse metrics already stored under this run's key.
    #[arg(long, default_value_t = false)]
    reuse_results: bool,
    /// Exit with an error when the overall status is Error.
    #[arg(long, default_value_t = false)]
    strict: bool,
}

#[derive(Args, Debug)]
struct HistoryArgs {
    /// Metrics repository directory.
    #[arg(long)]
    repository: Option<PathBuf>,
    /// Earliest dataset date, inclusive.
    #[arg(long)]
    after: Option<i64>,
    /// Latest dataset date, inclusive.
    #[arg(long)]
    before: Option<i64>,
    /// Required tag, as KEY=VALUE.
    #[arg(long = "tag", value_parser = parse_tag)]
    tags: Vec<(String, String)>,
}

fn parse_tag(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{raw}'")),
    }
}

fn main() -> Result<(), CliError> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => load_or_create_settings(path)?,
        None => CliSettings::default(),
    };

    match cli.command {
        Command::Verify(args) => run_verify(args, &settings),
        Command::History(args) => run_history(args, &settings),
        Command::SuiteSchema => {
            let schema = suite_json_schema();
            println!("{}", serde_json::to_string_pretty(&schema)?);
            Ok(())
        }
    }
}

fn result_key(date: Option<i64>, tags: &[(String, String)]) -> ResultKey {
    let key = date.map_or_else(ResultKey::now, ResultKey::new);
    tags.iter()
        .fold(key, |key, (name, value)| key.with_tag(name.clone(), value.clone()))
}

fn load_schema(path: &Path) -> Result<Schema, CliError> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

fn run_verify(args: VerifyArgs, settings: &CliSettings) -> Result<(), CliError> {
    let VerifyArgs {
        data,
        suite,
        schema,
        run_dir,
        partitions,
        repository,
        dataset_date,
        tags,
        aggregate_dates,
        save_states,
        save_results,
        reuse_results,
        strict,
    } = args;

    let run_dir = run_dir.unwrap_or_else(|| settings.run_dir.clone());
    let partitions = partitions.unwrap_or(settings.partitions);
    let repository_dir = repository.or_else(|| settings.repository.clone());
    let wants_repository =
        save_states || save_results || reuse_results || !aggregate_dates.is_empty();
    if wants_repository && repository_dir.is_none() {
        return Err(CliError::InvalidConfig(
            "--repository is required to save, reuse or aggregate results".to_string(),
        ));
    }

    let key = result_key(dataset_date, &tags);
    let aggregate_with: Vec<ResultKey> = aggregate_dates
        .iter()
        .map(|date| result_key(Some(*date), &tags))
        .collect();

    let run_id = Uuid::new_v4().to_string();
    let run_ctx = RunContext {
        run_id: run_id.clone(),
        started_at: chrono::Utc::now(),
        strict,
        run_dir,
        options: RunOptions {
            data: data.clone(),
            suite: suite.clone(),
            partitions,
            repository: repository_dir.clone(),
            result_key: wants_repository.then(|| key.clone()),
            aggregate_with: aggregate_with.clone(),
            save_states,
            save_results,
        },
    };
    let run_paths = start_run(&run_ctx)?;
    init_run_logging(&run_paths.logs_path)?;
    tracing::info!(event = "run_started", run_id = %run_id);

    let timer = Instant::now();
    let csv_options = CsvOptions {
        schema: schema.as_deref().map(load_schema).transpose()?,
        ..CsvOptions::default()
    };
    let table = read_csv_path(&data, &csv_options)?;
    tracing::info!(event = "dataset_loaded", rows = table.num_rows(), path = %data.display());

    let checks = load_suite(&suite)?.into_checks();
    tracing::info!(event = "suite_loaded", checks = checks.len(), path = %suite.display());

    let engine = if partitions == 0 {
        InMemoryEngine::default()
    } else {
        InMemoryEngine::new(partitions)
    };
    let options = VerificationOptions {
        aggregate_with,
        save_states_with: save_states.then(|| key.clone()),
        save_or_append_results_with: save_results.then(|| key.clone()),
        reuse_results_for: reuse_results.then(|| key.clone()),
        ..VerificationOptions::default()
    };

    let file_repository = repository_dir.map(FileSystemRepository::new).transpose()?;
    let mut verification = VerificationSuite::new(&engine).with_options(options);
    if let Some(repository) = &file_repository {
        verification = verification.with_repository(repository);
    }
    let result = verification.run(&table, &checks)?;

    write_result(&run_paths, &result)?;
    write_report(&run_paths, &result)?;
    tracing::info!(event = "artifacts_written", path = %run_paths.root.display());

    let duration_ms = timer.elapsed().as_millis();
    tracing::info!(
        event = "run_finished",
        status = result.status.label(),
        duration_ms = duration_ms
    );
    println!("{}: {}", result.status.label(), run_paths.report_path.display());

    if strict && result.status == CheckStatus::Error {
        return Err(CliError::Failed(result.status.label()));
    }
    Ok(())
}

fn run_history(args: HistoryArgs, settings: &CliSettings) -> Result<(), CliError> {
    init_console_logging()?;
    let root = args
        .repository
        .or_else(|| settings.repository.clone())
        .ok_or_else(|| CliError::InvalidConfig("--repository is required".to_string()))?;
    let repository = FileSystemRepository::new(root)?;

    let mut query = RangeQuery::new();
    if let Some(after) = args.after {
        query = query.after(after);
    }
    if let Some(before) = args.before {
        query = query.before(before);
    }
    for (key, value) in args.tags {
        query = query.with_tag(key, value);
    }

    let entries = repository.load_range(&query)?;
    println!("{}", serde_json::to_string_pretty(&entries)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_parse_as_key_value() {
        assert_eq!(
            parse_tag("region = eu"),
            Ok(("region".to_string(), "eu".to_string()))
        );
        assert!(parse_tag("region").is_err());
        assert!(parse_tag("=eu").is_err());
    }

    #[test]
    fn aggregate_keys_share_the_run_tags() {
        let tags = vec![("region".to_string(), "eu".to_string())];
        let key = result_key(Some(42), &tags);
        assert_eq!(key, ResultKey::new(42).with_tag("region", "eu"));
    }

    #[test]
    fn verify_flags_parse() {
        let cli = Cli::try_parse_from([
            "dataproof",
            "verify",
            "--data",
            "orders.csv",
            "--suite",
            "orders.toml",
            "--tag",
            "region=eu",
            "--aggregate-date",
            "1",
            "--aggregate-date",
            "2",
            "--strict",
        ])
        .expect("parse");
        match cli.command {
            Command::Verify(args) => {
                assert_eq!(args.aggregate_dates, vec![1, 2]);
                assert_eq!(args.tags.len(), 1);
                assert!(args.strict);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
