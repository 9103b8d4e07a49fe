use std::collections::HashSet;
use std::fs;
use std::path::Path;

use jsonschema::JSONSchema;
use schemars::JsonSchema;
use schemars::schema::RootSchema;
use schemars::schema_for;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use dataproof_analyzers::state::DataTypeClass;

use crate::check::{Check, CheckLevel};
use crate::constraint::Assertion;
use crate::error::{IssueSeverity, SuiteError, ValidationIssue, ValidationReport};

/// Declarative list of checks, loaded from TOML or JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct SuiteConfig {
    #[serde(default)]
    pub name: Option<String>,
    pub checks: Vec<CheckConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct CheckConfig {
    pub description: String,
    pub level: CheckLevel,
    #[serde(default)]
    pub stop_on_failure: bool,
    pub constraints: Vec<ConstraintConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ConstraintConfig {
    #[serde(flatten)]
    pub spec: ConstraintSpec,
    /// Row filter the constraint's analyzers apply.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssertionConfig {
    Equals(f64),
    AtLeast(f64),
    AtMost(f64),
    GreaterThan(f64),
    LessThan(f64),
    Between { min: f64, max: f64 },
}

impl From<AssertionConfig> for Assertion {
    fn from(config: AssertionConfig) -> Self {
        match config {
            AssertionConfig::Equals(value) => Assertion::Equals(value),
            AssertionConfig::AtLeast(value) => Assertion::AtLeast(value),
            AssertionConfig::AtMost(value) => Assertion::AtMost(value),
            AssertionConfig::GreaterThan(value) => Assertion::GreaterThan(value),
            AssertionConfig::LessThan(value) => Assertion::LessThan(value),
            AssertionConfig::Between { min, max } => Assertion::Between { min, max },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum DataTypeConfig {
    Unknown,
    Integral,
    Fractional,
    Boolean,
    String,
}

impl From<DataTypeConfig> for DataTypeClass {
    fn from(config: DataTypeConfig) -> Self {
        match config {
            DataTypeConfig::Unknown => DataTypeClass::Unknown,
            DataTypeConfig::Integral => DataTypeClass::Integral,
            DataTypeConfig::Fractional => DataTypeClass::Fractional,
            DataTypeConfig::Boolean => DataTypeClass::Boolean,
            DataTypeConfig::String => DataTypeClass::String,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConstraintSpec {
    HasSize { assertion: AssertionConfig },
    IsComplete { column: String },
    HasCompleteness { column: String, assertion: AssertionConfig },
    IsUnique { column: String },
    IsPrimaryKey { columns: Vec<String> },
    HasUniqueness { columns: Vec<String>, assertion: AssertionConfig },
    HasDistinctness { columns: Vec<String>, assertion: AssertionConfig },
    HasUniqueValueRatio { columns: Vec<String>, assertion: AssertionConfig },
    HasNumberOfDistinctValues { column: String, assertion: AssertionConfig },
    HasHistogramBinRatio { column: String, bin: String, assertion: AssertionConfig },
    HasEntropy { column: String, assertion: AssertionConfig },
    HasMutualInformation { first: String, second: String, assertion: AssertionConfig },
    HasApproxQuantile { column: String, quantile: f64, assertion: AssertionConfig },
    HasApproxCountDistinct { column: String, assertion: AssertionConfig },
    HasMin { column: String, assertion: AssertionConfig },
    HasMax { column: String, assertion: AssertionConfig },
    HasMean { column: String, assertion: AssertionConfig },
    HasSum { column: String, assertion: AssertionConfig },
    HasStandardDeviation { column: String, assertion: AssertionConfig },
    HasMinLength { column: String, assertion: AssertionConfig },
    HasMaxLength { column: String, assertion: AssertionConfig },
    HasCorrelation { first: String, second: String, assertion: AssertionConfig },
    Satisfies { predicate: String, name: String, assertion: AssertionConfig },
    HasPattern { column: String, pattern: String, assertion: AssertionConfig },
    ContainsEmail { column: String, assertion: AssertionConfig },
    ContainsUrl { column: String, assertion: AssertionConfig },
    IsNonNegative { column: String },
    IsPositive { column: String },
    IsContainedIn { column: String, allowed: Vec<String> },
    IsContainedInRange { column: String, lower: f64, upper: f64 },
    HasDataType { column: String, data_type: DataTypeConfig, assertion: AssertionConfig },
}

fn refs(columns: &[String]) -> Vec<&str> {
    columns.iter().map(String::as_str).collect()
}

impl ConstraintSpec {
    fn apply(&self, check: Check) -> Check {
        match self {
            ConstraintSpec::HasSize { assertion } => check.has_size((*assertion).into()),
            ConstraintSpec::IsComplete { column } => check.is_complete(column),
            ConstraintSpec::HasCompleteness { column, assertion } => {
                check.has_completeness(column, (*assertion).into())
            }
            ConstraintSpec::IsUnique { column } => check.is_unique(column),
            ConstraintSpec::IsPrimaryKey { columns } => check.is_primary_key(&refs(columns)),
            ConstraintSpec::HasUniqueness { columns, assertion } => {
                check.has_uniqueness(&refs(columns), (*assertion).into())
            }
            ConstraintSpec::HasDistinctness { columns, assertion } => {
                check.has_distinctness(&refs(columns), (*assertion).into())
            }
            ConstraintSpec::HasUniqueValueRatio { columns, assertion } => {
                check.has_unique_value_ratio(&refs(columns), (*assertion).into())
            }
            ConstraintSpec::HasNumberOfDistinctValues { column, assertion } => {
                check.has_number_of_distinct_values(column, (*assertion).into())
            }
            ConstraintSpec::HasHistogramBinRatio {
                column,
                bin,
                assertion,
            } => check.has_histogram_bin_ratio(column, bin, (*assertion).into()),
            ConstraintSpec::HasEntropy { column, assertion } => {
                check.has_entropy(column, (*assertion).into())
            }
            ConstraintSpec::HasMutualInformation {
                first,
                second,
                assertion,
            } => check.has_mutual_information(first, second, (*assertion).into()),
            ConstraintSpec::HasApproxQuantile {
                column,
                quantile,
                assertion,
            } => check.has_approx_quantile(column, *quantile, (*assertion).into()),
            ConstraintSpec::HasApproxCountDistinct { column, assertion } => {
                check.has_approx_count_distinct(column, (*assertion).into())
            }
            ConstraintSpec::HasMin { column, assertion } => {
                check.has_min(column, (*assertion).into())
            }
            ConstraintSpec::HasMax { column, assertion } => {
                check.has_max(column, (*assertion).into())
            }
            ConstraintSpec::HasMean { column, assertion } => {
                check.has_mean(column, (*assertion).into())
            }
            ConstraintSpec::HasSum { column, assertion } => {
                check.has_sum(column, (*assertion).into())
            }
            ConstraintSpec::HasStandardDeviation { column, assertion } => {
                check.has_standard_deviation(column, (*assertion).into())
            }
            ConstraintSpec::HasMinLength { column, assertion } => {
                check.has_min_length(column, (*assertion).into())
            }
            ConstraintSpec::HasMaxLength { column, assertion } => {
                check.has_max_length(column, (*assertion).into())
            }
            ConstraintSpec::HasCorrelation {
                first,
                second,
                assertion,
            } => check.has_correlation(first, second, (*assertion).into()),
            ConstraintSpec::Satisfies {
                predicate,
                name,
                assertion,
            } => check.satisfies(predicate, name, (*assertion).into()),
            ConstraintSpec::HasPattern {
                column,
                pattern,
                assertion,
            } => check.has_pattern(column, pattern, (*assertion).into()),
            ConstraintSpec::ContainsEmail { column, assertion } => {
                check.contains_email(column, (*assertion).into())
            }
            ConstraintSpec::ContainsUrl { column, assertion } => {
                check.contains_url(column, (*assertion).into())
            }
            ConstraintSpec::IsNonNegative { column } => check.is_non_negative(column),
            ConstraintSpec::IsPositive { column } => check.is_positive(column),
            ConstraintSpec::IsContainedIn { column, allowed } => {
                check.is_contained_in(column, &refs(allowed))
            }
            ConstraintSpec::IsContainedInRange {
                column,
                lower,
                upper,
            } => check.is_contained_in_range(column, *lower, *upper),
            ConstraintSpec::HasDataType {
                column,
                data_type,
                assertion,
            } => check.has_data_type(column, (*data_type).into(), (*assertion).into()),
        }
    }

    fn assertion(&self) -> Option<AssertionConfig> {
        match self {
            ConstraintSpec::HasSize { assertion }
            | ConstraintSpec::HasCompleteness { assertion, .. }
            | ConstraintSpec::HasUniqueness { assertion, .. }
            | ConstraintSpec::HasDistinctness { assertion, .. }
            | ConstraintSpec::HasUniqueValueRatio { assertion, .. }
            | ConstraintSpec::HasNumberOfDistinctValues { assertion, .. }
            | ConstraintSpec::HasHistogramBinRatio { assertion, .. }
            | ConstraintSpec::HasEntropy { assertion, .. }
            | ConstraintSpec::HasMutualInformation { assertion, .. }
            | ConstraintSpec::HasApproxQuantile { assertion, .. }
            | ConstraintSpec::HasApproxCountDistinct { assertion, .. }
            | ConstraintSpec::HasMin { assertion, .. }
            | ConstraintSpec::HasMax { assertion, .. }
            | ConstraintSpec::HasMean { assertion, .. }
            | ConstraintSpec::HasSum { assertion, .. }
            | ConstraintSpec::HasStandardDeviation { assertion, .. }
            | ConstraintSpec::HasMinLength { assertion, .. }
            | ConstraintSpec::HasMaxLength { assertion, .. }
            | ConstraintSpec::HasCorrelation { assertion, .. }
            | ConstraintSpec::Satisfies { assertion, .. }
            | ConstraintSpec::HasPattern { assertion, .. }
            | ConstraintSpec::ContainsEmail { assertion, .. }
            | ConstraintSpec::ContainsUrl { assertion, .. }
            | ConstraintSpec::HasDataType { assertion, .. } => Some(*assertion),
            _ => None,
        }
    }

    fn column_lists(&self) -> Vec<&[String]> {
        match self {
            ConstraintSpec::IsPrimaryKey { columns }
            | ConstraintSpec::HasUniqueness { columns, .. }
            | ConstraintSpec::HasDistinctness { columns, .. }
            | ConstraintSpec::HasUniqueValueRatio { columns, .. } => vec![columns.as_slice()],
            ConstraintSpec::IsContainedIn { allowed, .. } => vec![allowed.as_slice()],
            _ => Vec::new(),
        }
    }
}

impl ConstraintConfig {
    fn apply(&self, check: Check) -> Check {
        let mut check = self.spec.apply(check);
        if let Some(filter) = &self.filter {
            check = check.where_filter(filter);
        }
        if let Some(hint) = &self.hint {
            check = check.with_hint(hint.clone());
        }
        check
    }
}

impl CheckConfig {
    pub fn to_check(&self) -> Check {
        let check = Check::new(self.level, self.description.clone());
        let check = self
            .constraints
            .iter()
            .fold(check, |check, constraint| constraint.apply(check));
        if self.stop_on_failure {
            check.stop_on_failure()
        } else {
            check
        }
    }
}

impl SuiteConfig {
    pub fn into_checks(self) -> Vec<Check> {
        self.checks.iter().map(CheckConfig::to_check).collect()
    }
}

/// Emit the JSON Schema for suite files.
pub fn suite_json_schema() -> RootSchema {
    schema_for!(SuiteConfig)
}

/// Validate a suite JSON document against the suite JSON Schema.
pub fn validate_suite_json(suite_json: &Value) -> Result<ValidationReport, SuiteError> {
    let schema = serde_json::to_value(suite_json_schema())?;
    let compiled = JSONSchema::compile(&schema).map_err(|err| SuiteError::Schema(err.to_string()))?;

    let mut report = ValidationReport::default();
    if let Err(errors) = compiled.validate(suite_json) {
        for error in errors {
            let path = normalized_json_pointer(&error.instance_path.to_string());
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "schema_violation",
                path,
                error.to_string(),
                None,
            ));
        }
    }
    Ok(report)
}

/// Checks the JSON Schema cannot express.
pub fn validate_suite(suite: &SuiteConfig) -> ValidationReport {
    let mut report = ValidationReport::default();
    if suite.checks.is_empty() {
        report.push_warning(ValidationIssue::new(
            IssueSeverity::Warning,
            "empty_suite",
            "/checks",
            "suite declares no checks",
            None,
        ));
    }

    let mut descriptions = HashSet::new();
    for (check_index, check) in suite.checks.iter().enumerate() {
        let check_path = format!("/checks/{check_index}");
        if !descriptions.insert(check.description.as_str()) {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "duplicate_check",
                format!("{check_path}/description"),
                format!("check '{}' is declared more than once", check.description),
                Some("give each check a distinct description".to_string()),
            ));
        }
        if check.constraints.is_empty() {
            report.push_warning(ValidationIssue::new(
                IssueSeverity::Warning,
                "empty_check",
                format!("{check_path}/constraints"),
                format!("check '{}' has no constraints", check.description),
                None,
            ));
        }
        for (index, constraint) in check.constraints.iter().enumerate() {
            validate_constraint(
                &constraint.spec,
                &format!("{check_path}/constraints/{index}"),
                &mut report,
            );
        }
    }
    report
}

fn validate_constraint(spec: &ConstraintSpec, path: &str, report: &mut ValidationReport) {
    if let Some(AssertionConfig::Between { min, max }) = spec.assertion() {
        if min > max {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "empty_range",
                format!("{path}/assertion/between"),
                format!("between bounds are reversed: {min} > {max}"),
                Some("swap min and max".to_string()),
            ));
        }
    }
    for list in spec.column_lists() {
        if list.is_empty() {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "empty_list",
                path.to_string(),
                "constraint needs at least one entry",
                None,
            ));
        }
    }
    match spec {
        ConstraintSpec::HasApproxQuantile { quantile, .. } if !(0.0..=1.0).contains(quantile) => {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "quantile_out_of_range",
                format!("{path}/quantile"),
                format!("quantile {quantile} is outside [0, 1]"),
                None,
            ));
        }
        ConstraintSpec::IsContainedInRange { lower, upper, .. } if lower > upper => {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "empty_range",
                format!("{path}/lower"),
                format!("range bounds are reversed: {lower} > {upper}"),
                Some("swap lower and upper".to_string()),
            ));
        }
        _ => {}
    }
}

/// Parse a suite document, validating structure first and semantics second.
pub fn parse_suite(suite_json: Value) -> Result<SuiteConfig, SuiteError> {
    let mut report = validate_suite_json(&suite_json)?;
    if !report.is_ok() {
        return Err(SuiteError::Invalid(report));
    }
    let suite: SuiteConfig = match serde_json::from_value(suite_json) {
        Ok(suite) => suite,
        Err(err) => {
            report.push_error(ValidationIssue::new(
                IssueSeverity::Error,
                "invalid_suite_json",
                "/",
                err.to_string(),
                None,
            ));
            return Err(SuiteError::Invalid(report));
        }
    };
    report.merge(validate_suite(&suite));
    if !report.is_ok() {
        return Err(SuiteError::Invalid(report));
    }
    for issue in &report.warnings {
        warn!(path = %issue.path, code = %issue.code, "{}", issue.message);
    }
    Ok(suite)
}

/// Load a `.toml` or `.json` suite file.
pub fn load_suite(path: &Path) -> Result<SuiteConfig, SuiteError> {
    let text = fs::read_to_string(path)?;
    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let document: Value = match extension.as_str() {
        "toml" => toml::from_str(&text)?,
        "json" => serde_json::from_str(&text)?,
        other => return Err(SuiteError::UnsupportedFormat(other.to_string())),
    };
    debug!(path = %path.display(), "suite loaded");
    parse_suite(document)
}

fn normalized_json_pointer(pointer: &str) -> String {
    if pointer.is_empty() {
        "/".to_string()
    } else {
        pointer.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn constraint_specs_build_checks() {
        let suite: SuiteConfig = serde_json::from_value(json!({
            "checks": [{
                "description": "orders",
                "level": "error",
                "constraints": [
                    { "kind": "has_size", "assertion": { "at_least": 1 } },
                    { "kind": "is_complete", "column": "id", "filter": "id > 0" },
                    { "kind": "has_data_type", "column": "id", "data_type": "integral",
                      "assertion": { "equals": 1.0 } }
                ]
            }]
        }))
        .expect("suite");
        let checks = suite.into_checks();
        assert_eq!(checks.len(), 1);
        assert_eq!(checks[0].constraints().len(), 3);
        assert_eq!(checks[0].constraints()[1].analyzers[0].filter(), Some("id > 0"));
    }

    #[test]
    fn reversed_range_is_rejected() {
        let err = parse_suite(json!({
            "checks": [{
                "description": "amounts",
                "level": "warning",
                "constraints": [
                    { "kind": "has_mean", "column": "amount",
                      "assertion": { "between": { "min": 5.0, "max": 1.0 } } }
                ]
            }]
        }))
        .expect_err("invalid");
        match err {
            SuiteError::Invalid(report) => {
                assert_eq!(report.errors[0].code, "empty_range");
                assert_eq!(report.errors[0].path, "/checks/0/constraints/0/assertion/between");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }
}
