use crate::check::CheckResult;
use crate::constraint::ConstraintStatus;
use crate::verification::VerificationResult;

/// Render a deterministic markdown report of a verification run.
pub fn render_report(result: &VerificationResult) -> String {
    let mut lines = Vec::new();

    lines.push("# Data Quality Verification Report".to_string());
    lines.push(String::new());
    lines.push("## Run summary".to_string());
    lines.push(format!("- status: {}", result.status.label()));
    lines.push(format!("- checks: {}", result.check_results.len()));
    let constraints: usize = result
        .check_results
        .iter()
        .map(|check| check.constraint_results.len())
        .sum();
    lines.push(format!("- constraints: {constraints}"));
    lines.push(format!("- metrics: {}", result.metrics.len()));
    lines.push(String::new());

    lines.push("## Checks".to_string());
    lines.push("| check | level | status | passed | failed | skipped |".to_string());
    lines.push("| --- | --- | --- | --- | --- | --- |".to_string());
    for check in &result.check_results {
        push_check_row(&mut lines, check);
    }
    lines.push(String::new());

    let messages: Vec<String> = result
        .check_results
        .iter()
        .flat_map(|check| {
            check
                .constraint_results
                .iter()
                .filter(|constraint| constraint.status != ConstraintStatus::Success)
                .map(move |constraint| {
                    let message = constraint.message.as_deref().unwrap_or("-");
                    format!(
                        "- [{}] {}: {:?}: {}",
                        check.description, constraint.constraint, constraint.status, message
                    )
                })
        })
        .collect();
    if !messages.is_empty() {
        lines.push("## Constraint messages".to_string());
        lines.extend(messages);
        lines.push(String::new());
    }

    lines.push("## Metrics".to_string());
    lines.push("| entity | instance | name | value |".to_string());
    lines.push("| --- | --- | --- | --- |".to_string());
    for row in result.metric_rows() {
        lines.push(format!(
            "| {} | {} | {} | {} |",
            row.entity,
            escape_cell(&row.instance),
            escape_cell(&row.name),
            row.value
        ));
    }

    let failures: Vec<String> = result
        .metrics
        .failures()
        .map(|(analyzer, failure)| format!("- {analyzer}: {failure}"))
        .collect();
    if !failures.is_empty() {
        lines.push(String::new());
        lines.push("## Failed metrics".to_string());
        lines.extend(failures);
    }
    lines.join("\n")
}

fn push_check_row(lines: &mut Vec<String>, check: &CheckResult) {
    let count = |status: ConstraintStatus| {
        check
            .constraint_results
            .iter()
            .filter(|constraint| constraint.status == status)
            .count()
    };
    lines.push(format!(
        "| {} | {:?} | {} | {} | {} | {} |",
        escape_cell(&check.description),
        check.level,
        check.status.label(),
        count(ConstraintStatus::Success),
        count(ConstraintStatus::Failure),
        count(ConstraintStatus::Skipped)
    ));
}

fn escape_cell(value: &str) -> String {
    value.replace('|', "\\|")
}
