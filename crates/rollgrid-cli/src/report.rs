//! Final rollout report.

use rollgrid_rollout::RolloutError;
use serde::Serialize;

use crate::deploy::Outcome;

#[derive(Debug, Serialize)]
pub struct Report {
    pub end_state: String,
    pub clean: bool,
    pub error: Option<String>,
    pub failures: Vec<FailureRow>,
}

#[derive(Debug, Serialize)]
pub struct FailureRow {
    pub endpoint: String,
    pub stage: String,
    pub error: String,
}

impl Report {
    pub fn from_outcome(outcome: &Outcome) -> Self {
        Self {
            end_state: outcome.status.end_state.to_string(),
            clean: outcome.is_clean(),
            error: outcome.error.as_ref().map(ToString::to_string),
            failures: outcome
                .status
                .failures
                .iter()
                .map(|f| FailureRow {
                    endpoint: f.endpoint.clone(),
                    stage: f.failure().to_string(),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }
}

pub fn format_report(outcome: &Outcome) -> String {
    let report = Report::from_outcome(outcome);
    let mut out = String::new();

    out.push_str(&format!("\nRollout: {}\n", report.end_state));

    // A precondition failure touched nothing, so there is no table.
    if let Some(RolloutError::Precondition(e)) = &outcome.error {
        out.push_str(&format!("Error: {e}\n"));
        return out;
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("Error: {error}\n"));
    }

    if report.failures.is_empty() {
        out.push_str("All endpoints upgraded.\n");
        return out;
    }

    out.push_str(&format!("\n{} endpoint(s) failed:\n\n", report.failures.len()));
    out.push_str(&format!("  {:<22} {:<16} {}\n", "ENDPOINT", "FAILED STAGE", "ERROR"));
    for row in &report.failures {
        let stage = if row.stage.is_empty() { "-" } else { &row.stage };
        out.push_str(&format!("  {:<22} {:<16} {}\n", row.endpoint, stage, row.error));
    }
    out
}
