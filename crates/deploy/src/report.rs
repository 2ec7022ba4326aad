//! Summary of a deployment run, for the operator and for audit trails.

use std::{error::Error, path::Path};

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{Table, presets};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{DeploymentAborted, DeploymentResults, Stage};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentReport {
    /// RFC 3339 time at which the report was produced.
    pub generated_at: String,
    pub endpoint: String,
    pub outcome: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,
    /// The abort reason with all of its causes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub contracts: DeploymentResults,
}

impl DeploymentReport {
    pub fn new(endpoint: &Url, outcome: &Result<DeploymentResults, DeploymentAborted>) -> Self {
        let (outcome, failed_stage, error, contracts) = match outcome {
            Ok(results) => (Outcome::Completed, None, None, results.clone()),
            Err(aborted) => (
                Outcome::Aborted,
                Some(aborted.stage),
                Some(error_chain(aborted)),
                aborted.partial.clone(),
            ),
        };

        Self {
            generated_at: Utc::now().to_rfc3339(),
            endpoint: endpoint.to_string(),
            outcome,
            failed_stage,
            error,
            contracts,
        }
    }

    /// One row per stage: its status and the address it produced.
    pub fn render_table(&self) -> String {
        let mut table = Table::new();
        table
            .load_preset(presets::UTF8_FULL_CONDENSED)
            .set_header(["Contract", "Status", "Address"]);

        for stage in Stage::ALL {
            let (status, address) = match self.contracts.get(stage) {
                Some(result) if result.succeeded => (
                    "deployed",
                    result.address.as_ref().map_or("-", |a| a.as_str()),
                ),
                Some(_) => ("failed", "-"),
                None if self.failed_stage == Some(stage) => ("cancelled", "-"),
                None => ("skipped", "-"),
            };
            table.add_row([stage.as_ref(), status, address]);
        }

        match &self.error {
            Some(error) => format!("{table}\nerror: {error}"),
            None => table.to_string(),
        }
    }

    /// Write the report as pretty-printed JSON.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            serde_json::to_string_pretty(self).context("Failed to serialize deployment report")?;
        std::fs::write(path, content)
            .context(format!("Failed to write report to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Deployment report saved");
        Ok(())
    }
}

/// `error` followed by each of its sources, separated by `: `.
fn error_chain(error: &(dyn Error + 'static)) -> String {
    std::iter::successors(Some(error), |&e| e.source())
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(": ")
}
