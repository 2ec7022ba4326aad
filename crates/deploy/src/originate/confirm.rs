//! Tracking of injected operations until they are confirmed.

use std::time::Duration;

use serde_json::Value;
use url::Url;

use crate::{AccountId, DeployError, rpc};

/// Validation pass holding manager operations (originations, transfers…).
const MANAGER_PASS: u8 = 3;

/// Block that included an operation, and what the operation created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inclusion {
    pub level: i64,
    pub originated_contracts: Vec<AccountId>,
}

/// Polls the node until an operation has the requested confirmations.
#[derive(Debug, Clone)]
pub struct ConfirmationWatcher {
    client: reqwest::Client,
    endpoint: Url,
    confirmations: u32,
    poll_interval: Duration,
}

impl ConfirmationWatcher {
    pub fn new(
        client: reqwest::Client,
        endpoint: Url,
        confirmations: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            endpoint: rpc::normalize_endpoint(endpoint),
            confirmations: confirmations.max(1),
            poll_interval,
        }
    }

    pub async fn head_level(&self) -> Result<i64, DeployError> {
        rpc::head_level(&self.client, &self.endpoint).await
    }

    /// Wait until `operation_hash` is included in a block above
    /// `submitted_after` and buried under enough blocks.
    ///
    /// Never returns on its own if the operation is dropped from the
    /// mempool; callers bound it with a timeout. Failed polls are retried.
    pub async fn wait(
        &self,
        operation_hash: &str,
        submitted_after: i64,
    ) -> Result<Inclusion, DeployError> {
        let mut next_level = submitted_after + 1;

        let (level, operation) = loop {
            match self.scan(operation_hash, &mut next_level).await {
                Ok(Some(found)) => break found,
                Ok(None) => {}
                Err(e) => {
                    tracing::trace!(error = %e, operation_hash, "Inclusion check failed, retrying...");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        };

        // A failed or malformed operation is final; only RPC failures above are retried.
        let inclusion = inclusion_from(&operation, operation_hash, level)?;

        tracing::debug!(operation_hash, level = inclusion.level, "Operation included");

        let target = inclusion.level + i64::from(self.confirmations) - 1;
        loop {
            match self.head_level().await {
                Ok(head) if head >= target => break,
                Ok(head) => {
                    tracing::trace!(operation_hash, head, target, "Waiting for confirmations...");
                }
                Err(e) => {
                    tracing::trace!(error = %e, operation_hash, "Head check failed, retrying...");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        Ok(inclusion)
    }

    /// Look for the operation in every block from `next_level` up to head,
    /// returning the including level and the operation itself.
    async fn scan(
        &self,
        operation_hash: &str,
        next_level: &mut i64,
    ) -> Result<Option<(i64, Value)>, DeployError> {
        let head = self.head_level().await?;

        while *next_level <= head {
            let path = format!("chains/main/blocks/{}/operations/{MANAGER_PASS}", *next_level);
            let operations: Vec<Value> = rpc::get_json(&self.client, &self.endpoint, &path).await?;

            if let Some(operation) = operations
                .into_iter()
                .find(|op| op["hash"].as_str() == Some(operation_hash))
            {
                return Ok(Some((*next_level, operation)));
            }

            *next_level += 1;
        }

        Ok(None)
    }
}

/// Check that every content of an included operation was applied.
fn inclusion_from(
    operation: &Value,
    operation_hash: &str,
    level: i64,
) -> Result<Inclusion, DeployError> {
    let contents = operation["contents"]
        .as_array()
        .ok_or_else(|| DeployError::Protocol(format!("operation {operation_hash} has no contents")))?;

    let mut originated_contracts = Vec::new();
    for content in contents {
        let result = &content["metadata"]["operation_result"];
        let status = result["status"].as_str().unwrap_or("unknown");

        if status != "applied" {
            return Err(DeployError::Failed {
                operation_hash: operation_hash.to_string(),
                status: status.to_string(),
                detail: result
                    .get("errors")
                    .map(Value::to_string)
                    .unwrap_or_default(),
            });
        }

        if let Some(contracts) = result["originated_contracts"].as_array() {
            originated_contracts.extend(contracts.iter().filter_map(Value::as_str).map(AccountId::from));
        }
    }

    Ok(Inclusion {
        level,
        originated_contracts,
    })
}
