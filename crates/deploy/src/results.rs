//! Per-stage deployment results.

use derive_more::{Deref, Display, From};
use serde::{Deserialize, Serialize};

use crate::Stage;

/// A chain account identifier (`tz1…` implicit account or `KT1…` contract).
///
/// The value is opaque to the deployer: it is only ever quoted into storage
/// literals and echoed back to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Deref, Display, From)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for AccountId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub stage: Stage,
    pub address: Option<AccountId>,
    pub succeeded: bool,
}

impl DeploymentResult {
    pub fn deployed(stage: Stage, address: AccountId) -> Self {
        Self {
            stage,
            address: Some(address),
            succeeded: true,
        }
    }

    pub fn failed(stage: Stage) -> Self {
        Self {
            stage,
            address: None,
            succeeded: false,
        }
    }
}

/// Stage results in the order the stages ran.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeploymentResults(Vec<DeploymentResult>);

impl DeploymentResults {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append the result of the stage that just ran.
    ///
    /// Stages are recorded at most once, in dependency order.
    pub(crate) fn record(&mut self, result: DeploymentResult) {
        debug_assert!(
            self.get(result.stage).is_none(),
            "stage {} recorded twice",
            result.stage
        );
        self.0.push(result);
    }

    pub fn get(&self, stage: Stage) -> Option<&DeploymentResult> {
        self.0.iter().find(|r| r.stage == stage)
    }

    /// Address of `stage`, if it ran and succeeded.
    pub fn address_of(&self, stage: Stage) -> Option<&AccountId> {
        self.get(stage)
            .filter(|r| r.succeeded)
            .and_then(|r| r.address.as_ref())
    }

    /// Successfully deployed contracts, in deployment order.
    pub fn addresses(&self) -> Vec<(Stage, &AccountId)> {
        self.0
            .iter()
            .filter(|r| r.succeeded)
            .filter_map(|r| r.address.as_ref().map(|a| (r.stage, a)))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeploymentResult> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<DeploymentResult> for DeploymentResults {
    fn from_iter<I: IntoIterator<Item = DeploymentResult>>(iter: I) -> Self {
        let mut results = Self::new();
        for result in iter {
            results.record(result);
        }
        results
    }
}
