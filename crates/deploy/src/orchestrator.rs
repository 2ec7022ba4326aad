//! Sequential deployment of the three contracts.
//!
//! The orchestrator walks a linear state machine:
//!
//! ```text
//! Pending(token) -> Pending(governance) -> Pending(treasury) -> Done
//!        \                  \                    \
//!         +------------------+--------------------+--> Aborted(stage)
//! ```
//!
//! A stage that fails is recorded as failed and nothing after it is
//! attempted, so a later storage can never be rendered from an address that
//! does not exist.

use backon::{ExponentialBuilder, Retryable};
use thiserror::Error;
use tokio::sync::watch;

use crate::{
    ArtifactError, ArtifactPaths, ContractSpec, DeployError, DeploymentParameters,
    DeploymentResult, DeploymentResults, Originator, RenderError, Stage, load_artifact,
};

/// Position of a run in the deployment pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// `Stage` is the next one to run.
    Pending(Stage),
    /// Every stage succeeded.
    Done,
    /// `Stage` failed or was cancelled; absorbing.
    Aborted(Stage),
}

impl PipelineState {
    pub const fn start() -> Self {
        Self::Pending(Stage::first())
    }

    /// Transition after the pending stage succeeded.
    pub fn advance(self) -> Self {
        match self {
            Self::Pending(stage) => stage.next().map_or(Self::Done, Self::Pending),
            terminal => terminal,
        }
    }

    /// Transition after the pending stage failed.
    pub fn abort(self) -> Self {
        match self {
            Self::Pending(stage) => Self::Aborted(stage),
            terminal => terminal,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

/// Why a stage did not produce an address.
#[derive(Debug, Error)]
pub enum StageError {
    #[error("could not load contract code")]
    Artifact(#[from] ArtifactError),

    #[error("could not render initial storage")]
    Render(#[from] RenderError),

    #[error("origination failed")]
    Deploy(#[from] DeployError),

    #[error("cancelled by operator")]
    Cancelled,
}

/// A run that stopped before [`PipelineState::Done`].
#[derive(Debug, Error)]
#[error("deployment aborted at the {stage} stage")]
pub struct DeploymentAborted {
    pub stage: Stage,
    #[source]
    pub error: StageError,
    /// Results recorded before the abort, including the failed stage unless
    /// it was cancelled. Deployed contracts listed here are now orphaned.
    pub partial: DeploymentResults,
}

/// Contract specs that do not cover each stage exactly once.
#[derive(Debug, Error)]
#[error("expected one contract spec per stage, got {stages:?}")]
pub struct InvalidSpecs {
    pub stages: Vec<Stage>,
}

/// Deploys the contracts one after the other through an [`Originator`].
#[derive(Debug)]
pub struct Orchestrator<O> {
    originator: O,
    specs: [ContractSpec; 3],
    retries: usize,
}

impl<O: Originator> Orchestrator<O> {
    /// Fails unless `specs` holds exactly one spec for every stage, in any
    /// order.
    pub fn new(originator: O, mut specs: [ContractSpec; 3]) -> Result<Self, InvalidSpecs> {
        specs.sort_by_key(|spec| spec.stage);
        if !specs.iter().map(|spec| spec.stage).eq(Stage::ALL) {
            return Err(InvalidSpecs {
                stages: specs.iter().map(|spec| spec.stage).collect(),
            });
        }

        Ok(Self {
            originator,
            specs,
            retries: 0,
        })
    }

    /// The token, governance and treasury contracts loaded from `artifacts`.
    pub fn standard(originator: O, artifacts: &ArtifactPaths) -> Self {
        Self {
            originator,
            specs: ContractSpec::standard(artifacts),
            retries: 0,
        }
    }

    /// Resubmit an origination up to `retries` times when it failed before
    /// reaching the chain.
    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn originator(&self) -> &O {
        &self.originator
    }

    /// Deploy every contract in dependency order.
    ///
    /// Setting `cancel` to `true` stops the run at the next stage boundary,
    /// or interrupts the origination in flight. A cancelled stage is not
    /// recorded.
    pub async fn run(
        &self,
        params: &DeploymentParameters,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DeploymentResults, DeploymentAborted> {
        let mut results = DeploymentResults::new();
        let mut state = PipelineState::start();

        if let Err(e) = params.validate() {
            tracing::error!(error = %e, "Invalid deployment parameters");
            return Err(DeploymentAborted {
                stage: Stage::first(),
                error: e.into(),
                partial: results,
            });
        }

        let (stage, error) = loop {
            let PipelineState::Pending(stage) = state else {
                tracing::info!(contracts = results.len(), "Deployment complete");
                return Ok(results);
            };

            tracing::info!(%stage, "Deploying contract...");

            match self.run_stage(stage, params, &results, &mut cancel).await {
                Ok(address) => {
                    tracing::info!(%stage, %address, "Contract deployed");
                    results.record(DeploymentResult::deployed(stage, address));
                    state = state.advance();
                }
                Err(StageError::Cancelled) => {
                    tracing::warn!(%stage, "Deployment cancelled");
                    state = state.abort();
                    break (stage, StageError::Cancelled);
                }
                Err(e) => {
                    tracing::error!(%stage, error = ?e, "Stage failed");
                    results.record(DeploymentResult::failed(stage));
                    state = state.abort();
                    break (stage, e);
                }
            }
        };

        debug_assert_eq!(state, PipelineState::Aborted(stage));

        for (deployed, address) in results.addresses() {
            tracing::warn!(stage = %deployed, %address, "Contract left deployed by aborted run");
        }

        Err(DeploymentAborted {
            stage,
            error,
            partial: results,
        })
    }

    async fn run_stage(
        &self,
        stage: Stage,
        params: &DeploymentParameters,
        prior: &DeploymentResults,
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<crate::AccountId, StageError> {
        if *cancel.borrow() {
            return Err(StageError::Cancelled);
        }

        let spec = &self.specs[stage as usize];
        let artifact = load_artifact(&spec.artifact_path).await?;
        let storage = spec.render(params, prior)?;

        tracing::debug!(
            %stage,
            path = %artifact.path.display(),
            digest = %artifact.digest,
            %storage,
            "Submitting origination"
        );

        let originate = (|| self.originator.originate(&artifact.code, storage.as_str()))
            .retry(ExponentialBuilder::default().with_max_times(self.retries))
            .when(DeployError::is_retryable)
            .notify(|e, delay| {
                tracing::warn!(%stage, error = %e, ?delay, "Origination failed before injection, retrying...");
            });

        // A confirmed origination wins over a cancellation seen on the same
        // wake-up, so its address is still reported.
        tokio::select! {
            biased;
            result = originate => Ok(result?),
            _ = cancelled(cancel) => {
                tracing::warn!(
                    %stage,
                    "Origination interrupted; an operation already injected may still land"
                );
                Err(StageError::Cancelled)
            }
        }
    }
}

/// Resolves once cancellation is requested. A dropped sender never cancels.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}
