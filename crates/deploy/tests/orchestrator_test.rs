//! Integration tests for the deployment pipeline.
//!
//! The network is replaced by a scripted originator that records every
//! submission, so these tests need neither a node nor octez-client.
//! Run with: cargo test --test orchestrator_test

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use tempdir::TempDir;
use tezdao_deploy::{
    AccountId, ArtifactPaths, ContractSpec, DeployError, DeploymentParameters, Orchestrator,
    Originator, Stage, StageError,
};
use tokio::sync::{oneshot, watch};

const TOKEN_CODE: &str = "{ parameter (or (unit %token) (unit %mint)) ; storage unit ; code { FAILWITH } }";
const GOVERNANCE_CODE: &str = "{ parameter (unit %propose) ; storage unit ; code { FAILWITH } }";
const TREASURY_CODE: &str = "{ parameter (unit %spend) ; storage address ; code { FAILWITH } }";

/// What the scripted originator does on a given call.
enum Step {
    Respond(Result<AccountId, DeployError>),
    /// Respond, then request cancellation.
    RespondThenCancel(AccountId, watch::Sender<bool>),
    /// Complete with whatever address is sent on the channel.
    AwaitRelease(oneshot::Receiver<AccountId>),
    /// Never complete.
    Hang,
}

/// An [`Originator`] replaying scripted steps.
struct ScriptedOriginator {
    steps: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedOriginator {
    fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn deploying(addresses: &[&str]) -> Self {
        Self::new(
            addresses
                .iter()
                .map(|address| Step::Respond(Ok(AccountId::new(*address)))),
        )
    }

    /// `(code, storage)` of every submission, in order.
    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }
}

impl Originator for ScriptedOriginator {
    async fn originate(&self, code: &str, storage: &str) -> Result<AccountId, DeployError> {
        self.calls
            .lock()
            .unwrap()
            .push((code.to_string(), storage.to_string()));

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => response,
            Some(Step::RespondThenCancel(address, cancel)) => {
                cancel.send(true).unwrap();
                Ok(address)
            }
            Some(Step::AwaitRelease(release)) => release
                .await
                .map_err(|_| DeployError::Protocol("release dropped".into())),
            Some(Step::Hang) => std::future::pending().await,
            None => Err(DeployError::Protocol("unexpected origination".into())),
        }
    }
}

/// Artifacts written to a temporary directory.
struct Fixture {
    _dir: TempDir,
    artifacts: ArtifactPaths,
}

impl Fixture {
    fn new() -> Result<Self> {
        let dir = TempDir::new("tezdao-artifacts")?;
        let artifacts = ArtifactPaths::default().relative_to(dir.path());

        for (path, code) in [
            (&artifacts.token, TOKEN_CODE),
            (&artifacts.governance, GOVERNANCE_CODE),
            (&artifacts.treasury, TREASURY_CODE),
        ] {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, code)?;
        }

        Ok(Self {
            _dir: dir,
            artifacts,
        })
    }
}

fn scenario_params() -> DeploymentParameters {
    DeploymentParameters::new("A1", 900, 300, 200_000, 50_000)
}

/// A dropped sender never requests cancellation.
fn never_cancelled() -> watch::Receiver<bool> {
    watch::channel(false).1
}

#[tokio::test]
async fn test_deploys_all_contracts_in_order() -> Result<()> {
    let fixture = Fixture::new()?;
    let orchestrator = Orchestrator::standard(
        ScriptedOriginator::deploying(&["TOKEN1", "GOV1", "FUND1"]),
        &fixture.artifacts,
    );

    let results = orchestrator.run(&scenario_params(), never_cancelled()).await?;

    let addresses: Vec<(Stage, &str)> = results
        .addresses()
        .into_iter()
        .map(|(stage, address)| (stage, address.as_str()))
        .collect();
    assert_eq!(
        addresses,
        [
            (Stage::Token, "TOKEN1"),
            (Stage::Governance, "GOV1"),
            (Stage::Treasury, "FUND1"),
        ]
    );
    assert!(results.iter().all(|result| result.succeeded));

    let calls = orchestrator.originator().calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].0, TOKEN_CODE);
    assert_eq!(calls[1].0, GOVERNANCE_CODE);
    assert_eq!(calls[2].0, TREASURY_CODE);

    assert!(calls[0].1.contains("\"A1\""));
    assert!(calls[1].1.contains("\"TOKEN1\""));
    assert!(calls[1].1.contains("(Pair 900 (Pair 300 (Pair 200000 50000)))"));
    assert_eq!(calls[2].1, "\"GOV1\"");

    Ok(())
}

#[tokio::test]
async fn test_failure_aborts_before_later_stages() -> Result<()> {
    let fixture = Fixture::new()?;
    let originator = ScriptedOriginator::new([
        Step::Respond(Ok(AccountId::new("TOKEN1"))),
        Step::Respond(Err(DeployError::Rejected {
            status: "exit status: 1".into(),
            detail: "Error: Balance of contract tz1... too low".into(),
        })),
        Step::Respond(Ok(AccountId::new("FUND1"))),
    ]);
    let orchestrator = Orchestrator::standard(originator, &fixture.artifacts);

    let aborted = orchestrator
        .run(&scenario_params(), never_cancelled())
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, Stage::Governance);
    assert!(matches!(
        aborted.error,
        StageError::Deploy(DeployError::Rejected { ref detail, .. }) if detail.contains("too low")
    ));

    let token = aborted.partial.get(Stage::Token).unwrap();
    assert!(token.succeeded);
    assert_eq!(token.address.as_ref().map(AccountId::as_str), Some("TOKEN1"));

    let governance = aborted.partial.get(Stage::Governance).unwrap();
    assert!(!governance.succeeded);
    assert_eq!(governance.address, None);

    assert!(aborted.partial.get(Stage::Treasury).is_none());
    assert_eq!(orchestrator.originator().calls().len(), 2);

    Ok(())
}

#[tokio::test]
async fn test_cancel_between_stages_keeps_first_result() -> Result<()> {
    let fixture = Fixture::new()?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let originator = ScriptedOriginator::new([
        Step::RespondThenCancel(AccountId::new("TOKEN1"), cancel_tx),
        Step::Respond(Ok(AccountId::new("GOV1"))),
    ]);
    let orchestrator = Orchestrator::standard(originator, &fixture.artifacts);

    let aborted = orchestrator
        .run(&scenario_params(), cancel_rx)
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, Stage::Governance);
    assert!(matches!(aborted.error, StageError::Cancelled));
    assert_eq!(aborted.partial.len(), 1);
    assert_eq!(
        aborted.partial.address_of(Stage::Token).map(AccountId::as_str),
        Some("TOKEN1")
    );
    assert_eq!(orchestrator.originator().calls().len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_cancel_interrupts_pending_origination() -> Result<()> {
    let fixture = Fixture::new()?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let originator = ScriptedOriginator::new([
        Step::Respond(Ok(AccountId::new("TOKEN1"))),
        Step::Hang,
    ]);
    let orchestrator = Orchestrator::standard(originator, &fixture.artifacts);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
    });

    let aborted = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&scenario_params(), cancel_rx),
    )
    .await?
    .unwrap_err();

    assert_eq!(aborted.stage, Stage::Governance);
    assert!(matches!(aborted.error, StageError::Cancelled));
    assert_eq!(aborted.partial.len(), 1);
    assert!(aborted.partial.get(Stage::Governance).is_none());

    Ok(())
}

#[tokio::test]
async fn test_confirmation_racing_cancel_is_recorded() -> Result<()> {
    let fixture = Fixture::new()?;
    let (cancel_tx, cancel_rx) = watch::channel(false);
    let (release_tx, release_rx) = oneshot::channel();
    let originator = ScriptedOriginator::new([
        Step::Respond(Ok(AccountId::new("TOKEN1"))),
        Step::AwaitRelease(release_rx),
        Step::Respond(Ok(AccountId::new("FUND1"))),
    ]);
    let orchestrator = Orchestrator::standard(originator, &fixture.artifacts);

    // Both wake the pipeline at once: the governance origination confirms
    // just as the operator interrupts.
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel_tx.send(true).unwrap();
        release_tx.send(AccountId::new("GOV1")).unwrap();
    });

    let aborted = tokio::time::timeout(
        Duration::from_secs(5),
        orchestrator.run(&scenario_params(), cancel_rx),
    )
    .await?
    .unwrap_err();

    assert_eq!(aborted.stage, Stage::Treasury);
    assert!(matches!(aborted.error, StageError::Cancelled));
    assert_eq!(
        aborted.partial.address_of(Stage::Governance).map(AccountId::as_str),
        Some("GOV1")
    );
    assert_eq!(aborted.partial.addresses().len(), 2);
    assert_eq!(orchestrator.originator().calls().len(), 2);

    Ok(())
}

#[test]
fn test_duplicate_stage_specs_are_rejected() {
    let fixture = Fixture::new().unwrap();
    let [token, governance, _] = ContractSpec::standard(&fixture.artifacts);

    let Err(error) = Orchestrator::new(
        ScriptedOriginator::deploying(&[]),
        [token, governance.clone(), governance],
    ) else {
        panic!("a spec set without a treasury contract was accepted");
    };

    assert_eq!(
        error.stages,
        [Stage::Token, Stage::Governance, Stage::Governance]
    );
}

#[tokio::test]
async fn test_specs_in_any_order_deploy_by_stage() -> Result<()> {
    let fixture = Fixture::new()?;
    let [token, governance, treasury] = ContractSpec::standard(&fixture.artifacts);
    let orchestrator = Orchestrator::new(
        ScriptedOriginator::deploying(&["TOKEN1", "GOV1", "FUND1"]),
        [treasury, token, governance],
    )?;

    orchestrator.run(&scenario_params(), never_cancelled()).await?;

    let codes: Vec<String> = orchestrator
        .originator()
        .calls()
        .into_iter()
        .map(|(code, _)| code)
        .collect();
    assert_eq!(codes, [TOKEN_CODE, GOVERNANCE_CODE, TREASURY_CODE]);

    Ok(())
}

#[tokio::test]
async fn test_missing_artifact_is_not_submitted() -> Result<()> {
    let fixture = Fixture::new()?;
    let mut artifacts = fixture.artifacts.clone();
    artifacts.token = artifacts.token.with_file_name("missing.tz");

    let orchestrator = Orchestrator::standard(ScriptedOriginator::deploying(&["TOKEN1"]), &artifacts);

    let aborted = orchestrator
        .run(&scenario_params(), never_cancelled())
        .await
        .unwrap_err();

    assert_eq!(aborted.stage, Stage::Token);
    match &aborted.error {
        StageError::Artifact(e) => assert!(e.path.ends_with("missing.tz")),
        other => panic!("unexpected error: {other}"),
    }
    assert!(orchestrator.originator().calls().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_invalid_parameters_abort_before_any_origination() -> Result<()> {
    let fixture = Fixture::new()?;
    let orchestrator = Orchestrator::standard(ScriptedOriginator::deploying(&[]), &fixture.artifacts);
    let params = DeploymentParameters::new("A1", -1, 300, 200_000, 50_000);

    let aborted = orchestrator
        .run(&params, never_cancelled())
        .await
        .unwrap_err();

    assert!(matches!(aborted.error, StageError::Render(_)));
    assert!(aborted.partial.is_empty());
    assert!(orchestrator.originator().calls().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_retries_only_failures_before_injection() -> Result<()> {
    let fixture = Fixture::new()?;
    let rejected = || {
        Step::Respond(Err(DeployError::Rejected {
            status: "exit status: 1".into(),
            detail: "counter in the past".into(),
        }))
    };

    let originator = ScriptedOriginator::new([
        rejected(),
        Step::Respond(Ok(AccountId::new("TOKEN1"))),
        Step::Respond(Ok(AccountId::new("GOV1"))),
        Step::Respond(Err(DeployError::Timeout {
            operation_hash: Some("ooFund".into()),
            waited: Duration::from_secs(600),
        })),
        Step::Respond(Ok(AccountId::new("FUND1"))),
    ]);
    let orchestrator = Orchestrator::standard(originator, &fixture.artifacts).retries(2);

    let aborted = orchestrator
        .run(&scenario_params(), never_cancelled())
        .await
        .unwrap_err();

    // The rejected token origination was resubmitted; the treasury timeout was not.
    assert_eq!(aborted.stage, Stage::Treasury);
    assert!(matches!(
        aborted.error,
        StageError::Deploy(DeployError::Timeout { .. })
    ));
    assert_eq!(aborted.partial.addresses().len(), 2);
    assert_eq!(orchestrator.originator().calls().len(), 4);

    Ok(())
}
