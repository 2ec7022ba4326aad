//! tezdao deploys a token-governed DAO and its community fund on Tezos.

mod cli;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use cli::Cli;
use tezdao_deploy::{DeployConfig, DeploymentReport, OctezOriginator, Orchestrator};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let mut config = DeployConfig::load(cli.config.as_deref())?;
    cli.overrides.apply(&mut config);
    config.validate()?;

    if let Some(path) = &cli.write_config {
        config.save_to_file(path)?;
    }

    let params = config.deployment_parameters();

    tracing::info!(
        endpoint = %config.network.endpoint,
        source = %config.signer.source,
        admin = %params.admin,
        voting_period = %params.voting_period,
        timelock_period = %params.timelock_period,
        quorum_votes = %params.quorum_votes,
        proposal_threshold = %params.proposal_threshold,
        "Starting deployment..."
    );

    let originator = OctezOriginator::connect(
        config.network.endpoint.clone(),
        config.signer.clone(),
        config.origination.clone(),
    )
    .await?;
    let orchestrator = Orchestrator::standard(originator, &config.artifacts)
        .retries(config.origination.retries);

    // Ctrl-C stops the run at the next stage boundary.
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping deployment...");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = orchestrator.run(&params, cancel_rx).await;

    let report = DeploymentReport::new(&config.network.endpoint, &outcome);
    println!("{}", report.render_table());
    if let Some(path) = &cli.report {
        report.save_to_file(path)?;
    }

    outcome?;

    Ok(())
}
