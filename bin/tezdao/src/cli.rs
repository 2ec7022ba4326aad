use std::path::PathBuf;

use clap::Parser;
use num_bigint::BigInt;
use tezdao_deploy::{AccountId, DeployConfig};
use tracing::level_filters::LevelFilter;
use url::Url;

#[derive(Parser)]
#[command(name = "tezdao")]
#[command(
    author,
    version,
    about = "Deploy a token-governed DAO and its community fund on Tezos"
)]
pub struct Cli {
    /// The verbosity level.
    #[arg(short, long, env = "TEZDAO_VERBOSITY", default_value_t = LevelFilter::INFO)]
    pub verbosity: LevelFilter,

    /// Path to a TOML configuration file.
    ///
    /// If not provided, ./Tezdao.toml is used when it exists.
    #[arg(short, long, alias = "conf", env = "TEZDAO_CONFIG")]
    pub config: Option<PathBuf>,

    /// Save the effective configuration (without the secret key) to this
    /// path before deploying.
    #[arg(long, env = "TEZDAO_WRITE_CONFIG")]
    pub write_config: Option<PathBuf>,

    /// Write a JSON report of the run to this path.
    #[arg(long, env = "TEZDAO_REPORT")]
    pub report: Option<PathBuf>,

    #[clap(flatten)]
    pub overrides: ConfigOverrides,
}

/// Flags taking precedence over the configuration file and environment.
#[derive(Debug, Clone, Parser)]
pub struct ConfigOverrides {
    /// The Tezos node RPC endpoint.
    #[arg(short, long, alias = "rpc", env = "TEZDAO_ENDPOINT")]
    pub endpoint: Option<Url>,

    /// Client alias or address of the account paying for the originations.
    #[arg(long, env = "TEZDAO_SOURCE")]
    pub source: Option<String>,

    /// Secret key of the source account, imported into the client before
    /// deploying.
    #[arg(long, env = "TEZDAO_SECRET_KEY", hide_env_values = true)]
    pub secret_key: Option<String>,

    /// Path to the octez-client executable.
    #[arg(long, env = "TEZDAO_OCTEZ_CLIENT")]
    pub octez_client: Option<PathBuf>,

    /// Directory the artifact paths are relative to.
    #[arg(long, env = "TEZDAO_ARTIFACTS_DIR")]
    pub artifacts_dir: Option<PathBuf>,

    /// Blocks that must include each origination.
    #[arg(long, env = "TEZDAO_CONFIRMATIONS")]
    pub confirmations: Option<u32>,

    /// Seconds allowed for each origination, confirmations included.
    #[arg(long, env = "TEZDAO_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Resubmissions allowed when an origination fails before injection.
    #[arg(long, env = "TEZDAO_RETRIES")]
    pub retries: Option<usize>,

    /// Administrator of the governance token.
    #[arg(long, env = "TEZDAO_ADMIN")]
    pub admin: Option<String>,

    /// Voting period in seconds.
    #[arg(long, env = "TEZDAO_VOTING_PERIOD")]
    pub voting_period: Option<BigInt>,

    /// Timelock period in seconds.
    #[arg(long, env = "TEZDAO_TIMELOCK_PERIOD")]
    pub timelock_period: Option<BigInt>,

    /// Votes needed to reach quorum, in whole tokens.
    #[arg(long, env = "TEZDAO_QUORUM_VOTES")]
    pub quorum_votes: Option<BigInt>,

    /// Tokens needed to submit a proposal, in whole tokens.
    #[arg(long, env = "TEZDAO_PROPOSAL_THRESHOLD")]
    pub proposal_threshold: Option<BigInt>,
}

impl ConfigOverrides {
    pub fn apply(self, config: &mut DeployConfig) {
        if let Some(endpoint) = self.endpoint {
            config.network.endpoint = endpoint;
        }
        if let Some(source) = self.source {
            config.signer.source = source;
        }
        if let Some(secret_key) = self.secret_key {
            config.signer.secret_key = Some(secret_key);
        }
        if let Some(client) = self.octez_client {
            config.origination.client_binary = client;
        }
        if let Some(dir) = self.artifacts_dir {
            config.artifacts = config.artifacts.relative_to(&dir);
        }
        if let Some(confirmations) = self.confirmations {
            config.origination.confirmations = confirmations;
        }
        if let Some(timeout) = self.timeout {
            config.origination.timeout_secs = timeout;
        }
        if let Some(retries) = self.retries {
            config.origination.retries = retries;
        }

        let parameters = &mut config.parameters;
        if let Some(admin) = self.admin {
            parameters.admin = AccountId::new(admin);
        }
        if let Some(value) = self.voting_period {
            parameters.voting_period = value;
        }
        if let Some(value) = self.timelock_period {
            parameters.timelock_period = value;
        }
        if let Some(value) = self.quorum_votes {
            parameters.quorum_votes = value;
        }
        if let Some(value) = self.proposal_threshold {
            parameters.proposal_threshold = value;
        }
    }
}
