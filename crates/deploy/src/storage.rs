//! Initial storage rendering for the deployed contracts.
//!
//! Every renderer is a pure function of the deployment parameters and the
//! results of the stages that already ran. The same inputs always yield the
//! same bytes, which keeps deployments reproducible and auditable.

use std::collections::BTreeMap;
use std::path::PathBuf;

use derive_more::{Deref, Display};
use num_bigint::{BigInt, Sign};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AccountId, ArtifactPaths, DeploymentResults, Stage,
    michelson::{self, ParseError, UnsupportedChar},
};

/// TZIP-16 metadata of the Kickflow governance token.
pub const DEFAULT_TOKEN_METADATA_URI: &str =
    "ipfs://QmTh5HdjgfsRw5zsfQ6H7vajVo9cVpnbXuxrtvyvTQhJTP";
/// Icon of the Kickflow governance token.
pub const DEFAULT_TOKEN_ICON: &str = "ipfs://QmT6bXCH3C7sHp8gRJ7v87nRhqUTG2u9bfLEFLJ3hJEzCA";
/// TZIP-16 metadata of the Kickflow DAO.
pub const DEFAULT_GOVERNANCE_METADATA_URI: &str =
    "ipfs://QmWsnPbQfpKusSoPm6wpbBnAKarPhsG6uWiueaGgUdKhMZ";

/// A rendered storage expression, ready to be sent with an origination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deref, Display)]
pub struct StorageText(String);

impl StorageText {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

/// Errors raised while rendering a storage.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("{stage} storage needs the {dependency} address, but {dependency} has not been deployed")]
    MissingDependency { stage: Stage, dependency: Stage },

    #[error("{stage} storage needs the {dependency} address, but the {dependency} stage failed")]
    DependencyFailed { stage: Stage, dependency: Stage },

    #[error("parameter `{name}` must be non-negative, got {value}")]
    Negative { name: &'static str, value: BigInt },

    #[error("parameter `{name}` must not be empty")]
    Empty { name: &'static str },

    #[error("parameter `{name}` cannot be embedded in a storage literal")]
    InvalidString {
        name: &'static str,
        #[source]
        source: UnsupportedChar,
    },

    #[error("rendered {stage} storage is malformed")]
    Malformed {
        stage: Stage,
        #[source]
        source: ParseError,
    },
}

/// Token metadata published on chain (TZIP-7 token info and TZIP-16 link).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadata {
    /// Number of decimals of the smallest token unit.
    pub decimals: u32,
    pub name: String,
    pub symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// URI of the TZIP-16 contract metadata.
    pub contract_metadata_uri: String,
}

impl Default for TokenMetadata {
    fn default() -> Self {
        Self {
            decimals: 18,
            name: "Kickflow Governance Token".to_string(),
            symbol: "KFL".to_string(),
            icon: Some(DEFAULT_TOKEN_ICON.to_string()),
            contract_metadata_uri: DEFAULT_TOKEN_METADATA_URI.to_string(),
        }
    }
}

impl TokenMetadata {
    /// `10^decimals`, the number of smallest units in one whole token.
    pub fn unit_scale(&self) -> BigInt {
        BigInt::from(10u32).pow(self.decimals)
    }

    /// Token info entries, keyed in ascending order as map literals require.
    fn token_info(&self) -> BTreeMap<&'static str, String> {
        let mut info = BTreeMap::new();
        info.insert("decimals", self.decimals.to_string());
        info.insert("name", self.name.clone());
        info.insert("symbol", self.symbol.clone());
        if let Some(icon) = &self.icon {
            info.insert("icon", icon.clone());
        }
        info
    }
}

/// Operator-supplied values shared by every stage of a run.
///
/// `quorum_votes` and `proposal_threshold` are expressed in the token's
/// smallest unit; scaling whole-token amounts is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentParameters {
    /// Administrator of the governance token.
    pub admin: AccountId,
    /// Voting period in seconds.
    pub voting_period: BigInt,
    /// Timelock period in seconds.
    pub timelock_period: BigInt,
    /// Votes required to reach quorum.
    pub quorum_votes: BigInt,
    /// Tokens an account must hold to submit a proposal.
    pub proposal_threshold: BigInt,
    pub token_metadata: TokenMetadata,
    /// URI of the DAO's TZIP-16 metadata.
    pub governance_metadata_uri: String,
}

impl DeploymentParameters {
    /// Parameters with the default Kickflow metadata.
    pub fn new(
        admin: impl Into<AccountId>,
        voting_period: impl Into<BigInt>,
        timelock_period: impl Into<BigInt>,
        quorum_votes: impl Into<BigInt>,
        proposal_threshold: impl Into<BigInt>,
    ) -> Self {
        Self {
            admin: admin.into(),
            voting_period: voting_period.into(),
            timelock_period: timelock_period.into(),
            quorum_votes: quorum_votes.into(),
            proposal_threshold: proposal_threshold.into(),
            token_metadata: TokenMetadata::default(),
            governance_metadata_uri: DEFAULT_GOVERNANCE_METADATA_URI.to_string(),
        }
    }

    /// Check every parameter before the first origination is attempted.
    pub fn validate(&self) -> Result<(), RenderError> {
        self.quoted_admin()?;
        self.governance_numbers()?;
        Ok(())
    }

    fn quoted_admin(&self) -> Result<String, RenderError> {
        if self.admin.is_empty() {
            return Err(RenderError::Empty { name: "admin" });
        }
        quote_param("admin", &self.admin)
    }

    fn governance_numbers(&self) -> Result<[&BigInt; 4], RenderError> {
        let numbers = [
            ("voting_period", &self.voting_period),
            ("timelock_period", &self.timelock_period),
            ("quorum_votes", &self.quorum_votes),
            ("proposal_threshold", &self.proposal_threshold),
        ];

        for (name, value) in numbers {
            if value.sign() == Sign::Minus {
                return Err(RenderError::Negative {
                    name,
                    value: value.clone(),
                });
            }
        }

        Ok(numbers.map(|(_, value)| value))
    }
}

fn quote_param(name: &'static str, value: &str) -> Result<String, RenderError> {
    michelson::quote(value).map_err(|source| RenderError::InvalidString { name, source })
}

/// Address produced by `dependency`, required to render `stage`.
fn required_address(
    stage: Stage,
    dependency: Stage,
    prior: &DeploymentResults,
) -> Result<String, RenderError> {
    let result = prior
        .get(dependency)
        .ok_or(RenderError::MissingDependency { stage, dependency })?;

    match (&result.address, result.succeeded) {
        (Some(address), true) => quote_param("dependency address", address),
        _ => Err(RenderError::DependencyFailed { stage, dependency }),
    }
}

/// Parse the rendered text back so template mistakes surface before submission.
fn checked(stage: Stage, text: String) -> Result<StorageText, RenderError> {
    michelson::parse(&text).map_err(|source| RenderError::Malformed { stage, source })?;
    Ok(StorageText(text))
}

/// Storage of the FA1.2 governance token: admin, empty ledger, metadata and
/// zero total supply.
pub fn render_token(
    params: &DeploymentParameters,
    _prior: &DeploymentResults,
) -> Result<StorageText, RenderError> {
    let admin = params.quoted_admin()?;
    let meta = &params.token_metadata;

    let contract_metadata = michelson::bytes_literal(&meta.contract_metadata_uri);
    let token_info = meta
        .token_info()
        .into_iter()
        .map(|(key, value)| format!("Elt \"{key}\" {}", michelson::bytes_literal(value)))
        .collect::<Vec<_>>()
        .join("; ");

    checked(
        Stage::Token,
        format!(
            "(Pair (Pair (Pair {admin} {{}}) (Pair {{Elt \"\" {contract_metadata}}} False)) \
             (Pair (Pair {{}} {{}}) (Pair {{Elt 0 (Pair 0 {{{token_info}}})}} 0)))"
        ),
    )
}

/// Storage of the DAO: governance parameters, metadata, idle state, empty
/// proposal set and the token address.
pub fn render_governance(
    params: &DeploymentParameters,
    prior: &DeploymentResults,
) -> Result<StorageText, RenderError> {
    let [voting_period, timelock_period, quorum_votes, proposal_threshold] =
        params.governance_numbers()?;
    let token = required_address(Stage::Governance, Stage::Token, prior)?;
    let metadata = michelson::bytes_literal(&params.governance_metadata_uri);

    checked(
        Stage::Governance,
        format!(
            "(Pair (Pair (Pair (Pair {voting_period} (Pair {timelock_period} \
             (Pair {quorum_votes} {proposal_threshold}))) {{Elt \"\" {metadata}}}) \
             (Pair None {{}})) (Pair (Pair 0 {token}) (Pair 0 (Pair {{}} None))))"
        ),
    )
}

/// Storage of the community fund: the DAO allowed to spend from it.
pub fn render_treasury(
    _params: &DeploymentParameters,
    prior: &DeploymentResults,
) -> Result<StorageText, RenderError> {
    let governance = required_address(Stage::Treasury, Stage::Governance, prior)?;
    checked(Stage::Treasury, governance)
}

/// Renders the initial storage of one contract.
pub type StorageTemplate =
    fn(&DeploymentParameters, &DeploymentResults) -> Result<StorageText, RenderError>;

/// Everything needed to deploy one contract.
#[derive(Debug, Clone)]
pub struct ContractSpec {
    pub stage: Stage,
    pub artifact_path: PathBuf,
    pub template: StorageTemplate,
}

impl ContractSpec {
    /// The token, governance and treasury contracts, in dependency order.
    pub fn standard(artifacts: &ArtifactPaths) -> [ContractSpec; 3] {
        Stage::ALL.map(|stage| ContractSpec {
            stage,
            artifact_path: artifacts.for_stage(stage).to_path_buf(),
            template: match stage {
                Stage::Token => render_token,
                Stage::Governance => render_governance,
                Stage::Treasury => render_treasury,
            },
        })
    }

    pub fn render(
        &self,
        params: &DeploymentParameters,
        prior: &DeploymentResults,
    ) -> Result<StorageText, RenderError> {
        (self.template)(params, prior)
    }
}
