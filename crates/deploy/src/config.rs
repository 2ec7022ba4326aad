//! Deployer configuration.
//!
//! Values are layered, last wins: built-in defaults, the TOML file, then
//! `TEZDAO_`-prefixed environment variables (`__` separates sections, e.g.
//! `TEZDAO_ORIGINATION__CONFIRMATIONS=2`). Command line flags are applied on
//! top by the binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use num_bigint::BigInt;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    AccountId, ArtifactPaths, DEFAULT_GOVERNANCE_METADATA_URI, DeploymentParameters,
    OriginationConfig, SignerConfig, TokenMetadata,
};

/// Configuration file looked up in the working directory.
pub const CONFIG_FILENAME: &str = "Tezdao.toml";

/// Prefix of the environment variables read into the configuration.
pub const ENV_PREFIX: &str = "TEZDAO_";

/// Default Tezos node RPC endpoint.
pub const DEFAULT_ENDPOINT: &str = "http://localhost:8732";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Node RPC endpoint.
    pub endpoint: Url,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: Url::parse(DEFAULT_ENDPOINT).expect("default endpoint is a valid URL"),
        }
    }
}

/// Governance parameters as the operator writes them.
///
/// `quorum_votes` and `proposal_threshold` are whole tokens; they are scaled
/// to the smallest unit by [`DeployConfig::deployment_parameters`]. Big
/// values can be written as strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParametersConfig {
    /// Administrator of the token. Required.
    pub admin: AccountId,
    /// Voting period in seconds.
    #[serde(with = "big_int")]
    pub voting_period: BigInt,
    /// Timelock period in seconds.
    #[serde(with = "big_int")]
    pub timelock_period: BigInt,
    #[serde(with = "big_int")]
    pub quorum_votes: BigInt,
    #[serde(with = "big_int")]
    pub proposal_threshold: BigInt,
}

impl Default for ParametersConfig {
    fn default() -> Self {
        Self {
            admin: AccountId::new(""),
            voting_period: BigInt::from(900),
            timelock_period: BigInt::from(300),
            quorum_votes: BigInt::from(200_000),
            proposal_threshold: BigInt::from(50_000),
        }
    }
}

/// Complete configuration of a deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployConfig {
    pub network: NetworkConfig,
    pub signer: SignerConfig,
    pub origination: OriginationConfig,
    pub artifacts: ArtifactPaths,
    pub parameters: ParametersConfig,
    pub token_metadata: TokenMetadata,
    /// URI of the DAO's TZIP-16 metadata.
    pub governance_metadata_uri: String,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            signer: SignerConfig {
                source: "deployer".to_string(),
                secret_key: None,
            },
            origination: OriginationConfig::default(),
            artifacts: ArtifactPaths::default(),
            parameters: ParametersConfig::default(),
            token_metadata: TokenMetadata::default(),
            governance_metadata_uri: DEFAULT_GOVERNANCE_METADATA_URI.to_string(),
        }
    }
}

impl DeployConfig {
    /// Layered configuration sources. `path` must exist when given; without
    /// it, [`CONFIG_FILENAME`] is read if present.
    pub fn figment(path: Option<&Path>) -> Result<Figment> {
        let file = match path {
            Some(path) if !path.is_file() => {
                return Err(anyhow::anyhow!(
                    "Configuration file not found: {}",
                    path.display()
                ));
            }
            Some(path) => path.to_path_buf(),
            None => PathBuf::from(CONFIG_FILENAME),
        };

        Ok(Figment::from(Serialized::defaults(DeployConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load the configuration from every layer.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config: Self = Self::figment(path)?
            .extract()
            .context("Failed to load configuration")?;

        tracing::debug!(
            path = %path.map_or_else(|| CONFIG_FILENAME.into(), |p| p.display().to_string()),
            endpoint = %config.network.endpoint,
            source = %config.signer.source,
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Save the configuration as TOML. The secret key is never written.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content =
            toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;
        std::fs::write(path, content)
            .context(format!("Failed to write config to {}", path.display()))?;
        tracing::info!(path = %path.display(), "Configuration saved");
        Ok(())
    }

    /// Reject configurations that cannot produce a deployment.
    pub fn validate(&self) -> Result<()> {
        let scheme = self.network.endpoint.scheme();
        anyhow::ensure!(
            scheme == "http" || scheme == "https",
            "network.endpoint must be an http(s) URL, got {}",
            self.network.endpoint
        );
        anyhow::ensure!(!self.signer.source.is_empty(), "signer.source must be set");
        anyhow::ensure!(
            !self.parameters.admin.is_empty(),
            "parameters.admin must be set"
        );
        anyhow::ensure!(
            self.origination.confirmations >= 1,
            "origination.confirmations must be at least 1"
        );
        anyhow::ensure!(
            self.origination.timeout_secs > 0,
            "origination.timeout_secs must be positive"
        );
        Ok(())
    }

    /// Parameters for the orchestrator, with token amounts scaled to the
    /// smallest unit.
    pub fn deployment_parameters(&self) -> DeploymentParameters {
        let scale = self.token_metadata.unit_scale();
        let parameters = &self.parameters;

        DeploymentParameters {
            admin: parameters.admin.clone(),
            voting_period: parameters.voting_period.clone(),
            timelock_period: parameters.timelock_period.clone(),
            quorum_votes: &parameters.quorum_votes * &scale,
            proposal_threshold: &parameters.proposal_threshold * &scale,
            token_metadata: self.token_metadata.clone(),
            governance_metadata_uri: self.governance_metadata_uri.clone(),
        }
    }
}

/// Big integers as decimal strings, read back from strings or integers.
mod big_int {
    use std::fmt;

    use num_bigint::BigInt;
    use serde::{Deserializer, Serializer, de};

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        deserializer.deserialize_any(BigIntVisitor)
    }

    struct BigIntVisitor;

    impl de::Visitor<'_> for BigIntVisitor {
        type Value = BigInt;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an integer or a decimal string")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<BigInt, E> {
            Ok(v.into())
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<BigInt, E> {
            Ok(v.into())
        }

        fn visit_i128<E: de::Error>(self, v: i128) -> Result<BigInt, E> {
            Ok(v.into())
        }

        fn visit_u128<E: de::Error>(self, v: u128) -> Result<BigInt, E> {
            Ok(v.into())
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<BigInt, E> {
            v.trim()
                .replace('_', "")
                .parse()
                .map_err(|_| E::invalid_value(de::Unexpected::Str(v), &self))
        }
    }
}
