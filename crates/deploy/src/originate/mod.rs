//! Contract origination against a Tezos node.
//!
//! [`Originator`] is the seam between the orchestrator and the network. The
//! production implementation, [`OctezOriginator`], submits through
//! `octez-client` and follows the operation through the node RPC until the
//! requested number of confirmations is reached.

mod cmd;
mod confirm;
mod octez;

pub use cmd::{OctezClientCmdBuilder, OriginateArgs};
pub use confirm::{ConfirmationWatcher, Inclusion};
pub use octez::{OctezOriginator, OriginationReceipt, parse_origination_output};

use std::{fmt, future::Future, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::AccountId;

/// Default number of blocks that must include the operation.
pub const DEFAULT_CONFIRMATIONS: u32 = 1;
/// Default bound on a whole origination call (submission + confirmation).
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;
/// Default interval between two node polls.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

/// Failure of a single origination.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("failed to launch {program}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The client refused the operation: simulation, signing or injection failed.
    #[error("origination rejected by the client ({status}): {detail}")]
    Rejected { status: String, detail: String },

    /// The operation was included but not applied.
    #[error("operation {operation_hash} included with status `{status}`: {detail}")]
    Failed {
        operation_hash: String,
        status: String,
        detail: String,
    },

    #[error("node request failed")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Protocol(String),

    #[error("no confirmation after {waited:?} (operation: {})", operation_hash.as_deref().unwrap_or("not injected"))]
    Timeout {
        operation_hash: Option<String>,
        waited: Duration,
    },
}

impl DeployError {
    /// Whether the failure guarantees that nothing reached the chain, so
    /// submitting again cannot create a second contract.
    pub fn is_retryable(&self) -> bool {
        matches!(self, DeployError::Rejected { .. } | DeployError::Transport(_))
    }
}

/// Submits a contract and waits until it is confirmed.
///
/// One call submits exactly one operation. Implementations never retry.
pub trait Originator {
    fn originate(
        &self,
        code: &str,
        storage: &str,
    ) -> impl Future<Output = Result<AccountId, DeployError>> + Send;
}

/// Account paying for and signing the originations.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignerConfig {
    /// Client alias or `tz` address of the source account.
    pub source: String,
    /// Secret key imported under `source` before the first origination.
    /// Never written back to configuration files.
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
}

impl fmt::Debug for SignerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignerConfig")
            .field("source", &self.source)
            .field("secret_key", &self.secret_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Tuning of the origination client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OriginationConfig {
    /// Path or name of the `octez-client` executable.
    pub client_binary: PathBuf,
    /// Client base directory. A private temporary one is used when a secret
    /// key is supplied and this is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<PathBuf>,
    /// Maximum tez burned for storage per origination.
    pub burn_cap: String,
    /// Blocks that must include the operation before it is considered final.
    pub confirmations: u32,
    /// Bound on one origination, submission included.
    pub timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Extra attempts for failures that left nothing on chain.
    pub retries: usize,
    /// Prefix of the client aliases given to the new contracts.
    pub alias_prefix: String,
}

impl Default for OriginationConfig {
    fn default() -> Self {
        Self {
            client_binary: PathBuf::from("octez-client"),
            base_dir: None,
            burn_cap: "10".to_string(),
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            retries: 0,
            alias_prefix: "tezdao".to_string(),
        }
    }
}

impl OriginationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_pre_injection_failures_are_retryable() {
        let rejected = DeployError::Rejected {
            status: "exit status: 1".into(),
            detail: "counter in the past".into(),
        };
        let timeout = DeployError::Timeout {
            operation_hash: Some("ooXyz".into()),
            waited: Duration::from_secs(1),
        };
        let failed = DeployError::Failed {
            operation_hash: "ooXyz".into(),
            status: "backtracked".into(),
            detail: String::new(),
        };

        assert!(rejected.is_retryable());
        assert!(!timeout.is_retryable());
        assert!(!failed.is_retryable());
    }

    #[test]
    fn test_timeout_message_names_operation() {
        let err = DeployError::Timeout {
            operation_hash: None,
            waited: Duration::from_secs(3),
        };
        assert_eq!(err.to_string(), "no confirmation after 3s (operation: not injected)");
    }

    #[test]
    fn test_signer_debug_redacts_secret() {
        let signer = SignerConfig {
            source: "deployer".into(),
            secret_key: Some("edsk-very-secret".into()),
        };
        let debug = format!("{signer:?}");
        assert!(debug.contains("<redacted>"));
        assert!(!debug.contains("edsk-very-secret"));
    }
}
