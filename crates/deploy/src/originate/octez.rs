//! Origination through `octez-client`.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::atomic::{AtomicUsize, Ordering},
};

use anyhow::Context;
use tempdir::TempDir;
use tokio::{process::Command, time::Instant};
use url::Url;

use super::{
    ConfirmationWatcher, DeployError, OctezClientCmdBuilder, OriginateArgs, OriginationConfig,
    Originator, SignerConfig,
};
use crate::{AccountId, rpc};

/// What the client reports right after injecting an origination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginationReceipt {
    pub operation_hash: String,
    pub contract: AccountId,
}

/// Extract the operation hash and new contract address from client output.
pub fn parse_origination_output(stdout: &str) -> Result<OriginationReceipt, DeployError> {
    let operation_hash = stdout
        .lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix("Operation hash is '")
                .and_then(|rest| rest.split('\'').next())
        })
        .filter(|hash| !hash.is_empty())
        .ok_or_else(|| {
            DeployError::Protocol(format!("no operation hash in client output: {}", stdout.trim()))
        })?;

    let contract = stdout
        .lines()
        .find_map(|line| {
            line.trim()
                .strip_prefix("New contract ")
                .and_then(|rest| rest.split_whitespace().next())
        })
        .or_else(|| {
            let mut lines = stdout.lines().map(str::trim);
            lines
                .by_ref()
                .find(|line| line.starts_with("Originated contracts:"));
            lines.next()
        })
        .filter(|address| address.starts_with("KT1"))
        .ok_or_else(|| {
            DeployError::Protocol(format!("no contract address in client output: {}", stdout.trim()))
        })?;

    Ok(OriginationReceipt {
        operation_hash: operation_hash.to_string(),
        contract: AccountId::new(contract),
    })
}

/// Client base directory, kept alive for as long as the originator.
#[derive(Debug)]
enum ClientDir {
    Configured(PathBuf),
    Temporary(TempDir),
}

impl ClientDir {
    fn path(&self) -> &Path {
        match self {
            ClientDir::Configured(path) => path,
            ClientDir::Temporary(dir) => dir.path(),
        }
    }
}

/// [`Originator`] backed by `octez-client` and the node RPC.
#[derive(Debug)]
pub struct OctezOriginator {
    endpoint: Url,
    source: String,
    config: OriginationConfig,
    client_dir: Option<ClientDir>,
    watcher: ConfirmationWatcher,
    next_alias: AtomicUsize,
}

impl OctezOriginator {
    /// Prepare the client for `signer`, importing its secret key if one is given.
    pub async fn connect(
        endpoint: Url,
        signer: SignerConfig,
        config: OriginationConfig,
    ) -> anyhow::Result<Self> {
        let client_dir = match (&config.base_dir, &signer.secret_key) {
            (Some(dir), _) => Some(ClientDir::Configured(dir.clone())),
            (None, Some(_)) => Some(ClientDir::Temporary(
                TempDir::new("tezdao-client").context("Failed to create client base directory")?,
            )),
            (None, None) => None,
        };

        let watcher = ConfirmationWatcher::new(
            rpc::create_client().context("Failed to create HTTP client")?,
            endpoint.clone(),
            config.confirmations,
            config.poll_interval(),
        );

        let originator = Self {
            endpoint,
            source: signer.source,
            config,
            client_dir,
            watcher,
            next_alias: AtomicUsize::new(0),
        };

        if let Some(secret_key) = &signer.secret_key {
            let args = originator
                .cmd()
                .import_secret_key(&originator.source, secret_key);
            originator
                .run(args)
                .await
                .context(format!("Failed to import secret key for {}", originator.source))?;
            tracing::debug!(source = %originator.source, "Secret key imported");
        }

        tracing::info!(
            endpoint = %originator.endpoint,
            source = %originator.source,
            confirmations = originator.config.confirmations,
            "Origination client ready"
        );

        Ok(originator)
    }

    fn cmd(&self) -> OctezClientCmdBuilder {
        let builder = OctezClientCmdBuilder::new(self.endpoint.as_str());
        match &self.client_dir {
            Some(dir) => builder.base_dir(dir.path()),
            None => builder,
        }
    }

    /// Run the client to completion. Arguments are never logged: they may
    /// carry a secret key.
    async fn run(&self, args: Vec<String>) -> Result<String, DeployError> {
        let output = Command::new(&self.config.client_binary)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| DeployError::Spawn {
                program: self.config.client_binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(DeployError::Rejected {
                status: output.status.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Inject the origination and return the head level observed just before.
    async fn submit(
        &self,
        code: &str,
        storage: &str,
    ) -> Result<(OriginationReceipt, i64), DeployError> {
        let level = self.watcher.head_level().await?;
        let alias = format!(
            "{}-{}",
            self.config.alias_prefix,
            self.next_alias.fetch_add(1, Ordering::Relaxed)
        );

        tracing::debug!(alias, source = %self.source, level, "Submitting origination");

        let args = self.cmd().no_wait().originate(OriginateArgs {
            alias: &alias,
            source: &self.source,
            code,
            storage,
            burn_cap: &self.config.burn_cap,
        });
        let stdout = self.run(args).await?;
        let receipt = parse_origination_output(&stdout)?;

        tracing::info!(
            operation_hash = %receipt.operation_hash,
            contract = %receipt.contract,
            "Origination injected"
        );

        Ok((receipt, level))
    }
}

impl Originator for OctezOriginator {
    async fn originate(&self, code: &str, storage: &str) -> Result<AccountId, DeployError> {
        let waited = self.config.timeout();
        let deadline = Instant::now() + waited;

        let (receipt, level) = tokio::time::timeout_at(deadline, self.submit(code, storage))
            .await
            .map_err(|_| DeployError::Timeout {
                operation_hash: None,
                waited,
            })??;

        let inclusion = tokio::time::timeout_at(
            deadline,
            self.watcher.wait(&receipt.operation_hash, level),
        )
        .await
        .map_err(|_| DeployError::Timeout {
            operation_hash: Some(receipt.operation_hash.clone()),
            waited,
        })??;

        match inclusion.originated_contracts.first() {
            Some(address) if *address != receipt.contract => {
                tracing::warn!(
                    reported = %receipt.contract,
                    on_chain = %address,
                    "Client and chain disagree on the new contract, using the on-chain address"
                );
                Ok(address.clone())
            }
            _ => Ok(receipt.contract),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INJECTED: &str = "\
Node is bootstrapped.
Estimated gas: 1420.040 units (will add 100 for safety)
Estimated storage: 1337 bytes added (will add 20 for safety)
Operation successfully injected in the node.
Operation hash is 'oo7SmMLkgqHAoUbMb6SmRTDfd6iFMJ7LeQw1gS9ty4QASxgEvZr'
NOT waiting for the operation to be included.
Use command
  octez-client wait for oo7SmMLkgqHAoUbMb6SmRTDfd6iFMJ7LeQw1gS9ty4QASxgEvZr to be included --confirmations 1 --branch BLzGd
and/or an external block explorer to make sure that it has been included.
New contract KT1Ad3xmGtbRx7jLxD8JnkGpCFbAzrwG9z2m originated.
Contract memorized as tezdao-0.
";

    #[test]
    fn test_parse_injected_origination() {
        let receipt = parse_origination_output(INJECTED).unwrap();
        assert_eq!(
            receipt.operation_hash,
            "oo7SmMLkgqHAoUbMb6SmRTDfd6iFMJ7LeQw1gS9ty4QASxgEvZr"
        );
        assert_eq!(receipt.contract.as_str(), "KT1Ad3xmGtbRx7jLxD8JnkGpCFbAzrwG9z2m");
    }

    #[test]
    fn test_parse_receipt_listing() {
        let stdout = "\
Operation hash is 'ooAbc'
      Origination:
        This origination was successfully applied
        Originated contracts:
          KT1GuUFcNvLFTHhBxiFKrSMp4jyuLWKHh3yG
        Storage size: 1337 bytes
";
        let receipt = parse_origination_output(stdout).unwrap();
        assert_eq!(receipt.contract.as_str(), "KT1GuUFcNvLFTHhBxiFKrSMp4jyuLWKHh3yG");
    }

    #[test]
    fn test_parse_rejects_incomplete_output() {
        let err = parse_origination_output("Node is bootstrapped.\n").unwrap_err();
        assert!(matches!(err, DeployError::Protocol(_)));

        let err = parse_origination_output("Operation hash is 'ooAbc'\n").unwrap_err();
        assert!(err.to_string().contains("no contract address"));
    }

    #[tokio::test]
    async fn test_missing_client_binary_is_a_spawn_error() {
        let config = OriginationConfig {
            client_binary: PathBuf::from("/nonexistent/octez-client"),
            ..Default::default()
        };
        let signer = SignerConfig {
            source: "deployer".into(),
            secret_key: Some("edskS1234".into()),
        };

        let err = OctezOriginator::connect(
            Url::parse("http://127.0.0.1:1").unwrap(),
            signer,
            config,
        )
        .await
        .unwrap_err();

        let spawn = err
            .chain()
            .find_map(|e| e.downcast_ref::<DeployError>())
            .expect("deploy error in chain");
        assert!(matches!(spawn, DeployError::Spawn { .. }));
    }

    #[cfg(unix)]
    mod client {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        use httpmock::prelude::*;
        use serde_json::json;

        use super::*;

        const INJECTED_HASH: &str = "ooHash";

        /// Lines printed by a client that injected [`INJECTED_HASH`].
        fn injected_output(contract: &str) -> String {
            format!(
                "echo \"Operation hash is '{INJECTED_HASH}'\"\necho \"New contract {contract} originated.\""
            )
        }

        /// An executable stand-in for `octez-client` running `script`.
        fn fake_client(dir: &TempDir, script: &str) -> PathBuf {
            let path = dir.path().join("octez-client");
            std::fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        async fn originator(
            server: &MockServer,
            client_binary: PathBuf,
            timeout_secs: u64,
        ) -> OctezOriginator {
            let config = OriginationConfig {
                client_binary,
                timeout_secs,
                poll_interval_secs: 1,
                ..Default::default()
            };
            let signer = SignerConfig {
                source: "deployer".into(),
                secret_key: None,
            };

            OctezOriginator::connect(Url::parse(&server.base_url()).unwrap(), signer, config)
                .await
                .unwrap()
        }

        async fn mock_head(server: &MockServer, level: i64) {
            server
                .mock_async(|when, then| {
                    when.method(GET).path("/chains/main/blocks/head/header");
                    then.status(200).json_body(json!({ "level": level }));
                })
                .await;
        }

        #[tokio::test]
        async fn test_stalled_submission_times_out_without_hash() {
            let server = MockServer::start_async().await;
            mock_head(&server, 10).await;
            let dir = TempDir::new("tezdao-client-test").unwrap();
            let originator = originator(&server, fake_client(&dir, "sleep 30"), 1).await;

            let started = Instant::now();
            let err = originator
                .originate("{}", "Unit")
                .await
                .unwrap_err();

            assert!(started.elapsed() < Duration::from_secs(10));
            match err {
                DeployError::Timeout {
                    operation_hash,
                    waited,
                } => {
                    assert_eq!(operation_hash, None);
                    assert_eq!(waited, Duration::from_secs(1));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_unconfirmed_operation_times_out_with_hash() {
            let server = MockServer::start_async().await;
            mock_head(&server, 10).await;
            let dir = TempDir::new("tezdao-client-test").unwrap();
            let client = fake_client(&dir, &injected_output("KT1Client"));
            let originator = originator(&server, client, 1).await;

            let err = originator
                .originate("{}", "Unit")
                .await
                .unwrap_err();

            match err {
                DeployError::Timeout { operation_hash, .. } => {
                    assert_eq!(operation_hash.as_deref(), Some(INJECTED_HASH));
                }
                other => panic!("unexpected error: {other}"),
            }
        }

        #[tokio::test]
        async fn test_confirmed_origination_uses_on_chain_address() {
            let server = MockServer::start_async().await;
            let dir = TempDir::new("tezdao-client-test").unwrap();
            let marker = dir.path().join("injected");

            // Head moves from 10 to 11 once the client has injected.
            let before = marker.clone();
            server
                .mock_async(move |when, then| {
                    when.method(GET)
                        .path("/chains/main/blocks/head/header")
                        .is_true(move |_| !before.exists());
                    then.status(200).json_body(json!({ "level": 10 }));
                })
                .await;
            let after = marker.clone();
            server
                .mock_async(move |when, then| {
                    when.method(GET)
                        .path("/chains/main/blocks/head/header")
                        .is_true(move |_| after.exists());
                    then.status(200).json_body(json!({ "level": 11 }));
                })
                .await;
            let block = server
                .mock_async(|when, then| {
                    when.method(GET).path("/chains/main/blocks/11/operations/3");
                    then.status(200).json_body(json!([{
                        "hash": INJECTED_HASH,
                        "contents": [{
                            "kind": "origination",
                            "metadata": {
                                "operation_result": {
                                    "status": "applied",
                                    "originated_contracts": ["KT1OnChain"]
                                }
                            }
                        }]
                    }]));
                })
                .await;

            let script = format!(
                "touch '{}'\n{}",
                marker.display(),
                injected_output("KT1Client")
            );
            let originator = originator(&server, fake_client(&dir, &script), 10).await;

            let address = originator.originate("{}", "Unit").await.unwrap();

            assert_eq!(address, AccountId::new("KT1OnChain"));
            block.assert_async().await;
        }

        #[tokio::test]
        async fn test_client_failure_is_rejected_with_stderr() {
            let server = MockServer::start_async().await;
            mock_head(&server, 10).await;
            let dir = TempDir::new("tezdao-client-test").unwrap();
            let client = fake_client(&dir, "echo 'Error: counter in the past' >&2\nexit 1");
            let originator = originator(&server, client, 5).await;

            let err = originator
                .originate("{}", "Unit")
                .await
                .unwrap_err();

            match err {
                DeployError::Rejected { detail, .. } => {
                    assert_eq!(detail, "Error: counter in the past");
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }
}
