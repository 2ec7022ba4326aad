//! Command builder for octez-client.

use std::path::Path;

/// Arguments of an `originate contract` invocation.
#[derive(Debug, Clone, Copy)]
pub struct OriginateArgs<'a> {
    /// Client alias recorded for the new contract.
    pub alias: &'a str,
    /// Alias or address of the paying account.
    pub source: &'a str,
    /// Contract code, passed verbatim.
    pub code: &'a str,
    /// Initial storage expression.
    pub storage: &'a str,
    /// Burn cap in tez.
    pub burn_cap: &'a str,
}

/// Builder for octez-client commands.
#[derive(Debug, Clone)]
pub struct OctezClientCmdBuilder {
    endpoint: String,
    base_dir: Option<String>,
    wait: Option<String>,
}

impl OctezClientCmdBuilder {
    /// Create a new builder targeting the node at `endpoint`.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            base_dir: None,
            wait: None,
        }
    }

    /// Set the client base directory (wallet and aliases).
    pub fn base_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.base_dir = Some(path.as_ref().display().to_string());
        self
    }

    /// Return as soon as the operation is injected. Confirmations are
    /// tracked separately through the node RPC.
    pub fn no_wait(mut self) -> Self {
        self.wait = Some("none".to_string());
        self
    }

    fn global_args(self) -> Vec<String> {
        let mut cmd = vec!["--endpoint".to_string(), self.endpoint];

        if let Some(base_dir) = self.base_dir {
            cmd.push("--base-dir".to_string());
            cmd.push(base_dir);
        }

        if let Some(wait) = self.wait {
            cmd.push("--wait".to_string());
            cmd.push(wait);
        }

        cmd
    }

    /// Build an `originate contract` command.
    pub fn originate(self, args: OriginateArgs<'_>) -> Vec<String> {
        let mut cmd = self.global_args();
        cmd.extend(
            [
                "originate",
                "contract",
                args.alias,
                "transferring",
                "0",
                "from",
                args.source,
                "running",
                args.code,
                "--init",
                args.storage,
                "--burn-cap",
                args.burn_cap,
                "--force",
            ]
            .map(String::from),
        );
        cmd
    }

    /// Build an `import secret key` command.
    ///
    /// Bare keys are imported as unencrypted; keys already carrying a URI
    /// scheme (`unencrypted:`, `encrypted:`, `remote:`…) are passed as is.
    pub fn import_secret_key(self, alias: &str, secret_key: &str) -> Vec<String> {
        let key_uri = if secret_key.contains(':') {
            secret_key.to_string()
        } else {
            format!("unencrypted:{secret_key}")
        };

        let mut cmd = self.global_args();
        cmd.extend(["import", "secret", "key", alias].map(String::from));
        cmd.push(key_uri);
        cmd.push("--force".to_string());
        cmd
    }
}
