//! Shared utilities for the Tezos node REST RPC.

use std::time::Duration;

use serde::{Deserialize, de::DeserializeOwned};
use url::Url;

use crate::DeployError;

/// Default timeout for RPC requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Create an HTTP client for node RPC requests.
pub fn create_client() -> Result<reqwest::Client, DeployError> {
    Ok(reqwest::Client::builder().timeout(DEFAULT_TIMEOUT).build()?)
}

/// Make sure `endpoint` ends with a slash so RPC paths are appended to it
/// instead of replacing its last segment.
pub fn normalize_endpoint(mut endpoint: Url) -> Url {
    if !endpoint.path().ends_with('/') {
        let path = format!("{}/", endpoint.path());
        endpoint.set_path(&path);
    }
    endpoint
}

/// GET `path` (relative to `endpoint`) and deserialize the JSON body.
pub async fn get_json<T: DeserializeOwned>(
    client: &reqwest::Client,
    endpoint: &Url,
    path: &str,
) -> Result<T, DeployError> {
    let url = endpoint
        .join(path)
        .map_err(|e| DeployError::Protocol(format!("invalid RPC path {path}: {e}")))?;

    let response = client.get(url).send().await?;
    let status = response.status();

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(DeployError::Protocol(format!(
            "GET {path} returned {status}: {}",
            body.trim()
        )));
    }

    Ok(response.json().await?)
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    level: i64,
}

/// Level of the node's current head block.
pub async fn head_level(client: &reqwest::Client, endpoint: &Url) -> Result<i64, DeployError> {
    let header: BlockHeader = get_json(client, endpoint, "chains/main/blocks/head/header").await?;
    Ok(header.level)
}
