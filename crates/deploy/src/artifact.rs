//! Loading of compiled contract artifacts.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::Stage;

/// The compiled code could not be read.
#[derive(Debug, Error)]
#[error("failed to read artifact {}", path.display())]
pub struct ArtifactError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Compiled contract code, exactly as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub path: PathBuf,
    pub code: String,
    /// Hex-encoded SHA-256 of `code`.
    pub digest: String,
}

/// Read the artifact at `path` without interpreting its contents.
pub async fn load_artifact(path: impl AsRef<Path>) -> Result<Artifact, ArtifactError> {
    let path = path.as_ref().to_path_buf();

    let code = tokio::fs::read_to_string(&path)
        .await
        .map_err(|source| ArtifactError {
            path: path.clone(),
            source,
        })?;

    let digest = hex::encode(Sha256::digest(code.as_bytes()));

    tracing::debug!(path = %path.display(), digest = %digest, bytes = code.len(), "Artifact loaded");

    Ok(Artifact { path, code, digest })
}

/// Location of the three compiled contracts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactPaths {
    pub token: PathBuf,
    pub governance: PathBuf,
    pub treasury: PathBuf,
}

impl ArtifactPaths {
    /// Resolve every path against `dir`. Absolute paths are left untouched.
    pub fn relative_to(&self, dir: &Path) -> Self {
        Self {
            token: dir.join(&self.token),
            governance: dir.join(&self.governance),
            treasury: dir.join(&self.treasury),
        }
    }

    pub fn for_stage(&self, stage: Stage) -> &Path {
        match stage {
            Stage::Token => &self.token,
            Stage::Governance => &self.governance,
            Stage::Treasury => &self.treasury,
        }
    }
}

impl Default for ArtifactPaths {
    fn default() -> Self {
        Self {
            token: PathBuf::from("michelson/fa12_token.tz"),
            governance: PathBuf::from("michelson/flow_dao.tz"),
            treasury: PathBuf::from("michelson/community_fund.tz"),
        }
    }
}
