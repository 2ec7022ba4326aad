//! tezdao-deploy - Deployment library for a token-governed DAO on Tezos.
//!
//! This crate originates the governance token, the DAO bound to it and the
//! community fund controlled by the DAO, in that order, waiting for each
//! contract to be confirmed before rendering the storage of the next.

mod artifact;
pub use artifact::{Artifact, ArtifactError, ArtifactPaths, load_artifact};

mod config;
pub use config::{
    CONFIG_FILENAME, DEFAULT_ENDPOINT, DeployConfig, ENV_PREFIX, NetworkConfig, ParametersConfig,
};

pub mod michelson;

mod orchestrator;
pub use orchestrator::{DeploymentAborted, InvalidSpecs, Orchestrator, PipelineState, StageError};

pub mod originate;
pub use originate::{DeployError, OctezOriginator, OriginationConfig, Originator, SignerConfig};

mod report;
pub use report::{DeploymentReport, Outcome};

mod results;
pub use results::{AccountId, DeploymentResult, DeploymentResults};

mod rpc;

mod stage;
pub use stage::Stage;

mod storage;
pub use storage::{
    ContractSpec, DEFAULT_GOVERNANCE_METADATA_URI, DEFAULT_TOKEN_ICON,
    DEFAULT_TOKEN_METADATA_URI, DeploymentParameters, RenderError, StorageTemplate, StorageText,
    TokenMetadata, render_governance, render_token, render_treasury,
};
